use crate::{
    contract::{
        DEFAULT_SAFE_SCRIPT_GAS_LIMIT,
        FuelLottery,
        LotteryContract,
    },
    deployment::{
        DeploymentEnv,
        DeploymentStore,
    },
    gateway::{
        AccountSource,
        KeystoreSource,
        LedgerGateway,
        PromptAgent,
        SigningPrompt,
    },
    lottery_abi_hash,
    orchestrator::{
        Orchestrator,
        TxOutcome,
        TxPhase,
    },
    state::{
        Role,
        UiState as LotteryState,
        derive_state,
    },
    sync::{
        SyncCommand,
        SyncTrigger,
        Synchronizer,
        sync_worker,
    },
    ui,
    view::Snapshot,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use fuels::{
    prelude::{
        ContractId,
        Provider,
    },
    types::Identity,
};
use std::{
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{
    error,
    info,
    warn,
};

pub const DEFAULT_TESTNET_RPC_URL: &str = "https://testnet.fuel.network";
pub const DEFAULT_DEVNET_RPC_URL: &str = "https://devnet.fuel.network";
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:4000/";
/// 0.1 of the 9-decimal base asset.
pub const DEFAULT_STAKE: u64 = 100_000_000;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5_000);
const MAX_ERRORS: usize = 50;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NetworkTarget {
    Devnet { url: String },
    Testnet { url: String },
    LocalNode { url: String },
}

impl NetworkTarget {
    pub fn env(&self) -> DeploymentEnv {
        match self {
            NetworkTarget::Devnet { .. } => DeploymentEnv::Dev,
            NetworkTarget::Testnet { .. } => DeploymentEnv::Test,
            NetworkTarget::LocalNode { .. } => DeploymentEnv::Local,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            NetworkTarget::Devnet { url }
            | NetworkTarget::Testnet { url }
            | NetworkTarget::LocalNode { url } => url,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub network: NetworkTarget,
    pub wallet_dir: PathBuf,
    /// The first profile is active at startup.
    pub wallets: Vec<String>,
    pub contract_id: Option<ContractId>,
    pub stake: u64,
    pub role: Role,
    pub poll_interval: Duration,
}

/// Everything the UI needs for one frame.
#[derive(Clone, Debug)]
pub struct AppSnapshot {
    pub role: Role,
    pub account: Option<(String, Identity)>,
    pub network: String,
    pub contract_id: ContractId,
    pub stake: u64,
    pub snapshot: Snapshot,
    pub ui_state: LotteryState,
    pub phase: TxPhase,
    pub status: String,
    pub errors: Vec<String>,
}

pub struct AppController<S: AccountSource, C: LotteryContract> {
    gateway: Arc<LedgerGateway<S>>,
    writers: Vec<(Identity, C)>,
    sync: Arc<Synchronizer<C>>,
    orchestrator: Arc<Orchestrator<C>>,
    network: String,
    contract_id: ContractId,
    stake: u64,
    role: Role,
    status: String,
    errors: Vec<String>,
}

impl<S: AccountSource, C: LotteryContract> AppController<S, C> {
    /// `writers` holds one contract handle per unlocked account; `reader` serves the reads.
    pub fn new(
        gateway: Arc<LedgerGateway<S>>,
        writers: Vec<(Identity, C)>,
        reader: C,
        network: impl Into<String>,
        contract_id: ContractId,
        stake: u64,
        role: Role,
    ) -> Self {
        let sync = Arc::new(Synchronizer::new(reader));
        let orchestrator = Arc::new(Orchestrator::new(
            sync.clone(),
            gateway.on_identity_change(),
        ));
        Self {
            gateway,
            writers,
            sync,
            orchestrator,
            network: network.into(),
            contract_id,
            stake,
            role,
            status: String::new(),
            errors: Vec::new(),
        }
    }

    fn current_snapshot(&self) -> Snapshot {
        let identity = self.gateway.current_identity();
        self.sync.latest().snapshot_for(identity.as_ref())
    }

    pub fn ui_state(&self) -> LotteryState {
        let identity = self.gateway.current_identity();
        derive_state(&self.current_snapshot(), identity.as_ref(), self.role)
    }

    pub fn build_snapshot(&self) -> AppSnapshot {
        let account = self
            .gateway
            .active_account()
            .map(|a| (a.name.clone(), a.identity.clone()));
        AppSnapshot {
            role: self.role,
            account,
            network: self.network.clone(),
            contract_id: self.contract_id,
            stake: self.stake,
            snapshot: self.current_snapshot(),
            ui_state: self.ui_state(),
            phase: self.orchestrator.phase(),
            status: self.status.clone(),
            errors: self.errors.clone(),
        }
    }

    pub fn toggle_role(&mut self) {
        self.role = self.role.toggled();
        self.set_status(format!("Switched to the {} view", self.role));
    }

    pub fn next_account(&mut self) {
        if !self.orchestrator.phase().is_idle() {
            self.set_status("Wait for the pending transaction before switching accounts");
            return;
        }
        match self.gateway.next_account() {
            Ok(_) => {
                let name = self
                    .gateway
                    .active_account()
                    .map(|a| a.name.clone())
                    .unwrap_or_default();
                self.set_status(format!("Switched to account {name}"));
            }
            Err(e) => self.push_errors(vec![format!("Account switch failed: {e}")]),
        }
    }

    /// Starts the write the current state allows, if any.
    pub fn act(&mut self, outcomes: &mpsc::UnboundedSender<TxOutcome>) {
        let state = self.ui_state();
        let Some(kind) = state.allowed_action() else {
            self.set_status(format!("No action available ({state:?})"));
            return;
        };
        let identity = self.gateway.current_identity();
        let Some(contract) = identity
            .as_ref()
            .and_then(|id| self.writers.iter().find(|(owner, _)| owner == id))
            .map(|(_, contract)| contract.clone())
        else {
            self.push_errors(vec!["No signing account for the active identity".to_string()]);
            return;
        };
        // leave Idle before yielding so queued key presses see the write in flight
        let Some(submission) = self.orchestrator.try_begin(kind) else {
            self.set_status("A transaction is already in flight");
            return;
        };

        let orchestrator = self.orchestrator.clone();
        let stake = self.stake;
        let outcomes = outcomes.clone();
        tokio::spawn(async move {
            let outcome = orchestrator.run(submission, &contract, stake).await;
            let _ = outcomes.send(outcome);
        });
        self.set_status(format!("Submitting {kind}..."));
    }

    pub fn record_outcome(&mut self, outcome: TxOutcome) {
        match &outcome {
            TxOutcome::Confirmed { kind, receipt } => {
                let tx = receipt.tx_id.as_deref().unwrap_or("unknown");
                self.set_status(format!("{kind} confirmed (tx {tx})"));
            }
            other => {
                if let Some(message) = other.user_error() {
                    self.set_status("");
                    self.push_errors(vec![message]);
                }
            }
        }
    }

    pub fn on_signed(&mut self, kind: crate::contract::TxKind, approved: bool) {
        if approved {
            self.set_status(format!("{kind} signed; submitting..."));
        } else {
            self.set_status(format!("{kind} declined"));
        }
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
    }

    fn push_errors(&mut self, mut items: Vec<String>) {
        if items.is_empty() {
            return;
        }
        for item in &items {
            error!("{}", item);
        }
        self.errors.append(&mut items);
        if self.errors.len() > MAX_ERRORS {
            let drain = self.errors.len() - MAX_ERRORS;
            self.errors.drain(0..drain);
        }
    }
}

/// Connects to the network, unlocks the configured wallets and binds the lottery contract.
pub async fn connect_fuel(
    config: &AppConfig,
) -> Result<(
    AppController<KeystoreSource, FuelLottery<PromptAgent>>,
    mpsc::UnboundedReceiver<SigningPrompt>,
)> {
    let url = config.network.url();
    let env = config.network.env();
    info!(%env, %url, "connecting to provider");
    let provider = Provider::connect(url)
        .await
        .wrap_err_with(|| format!("Failed to connect to provider at {url}"))?;

    let gateway = Arc::new(LedgerGateway::new(KeystoreSource::new(
        config.wallet_dir.clone(),
        config.wallets.clone(),
        provider.clone(),
    )));
    gateway.connect().await.wrap_err("Unable to connect a wallet")?;

    let contract_id = match config.contract_id {
        Some(id) => id,
        None => {
            let store = DeploymentStore::new(env);
            store
                .latest_compatible(&lottery_abi_hash(), url)?
                .contract_id()?
        }
    };

    let consensus_parameters = provider.consensus_parameters().await?;
    let base_asset_id = *consensus_parameters.base_asset_id();
    let max_gas_per_tx = consensus_parameters.tx_params().max_gas_per_tx();
    let safe_script_gas_limit = max_gas_per_tx
        .saturating_sub(1)
        .clamp(1, DEFAULT_SAFE_SCRIPT_GAS_LIMIT);
    info!(safe_script_gas_limit, max_gas_per_tx, "using safe script gas limit");

    let (agent, prompts) = PromptAgent::channel();
    let writers: Vec<_> = gateway
        .accounts()
        .iter()
        .map(|account| {
            let contract = FuelLottery::new(
                contract_id,
                account.signer.clone(),
                agent.clone(),
                base_asset_id,
                safe_script_gas_limit,
            );
            (account.identity.clone(), contract)
        })
        .collect();
    let reader = writers
        .first()
        .map(|(_, contract)| contract.clone())
        .ok_or_else(|| eyre!("No wallet was unlocked"))?;

    let controller = AppController::new(
        gateway,
        writers,
        reader,
        env.to_string(),
        contract_id,
        config.stake,
        config.role,
    );
    Ok((controller, prompts))
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let (controller, prompts) = connect_fuel(&config).await?;
    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    info!("Starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(
        controller,
        prompts,
        &mut ui_state,
        &mut input_events,
        config.poll_interval,
    )
    .await;
    ui::terminal_exit()?;
    res
}

pub async fn run_loop<S: AccountSource, C: LotteryContract>(
    mut controller: AppController<S, C>,
    mut prompts: mpsc::UnboundedReceiver<SigningPrompt>,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
    poll_interval: Duration,
) -> Result<()> {
    info!("Running app loop");
    let (sync_cmd_tx, sync_cmd_rx) = mpsc::unbounded_channel();
    let sync_handle = tokio::spawn(sync_worker(
        controller.sync.clone(),
        controller.gateway.on_identity_change(),
        sync_cmd_rx,
        poll_interval,
    ));
    let mut published = controller.sync.subscribe();
    let mut phase = controller.orchestrator.subscribe();
    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();

    ui::draw(ui_state, &controller.build_snapshot()).wrap_err("initial draw failed")?;

    loop {
        tokio::select! {
            changed = published.changed() => {
                if changed.is_err() {
                    warn!("snapshot channel closed");
                    break;
                }
            }
            Ok(()) = phase.changed() => {}
            Some(outcome) = outcome_rx.recv() => {
                controller.record_outcome(outcome);
            }
            Some(prompt) = prompts.recv() => {
                if let Err(prompt) = ui_state.open_signing(prompt) {
                    ui::decline_unshown(prompt);
                } else {
                    controller.set_status("Confirm the signature request (y/n)");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Redraw => {}
                    ui::UserEvent::ToggleView => controller.toggle_role(),
                    ui::UserEvent::NextAccount => controller.next_account(),
                    ui::UserEvent::Act => controller.act(&outcome_tx),
                    ui::UserEvent::Refresh => {
                        controller.set_status("Refreshing...");
                        let _ = sync_cmd_tx.send(SyncCommand::Trigger(SyncTrigger::PollTick));
                    }
                    ui::UserEvent::Signed { kind, approved } => {
                        controller.on_signed(kind, approved);
                    }
                }
            }
        }
        ui::draw(ui_state, &controller.build_snapshot()).wrap_err("draw failed")?;
    }

    let _ = sync_cmd_tx.send(SyncCommand::Shutdown);
    if let Err(e) = sync_handle.await {
        warn!(error = %e, "sync worker ended abnormally");
    }
    Ok(())
}
