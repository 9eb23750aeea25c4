//! In-memory stand-ins for the ledger and the signing agent.
//!
//! [`FakeLedger`] enforces the same rules the on-chain lottery does, so the
//! synchronizer and the orchestrator can be driven through whole rounds without a
//! node. Handles returned by [`FakeLedger::as_account`] share one ledger state.

use crate::{
    contract::{
        ContractError,
        LotteryContract,
        Receipt,
        SigningAgent,
        SigningRequest,
        TxHandle,
        TxKind,
    },
    gateway::{
        AccountSource,
        GatewayError,
    },
};
use fuels::{
    prelude::ContractId,
    types::{
        Address,
        Identity,
    },
};
use rand::{
    Rng,
    SeedableRng,
    rngs::StdRng,
};
use std::{
    collections::{
        HashSet,
        VecDeque,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
};
use tokio::sync::watch;

pub fn identity(byte: u8) -> Identity {
    Identity::Address(Address::from([byte; 32]))
}

/// A latch that parks futures until [`Gate::open`] is called or the gate is dropped.
#[derive(Debug)]
pub struct Gate {
    tx: watch::Sender<bool>,
}

impl Gate {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }
}

async fn pass_gate(gate: Option<watch::Receiver<bool>>) {
    if let Some(mut rx) = gate {
        // a dropped gate counts as open
        let _ = rx.wait_for(|open| *open).await;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Read {
    Manager,
    Winner,
    IsComplete,
    Claimed,
    BlockHeight,
}

#[derive(Debug)]
struct LedgerState {
    manager: Identity,
    entrants: Vec<(Identity, u64)>,
    winner: Option<Identity>,
    complete: bool,
    claimed: bool,
    block_height: u32,
    rng: StdRng,
    offline: bool,
    failing_reads: HashSet<Read>,
    unreachable_reads: HashSet<Read>,
    stall: Option<watch::Receiver<bool>>,
    held_confirmations: Option<watch::Receiver<bool>>,
    forced: Option<ForcedState>,
    submissions: Vec<(TxKind, Identity)>,
}

/// Raw values reported by reads regardless of the ledger rules.
#[derive(Clone, Copy, Debug)]
struct ForcedState {
    complete: bool,
    claimed: bool,
}

impl LedgerState {
    fn lock(state: &Mutex<LedgerState>) -> MutexGuard<'_, LedgerState> {
        state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self, read: Read) -> Result<(), ContractError> {
        if self.offline || self.unreachable_reads.contains(&read) {
            return Err(ContractError::RpcUnavailable(
                "connection refused".to_string(),
            ));
        }
        if self.failing_reads.contains(&read) {
            return Err(ContractError::CallReverted(format!("{read:?} failed")));
        }
        Ok(())
    }

    fn apply(&mut self, kind: TxKind, caller: &Identity, stake: u64) -> Result<(), String> {
        match kind {
            TxKind::Enter => {
                if self.complete {
                    return Err("lottery is closed".to_string());
                }
                if stake == 0 {
                    return Err("entry requires a stake".to_string());
                }
                self.entrants.push((caller.clone(), stake));
            }
            TxKind::PickWinner => {
                if *caller != self.manager {
                    return Err("only the manager can pick a winner".to_string());
                }
                if self.complete {
                    return Err("winner already picked".to_string());
                }
                if self.entrants.is_empty() {
                    return Err("no entrants".to_string());
                }
                let index = self.rng.random_range(0..self.entrants.len());
                self.winner = Some(self.entrants[index].0.clone());
                self.complete = true;
            }
            TxKind::ClaimPrize => {
                if self.winner.as_ref() != Some(caller) {
                    return Err("only the winner can claim".to_string());
                }
                if self.claimed {
                    return Err("prize already claimed".to_string());
                }
                self.claimed = true;
            }
        }
        self.block_height += 1;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct FakeLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl FakeLedger {
    pub fn new(manager: Identity) -> Self {
        Self::with_seed(manager, 7)
    }

    pub fn with_seed(manager: Identity, seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                manager,
                entrants: Vec::new(),
                winner: None,
                complete: false,
                claimed: false,
                block_height: 1,
                rng: StdRng::seed_from_u64(seed),
                offline: false,
                failing_reads: HashSet::new(),
                unreachable_reads: HashSet::new(),
                stall: None,
                held_confirmations: None,
                forced: None,
                submissions: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        LedgerState::lock(&self.state)
    }

    /// A contract handle whose writes are signed by `caller`.
    pub fn as_account(&self, caller: Identity, agent: ScriptedAgent) -> FakeLottery {
        FakeLottery {
            ledger: self.clone(),
            caller,
            agent,
        }
    }

    pub fn entrants(&self) -> Vec<Identity> {
        self.state().entrants.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn winner(&self) -> Option<Identity> {
        self.state().winner.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.state().complete
    }

    pub fn is_claimed(&self) -> bool {
        self.state().claimed
    }

    /// Closes the round with a chosen winner, bypassing the manager check.
    pub fn close_with_winner(&self, winner: Identity) {
        let mut state = self.state();
        state.winner = Some(winner);
        state.complete = true;
    }

    /// Makes reads report these flags even when they contradict each other.
    pub fn force_flags(&self, complete: bool, claimed: bool) {
        self.state().forced = Some(ForcedState { complete, claimed });
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn fail_read(&self, read: Read) {
        self.state().failing_reads.insert(read);
    }

    /// Makes one read fail as if the node could not be reached.
    pub fn drop_read(&self, read: Read) {
        self.state().unreachable_reads.insert(read);
    }

    pub fn restore_reads(&self) {
        let mut state = self.state();
        state.failing_reads.clear();
        state.unreachable_reads.clear();
    }

    /// Reads started from now on park until the returned gate opens.
    pub fn stall_reads(&self) -> Gate {
        let (gate, rx) = Gate::new();
        self.state().stall = Some(rx);
        gate
    }

    /// Reads started from now on proceed; already parked reads stay parked.
    pub fn clear_stall(&self) {
        self.state().stall = None;
    }

    /// Transactions submitted from now on stay unconfirmed until the returned gate opens.
    pub fn hold_confirmations(&self) -> Gate {
        let (gate, rx) = Gate::new();
        self.state().held_confirmations = Some(rx);
        gate
    }

    pub fn submissions(&self) -> Vec<(TxKind, Identity)> {
        self.state().submissions.clone()
    }
}

#[derive(Clone, Debug)]
pub struct FakeLottery {
    ledger: FakeLedger,
    caller: Identity,
    agent: ScriptedAgent,
}

impl FakeLottery {
    async fn read<T>(
        &self,
        read: Read,
        value: impl FnOnce(&LedgerState) -> T,
    ) -> Result<T, ContractError> {
        let stall = self.ledger.state().stall.clone();
        pass_gate(stall).await;
        let state = self.ledger.state();
        state.read(read)?;
        Ok(value(&state))
    }

    async fn submit(&self, kind: TxKind, stake: u64) -> Result<FakeTxHandle, ContractError> {
        let approved = self
            .agent
            .authorize(SigningRequest {
                kind,
                contract_id: ContractId::zeroed(),
                amount: stake,
                signer: self.caller.clone(),
            })
            .await;
        if !approved {
            return Err(ContractError::TxRejected("declined by user".to_string()));
        }
        let mut state = self.ledger.state();
        if state.offline {
            return Err(ContractError::RpcUnavailable(
                "connection refused".to_string(),
            ));
        }
        state.submissions.push((kind, self.caller.clone()));
        Ok(FakeTxHandle {
            ledger: self.ledger.clone(),
            caller: self.caller.clone(),
            kind,
            stake,
            hold: state.held_confirmations.clone(),
            seq: state.submissions.len(),
        })
    }
}

impl LotteryContract for FakeLottery {
    type Handle = FakeTxHandle;

    async fn get_manager(&self) -> Result<Identity, ContractError> {
        self.read(Read::Manager, |s| s.manager.clone()).await
    }

    async fn get_winner(&self) -> Result<Identity, ContractError> {
        self.read(Read::Winner, |s| {
            s.winner.clone().unwrap_or_else(crate::unset_identity)
        })
        .await
    }

    async fn is_complete(&self) -> Result<bool, ContractError> {
        self.read(Read::IsComplete, |s| {
            s.forced.map(|f| f.complete).unwrap_or(s.complete)
        })
        .await
    }

    async fn is_claimed(&self) -> Result<bool, ContractError> {
        self.read(Read::Claimed, |s| s.forced.map(|f| f.claimed).unwrap_or(s.claimed))
            .await
    }

    async fn latest_block_height(&self) -> Result<u32, ContractError> {
        self.read(Read::BlockHeight, |s| s.block_height).await
    }

    async fn enter(&self, stake: u64) -> Result<FakeTxHandle, ContractError> {
        self.submit(TxKind::Enter, stake).await
    }

    async fn pick_winner(&self) -> Result<FakeTxHandle, ContractError> {
        self.submit(TxKind::PickWinner, 0).await
    }

    async fn claim_prize(&self) -> Result<FakeTxHandle, ContractError> {
        self.submit(TxKind::ClaimPrize, 0).await
    }
}

#[derive(Debug)]
pub struct FakeTxHandle {
    ledger: FakeLedger,
    caller: Identity,
    kind: TxKind,
    stake: u64,
    hold: Option<watch::Receiver<bool>>,
    seq: usize,
}

impl TxHandle for FakeTxHandle {
    fn tx_id(&self) -> Option<String> {
        Some(format!("{:064x}", self.seq))
    }

    async fn await_confirmation(self) -> Result<Receipt, ContractError> {
        let tx_id = self.tx_id();
        pass_gate(self.hold).await;
        let mut state = self.ledger.state();
        state
            .apply(self.kind, &self.caller, self.stake)
            .map_err(ContractError::TxReverted)?;
        Ok(Receipt { tx_id })
    }
}

/// A signing agent that answers from a script, approving once the script runs out.
#[derive(Clone, Debug, Default)]
pub struct ScriptedAgent {
    answers: Arc<Mutex<VecDeque<bool>>>,
    requests: Arc<Mutex<Vec<SigningRequest>>>,
    decline_all: bool,
}

impl ScriptedAgent {
    pub fn approving() -> Self {
        Self::default()
    }

    pub fn declining() -> Self {
        Self {
            decline_all: true,
            ..Self::default()
        }
    }

    pub fn push_answer(&self, approved: bool) {
        self.answers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(approved);
    }

    pub fn requests(&self) -> Vec<SigningRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl SigningAgent for ScriptedAgent {
    async fn authorize(&self, request: SigningRequest) -> bool {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request);
        let scripted = self
            .answers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        scripted.unwrap_or(!self.decline_all)
    }
}

/// Keystore stand-in: profiles unlock to fixed identities.
#[derive(Debug)]
pub struct FakeAccounts {
    profiles: Vec<(String, Identity)>,
    rejected: HashSet<String>,
    hold: Option<watch::Receiver<bool>>,
}

impl FakeAccounts {
    pub fn new(profiles: Vec<(&str, Identity)>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|(name, id)| (name.to_string(), id))
                .collect(),
            rejected: HashSet::new(),
            hold: None,
        }
    }

    /// Unlocking `name` fails as if the password were wrong.
    pub fn rejecting(mut self, name: &str) -> Self {
        self.rejected.insert(name.to_string());
        self
    }

    /// Unlocks park until the gate opens, like a password prompt left waiting.
    pub fn hold_unlocks(&mut self) -> Gate {
        let (gate, rx) = Gate::new();
        self.hold = Some(rx);
        gate
    }
}

impl AccountSource for FakeAccounts {
    type Signer = Identity;

    fn profiles(&self) -> Vec<String> {
        self.profiles.iter().map(|(name, _)| name.clone()).collect()
    }

    async fn unlock(&self, profile: &str) -> Result<(Identity, Identity), GatewayError> {
        pass_gate(self.hold.clone()).await;
        if self.rejected.contains(profile) {
            return Err(GatewayError::Unlock {
                name: profile.to_string(),
                reason: "invalid password".to_string(),
            });
        }
        self.profiles
            .iter()
            .find(|(name, _)| name == profile)
            .map(|(_, id)| (id.clone(), id.clone()))
            .ok_or_else(|| GatewayError::UnknownAccount(profile.to_string()))
    }
}
