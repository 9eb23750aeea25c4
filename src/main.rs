use clap::{
    ArgGroup,
    Parser,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use fuels::prelude::ContractId;
use lottery_client::{
    client,
    state::Role,
    wallets,
};
use std::{
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
    sync::OnceLock,
    time::Duration,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(
    name = "lottery-client",
    about = "Terminal client for the on-chain lottery: enter, pick a winner, claim the prize",
    version,
    group(
        ArgGroup::new("network")
            .args(["devnet", "testnet", "local"])
            .required(true)
    )
)]
struct Args {
    /// Connect to Fuel devnet
    #[arg(long)]
    devnet: bool,

    /// Connect to Fuel testnet
    #[arg(long)]
    testnet: bool,

    /// Connect to a local Fuel node
    #[arg(long)]
    local: bool,

    /// Override RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// forc-wallet profile; repeat to make several accounts switchable with `a`
    #[arg(long = "wallet", required = true)]
    wallets: Vec<String>,

    /// Override forc-wallet directory (defaults to ~/.fuel/wallets)
    #[arg(long)]
    wallet_dir: Option<String>,

    /// Lottery contract id (defaults to the latest compatible recorded deployment)
    #[arg(short, long)]
    contract_id: Option<String>,

    /// Stake sent with `enter`, in base asset units
    #[arg(long, default_value_t = client::DEFAULT_STAKE)]
    stake: u64,

    /// View shown at startup
    #[arg(long, value_enum, default_value = "entrant")]
    role: RoleArg,

    /// Milliseconds between background refreshes
    #[arg(long, default_value_t = client::DEFAULT_POLL_INTERVAL.as_millis() as u64)]
    poll_interval_ms: u64,

    /// Directory for the daily rolling log file
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum RoleArg {
    Entrant,
    Owner,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Entrant => Role::Entrant,
            RoleArg::Owner => Role::Owner,
        }
    }
}

impl Args {
    fn network(&self) -> client::NetworkTarget {
        let url = self.rpc_url.clone();
        if self.devnet {
            client::NetworkTarget::Devnet {
                url: url.unwrap_or_else(|| client::DEFAULT_DEVNET_RPC_URL.to_string()),
            }
        } else if self.testnet {
            client::NetworkTarget::Testnet {
                url: url.unwrap_or_else(|| client::DEFAULT_TESTNET_RPC_URL.to_string()),
            }
        } else {
            client::NetworkTarget::LocalNode {
                url: url.unwrap_or_else(|| client::DEFAULT_LOCAL_RPC_URL.to_string()),
            }
        }
    }

    fn into_config(self) -> Result<client::AppConfig> {
        if self.poll_interval_ms == 0 {
            return Err(eyre!("--poll-interval-ms must be greater than zero"));
        }
        let network = self.network();
        let wallet_dir = wallets::resolve_wallet_dir(self.wallet_dir.as_deref())?;
        let contract_id = self
            .contract_id
            .as_deref()
            .map(|raw| {
                ContractId::from_str(raw.trim_start_matches("fuel"))
                    .map_err(|_| eyre!("Invalid contract id: {raw}"))
            })
            .transpose()?;
        Ok(client::AppConfig {
            network,
            wallet_dir,
            wallets: self.wallets,
            contract_id,
            stake: self.stake,
            role: self.role.into(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        })
    }
}

/// Logs go to a file; stdout belongs to the terminal UI.
fn init_tracing(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .wrap_err_with(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let appender = rolling::daily(log_dir, "lottery-client.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = LOG_GUARD.set(guard);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!(e))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    init_tracing(&args.log_dir)?;
    tracing::info!("starting lottery client");
    let config = args.into_config()?;
    client::run_app(config).await
}
