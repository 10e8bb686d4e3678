use alloy::primitives::Address;
use clap::{
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use pool_session::{
    amount::Amount,
    client::{
        ActiveConnection,
        AppConfig,
        AppController,
        CancelToken,
        format_pool_summary,
        format_session_summary,
        report_error,
    },
    connection::TxOutcome,
    deployment::{
        AddressBook,
        DEFAULT_ADDRESS_BOOK,
        Network,
        load_schedule,
    },
    estimate::DrawingSchedule,
    identity::KeystoreIdentity,
    store::SessionStore,
    wallets::resolve_wallet_dir,
};
use std::{
    sync::Arc,
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
use url::Url;

#[derive(Parser, Debug)]
#[command(
    name = "pool-session",
    about = "Inspect and manage a no-loss savings pool position",
    version
)]
struct Args {
    /// Network whose address book entry and default RPC endpoint are used
    #[arg(long, value_enum, default_value = "mainnet")]
    network: Network,

    /// Override RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Address book mapping networks to contract addresses
    #[arg(long, default_value = DEFAULT_ADDRESS_BOOK)]
    addresses: String,

    /// Drawing schedule file (defaults to the weekly Friday table)
    #[arg(long)]
    schedule: Option<String>,

    /// Keystore directory (defaults to ~/.ethereum/keystore)
    #[arg(long)]
    keystore_dir: Option<String>,

    /// Keystore to unlock; without it the session stays logged out
    #[arg(long)]
    wallet: Option<String>,

    /// Contact email shown with the session
    #[arg(long)]
    email: Option<String>,

    /// Seconds between pool polls in `watch`
    #[arg(long, default_value_t = 15)]
    poll_secs: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the session and the current prize estimate (default)
    Status,
    /// Poll the pool and print each new estimate until Ctrl-C
    Watch,
    /// Show the proxy and balances of the unlocked wallet
    Proxy,
    /// Deploy a proxy for the unlocked wallet
    CreateProxy,
    /// Move the Dai held by the proxy into the pool
    Deposit,
    /// Withdraw from the pool through the proxy
    Withdraw {
        /// Dai amount, e.g. 12.5
        amount: Amount,
        /// Recipient (defaults to the unlocked wallet)
        #[arg(long)]
        to: Option<Address>,
    },
}

fn init_tracing() -> Result<WorkerGuard> {
    let appender = rolling::daily("logs", "pool-session.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("initializing tracing: {e}"))?;
    Ok(guard)
}

fn print_outcome(action: &str, outcome: &TxOutcome) {
    match outcome.block_number {
        Some(block) => println!("{action}: {} (block {block})", outcome.tx_hash),
        None => println!("{action}: {}", outcome.tx_hash),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let _guard = init_tracing()?;
    let args = Args::parse();

    let rpc_url: Url = args
        .rpc_url
        .as_deref()
        .unwrap_or(args.network.default_rpc_url())
        .parse()
        .wrap_err("parsing RPC URL")?;
    let addresses = AddressBook::load(&args.addresses)
        .wrap_err("loading address book")?
        .resolve(args.network)?;
    let schedule = match args.schedule.as_deref() {
        Some(path) => load_schedule(path)?,
        None => DrawingSchedule::default(),
    };

    let keystore_dir =
        resolve_wallet_dir(args.keystore_dir.as_deref()).wrap_err("resolving keystore directory")?;
    let identity = KeystoreIdentity::new(
        keystore_dir,
        args.wallet.clone(),
        args.email.clone(),
        rpc_url.clone(),
    );
    if identity.wallet_name().is_some() {
        identity.login().inspect_err(report_error)?;
    }

    let config = AppConfig {
        network: args.network,
        rpc_url,
        addresses,
        schedule,
        poll_interval: Duration::from_secs(args.poll_secs.max(1)),
    };
    tracing::info!(network = %config.network, endpoint = %config.rpc_url, "starting");
    let controller = AppController::new(config, identity, Arc::new(SessionStore::new()));
    let cancel = CancelToken::new();

    match args.command.unwrap_or(Command::Status) {
        Command::Status => {
            controller.refresh(&cancel).await.inspect_err(report_error)?;
            let view = controller.store().view();
            if let Some(session) = &view.session {
                println!("{}\n", format_session_summary(session));
            }
            if let Some(pool) = &view.pool {
                println!("{}", format_pool_summary(pool));
            }
        }
        Command::Watch => {
            controller
                .watch(&cancel, |data| println!("{}\n", format_pool_summary(data)))
                .await
                .inspect_err(report_error)?;
        }
        Command::Proxy => {
            let active = connect(&controller).await?;
            let session = controller
                .sync_session(active.reader(), active.metadata(), &cancel)
                .await
                .inspect_err(report_error)?;
            println!("{}", format_session_summary(&session));
        }
        Command::CreateProxy => {
            let active = connect(&controller).await?;
            let outcome = controller
                .create_proxy(&active)
                .await
                .inspect_err(report_error)?;
            print_outcome("Proxy created", &outcome);
        }
        Command::Deposit => {
            let active = connect(&controller).await?;
            let outcome = controller
                .deposit(&active)
                .await
                .inspect_err(report_error)?;
            print_outcome("Deposited", &outcome);
        }
        Command::Withdraw { amount, to } => {
            if amount.is_zero() {
                return Err(eyre!("withdraw amount must be greater than zero"));
            }
            let active = connect(&controller).await?;
            let outcome = controller
                .withdraw(&active, amount, to)
                .await
                .inspect_err(report_error)?;
            print_outcome(&format!("Withdrew {amount} Dai"), &outcome);
        }
    }
    Ok(())
}

async fn connect(controller: &AppController<KeystoreIdentity>) -> Result<ActiveConnection> {
    let active = controller.connect().await.inspect_err(report_error)?;
    if let ActiveConnection::Anonymous(connection) = &active {
        tracing::info!(%connection, "running without a wallet");
    }
    Ok(active)
}
