mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::common::WalletArgs;

#[derive(Parser)]
#[command(name = "mw-cli", about = "Wallet developer CLI", version)]
struct Cli {
    #[command(flatten)]
    wallet: WalletArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a wallet, printing its recovery phrase.
    Init(commands::wallet::InitArgs),
    /// Rebuild a wallet from its recovery phrase.
    Recover(commands::wallet::RecoverArgs),
    /// Print a receive address.
    Address(commands::wallet::AddressArgs),
    /// Wallet balances.
    Balances(commands::chain::BalancesArgs),
    /// Scan a block range for owned outputs.
    Scan(commands::chain::ScanArgs),
    /// Current node tip height.
    ChainHeight,
    /// Fee and input selection for an amount.
    Fees(commands::tx::FeesArgs),
    /// Transaction log.
    Txs(commands::tx::TxsArgs),
    /// Cancel an unfinalized transaction.
    Cancel(commands::tx::CancelArgs),
    /// Push finalized transactions whose earlier post failed.
    Post(commands::tx::PostArgs),
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Init(args) => commands::wallet::init(&cli.wallet, args),
        Commands::Recover(args) => commands::wallet::recover(&cli.wallet, args),
        Commands::Address(args) => commands::wallet::address(&cli.wallet, args),
        Commands::Balances(args) => commands::chain::balances(&cli.wallet, args),
        Commands::Scan(args) => commands::chain::scan(&cli.wallet, args),
        Commands::ChainHeight => commands::chain::chain_height(&cli.wallet),
        Commands::Fees(args) => commands::tx::fees(&cli.wallet, args),
        Commands::Txs(args) => commands::tx::txs(&cli.wallet, args),
        Commands::Cancel(args) => commands::tx::cancel(&cli.wallet, args),
        Commands::Post(args) => commands::tx::post(&cli.wallet, args),
    };
    if let Err(err) = result {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}
