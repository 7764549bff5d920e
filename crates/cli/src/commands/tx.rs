use anyhow::{Context, Result};
use clap::Args;
use mw_wallet_core::amount::parse_amount;
use mw_wallet_core::SelectionStrategy;
use uuid::Uuid;

use super::common::{print_json, WalletArgs};

#[derive(Clone, Debug, Args)]
pub struct FeesArgs {
    /// Amount in coins, e.g. "1.25".
    #[arg(long)]
    pub amount: String,
    #[arg(long, default_value_t = 10)]
    pub min_confirmations: u64,
    /// Spend every spendable output instead of the fewest.
    #[arg(long, default_value_t = false)]
    pub all: bool,
}

#[derive(Clone, Debug, Args)]
pub struct TxsArgs {
    #[arg(long, default_value_t = false)]
    pub refresh: bool,
}

#[derive(Clone, Debug, Args)]
pub struct CancelArgs {
    /// Slate id.
    #[arg(long)]
    pub id: String,
}

#[derive(Clone, Debug, Args)]
pub struct PostArgs {
    /// Slate id; without it every finalized but unposted slate is retried.
    #[arg(long)]
    pub id: Option<String>,
    #[arg(long, default_value_t = false)]
    pub fluff: bool,
}

fn slate_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("slate id {raw:?}"))
}

pub fn fees(wallet: &WalletArgs, args: FeesArgs) -> Result<()> {
    let amount = parse_amount(&args.amount)?;
    let strategy = if args.all {
        SelectionStrategy::All
    } else {
        SelectionStrategy::LargestFirst
    };
    let session = wallet.open()?;
    print_json(&session.get_tx_fees(amount, args.min_confirmations, strategy)?)
}

pub fn txs(wallet: &WalletArgs, args: TxsArgs) -> Result<()> {
    let session = wallet.open()?;
    print_json(&session.txs_get(args.refresh)?)
}

pub fn cancel(wallet: &WalletArgs, args: CancelArgs) -> Result<()> {
    let id = slate_id(&args.id)?;
    let session = wallet.open()?;
    let slate = session.cancel_tx(id)?;
    println!("slate {} {}", slate.id, slate.state);
    Ok(())
}

pub fn post(wallet: &WalletArgs, args: PostArgs) -> Result<()> {
    let id = args.id.as_deref().map(slate_id).transpose()?;
    let session = wallet.open()?;
    let posted = match id {
        Some(id) => vec![session.post_tx(id, args.fluff)?],
        None => session.repost_finalized(args.fluff)?,
    };
    if posted.is_empty() {
        println!("nothing to post");
    }
    for slate in posted {
        println!("slate {} {}", slate.id, slate.state);
    }
    Ok(())
}
