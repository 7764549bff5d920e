use anyhow::Result;
use clap::Args;
use mw_wallet_core::get_chain_height;

use super::common::{print_json, WalletArgs};

#[derive(Clone, Debug, Args)]
pub struct BalancesArgs {
    /// Scan from the stored cursor to the tip first.
    #[arg(long, default_value_t = false)]
    pub refresh: bool,
    #[arg(long, default_value_t = 10)]
    pub min_confirmations: u64,
}

#[derive(Clone, Debug, Args)]
pub struct ScanArgs {
    #[arg(long)]
    pub start: u64,
    #[arg(long)]
    pub blocks: u64,
}

pub fn balances(wallet: &WalletArgs, args: BalancesArgs) -> Result<()> {
    let session = wallet.open()?;
    print_json(&session.balances(args.refresh, args.min_confirmations)?)
}

pub fn scan(wallet: &WalletArgs, args: ScanArgs) -> Result<()> {
    let session = wallet.open()?;
    print_json(&session.scan_outputs(args.start, args.blocks)?)
}

pub fn chain_height(wallet: &WalletArgs) -> Result<()> {
    println!("{}", get_chain_height(&wallet.config()?)?);
    Ok(())
}
