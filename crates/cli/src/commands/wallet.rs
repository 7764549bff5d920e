use anyhow::Result;
use clap::Args;

use super::common::{RelayArgs, Session, WalletArgs};

#[derive(Clone, Debug, Args)]
pub struct InitArgs {
    #[arg(long, default_value = "default")]
    pub name: String,
    /// Use this phrase instead of generating one.
    #[arg(long)]
    pub mnemonic: Option<String>,
}

#[derive(Clone, Debug, Args)]
pub struct RecoverArgs {
    #[arg(long)]
    pub mnemonic: String,
    #[arg(long, default_value = "default")]
    pub name: String,
}

#[derive(Clone, Debug, Args)]
pub struct AddressArgs {
    #[arg(long, default_value_t = 0)]
    pub index: u32,
    #[command(flatten)]
    pub relay: RelayArgs,
}

pub fn init(wallet: &WalletArgs, args: InitArgs) -> Result<()> {
    let password = wallet.password.resolve(true)?;
    let session = Session::init(
        wallet.config()?,
        args.mnemonic.as_deref(),
        password.as_str(),
        &args.name,
    )?;
    println!("wallet {:?} created", session.name());
    println!("recovery phrase: {}", session.get_mnemonic()?.as_str());
    Ok(())
}

pub fn recover(wallet: &WalletArgs, args: RecoverArgs) -> Result<()> {
    let password = wallet.password.resolve(true)?;
    let session =
        Session::recover(wallet.config()?, password.as_str(), &args.mnemonic, &args.name)?;
    println!("wallet {:?} recovered; run `scan` or `balances --refresh`", session.name());
    Ok(())
}

pub fn address(wallet: &WalletArgs, args: AddressArgs) -> Result<()> {
    let session = wallet.open()?;
    let relay = args.relay.relay()?;
    println!("{}", session.get_address(args.index, relay.as_ref())?);
    Ok(())
}
