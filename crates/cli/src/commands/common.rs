use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use log::debug;
use mw_node_rpc::NodeRpc;
use mw_wallet_core::{ChainType, FileStore, RelayConfig, WalletConfig, WalletSession};
use rpassword::prompt_password;
use serde::Serialize;
use zeroize::Zeroizing;

/// Read when neither `--password-file` nor `--password-env` is given.
pub const PASSWORD_ENV: &str = "MW_WALLET_PASSWORD";

pub type Session = WalletSession<FileStore, NodeRpc>;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Network {
    Mainnet,
    Floonet,
}

impl From<Network> for ChainType {
    fn from(n: Network) -> Self {
        match n {
            Network::Mainnet => ChainType::Mainnet,
            Network::Floonet => ChainType::Floonet,
        }
    }
}

/// Options shared by every subcommand.
#[derive(Clone, Debug, Args)]
pub struct WalletArgs {
    /// Wallet config JSON; the flags below are ignored when given.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Wallet data directory.
    #[arg(long, global = true, default_value = "./wallet_data")]
    pub data_dir: PathBuf,
    /// Node foreign API base url.
    #[arg(long, global = true, default_value = "http://127.0.0.1:3413")]
    pub node: String,
    #[arg(long, global = true, value_enum, default_value = "mainnet")]
    pub chain: Network,
    #[command(flatten)]
    pub password: PasswordArgs,
}

/// Where the wallet password comes from. Without either flag it is taken
/// from `MW_WALLET_PASSWORD`, or prompted for on the terminal.
#[derive(Clone, Debug, Default, Args)]
pub struct PasswordArgs {
    /// Read the password from the first line of this file.
    #[arg(long, global = true, value_name = "PATH")]
    pub password_file: Option<PathBuf>,
    /// Read the password from this environment variable.
    #[arg(long, global = true, value_name = "ENV")]
    pub password_env: Option<String>,
}

impl PasswordArgs {
    /// `confirm` asks twice when prompting, for passwords being set.
    pub fn resolve(&self, confirm: bool) -> Result<Zeroizing<String>> {
        if let Some(path) = &self.password_file {
            let contents = Zeroizing::new(
                fs::read_to_string(path)
                    .with_context(|| format!("read password file {}", path.display()))?,
            );
            let first = contents.lines().next().unwrap_or_default();
            return Ok(Zeroizing::new(first.to_string()));
        }

        let var = self.password_env.as_deref().unwrap_or(PASSWORD_ENV);
        match std::env::var(var) {
            Ok(value) => return Ok(Zeroizing::new(value)),
            Err(_) if self.password_env.is_some() => {
                bail!("environment variable {var} is not set")
            }
            Err(_) => {}
        }

        let first = Zeroizing::new(prompt_password("Wallet password: ").context("read password")?);
        if confirm {
            let second =
                Zeroizing::new(prompt_password("Confirm password: ").context("read password")?);
            if *first != *second {
                bail!("passwords did not match");
            }
        }
        Ok(first)
    }
}

impl WalletArgs {
    pub fn config(&self) -> Result<WalletConfig> {
        let cfg = match &self.config {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("read config {}", path.display()))?;
                WalletConfig::from_json(&raw)?
            }
            None => WalletConfig::new(self.chain.into(), &self.data_dir, &self.node),
        };
        cfg.validate()?;
        debug!("wallet dir {}", cfg.data_dir.display());
        Ok(cfg)
    }

    pub fn open(&self) -> Result<Session> {
        let password = self.password.resolve(false)?;
        Ok(Session::open(self.config()?, password.as_str())?)
    }
}

/// Relay selection for commands that print relay-routed addresses.
#[derive(Clone, Debug, Args)]
pub struct RelayArgs {
    /// Relay domain appended to addresses.
    #[arg(long)]
    pub relay_domain: Option<String>,
    #[arg(long, default_value_t = 443)]
    pub relay_port: u16,
}

impl RelayArgs {
    pub fn relay(&self) -> Result<Option<RelayConfig>> {
        self.relay_domain
            .as_deref()
            .map(|domain| {
                let relay = RelayConfig::new(domain, self.relay_port);
                relay.validate()?;
                Ok(relay)
            })
            .transpose()
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
