use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::network::Framing;
use crate::node::config::{parse_versions_csv, ControllerConfig};
use crate::node::Controller;
use crate::utils::init_logging;

/// OpenFlow controller CLI.
#[derive(Parser, Debug)]
#[clap(name = "ofcontrol", version)]
pub struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[clap(long, default_value = "info", global = true)]
    pub log_level: String,

    #[clap(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Run the controller
    Serve(ServeArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum RpcMode {
    Enabled,
    Disabled,
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// TOML config file; flags below override its values
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// OpenFlow listen address
    #[clap(short = 'a', long)]
    pub address: Option<String>,

    /// OpenFlow listen port
    #[clap(short = 'p', long)]
    pub port: Option<u16>,

    /// comma separated OpenFlow versions (wire bytes or release names)
    #[clap(short = 'v', long)]
    pub versions: Option<String>,

    /// control-plane bridge
    #[clap(short = 'r', long, value_enum)]
    pub rpc: Option<RpcMode>,

    /// HTTP endpoint for the bridge (host:port)
    #[clap(long)]
    pub rpc_addr: Option<String>,

    /// single-read or stream
    #[clap(long)]
    pub framing: Option<Framing>,
}

impl ServeArgs {
    /// Build the effective config: file (or defaults), then flags.
    pub fn resolve(&self) -> Result<ControllerConfig> {
        let mut cfg = match &self.config {
            Some(path) => ControllerConfig::load(path)?,
            None => ControllerConfig::default(),
        };
        if let Some(a) = &self.address {
            cfg.listen_addr = a.clone();
        }
        if let Some(p) = self.port {
            cfg.port = p;
        }
        if let Some(v) = &self.versions {
            cfg.versions = parse_versions_csv(v)?;
        }
        if let Some(mode) = self.rpc {
            cfg.rpc_enabled = mode == RpcMode::Enabled;
        }
        if let Some(a) = &self.rpc_addr {
            cfg.rpc_addr = a.clone();
        }
        if let Some(f) = self.framing {
            cfg.framing = f;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.cmd {
        Cmd::Serve(args) => {
            let cfg = args.resolve()?;
            let running = Controller::new(cfg).start().await?;
            // Wait for Ctrl+C
            tokio::signal::ctrl_c().await?;
            running.shutdown().await?;
            tracing::info!("controller stopped");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ofp::Version;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "ofcontrol",
            "serve",
            "--address",
            "0.0.0.0",
            "--port",
            "6633",
            "--versions",
            "4",
            "--rpc",
            "disabled",
            "--framing",
            "stream",
        ])
        .unwrap();
        let Cmd::Serve(args) = cli.cmd;
        let cfg = args.resolve().unwrap();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:6633");
        assert_eq!(cfg.versions, vec![Version::V13]);
        assert!(!cfg.rpc_enabled);
        assert_eq!(cfg.framing, Framing::Stream);
    }

    #[test]
    fn short_flags_are_accepted() {
        let cli = Cli::try_parse_from([
            "ofcontrol", "serve", "-a", "0.0.0.0", "-p", "6633", "-v", "4,6", "-r", "enabled",
        ])
        .unwrap();
        let Cmd::Serve(args) = cli.cmd;
        let cfg = args.resolve().unwrap();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:6633");
        assert_eq!(cfg.versions, vec![Version::V13, Version::V15]);
        assert!(cfg.rpc_enabled);
    }

    #[test]
    fn no_flags_means_defaults() {
        let cfg = ServeArgs::default().resolve().unwrap();
        assert_eq!(cfg, ControllerConfig::default());
    }

    #[test]
    fn bad_version_is_rejected() {
        let args = ServeArgs {
            versions: Some("1.0".into()),
            ..Default::default()
        };
        assert!(args.resolve().is_err());
    }
}
