//! # CLI Interface
//!
//! Defines the command-line argument structure for `tessera-node` using
//! `clap` derive. Four subcommands: `run`, `status`, `classify`, and
//! `version`. Every `run` flag has a `TESSERA_*` environment fallback.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use tessera_core::config::{
    DEFAULT_API_PORT, DEFAULT_METRICS_PORT, DEFAULT_TIER_SPEC, MINT_TIMEOUT, RATE_LIMIT_MAX_EVENTS,
    RATE_LIMIT_WINDOW,
};

/// Tessera attestation node.
///
/// Ingests deposit events, verifies and deduplicates them, buckets each
/// into a privacy tier, and mints a soulbound attestation for it.
#[derive(Parser, Debug)]
#[command(
    name = "tessera-node",
    about = "Tessera deposit attestation node",
    version,
    propagate_version = true
)]
pub struct TesseraNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node: pipeline, deposit source, API and metrics servers.
    Run(RunArgs),
    /// Query the status of a running node via its API.
    Status(StatusArgs),
    /// Show which tier an amount falls into, offline.
    Classify(ClassifyArgs),
    /// Print version information and exit.
    Version,
}

/// Where attestation tokens get minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MinterKind {
    /// In-process soulbound registry.
    Local,
    /// External minting service over HTTP.
    Remote,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the deposit and attestation database.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "TESSERA_DATA_DIR", default_value = "./tessera-data")]
    pub data_dir: PathBuf,

    /// Port for the REST and WebSocket API.
    #[arg(long, env = "TESSERA_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "TESSERA_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Deposit source: `mock` or `webhook`.
    #[arg(long, env = "TESSERA_SOURCE", default_value = "webhook")]
    pub source: String,

    /// Seconds between synthetic deposits when the source is `mock`.
    #[arg(long, env = "TESSERA_MOCK_INTERVAL_SECS", default_value_t = 10)]
    pub mock_interval_secs: u64,

    /// Mint as soon as a deposit verifies.
    #[arg(long, env = "TESSERA_AUTO_MINT", default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_mint: bool,

    /// Tier table as `NAME=THRESHOLD` pairs, comma separated.
    #[arg(long, env = "TESSERA_TIERS", default_value = DEFAULT_TIER_SPEC)]
    pub tiers: String,

    /// Minting backend.
    #[arg(long, env = "TESSERA_MINTER", value_enum, default_value_t = MinterKind::Local)]
    pub minter: MinterKind,

    /// Mint endpoint URL. Required with `--minter remote`.
    #[arg(long, env = "TESSERA_MINT_ENDPOINT")]
    pub mint_endpoint: Option<String>,

    /// Bearer key for the mint endpoint. Required with `--minter remote`.
    #[arg(long, env = "TESSERA_MINT_API_KEY", hide_env_values = true)]
    pub mint_api_key: Option<String>,

    /// Per-call mint timeout in seconds.
    #[arg(long, env = "TESSERA_MINT_TIMEOUT_SECS", default_value_t = MINT_TIMEOUT.as_secs())]
    pub mint_timeout_secs: u64,

    /// Key accepted by `POST /admin/mint`. Without it, force-mint is disabled.
    #[arg(long, env = "TESSERA_ADMIN_KEY", hide_env_values = true)]
    pub admin_key: Option<String>,

    /// Base URI for attestation metadata; each deposit gets `<base>/<id>`.
    #[arg(long, env = "TESSERA_METADATA_URI_BASE")]
    pub metadata_uri_base: Option<String>,

    /// Accepted deposits per wallet per rate window.
    #[arg(long, env = "TESSERA_RATE_LIMIT", default_value_t = RATE_LIMIT_MAX_EVENTS)]
    pub rate_limit: usize,

    /// Rate window length in seconds.
    #[arg(long, env = "TESSERA_RATE_WINDOW_SECS", default_value_t = RATE_LIMIT_WINDOW.as_secs())]
    pub rate_window_secs: u64,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "TESSERA_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// API endpoint of the running node.
    #[arg(long, default_value = "http://127.0.0.1:9841")]
    pub api_url: String,
}

/// Arguments for the `classify` subcommand.
#[derive(Parser, Debug)]
pub struct ClassifyArgs {
    /// Amount to classify.
    pub amount: f64,

    /// Tier table as `NAME=THRESHOLD` pairs.
    #[arg(long, env = "TESSERA_TIERS", default_value = DEFAULT_TIER_SPEC)]
    pub tiers: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        TesseraNodeCli::command().debug_assert();
    }

    #[test]
    fn run_defaults_are_usable() {
        let cli = TesseraNodeCli::try_parse_from(["tessera-node", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.api_port, DEFAULT_API_PORT);
        assert_eq!(args.minter, MinterKind::Local);
        assert!(args.auto_mint);
        assert_eq!(args.tiers, DEFAULT_TIER_SPEC);
        assert_eq!(args.rate_limit, 10);
    }

    #[test]
    fn run_accepts_remote_minter_flags() {
        let cli = TesseraNodeCli::try_parse_from([
            "tessera-node",
            "run",
            "--minter",
            "remote",
            "--mint-endpoint",
            "https://mint.example/v1/mint",
            "--mint-api-key",
            "k",
            "--auto-mint",
            "false",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.minter, MinterKind::Remote);
        assert_eq!(args.mint_endpoint.as_deref(), Some("https://mint.example/v1/mint"));
        assert!(!args.auto_mint);
    }
}
