use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Ladle real-time gateway
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "ladle-realtime", version, about = "Ladle real-time gateway")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "LADLE_PORT", default_value = "4100")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "LADLE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./ladle.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "LADLE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (JWT signing key)
    #[arg(long, env = "LADLE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Liveness sweep interval in seconds. A connection that fails to
    /// acknowledge a probe is closed within two sweeps.
    #[arg(long, env = "LADLE_SWEEP_INTERVAL_SECS", default_value = "30")]
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4100,
            bind_address: "0.0.0.0".to_string(),
            config: "./ladle.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            sweep_interval_secs: 30,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (LADLE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("LADLE_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Ladle Real-Time Gateway Configuration
# Place this file at ./ladle.toml or specify with --config <path>
# All settings can be overridden via environment variables (LADLE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 4100)
# port = 4100

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the JWT signing key
# data_dir = "./data"

# Liveness sweep interval in seconds (default: 30)
# A connection that never acknowledges a probe is closed within two sweeps,
# so the worst-case detection time for a dead peer is 2x this value.
# sweep_interval_secs = 30
"#
    .to_string()
}
