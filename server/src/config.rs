use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Huddle realtime collaboration server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "huddle-server", version, about = "Huddle realtime collaboration server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "HUDDLE_PORT", default_value = "8090")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "HUDDLE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./huddle.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "HUDDLE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "HUDDLE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Seconds a typing indicator stays on without an explicit stop
    #[arg(long, env = "HUDDLE_TYPING_TTL_SECS", default_value = "5")]
    pub typing_ttl_secs: u64,

    /// Seconds of inactivity before a session is evicted
    #[arg(long, env = "HUDDLE_IDLE_TIMEOUT_SECS", default_value = "300")]
    pub idle_timeout_secs: u64,

    /// Seconds between idle-session sweeps
    #[arg(long, env = "HUDDLE_IDLE_SWEEP_INTERVAL_SECS", default_value = "60")]
    pub idle_sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8090,
            bind_address: "0.0.0.0".to_string(),
            config: "./huddle.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            typing_ttl_secs: 5,
            idle_timeout_secs: 300,
            idle_sweep_interval_secs: 60,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (HUDDLE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("HUDDLE_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Huddle Realtime Collaboration Server Configuration
# Place this file at ./huddle.toml or specify with --config <path>
# All settings can be overridden via environment variables (HUDDLE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8090)
# port = 8090

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# Seconds a typing indicator stays on without an explicit stop (default: 5)
# typing_ttl_secs = 5

# Seconds of WebSocket inactivity before a session is evicted (default: 300)
# idle_timeout_secs = 300

# Seconds between idle-session sweeps (default: 60)
# idle_sweep_interval_secs = 60
"#
    .to_string()
}
