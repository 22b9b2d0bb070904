//! CLI argument definitions for the vaultsync binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use vaultsync::Config;
use vaultsync::config::HashingConfig;

/// Storage backend type
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Backend {
    /// SQLite database (default)
    Sqlite,
    /// PostgreSQL database
    Postgres,
    /// In-memory with JSON persistence (for development)
    Inmemory,
}

/// vaultsync server: stores encrypted container records it cannot read
#[derive(Parser, Debug)]
#[command(name = "vaultsync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the vaultsync server
    Serve(ServeArgs),
    /// Check health of a running vaultsync server
    Health(HealthArgs),
}

/// Arguments for the serve command
#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, default_value_t = 3000, env = "VAULTSYNC_PORT")]
    pub port: u16,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0", env = "VAULTSYNC_HOST")]
    pub host: String,

    /// Storage backend to use
    #[arg(short, long, default_value = "sqlite", env = "VAULTSYNC_BACKEND")]
    pub backend: Backend,

    /// Data directory for storage files.
    /// For SQLite: stores vaultsync.db
    /// For InMemory: stores vaultsync.json
    #[arg(short = 'D', long, env = "VAULTSYNC_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// PostgreSQL connection URL (required when backend=postgres)
    #[arg(long, env = "VAULTSYNC_POSTGRES_URL")]
    pub postgres_url: Option<String>,

    /// Milliseconds between commit sweeps
    #[arg(long, default_value_t = 100, env = "VAULTSYNC_COMMIT_SWEEP_MS")]
    pub commit_sweep_ms: u64,

    /// Transient failures tolerated before a transaction is marked failed
    #[arg(long, default_value_t = 5, env = "VAULTSYNC_MAX_COMMIT_ATTEMPTS")]
    pub max_commit_attempts: u32,

    /// Argon2 memory cost in KiB for challenge-key hashes
    #[arg(long, env = "VAULTSYNC_ARGON2_MEMORY_KIB")]
    pub argon2_memory_kib: Option<u32>,

    /// Argon2 passes for challenge-key hashes
    #[arg(long, env = "VAULTSYNC_ARGON2_ITERATIONS")]
    pub argon2_iterations: Option<u32>,

    /// Secret for stable fake salts of unknown usernames.
    /// Random per process when unset.
    #[arg(long, env = "VAULTSYNC_SERVER_SECRET", hide_env_values = true)]
    pub server_secret: Option<String>,
}

impl ServeArgs {
    /// Server configuration from the command line, defaults elsewhere.
    pub fn config(&self) -> Config {
        let defaults = HashingConfig::default();
        Config {
            commit_sweep_interval_ms: self.commit_sweep_ms,
            max_commit_attempts: self.max_commit_attempts,
            hashing: HashingConfig {
                memory_kib: self.argon2_memory_kib.unwrap_or(defaults.memory_kib),
                iterations: self.argon2_iterations.unwrap_or(defaults.iterations),
                ..defaults
            },
            server_secret: self.server_secret.clone(),
            ..Config::default()
        }
    }
}

/// Arguments for the health command
#[derive(clap::Args, Debug)]
pub struct HealthArgs {
    /// Base URL of the server to check
    #[arg(long, default_value = "http://127.0.0.1:3000", env = "VAULTSYNC_URL")]
    pub url: String,

    /// Timeout in seconds
    #[arg(short, long, default_value_t = 5)]
    pub timeout: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_args_build_config() {
        let cli = Cli::parse_from([
            "vaultsync",
            "serve",
            "--backend",
            "inmemory",
            "--commit-sweep-ms",
            "20",
            "--argon2-iterations",
            "4",
        ]);
        let Some(Commands::Serve(args)) = cli.command else {
            panic!("expected serve");
        };
        let config = args.config();
        assert_eq!(config.commit_sweep_interval_ms, 20);
        assert_eq!(config.hashing.iterations, 4);
        assert_eq!(config.hashing.memory_kib, HashingConfig::default().memory_kib);
        assert_eq!(config.server_secret, None);
    }
}
