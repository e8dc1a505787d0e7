//! Web server command.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tasklive_core::{ChangeSource, EmissionPolicy, MemoryStore, TaskStore};
use tasklive_redis::{RedisBackend, RedisSettings};
use tasklive_web::{Server, ServerConfig};
use tracing::info;

/// Where task documents live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// Redis hashes plus a change stream
    Redis,
    /// In-process, lost on exit
    Memory,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "7000")]
    pub port: u16,

    /// Storage backend
    #[arg(long, env = "TASKLIVE_STORE", value_enum, default_value = "redis")]
    pub store: StoreKind,

    /// Redis connection URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Namespace for every Redis key
    #[arg(long, env = "TASKLIVE_KEY_PREFIX", default_value = "todo:tasks")]
    pub key_prefix: String,

    /// Approximate cap on the change stream length
    #[arg(long, env = "TASKLIVE_STREAM_MAXLEN", default_value = "10000")]
    pub stream_maxlen: usize,

    /// Browser origins allowed to call the API (comma-separated)
    #[arg(
        long,
        env = "TASKLIVE_ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:5173"
    )]
    pub allowed_origins: Vec<String>,

    /// Who announces changes: `feed` (change feed only) or `dual` (handlers too)
    #[arg(long, env = "TASKLIVE_EMISSION_POLICY", default_value = "feed")]
    pub emission_policy: EmissionPolicy,

    /// Name under which the change feed cursor is saved
    #[arg(long, env = "TASKLIVE_LISTENER_NAME", default_value = "default")]
    pub listener_name: String,

    /// Frames buffered per WebSocket client before it starts dropping
    #[arg(long, env = "TASKLIVE_BROADCAST_CAPACITY", default_value = "1024")]
    pub broadcast_capacity: usize,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl ServeArgs {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            allowed_origins: self
                .allowed_origins
                .iter()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            emission_policy: self.emission_policy,
            listener_name: self.listener_name.clone(),
            broadcast_capacity: self.broadcast_capacity.max(1),
        }
    }

    fn redis_settings(&self) -> RedisSettings {
        RedisSettings {
            key_prefix: self.key_prefix.clone(),
            stream_maxlen: self.stream_maxlen,
            ..RedisSettings::default()
        }
    }
}

async fn open_backend(args: &ServeArgs) -> Result<(Arc<dyn TaskStore>, Arc<dyn ChangeSource>)> {
    match args.store {
        StoreKind::Redis => {
            let backend = RedisBackend::connect(&args.redis_url, args.redis_settings())
                .await
                .with_context(|| format!("failed to connect to {}", args.redis_url))?;
            Ok((Arc::new(backend.store), Arc::new(backend.source)))
        }
        StoreKind::Memory => {
            let store = MemoryStore::new();
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
    }
}

pub async fn execute(args: ServeArgs) -> Result<()> {
    let config = args.server_config();
    let (store, source) = open_backend(&args).await?;
    store.ping().await.context("task store is not reachable")?;
    info!(store = ?args.store, "Task store ready");

    println!();
    println!("  {} {}", "Tasklive".cyan().bold(), "Server".bold());
    println!();
    println!("  {}        http://{}:{}/tasks", "API".green(), config.host, config.port);
    println!("  {}  ws://{}:{}/ws", "WebSocket".green(), config.host, config.port);
    println!(
        "  {}      {:?} ({} emission)",
        "Store".green(),
        args.store,
        config.emission_policy
    );
    println!();
    println!("  {}", "Ctrl+C to stop".dimmed());
    println!();

    Server::new(config, store, source).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Commands};
    use clap::Parser;

    fn parse(args: &[&str]) -> ServeArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Serve(args) => args,
        }
    }

    #[test]
    fn test_flags_build_server_config() {
        let args = parse(&[
            "tasklive",
            "serve",
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--store",
            "memory",
            "--allowed-origins",
            "http://a.example, http://b.example,",
            "--emission-policy",
            "dual",
            "--broadcast-capacity",
            "0",
        ]);
        assert_eq!(args.store, StoreKind::Memory);

        let config = args.server_config();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(
            config.allowed_origins,
            vec!["http://a.example".to_string(), "http://b.example".to_string()]
        );
        assert_eq!(config.emission_policy, EmissionPolicy::Dual);
        assert_eq!(config.broadcast_capacity, 1);
    }

    #[test]
    fn test_redis_settings_from_flags() {
        let args = parse(&[
            "tasklive",
            "serve",
            "--key-prefix",
            "app:tasks",
            "--stream-maxlen",
            "500",
        ]);
        let settings = args.redis_settings();
        assert_eq!(settings.key_prefix, "app:tasks");
        assert_eq!(settings.stream_maxlen, 500);
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        assert!(Cli::try_parse_from(["tasklive", "serve", "--emission-policy", "loud"]).is_err());
    }
}
