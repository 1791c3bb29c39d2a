mod cli;
mod config;
mod storage;

use crate::cli::ConfigCommand;
use clap::Parser;
use color_eyre::Result;
use hoard_core::backend::Backend;
use hoard_storage::SecureStorage;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::Config::load()?;
    match cli.command {
        cli::Command::Get { key } => run_get(&key, &config).await?,
        cli::Command::Set { key, value } => run_set(&key, &value, &config).await?,
        cli::Command::Remove { key } => run_remove(&key, &config).await?,
        cli::Command::Migrate => run_migrate(&config).await?,
        cli::Command::Status => run_status(&config)?,
        cli::Command::Health => run_health_check(&config).await?,
        cli::Command::Version => print_version(),
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("hoard {}", env!("CARGO_PKG_VERSION"));
}

async fn run_get(key: &str, config: &config::Config) -> Result<()> {
    let store = storage::store_from_config(config)?;
    match store.get::<Value>(key).await? {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("No value stored under `{key}`."),
    }
    Ok(())
}

async fn run_set(key: &str, raw: &str, config: &config::Config) -> Result<()> {
    let store = storage::store_from_config(config)?;
    store.set(key, &parse_value(raw)).await?;
    println!("Stored `{key}` ({}).", store.mode());
    Ok(())
}

async fn run_remove(key: &str, config: &config::Config) -> Result<()> {
    let store = storage::store_from_config(config)?;
    store.remove(key).await?;
    println!("Removed `{key}`.");
    Ok(())
}

async fn run_migrate(config: &config::Config) -> Result<()> {
    let store = storage::store_from_config(config)?;
    let report = store.migrate_legacy().await?;
    if report.skipped {
        println!("Encryption unavailable; legacy entries were left in place.");
    }
    for key in &report.reserved {
        println!("Skipped `{key}`: name is reserved by the storage layer.");
    }
    println!("Migrated {} legacy entries.", report.migrated.len());
    Ok(())
}

fn run_status(config: &config::Config) -> Result<()> {
    let store = storage::store_from_config(config)?;
    println!("Storage mode: {}", store.mode());
    Ok(())
}

/// Runs a quick health check of the storage path.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let store = storage::store_from_config(config)?;
    run_store_health(&store).await?;
    println!("Storage: ok ({})", store.mode());
    Ok(())
}

async fn run_store_health<B: Backend>(store: &SecureStorage<B>) -> Result<()> {
    let probe_key = "health/probe";
    let payload = Value::String("ok".into());
    store.set(probe_key, &payload).await?;
    let round_trip = store.get::<Value>(probe_key).await?;
    store.remove(probe_key).await?;

    if round_trip.as_ref() != Some(&payload) {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::Config::path()?;
    match config.init_at(&path)? {
        config::InitOutcome::Created => println!("Config initialized at {}", path.display()),
        config::InitOutcome::AlreadyPresent => {
            println!("Config already present at {}", path.display())
        }
    }
    Ok(())
}

/// Interpret CLI input as JSON when it parses, otherwise as a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn health_check_with_test_store_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = storage::test_store(dir.path());
        run_store_health(&store)
            .await
            .expect("health check should succeed");
        assert!(store.is_crypto_available());
    }

    #[test]
    fn parse_value_accepts_json_and_plain_text() {
        assert_eq!(parse_value(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("dark"), json!("dark"));
    }

    #[tokio::test]
    async fn store_from_config_uses_data_dir_override() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config::Config {
            data_dir: Some(dir.path().to_path_buf()),
            storage: Some(config::StorageConfig {
                kdf_iterations: None,
                device_id: Some("ci-runner".into()),
            }),
        };
        let store = storage::store_from_config(&cfg).expect("store");
        store.set("coreTheme", "dark").await.expect("set");

        let reopened = storage::store_from_config(&cfg).expect("store");
        assert_eq!(
            reopened.get::<String>("coreTheme").await.expect("get").as_deref(),
            Some("dark")
        );
    }
}
