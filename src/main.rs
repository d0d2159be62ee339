// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use otto_config::Config;
use otto_core::Engine;
use otto_model::{AnthropicProvider, MockProvider, ModelProvider};
use otto_store::{MemoryStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::Completions { shell }) => {
            cli::print_completions(shell);
            Ok(())
        }
        Some(Commands::ShowConfig) => {
            let config = otto_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Some(Commands::Serve { project_dir }) => serve(cli.config.as_deref(), project_dir).await,
        None => serve(cli.config.as_deref(), PathBuf::from(".")).await,
    }
}

async fn serve(config_path: Option<&std::path::Path>, project_dir: PathBuf) -> anyhow::Result<()> {
    let config = otto_config::load(config_path)?;
    let project_dir = project_dir
        .canonicalize()
        .with_context(|| format!("resolving project dir {}", project_dir.display()))?;

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let provider = build_provider(&config, store.as_ref()).await?;
    info!(
        provider = provider.name(),
        model = provider.model_name(),
        agents = config.agents.len(),
        project_dir = %project_dir.display(),
        "starting agent runtime"
    );

    let engine = Engine::new(config, store, provider);
    info!("engine ready; transport adapters attach via the subscribe API");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received; draining");
    engine.shutdown().await;
    Ok(())
}

/// Select the model backend and resolve its credential.
///
/// The key is looked up in order: explicit config value, the configured env
/// var (default ANTHROPIC_API_KEY), then the repository secret
/// `model/<provider>/api_key`.
async fn build_provider(
    config: &Config,
    store: &dyn Store,
) -> anyhow::Result<Arc<dyn ModelProvider>> {
    match config.model.provider.as_str() {
        "anthropic" => {
            let key = resolve_api_key(config, store).await;
            Ok(Arc::new(AnthropicProvider::new(
                config.model.name.clone(),
                key,
                config.model.base_url.clone(),
            )))
        }
        "mock" => Ok(Arc::new(MockProvider)),
        other => bail!("unknown model provider: {other:?} (known: anthropic, mock)"),
    }
}

async fn resolve_api_key(config: &Config, store: &dyn Store) -> Option<String> {
    if let Some(key) = &config.model.api_key {
        return Some(key.clone());
    }
    let env_var = config.model.api_key_env.as_deref().unwrap_or("ANTHROPIC_API_KEY");
    if let Ok(key) = std::env::var(env_var) {
        if !key.is_empty() {
            return Some(key);
        }
    }
    let secret_key = format!("model/{}/api_key", config.model.provider);
    match store.get_secret(&secret_key).await {
        Ok(Some(bytes)) => String::from_utf8(bytes).ok(),
        _ => None,
    }
}

/// Tracing setup: `OTTO_LOG` filters; `OTTO_LOG_FILE` redirects output to a
/// file, otherwise logs go to stderr (suppressed unless --verbose).
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_env("OTTO_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "info" } else { "warn" }));

    if let Ok(path) = std::env::var("OTTO_LOG_FILE") {
        use std::sync::Mutex;
        if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            let _ = tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_ansi(false).with_writer(Mutex::new(file)))
                .with(filter)
                .try_init();
            return;
        }
    }
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
