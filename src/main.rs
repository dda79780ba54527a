use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};

use peghub::{
    Hub, HubDependencies,
    cli::config_path_from_args,
    config::{Config, FeedConfig},
    logging::init_tracing,
    prediction::LinearModelLoader,
    secure_store::SecretKey,
    sensors::{Feed, adapters::HttpJsonFeed, adapters::UnixSocketStreamFeed},
    training::FileContentStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path_from_args()?;
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let _logging = init_tracing(&config.logging)?;

    let secret_key = secret_key_from_env(&config.secure_store.key_env)?;
    let deps = HubDependencies {
        model_loader: Arc::new(LinearModelLoader::new(config.prediction.model_path.clone())),
        content_store: Arc::new(FileContentStore::new(config.training.store_dir.clone())),
        feeds: feeds_from_config(&config.sensors.feeds)?,
        secret_key,
    };

    let hub = Hub::start(config, deps).context("failed to start hub")?;
    if let Err(err) = hub.engine().preload().await {
        tracing::warn!(target: "hub", error = %err, "model_preload_failed");
    }

    let mut sigint =
        signal(SignalKind::interrupt()).context("unable to listen for SIGINT (Ctrl+C)")?;
    let mut sigterm = signal(SignalKind::terminate()).context("unable to listen for SIGTERM")?;
    let signal_name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };
    tracing::info!(target: "hub", signal = signal_name, "shutdown_signal_received");

    let report = hub.shutdown().await;
    eprintln!(
        "peghub stopped: received {signal_name}; final peg {} ({} handlers aborted, {} stores aborted)",
        report.final_peg.current_value,
        report.aborted_handlers.len(),
        report.aborted_stores
    );
    Ok(())
}

/// A missing variable is fine unless a feature needs the key; the hub
/// reports that case itself.
fn secret_key_from_env(var: &str) -> Result<Option<SecretKey>> {
    if std::env::var_os(var).is_none() {
        return Ok(None);
    }
    SecretKey::from_env(var)
        .map(Some)
        .with_context(|| format!("invalid secret key in {var}"))
}

fn feeds_from_config(feeds: &[FeedConfig]) -> Result<Vec<Feed>> {
    feeds
        .iter()
        .map(|feed| match feed {
            FeedConfig::HttpPull {
                source_id,
                url,
                interval_ms,
            } => {
                let adapter = HttpJsonFeed::new(source_id.clone(), url)
                    .with_context(|| format!("invalid http feed '{source_id}'"))?;
                Ok(Feed::pull(
                    Arc::new(adapter),
                    Duration::from_millis(*interval_ms),
                ))
            }
            FeedConfig::UnixSocketStream {
                source_id,
                socket_path,
            } => Ok(Feed::push(Arc::new(UnixSocketStreamFeed::new(
                source_id.clone(),
                socket_path.clone(),
            )))),
        })
        .collect()
}
