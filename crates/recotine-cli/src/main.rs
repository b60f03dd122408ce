// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use recotine_application::acquire::{AcquireOptions, AcquisitionEngine};
use recotine_application::collab::RecommendationSource;
use recotine_application::pipeline::Pipeline;
use recotine_application::playlist::RefreshOptions;
use recotine_config::load as load_config;
use recotine_infrastructure::{
    load_feedback, load_library_index, load_pending_tags, save_pending_tags, FsReportStore,
    NicotineClient, PlaylistFileSource, PlaylistStore, SidecarTagger,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing first so the config loader's own events are not lost.
    init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path.as_deref())?;

    // Fail fast on a bad policy or a stopped Nicotine+ before any task runs.
    let policy = config.quality.to_policy()?;
    let backend = NicotineClient::from_config(&config.soulseek)?;
    backend.check_available().await?;
    info!(target: "cli", api = %config.soulseek.api_url, "soulseek backend available");

    let library = Arc::new(load_library_index(Path::new(&config.library.index_path)).await?);
    let tagger = Arc::new(SidecarTagger::open(&config.library.tags_path).await?);
    let sources: Vec<Arc<dyn RecommendationSource>> = vec![Arc::new(PlaylistFileSource::new(
        &config.sources.recommendations_dir,
    ))];

    let engine = AcquisitionEngine::new(
        Arc::new(backend),
        policy,
        AcquireOptions::from_config(
            &config.acquisition,
            &config.soulseek,
            PathBuf::from(&config.library.downloads_path),
        ),
    );
    let pipeline = Pipeline::new(
        sources,
        library.clone(),
        engine,
        tagger,
        RefreshOptions::from_config(&config.playlist),
    );

    let playlist_store = PlaylistStore::new(
        &config.playlist.state_path,
        &config.playlist.export_path,
        &config.playlist.name,
    );
    let report_store = FsReportStore::new(&config.sources.reports_dir);

    let current_playlist = playlist_store.load().await?;
    let pending_tags = load_pending_tags(Path::new(&config.playlist.pending_tags_path)).await?;
    let feedback = load_feedback(Path::new(&config.sources.feedback_path)).await;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let outcome = pipeline
        .run(current_playlist, pending_tags, &feedback, &cancel)
        .await;

    playlist_store
        .save(&outcome.playlist, library.as_ref())
        .await?;
    let report_path = report_store.save(&outcome.report).await?;
    save_pending_tags(
        Path::new(&config.playlist.pending_tags_path),
        &outcome.failed_tags,
    )
    .await?;

    if !outcome.failed_tags.is_empty() {
        warn!(
            target: "cli",
            failed = outcome.failed_tags.len(),
            "some tag mutations failed, queued for the next cycle"
        );
    }
    info!(
        target: "cli",
        report = %report_path.display(),
        entries = outcome.report.entries.len(),
        "run complete"
    );
    Ok(())
}

fn init_tracing() {
    let fmt_layer = fmt::layer().with_target(true).with_thread_names(true).with_level(true);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Filter used when RUST_LOG is unset. Runs before the config file is
/// read, so the level comes from the same env var figment maps onto
/// `telemetry.log_level`.
fn default_filter() -> String {
    std::env::var("RECOTINE_TELEMETRY__LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let mut interrupt = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("install SIGINT handler");

    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("install SIGTERM handler");

    #[cfg(not(unix))]
    let interrupt = tokio::signal::ctrl_c();

    #[cfg(unix)]
    tokio::select! {
        _ = interrupt.recv() => {},
        _ = terminate.recv() => {},
    }

    #[cfg(not(unix))]
    {
        interrupt.await.expect("ctrl_c handler");
    }

    info!(target: "cli", "shutdown signal received");
}
