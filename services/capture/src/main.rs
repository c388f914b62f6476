use anyhow::{Context, Result};
use capture_service::{
    Config, EmulatedCamera, PipelineOrchestrator, PostgresFrameTable, QueueSink, Sink,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, &config.service.log_format);

    info!(service = %config.service.name, "Starting capture service");

    // Initialize metrics
    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    // Initialize components
    let table = PostgresFrameTable::new(&config.database);
    let queue = QueueSink::from_config(&config.broker, &config.service.name);
    let camera = EmulatedCamera::new(config.camera.staging_dir());

    let mut pipeline = PipelineOrchestrator::new(config, camera, table, queue);
    let report = pipeline.run().await.context("Capture run failed")?;

    info!(
        run_id = %report.run_id,
        frames = report.frame_count(),
        metadata_logged = report.written(Sink::MetadataLog),
        published = report.written(Sink::Queue),
        archived = report.written(Sink::ImageArchive),
        inserted = report.written(Sink::Database),
        "Capture run summary"
    );

    for frame in report.frames.iter().filter(|f| !f.fully_persisted()) {
        warn!(
            sequence = frame.sequence,
            file_name = %frame.file_name,
            "Frame not persisted to every sink"
        );
    }

    if let Some(failure) = &report.failure {
        error!(run_id = %report.run_id, failure = %failure, "Capture run failed");
        anyhow::bail!("capture run {} failed: {}", report.run_id, failure);
    }

    info!("Capture service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}
