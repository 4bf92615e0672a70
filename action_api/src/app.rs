use crate::server::HttpServer;
use action_recognition::{
    config::Config, ClassRegistry, FfmpegDecoder, InferenceEngine, Orchestrator, OrtModelService,
};
use std::sync::Arc;
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let registry = match ClassRegistry::from_config(config.labels.as_ref()) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            tracing::error!("Failed to load class labels: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!("Loaded {} action classes", registry.len());

    let engine = Arc::new(InferenceEngine::<OrtModelService>::new(
        &config.model,
        &config.frames,
        registry.len(),
    ));
    let model_config = config.model.clone();
    tracing::info!(path = ?model_config.get_path(), "Loading model in the background");
    engine.load_in_background(move || OrtModelService::new(&model_config));

    let decoder = Arc::new(FfmpegDecoder::new(&config.ffmpeg));
    let orchestrator = Orchestrator::new(&config, engine, registry, decoder);

    let server = HttpServer::new(orchestrator, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe());

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
