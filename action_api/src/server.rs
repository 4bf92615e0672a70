use crate::{routes::api_routes, telemetry::Metrics};
use action_recognition::{
    config::{Config, CorsConfig},
    model_service::ModelService,
    video::VideoDecoder,
    Orchestrator,
};
use axum::{
    http::{HeaderValue, Method},
    Router,
};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub struct SharedState<M, D> {
    pub orchestrator: Orchestrator<M, D>,
    pub metrics: Arc<Metrics>,
}

impl<M, D> Clone for SharedState<M, D> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

pub fn build_router<M: ModelService, D: VideoDecoder>(
    orchestrator: Orchestrator<M, D>,
    metrics: Arc<Metrics>,
    config: &Config,
) -> Router {
    let app_state = SharedState {
        orchestrator,
        metrics,
    };

    Router::new()
        .merge(api_routes(&config.upload))
        .with_state(app_state)
        .layer(cors_layer(&config.cors))
        .layer(TraceLayer::new_for_http())
        .layer(HttpMetricsLayerBuilder::new().build())
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService, D: VideoDecoder>(
        orchestrator: Orchestrator<M, D>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let addr = config.server.get_address();
        let metrics = Arc::new(Metrics::new()?);
        let router = build_router(orchestrator, metrics, config);
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub fn run(self, mut shutdown_rx: Receiver<()>) -> JoinHandle<anyhow::Result<()>> {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!("Starting app on {}", addr),
            Err(e) => tracing::warn!("Starting app on an unknown address: {}", e),
        }

        let listener = self.listener;
        let router = self.router;
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        })
    }
}
