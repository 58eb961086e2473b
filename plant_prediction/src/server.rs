use crate::{
    artifact::{ensure_model_present, Provisioned},
    config::Config,
    labels::ClassLabels,
    model_service::ModelService,
    ort_service::OrtModelService,
    routes::api_routes,
};
use axum::{extract::DefaultBodyLimit, Router};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};

#[derive(Clone)]
pub struct SharedState<M: ModelService> {
    pub model_service: Arc<M>,
    pub labels: Arc<ClassLabels>,
}

impl<M: ModelService> SharedState<M> {
    pub fn new(model_service: M, labels: ClassLabels) -> Self {
        Self {
            model_service: Arc::new(model_service),
            labels: Arc::new(labels),
        }
    }
}

pub fn build_router<M: ModelService>(state: SharedState<M>, max_upload_bytes: usize) -> Router {
    Router::new()
        .merge(api_routes::<M>())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn bind(router: Router, addr: &str) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { router, listener })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!("Classification service listening on {}", self.local_addr()?);

        let shutdown = async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown")
        };

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

pub async fn start_server(config: Config) -> anyhow::Result<()> {
    let model_path = config.model.get_path();
    let source = config.model.artifact_source();
    match ensure_model_present(&model_path, source.as_ref()).await? {
        Provisioned::AlreadyPresent => {}
        Provisioned::Downloaded { bytes } => {
            tracing::info!("Fetched {} byte model artifact into {:?}", bytes, model_path)
        }
    }

    let labels = ClassLabels::from_config(&config.labels)?;
    labels.ensure_len(config.model.num_classes)?;

    let model_service = OrtModelService::new(&config.model)?;
    let state = SharedState::new(model_service, labels);

    let router = build_router(state, config.server.max_upload_bytes);
    let server = HttpServer::bind(router, &config.server.get_address()).await?;

    server.run().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
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

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
