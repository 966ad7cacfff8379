use crate::access::TokenSigner;
use crate::config::Config;
use crate::documents::Rasterizer;
use crate::video::{self, FfmpegTranscoder, PipelineSettings, Transcoder, VideoPipeline, VideoQueue};
use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use gatehouse_av::{RasterMethod, RasterOptions, ToolRegistry};
use gatehouse_common::StorageLayout;
use gatehouse_db::pool::{get_conn, init_pool, DbPool};
use gatehouse_db::queries::auth_tokens;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod error;
pub mod rate_limit;
pub mod routes_documents;
pub mod routes_videos;
pub mod routes_violations;

pub use error::AppError;
use rate_limit::SharedLimiter;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub db: DbPool,
    pub storage: Arc<StorageLayout>,
    pub rasterizer: Rasterizer,
    /// Package build queue
    pub videos: VideoQueue,
    /// Signs and verifies per-video stream tokens
    pub signer: Arc<TokenSigner>,
    pub login_limiter: SharedLimiter,
    /// Fires on shutdown; in-flight renders and transcodes abort on it
    pub shutdown: CancellationToken,
}

impl AppContext {
    /// Wire up the context and start the video worker pool.
    ///
    /// Raster methods and the transcoder are passed in so tests can swap the
    /// external tools for fakes.
    pub fn build(
        config: Config,
        db: DbPool,
        raster_methods: Vec<Arc<dyn RasterMethod>>,
        transcoder: Arc<dyn Transcoder>,
        shutdown: CancellationToken,
    ) -> Result<(Self, JoinHandle<()>)> {
        let storage = Arc::new(StorageLayout::new(&config.server.data_dir));
        storage
            .ensure_dirs()
            .with_context(|| format!("Failed to create data directory {:?}", storage.root()))?;

        let rasterizer = Rasterizer::new(
            storage.clone(),
            raster_methods,
            RasterOptions {
                dpi: config.raster.dpi,
                timeout: Duration::from_secs(config.raster.timeout_secs),
                cancel: shutdown.clone(),
            },
        );

        let pipeline = Arc::new(VideoPipeline::new(
            db.clone(),
            storage.clone(),
            transcoder,
            PipelineSettings::from(&config.video),
            shutdown.clone(),
        ));
        let (videos, workers) = video::spawn_workers(pipeline, config.video.workers, shutdown.clone());

        let signer = TokenSigner::from_config(config.server.token_secret.as_deref())
            .context("Invalid token secret")?;
        let login_limiter = rate_limit::create_limiter(config.server.login_per_minute);

        let ctx = Self {
            config: Arc::new(config),
            db,
            storage,
            rasterizer,
            videos,
            signer: Arc::new(signer),
            login_limiter,
            shutdown,
        };
        Ok((ctx, workers))
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::RANGE])
        .expose_headers([
            header::CONTENT_RANGE,
            header::HeaderName::from_static("x-page-number"),
            header::HeaderName::from_static("x-total-pages"),
            header::HeaderName::from_static("x-raster-method"),
        ]);

    let login = Router::new()
        .route("/auth/login", post(auth::login))
        .route_layer(middleware::from_fn_with_state(
            ctx.login_limiter.clone(),
            rate_limit::rate_limit_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(login)
        .route("/auth/logout", post(auth::logout))
        .route("/auth/status", get(auth::auth_status))
        .merge(routes_documents::document_routes())
        .merge(routes_videos::video_routes())
        .merge(routes_violations::violation_routes())
        .layer(DefaultBodyLimit::max(ctx.config.server.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    std::fs::create_dir_all(&config.server.data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", config.server.data_dir))?;
    let db_path = config.db_path();
    let db = init_pool(&db_path.to_string_lossy())
        .with_context(|| format!("Failed to open database {:?}", db_path))?;

    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    for info in tools.check_all().iter().filter(|t| !t.available) {
        tracing::warn!(tool = %info.name, "Tool not found; dependent features will fall back");
    }
    let raster_methods = gatehouse_av::raster::methods_from_names(&tools, &config.raster.methods)
        .context("Invalid raster method configuration")?;
    let transcoder: Arc<dyn Transcoder> = Arc::new(FfmpegTranscoder::new(tools));

    let shutdown = CancellationToken::new();
    let (ctx, workers) = AppContext::build(config, db.clone(), raster_methods, transcoder, shutdown.clone())?;

    {
        let conn = get_conn(&db)?;
        let expired = auth_tokens::delete_expired_tokens(&conn)?;
        if expired > 0 {
            tracing::info!(count = expired, "Removed expired sessions");
        }
    }
    let queued = video::recover(&db, &ctx.videos)?;
    if queued > 0 {
        tracing::info!(count = queued, "Queued pending video packages");
    }

    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = workers.await {
        tracing::warn!("Video worker pool ended abnormally: {}", e);
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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

    tracing::info!("Shutdown signal received");
}
