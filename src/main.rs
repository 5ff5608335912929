use clap::{Parser, ValueEnum};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use task_intake::config::IntakeConfig;
use task_intake::infrastructure::{options, storage};
use task_intake::services::intake::IntakeService;
use task_intake::services::scheduler::InMemoryScheduler;
use task_intake::services::worker::StagingSweeper;
use task_intake::{AppState, create_app};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// HTTP API only
    Api,
    /// Staging sweeper only
    Sweeper,
    /// Both
    All,
}

#[derive(Parser, Debug)]
#[command(version, about = "Photogrammetry task intake node")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 3000)]
    port: u16,

    #[arg(long, value_enum, default_value_t = Mode::All)]
    mode: Mode,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    // Initialize tracing with EnvFilter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "task_intake=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting task intake ({:?} mode)...", args.mode);

    let config = Arc::new(IntakeConfig::from_env());
    info!(
        "🛡️  Intake Config: Max Upload={}MB, Max Images={}, Import Fallback={:?}, Move Retries={}x{}ms",
        config.max_upload_size / 1024 / 1024,
        config
            .max_images
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unlimited".to_string()),
        config.import_fallback,
        config.move_retry_attempts,
        config.move_retry_delay_ms
    );

    storage::prepare_directories(&config).await?;

    // Setup Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let sweeper = (args.mode != Mode::Api).then(|| {
        let sweeper = StagingSweeper::new(
            config.staging_dir.clone(),
            config.staging_cleanup_age(),
            shutdown_rx,
        );
        tokio::spawn(sweeper.run())
    });

    if args.mode == Mode::Sweeper {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
        if let Some(handle) = sweeper {
            handle.await?;
        }
        info!("🛑 Sweeper shut down gracefully.");
        return Ok(());
    }

    let options_filter = options::setup_options_filter(&config).await?;
    let scheduler = Arc::new(InMemoryScheduler::new());
    let intake = Arc::new(IntakeService::new(
        config.clone(),
        scheduler.clone(),
        options_filter,
    ));

    let state = AppState {
        intake,
        scheduler,
        config: config.clone(),
    };

    let app = create_app(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            })
            .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                info!("📥 {} {}", request.method(), request.uri());
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            ),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("✅ Server ready at http://{}", addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Some(handle) = sweeper {
        handle.await?;
    }

    info!("🛑 Server shut down gracefully.");
    Ok(())
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
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
