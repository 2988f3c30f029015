//! Process entry point: loads configuration, wires the call runner's
//! collaborators, installs the Prometheus recorder once, and serves the
//! router with graceful shutdown (§9 "keep a single instance in main for
//! convenience only").

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voicecore_config::{load_settings, Settings};
use voicecore_runner::{CallRunner, NullPersistence};
use voicecore_server::carrier::{CarrierClient, NullCarrierClient, WhatsAppCarrierClient};
use voicecore_server::config_provider::FileConfigProvider;
use voicecore_server::{create_router, webrtc_provider, AppState};
use voicecore_session::{ExecutorCache, SessionManager};
use voicecore_tools::ToolRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("VOICECORE_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        }
    };
    let settings = Arc::new(settings);

    init_tracing(&settings);
    tracing::info!(
        environment = ?settings.environment,
        config_env = env.as_deref().unwrap_or("default"),
        "starting voicecore-server"
    );

    let metrics_handle = PrometheusBuilder::new().install_recorder().expect("install prometheus recorder");

    let session_manager = SessionManager::new(settings.session.clone());
    let executor_cache = ExecutorCache::new(settings.executor_cache.clone());
    let tool_registry = Arc::new(ToolRegistry::new());
    let config_provider = Arc::new(FileConfigProvider::new(
        voicecore_config::env::chatbots_dir(),
        tool_registry,
    ));
    let persistence = Arc::new(NullPersistence);

    let runner = CallRunner::new(
        session_manager.clone(),
        executor_cache.clone(),
        config_provider.clone(),
        persistence,
        settings.audio.clone(),
    );

    let webrtc_subsystem = webrtc_provider::build();

    let carrier_client: Arc<dyn CarrierClient> =
        match (voicecore_config::env::whatsapp_access_token(), voicecore_config::env::whatsapp_phone_number_id()) {
            (Some(token), Some(phone_number_id)) => Arc::new(WhatsAppCarrierClient::new(token, phone_number_id)),
            _ => {
                tracing::info!("WHATSAPP_ACCESS_TOKEN/WHATSAPP_PHONE_NUMBER_ID not set, carrier reject calls are no-ops");
                Arc::new(NullCarrierClient)
            }
        };

    let state = AppState::new(
        settings.clone(),
        session_manager.clone(),
        runner.clone(),
        config_provider,
        webrtc_subsystem,
        carrier_client,
        metrics_handle,
    );

    let session_timers = session_manager.start_timers({
        let runner = runner.clone();
        move |session_id| {
            let runner = runner.clone();
            tokio::spawn(async move {
                runner.end_call(&session_id, Some("timeout".to_string())).await;
            });
        }
    });
    let cache_timers = executor_cache.start_cleanup_task();

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("shutting down, ending live calls");
    runner.shutdown(&session_timers, &cache_timers).await;
    tracing::info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, initiating graceful shutdown"),
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("voicecore={},tower_http=debug", settings.observability.log_level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
