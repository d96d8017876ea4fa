use medical_assistant_service::{
    Config, build_router, create_app_state, spawn_session_sweeper, telemetry::init_tracing,
};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine; real environment variables still apply
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let state = match create_app_state(&config) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to initialize service");
            std::process::exit(1);
        }
    };
    spawn_session_sweeper(state.runner.clone(), config.session_idle_timeout);
    let app = build_router(state);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let addr = listener.local_addr()?;

    info!("AI Doctor consultation service starting on {}", addr);
    info!("API Documentation available at http://{}/", addr);
    info!("Health check endpoint: http://{}/health", addr);
    info!(
        model = %config.model.model,
        history_window = ?config.history_window,
        speech_enabled = config.speech.is_some(),
        session_idle_timeout_secs = config.session_idle_timeout.as_secs(),
        "Configuration loaded"
    );

    axum::serve(listener, app).await?;

    Ok(())
}
