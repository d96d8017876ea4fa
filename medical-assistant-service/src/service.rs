use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::from_fn,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
};
use consult_flow::{
    Action, ConsultError, Consultation, ImageUpload, InMemorySessionStorage, LanguageModel,
    Outcome, Patient, REPORT_FILENAME, SessionRunner, SilentSpeech, SpeechSynthesizer,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    hospitals::{DEFAULT_CITY, MapPanel, hospital_map},
    models::{
        ConsultationResponse, EndChatResponse, HospitalQuery, MessageRequest, MessageResponse,
        StartConsultationRequest, StartConsultationResponse, VisionResponse, audio_payload,
    },
    pdf::{PDF_MIME_TYPE, ReportFonts, render_pdf},
    providers::{HttpSpeechSynthesizer, OpenRouterModel},
    telemetry::correlation_id_middleware,
};

/// Largest accepted image upload
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Upper bound between idle session sweeps
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "session_id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn consult_error(err: ConsultError, session_id: &str) -> ApiError {
    match err {
        ConsultError::SessionNotFound(_) => not_found_error("Session not found", session_id),
        ConsultError::ChatEnded => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "Chat has already ended",
                "session_id": session_id
            })),
        ),
        ConsultError::ChatNotEnded => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "Chat first! End the chat before requesting a report",
                "session_id": session_id
            })),
        ),
        ConsultError::UnsupportedImage(details) => (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Json(json!({
                "error": "Unsupported image type, upload PNG, JPEG or WebP",
                "details": details
            })),
        ),
        ConsultError::InvalidPatient(details) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Invalid patient details",
                "details": details
            })),
        ),
        ConsultError::Service(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": "External service failed",
                "kind": e.kind.as_str(),
                "details": e.message,
                "session_id": session_id
            })),
        ),
        ConsultError::StorageError(details) => internal_error("Session storage failed", &details),
    }
}

fn unexpected_outcome(session_id: &str) -> ApiError {
    error!(session_id = %session_id, "Action produced an unexpected outcome");
    internal_error("Unexpected outcome", session_id)
}

#[derive(Clone)]
pub struct AppState {
    pub runner: SessionRunner,
    pub fonts: Arc<ReportFonts>,
}

impl AppState {
    /// Fails when the configured report fonts cannot be loaded
    pub fn new(
        model: Arc<dyn LanguageModel>,
        speech: Arc<dyn SpeechSynthesizer>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let fonts = ReportFonts::load(&config.pdf)?;
        let consultation =
            Consultation::new(model, speech).with_history_window(config.history_window);
        Ok(Self {
            runner: SessionRunner::new(consultation, Arc::new(InMemorySessionStorage::new())),
            fonts: Arc::new(fonts),
        })
    }
}

pub fn create_app(config: &Config) -> anyhow::Result<Router> {
    let app_state = create_app_state(config)?;
    Ok(build_router(app_state))
}

pub fn create_app_state(config: &Config) -> anyhow::Result<AppState> {
    let model: Arc<dyn LanguageModel> = Arc::new(OpenRouterModel::new(config.model.clone())?);

    let speech: Arc<dyn SpeechSynthesizer> = match &config.speech {
        Some(speech_config) => {
            info!(voice = %speech_config.voice, "Speech synthesis enabled");
            Arc::new(HttpSpeechSynthesizer::new(speech_config.clone())?)
        }
        None => {
            info!("Speech synthesis disabled (set TTS_API_KEY to enable)");
            Arc::new(SilentSpeech)
        }
    };

    AppState::new(model, speech, config)
}

/// Periodically discard consultations idle for longer than `max_idle`
pub fn spawn_session_sweeper(runner: SessionRunner, max_idle: Duration) -> JoinHandle<()> {
    let period = max_idle.min(SWEEP_INTERVAL);
    info!(max_idle_secs = max_idle.as_secs(), "Starting idle session sweeper");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if let Err(e) = runner.expire_idle(max_idle).await {
                warn!(error = %e, "Failed to expire idle sessions");
            }
        }
    })
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/hospitals", get(find_hospitals))
        .route("/consultations", post(start_consultation))
        .route(
            "/consultations/{session_id}",
            get(get_consultation).delete(delete_consultation),
        )
        .route("/consultations/{session_id}/messages", post(submit_message))
        .route(
            "/consultations/{session_id}/image",
            post(upload_image).layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES)),
        )
        .route("/consultations/{session_id}/patient", put(set_patient))
        .route("/consultations/{session_id}/end", post(end_chat))
        .route("/consultations/{session_id}/report", get(download_report))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "AI Doctor Consultation Service",
        "version": "1.0.0",
        "description":
            "Medical assistant chat with image analysis, emergency triage and PDF reports",
        "endpoints": {
            "POST /consultations": "Start a consultation",
            "GET /consultations/{session_id}": "Get the conversation",
            "DELETE /consultations/{session_id}": "Discard the consultation",
            "POST /consultations/{session_id}/messages": "Send a message",
            "POST /consultations/{session_id}/image": "Upload a PNG, JPEG or WebP image",
            "PUT /consultations/{session_id}/patient": "Record patient name and age",
            "POST /consultations/{session_id}/end": "End the chat",
            "GET /consultations/{session_id}/report": "Download the PDF report",
            "GET /hospitals?city=": "Nearby hospitals",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn find_hospitals(Query(query): Query<HospitalQuery>) -> ApiResult<MapPanel> {
    let city = query.city.unwrap_or_else(|| DEFAULT_CITY.to_string());
    hospital_map(&city)
        .map(Json)
        .ok_or_else(|| bad_request_error("City is required"))
}

fn validate_session_id(session_id: &str) -> Result<(), ApiError> {
    if Uuid::parse_str(session_id).is_err() {
        warn!(session_id = %session_id, "Invalid session ID format");
        return Err(bad_request_error("Invalid session ID format"));
    }
    Ok(())
}

async fn start_consultation(
    State(state): State<AppState>,
    Json(request): Json<StartConsultationRequest>,
) -> ApiResult<StartConsultationResponse> {
    let (session, audio) = state.runner.start(request.patient).await.map_err(|e| {
        error!(error = %e, "Failed to start consultation");
        internal_error("Failed to start consultation", &e.to_string())
    })?;

    let greeting = session
        .state
        .turns()
        .first()
        .cloned()
        .ok_or_else(|| internal_error("Consultation has no greeting", &session.id))?;
    Ok(Json(StartConsultationResponse {
        session_id: session.id,
        greeting,
        audio: audio_payload(audio.as_ref()),
    }))
}

async fn get_consultation(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<ConsultationResponse> {
    validate_session_id(&session_id)?;

    match state.runner.storage().get(&session_id).await {
        Ok(Some(session)) => Ok(Json(ConsultationResponse::from(&session))),
        Ok(None) => Err(not_found_error("Session not found", &session_id)),
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Failed to load session");
            Err(internal_error("Failed to load session", &e.to_string()))
        }
    }
}

async fn delete_consultation(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    validate_session_id(&session_id)?;

    match state.runner.end_session(&session_id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(not_found_error("Session not found", &session_id)),
        Err(e) => Err(consult_error(e, &session_id)),
    }
}

async fn submit_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<MessageRequest>,
) -> ApiResult<MessageResponse> {
    validate_session_id(&session_id)?;
    info!(
        session_id = %session_id,
        content_length = request.content.len(),
        "Processing message"
    );

    let (_, outcome) = state
        .runner
        .run(&session_id, Action::SubmitMessage(request.content))
        .await
        .map_err(|e| consult_error(e, &session_id))?;

    let response = match outcome {
        Outcome::Ignored => MessageResponse {
            session_id,
            status: "ignored".to_string(),
            reply: None,
            emergency: false,
            degraded: None,
            audio: None,
        },
        Outcome::Replied(reply) => MessageResponse {
            session_id,
            status: "replied".to_string(),
            audio: audio_payload(reply.audio.as_ref()),
            reply: Some(reply.turn),
            emergency: reply.emergency,
            degraded: reply.degraded.map(|kind| kind.as_str().to_string()),
        },
        _ => return Err(unexpected_outcome(&session_id)),
    };

    Ok(Json(response))
}

async fn upload_image(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<VisionResponse> {
    validate_session_id(&session_id)?;

    let declared = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let upload = ImageUpload::from_bytes(body.to_vec(), declared)
        .map_err(|e| consult_error(e, &session_id))?;

    let (_, outcome) = state
        .runner
        .run(&session_id, Action::UploadImage(upload))
        .await
        .map_err(|e| consult_error(e, &session_id))?;

    match outcome {
        Outcome::VisionUpdated(update) => Ok(Json(VisionResponse {
            session_id,
            audio: audio_payload(update.audio.as_ref()),
            vision_summary: update.summary,
        })),
        _ => Err(unexpected_outcome(&session_id)),
    }
}

async fn set_patient(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(patient): Json<Patient>,
) -> ApiResult<ConsultationResponse> {
    validate_session_id(&session_id)?;

    let (session, _) = state
        .runner
        .run(&session_id, Action::SetPatient(patient))
        .await
        .map_err(|e| consult_error(e, &session_id))?;

    Ok(Json(ConsultationResponse::from(&session)))
}

async fn end_chat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<EndChatResponse> {
    validate_session_id(&session_id)?;

    let (_, outcome) = state
        .runner
        .run(&session_id, Action::EndChat)
        .await
        .map_err(|e| consult_error(e, &session_id))?;

    match outcome {
        Outcome::ChatEnded { newly_ended } => Ok(Json(EndChatResponse {
            session_id,
            chat_ended: true,
            newly_ended,
            message: "Ready! Download your report".to_string(),
        })),
        _ => Err(unexpected_outcome(&session_id)),
    }
}

async fn download_report(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    validate_session_id(&session_id)?;
    info!(session_id = %session_id, "Generating report");

    let (_, outcome) = state
        .runner
        .run(&session_id, Action::RequestReport)
        .await
        .map_err(|e| consult_error(e, &session_id))?;

    let Outcome::Report(report) = outcome else {
        return Err(unexpected_outcome(&session_id));
    };

    let bytes = render_pdf(state.fonts.clone(), &report.document).await.map_err(|e| {
        error!(session_id = %session_id, error = %e, "Failed to render PDF report");
        internal_error("Failed to render PDF report", &format!("{:#}", e))
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(PDF_MIME_TYPE));
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", REPORT_FILENAME))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(kind) = report.degraded {
        headers.insert(
            "x-report-degraded",
            HeaderValue::from_static(kind.as_str()),
        );
    }

    Ok((StatusCode::OK, headers, bytes).into_response())
}
