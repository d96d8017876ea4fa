use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use consult_flow::{Patient, Phase, Session, SpeechClip, Turn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StartConsultationRequest {
    #[serde(default)]
    pub patient: Option<Patient>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct HospitalQuery {
    pub city: Option<String>,
}

/// Audio inlined into a JSON response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioPayload {
    pub mime_type: String,
    pub data_base64: String,
}

impl From<&SpeechClip> for AudioPayload {
    fn from(clip: &SpeechClip) -> Self {
        Self {
            mime_type: clip.mime_type.clone(),
            data_base64: STANDARD.encode(&clip.bytes),
        }
    }
}

pub fn audio_payload(clip: Option<&SpeechClip>) -> Option<AudioPayload> {
    clip.map(AudioPayload::from)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartConsultationResponse {
    pub session_id: String,
    pub greeting: Turn,
    pub audio: Option<AudioPayload>,
}

/// Snapshot of a consultation
#[derive(Debug, Serialize, Deserialize)]
pub struct ConsultationResponse {
    pub session_id: String,
    pub phase: Phase,
    pub chat_ended: bool,
    pub vision_summary: String,
    pub patient: Option<Patient>,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl From<&Session> for ConsultationResponse {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            phase: session.state.phase(),
            chat_ended: session.state.chat_ended(),
            vision_summary: session.state.vision_summary().to_string(),
            patient: session.state.patient().cloned(),
            turns: session.state.turns().to_vec(),
            created_at: session.created_at,
            last_active: session.last_active,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub session_id: String,
    /// `replied` or `ignored`
    pub status: String,
    pub reply: Option<Turn>,
    pub emergency: bool,
    /// Failure kind when the reply is the fallback text
    pub degraded: Option<String>,
    pub audio: Option<AudioPayload>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VisionResponse {
    pub session_id: String,
    pub vision_summary: String,
    pub audio: Option<AudioPayload>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndChatResponse {
    pub session_id: String,
    pub chat_ended: bool,
    pub newly_ended: bool,
    pub message: String,
}
