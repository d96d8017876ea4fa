pub mod conversation;
pub mod emergency;
pub mod error;
pub mod handlers;
pub mod report;
pub mod runner;
pub mod services;
pub mod storage;

// Re-export commonly used types
pub use conversation::{
    ConversationState, HistoryWindow, NO_IMAGE_SUMMARY, Patient, Phase, Role, Turn,
};
pub use emergency::{EMERGENCY_ALERT, EmergencyDetector, is_emergency};
pub use error::{ConsultError, Result, ServiceError, ServiceErrorKind, ServiceResult};
pub use handlers::{Action, Consultation, Outcome, Reply, VisionUpdate};
pub use report::{REPORT_FILENAME, Report, ReportDocument};
pub use runner::SessionRunner;
pub use services::{ImageUpload, LanguageModel, SilentSpeech, SpeechClip, SpeechSynthesizer};
pub use storage::{InMemorySessionStorage, Session, SessionStorage};
