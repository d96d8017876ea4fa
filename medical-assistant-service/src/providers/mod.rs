//! Concrete wrappers around the external collaborators.
//!
//! Every wrapper returns a [`consult_flow::ServiceResult`] so callers pick
//! their own fallback. Nothing here retries.

pub mod openrouter;
pub mod speech;

pub use openrouter::OpenRouterModel;
pub use speech::HttpSpeechSynthesizer;

use consult_flow::ServiceError;

/// Map a transport-level reqwest failure onto the service error taxonomy
pub(crate) fn classify_reqwest_error(error: reqwest::Error) -> ServiceError {
    if error.is_timeout() {
        ServiceError::timeout(error.to_string())
    } else if error.is_decode() {
        ServiceError::malformed(error.to_string())
    } else if let Some(status) = error.status() {
        ServiceError::rejected(status.as_u16(), error.to_string())
    } else {
        ServiceError::transport(error.to_string())
    }
}
