use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    conversation::{ConversationState, HistoryWindow, Patient, Phase, Role, Turn},
    emergency::{EMERGENCY_ALERT, EMERGENCY_SPEECH, EmergencyDetector},
    error::{ConsultError, Result, ServiceError, ServiceErrorKind},
    report::{FALLBACK_SUMMARY, Report, ReportDocument, report_prompt},
    services::{ImageUpload, LanguageModel, SpeechClip, SpeechSynthesizer, speech_excerpt},
};

pub const REPLY_PREAMBLE: &str = "Be a kind doctor. Reply shortly.";
pub const IMAGE_INSTRUCTION: &str = "Analyze this medical image clearly.";
pub const IMAGE_ANALYZED_SPEECH: &str = "Image analyzed";

/// Reply appended when the model call fails
pub const FALLBACK_REPLY: &str =
    "Sorry, I could not reach the medical assistant just now. Please try again in a moment.";

pub fn greeting_for(patient: Option<&Patient>) -> String {
    match patient {
        Some(p) => format!(
            "Hello {}! I'm your AI Doctor. How can I help you today?",
            p.name
        ),
        None => "Hello! I'm your AI Doctor. What's your name and how can I help you today?"
            .to_string(),
    }
}

/// A user action against one conversation
#[derive(Debug, Clone)]
pub enum Action {
    SubmitMessage(String),
    UploadImage(ImageUpload),
    SetPatient(Patient),
    EndChat,
    RequestReport,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::SubmitMessage(_) => "submit_message",
            Action::UploadImage(_) => "upload_image",
            Action::SetPatient(_) => "set_patient",
            Action::EndChat => "end_chat",
            Action::RequestReport => "request_report",
        }
    }
}

/// Assistant turn produced for a submitted message
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub turn: Turn,
    pub emergency: bool,
    /// Set when `turn` is the fallback reply
    pub degraded: Option<ServiceErrorKind>,
    pub audio: Option<SpeechClip>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisionUpdate {
    pub summary: String,
    pub audio: Option<SpeechClip>,
}

/// Result of dispatching one action
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Input was blank; nothing changed
    Ignored,
    Replied(Reply),
    VisionUpdated(VisionUpdate),
    PatientRecorded,
    ChatEnded { newly_ended: bool },
    Report(Report),
}

/// Event dispatcher for a conversation.
///
/// Owns the external collaborators and applies one action at a time to the
/// state it is handed. It never keeps conversation state of its own.
#[derive(Clone)]
pub struct Consultation {
    model: Arc<dyn LanguageModel>,
    speech: Arc<dyn SpeechSynthesizer>,
    detector: EmergencyDetector,
    window: HistoryWindow,
}

impl Consultation {
    pub fn new(model: Arc<dyn LanguageModel>, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        Self {
            model,
            speech,
            detector: EmergencyDetector::default(),
            window: HistoryWindow::default(),
        }
    }

    pub fn with_history_window(mut self, window: HistoryWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_detector(mut self, detector: EmergencyDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Fresh conversation plus the spoken greeting, if speech is available
    pub async fn start(&self, patient: Option<Patient>) -> (ConversationState, Option<SpeechClip>) {
        let greeting = greeting_for(patient.as_ref());
        let audio = self.speak(&greeting).await;
        let state = match patient {
            Some(p) => ConversationState::with_patient(greeting, p),
            None => ConversationState::new(greeting),
        };
        (state, audio)
    }

    pub async fn dispatch(&self, state: &mut ConversationState, action: Action) -> Result<Outcome> {
        match action {
            Action::SubmitMessage(text) => self.submit_message(state, &text).await,
            Action::UploadImage(upload) => self.upload_image(state, &upload).await,
            Action::SetPatient(patient) => set_patient(state, patient),
            Action::EndChat => Ok(end_chat(state)),
            Action::RequestReport => self.request_report(state).await.map(Outcome::Report),
        }
    }

    pub async fn submit_message(
        &self,
        state: &mut ConversationState,
        text: &str,
    ) -> Result<Outcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Outcome::Ignored);
        }
        if state.phase() == Phase::Ended {
            return Err(ConsultError::ChatEnded);
        }

        state.append_turn(Role::User, text);

        if self.detector.is_emergency(text) {
            warn!(task = "submit_message", "Emergency keyword detected, skipping model call");
            state.append_turn(Role::Assistant, EMERGENCY_ALERT);
            let audio = self.speak(EMERGENCY_SPEECH).await;
            return Ok(Outcome::Replied(Reply {
                turn: Turn::assistant(EMERGENCY_ALERT),
                emergency: true,
                degraded: None,
                audio,
            }));
        }

        let prompt = self.reply_prompt(state);
        let (content, degraded) = match self.model.complete(&prompt).await {
            Ok(reply) if !reply.trim().is_empty() => (reply.trim().to_string(), None),
            Ok(_) => {
                warn!(task = "submit_message", "Model returned an empty reply");
                (FALLBACK_REPLY.to_string(), Some(ServiceErrorKind::MalformedResponse))
            }
            Err(e) => {
                warn!(
                    task = "submit_message",
                    error = %e,
                    "Model call failed, using fallback reply"
                );
                (FALLBACK_REPLY.to_string(), Some(e.kind))
            }
        };

        state.append_turn(Role::Assistant, content.clone());
        info!(
            task = "submit_message",
            turns = state.turns().len(),
            degraded = degraded.is_some(),
            "Assistant reply appended"
        );

        let audio = self.speak(&content).await;
        Ok(Outcome::Replied(Reply {
            turn: Turn::assistant(content),
            emergency: false,
            degraded,
            audio,
        }))
    }

    pub async fn upload_image(
        &self,
        state: &mut ConversationState,
        upload: &ImageUpload,
    ) -> Result<Outcome> {
        if state.phase() == Phase::Ended {
            return Err(ConsultError::ChatEnded);
        }

        info!(
            task = "upload_image",
            mime_type = upload.mime_type(),
            size = upload.bytes().len(),
            "Analyzing uploaded image"
        );

        let summary = self
            .model
            .describe_image(IMAGE_INSTRUCTION, upload)
            .await
            .map_err(|e| {
                warn!(
                    task = "upload_image",
                    error = %e,
                    "Image analysis failed, keeping previous summary"
                );
                ConsultError::Service(e)
            })?;

        let summary = summary.trim().to_string();
        if summary.is_empty() {
            warn!(
                task = "upload_image",
                "Image analysis returned no text, keeping previous summary"
            );
            return Err(ConsultError::Service(ServiceError::malformed(
                "image analysis returned no text",
            )));
        }
        state.set_vision(summary.clone());
        let audio = self.speak(IMAGE_ANALYZED_SPEECH).await;

        Ok(Outcome::VisionUpdated(VisionUpdate { summary, audio }))
    }

    pub async fn request_report(&self, state: &ConversationState) -> Result<Report> {
        if !state.chat_ended() {
            return Err(ConsultError::ChatNotEnded);
        }

        let prompt = report_prompt(state);
        let (summary, degraded) = match self.model.complete(&prompt).await {
            Ok(text) if !text.trim().is_empty() => (text, None),
            Ok(_) => (
                FALLBACK_SUMMARY.to_string(),
                Some(ServiceErrorKind::MalformedResponse),
            ),
            Err(e) => {
                warn!(task = "request_report", error = %e, "Report summary failed, using fallback");
                (FALLBACK_SUMMARY.to_string(), Some(e.kind))
            }
        };

        info!(
            task = "request_report",
            summary_length = summary.len(),
            "Report composed"
        );

        Ok(Report {
            document: ReportDocument::compose(&summary, state),
            degraded,
        })
    }

    fn reply_prompt(&self, state: &ConversationState) -> String {
        let history: Vec<String> = state.history(self.window).iter().map(Turn::line).collect();
        format!("{}\n{}", REPLY_PREAMBLE, history.join("\n"))
    }

    // Speech is best-effort. Failures are logged and dropped.
    async fn speak(&self, text: &str) -> Option<SpeechClip> {
        match self.speech.synthesize(speech_excerpt(text)).await {
            Ok(clip) => Some(clip),
            Err(e) => {
                debug!(error = %e, "Speech synthesis skipped");
                None
            }
        }
    }
}

pub fn set_patient(state: &mut ConversationState, patient: Patient) -> Result<Outcome> {
    let name = patient.name.trim();
    if name.is_empty() {
        return Err(ConsultError::InvalidPatient("name is required".to_string()));
    }
    state.set_patient(Patient {
        name: name.to_string(),
        age: patient.age,
    });
    Ok(Outcome::PatientRecorded)
}

pub fn end_chat(state: &mut ConversationState) -> Outcome {
    let newly_ended = state.end_chat();
    if newly_ended {
        info!(task = "end_chat", turns = state.turns().len(), "Chat ended");
    }
    Outcome::ChatEnded { newly_ended }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::error::{ServiceError, ServiceResult};
    use crate::services::{ImageUpload, LanguageModel, SpeechClip, SpeechSynthesizer};

    /// Scripted model that records every prompt it receives
    pub struct ScriptedModel {
        replies: Mutex<Vec<ServiceResult<String>>>,
        pub prompts: Mutex<Vec<String>>,
        pub image_calls: AtomicUsize,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<ServiceResult<String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
                image_calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len() + self.image_calls.load(Ordering::SeqCst)
        }

        fn next(&self) -> ServiceResult<String> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Err(ServiceError::unavailable("script exhausted"))
            } else {
                replies.remove(0)
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, prompt: &str) -> ServiceResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.next()
        }

        async fn describe_image(
            &self,
            _instruction: &str,
            _image: &ImageUpload,
        ) -> ServiceResult<String> {
            self.image_calls.fetch_add(1, Ordering::SeqCst);
            self.next()
        }
    }

    pub struct RecordingSpeech {
        pub spoken: Mutex<Vec<String>>,
    }

    impl RecordingSpeech {
        pub fn new() -> Self {
            Self {
                spoken: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for RecordingSpeech {
        async fn synthesize(&self, text: &str) -> ServiceResult<SpeechClip> {
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(SpeechClip {
                mime_type: "audio/mpeg".to_string(),
                bytes: text.as_bytes().to_vec(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{RecordingSpeech, ScriptedModel};
    use super::*;
    use crate::conversation::NO_IMAGE_SUMMARY;
    use crate::error::ServiceError;
    use crate::services::SilentSpeech;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn consultation(model: Arc<ScriptedModel>) -> (Consultation, Arc<RecordingSpeech>) {
        let speech = Arc::new(RecordingSpeech::new());
        (Consultation::new(model, speech.clone()), speech)
    }

    fn png() -> ImageUpload {
        ImageUpload::from_bytes(PNG_MAGIC.to_vec(), Some("image/png")).unwrap()
    }

    #[tokio::test]
    async fn start_seeds_greeting_and_speaks_it() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let (consultation, speech) = consultation(model.clone());

        let (state, audio) = consultation.start(None).await;

        assert_eq!(state.turns().len(), 1);
        assert_eq!(state.turns()[0].role, Role::Assistant);
        assert!(!state.chat_ended());
        assert_eq!(state.vision_summary(), NO_IMAGE_SUMMARY);
        assert!(audio.is_some());
        assert_eq!(speech.spoken.lock().unwrap().len(), 1);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn start_greets_known_patient_by_name() {
        let (consultation, _) = consultation(Arc::new(ScriptedModel::new(vec![])));
        let patient = Patient {
            name: "Sana".to_string(),
            age: Some(29),
        };

        let (state, _) = consultation.start(Some(patient.clone())).await;

        assert!(state.turns()[0].content.starts_with("Hello Sana!"));
        assert_eq!(state.patient(), Some(&patient));
    }

    #[tokio::test]
    async fn headache_gets_model_reply() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(
            "  Rest and drink plenty of water.  ".to_string(),
        )]));
        let (consultation, speech) = consultation(model.clone());
        let (mut state, _) = consultation.start(None).await;

        let outcome = consultation
            .dispatch(&mut state, Action::SubmitMessage("I have a headache".to_string()))
            .await
            .unwrap();

        let Outcome::Replied(reply) = outcome else {
            panic!("expected a reply");
        };
        assert!(!reply.emergency);
        assert!(reply.degraded.is_none());
        assert_eq!(reply.turn.content, "Rest and drink plenty of water.");
        assert_eq!(state.turns().len(), 3);
        assert_eq!(state.turns()[1], Turn::user("I have a headache"));
        assert_eq!(state.turns()[2], Turn::assistant("Rest and drink plenty of water."));
        assert_eq!(state.phase(), Phase::Chatting);

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with(REPLY_PREAMBLE));
        assert!(prompts[0].ends_with("user: I have a headache"));
        assert_eq!(
            speech.spoken.lock().unwrap().last().map(String::as_str),
            Some("Rest and drink plenty of water.")
        );
    }

    #[tokio::test]
    async fn emergency_message_skips_model() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("should not be used".to_string())]));
        let (consultation, speech) = consultation(model.clone());
        let (mut state, _) = consultation.start(None).await;

        let outcome = consultation
            .submit_message(&mut state, "I think it's a heart attack")
            .await
            .unwrap();

        let Outcome::Replied(reply) = outcome else {
            panic!("expected a reply");
        };
        assert!(reply.emergency);
        assert_eq!(reply.turn.content, EMERGENCY_ALERT);
        assert_eq!(model.calls(), 0);
        assert_eq!(state.turns().len(), 3);
        assert_eq!(state.turns()[2], Turn::assistant(EMERGENCY_ALERT));
        assert_eq!(
            speech.spoken.lock().unwrap().last().map(String::as_str),
            Some(EMERGENCY_SPEECH)
        );
    }

    #[tokio::test]
    async fn blank_message_is_ignored() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let (consultation, _) = consultation(model.clone());
        let (mut state, _) = consultation.start(None).await;
        let before = state.clone();

        let outcome = consultation.submit_message(&mut state, "   \n").await.unwrap();

        assert!(matches!(outcome, Outcome::Ignored));
        assert_eq!(state, before);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn model_failure_appends_fallback_reply() {
        let model = Arc::new(ScriptedModel::new(vec![Err(ServiceError::timeout(
            "no answer within 30s",
        ))]));
        let (consultation, _) = consultation(model);
        let (mut state, _) = consultation.start(None).await;

        let outcome = consultation
            .submit_message(&mut state, "My throat hurts")
            .await
            .unwrap();

        let Outcome::Replied(reply) = outcome else {
            panic!("expected a reply");
        };
        assert_eq!(reply.degraded, Some(ServiceErrorKind::Timeout));
        assert_eq!(reply.turn.content, FALLBACK_REPLY);
        assert_eq!(state.turns().len(), 3);
    }

    #[tokio::test]
    async fn speech_failure_does_not_affect_reply() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("Take paracetamol.".to_string())]));
        let consultation = Consultation::new(model, Arc::new(SilentSpeech));
        let (mut state, greeting_audio) = consultation.start(None).await;
        assert!(greeting_audio.is_none());

        let outcome = consultation.submit_message(&mut state, "fever").await.unwrap();

        let Outcome::Replied(reply) = outcome else {
            panic!("expected a reply");
        };
        assert!(reply.audio.is_none());
        assert_eq!(reply.turn.content, "Take paracetamol.");
    }

    #[tokio::test]
    async fn prompt_uses_history_window() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok("a1".to_string()),
            Ok("a2".to_string()),
        ]));
        let (consultation, _) = consultation(model.clone());
        let consultation = consultation.with_history_window(HistoryWindow::Last(2));
        let (mut state, _) = consultation.start(None).await;

        consultation.submit_message(&mut state, "q1").await.unwrap();
        consultation.submit_message(&mut state, "q2").await.unwrap();

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts[1], format!("{}\nassistant: a1\nuser: q2", REPLY_PREAMBLE));
    }

    #[tokio::test]
    async fn second_image_analysis_replaces_first() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok("Mild eczema".to_string()),
            Ok("Healing abrasion".to_string()),
        ]));
        let (consultation, speech) = consultation(model);
        let (mut state, _) = consultation.start(None).await;

        consultation.upload_image(&mut state, &png()).await.unwrap();
        consultation.upload_image(&mut state, &png()).await.unwrap();

        assert_eq!(state.vision_summary(), "Healing abrasion");
        assert_eq!(
            speech.spoken.lock().unwrap().last().map(String::as_str),
            Some(IMAGE_ANALYZED_SPEECH)
        );
    }

    #[tokio::test]
    async fn failed_image_analysis_keeps_previous_summary() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok("Mild eczema".to_string()),
            Err(ServiceError::rejected(429, "rate limited")),
        ]));
        let (consultation, _) = consultation(model);
        let (mut state, _) = consultation.start(None).await;

        consultation.upload_image(&mut state, &png()).await.unwrap();
        let err = consultation.upload_image(&mut state, &png()).await.unwrap_err();

        assert!(matches!(
            err,
            ConsultError::Service(ServiceError {
                kind: ServiceErrorKind::Rejected { status: 429 },
                ..
            })
        ));
        assert_eq!(state.vision_summary(), "Mild eczema");
        assert_eq!(state.turns().len(), 1);
    }

    #[tokio::test]
    async fn blank_image_analysis_is_malformed() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("  \n".to_string())]));
        let (consultation, _) = consultation(model);
        let (mut state, _) = consultation.start(None).await;

        let err = consultation.upload_image(&mut state, &png()).await.unwrap_err();

        assert!(matches!(
            err,
            ConsultError::Service(ServiceError {
                kind: ServiceErrorKind::MalformedResponse,
                ..
            })
        ));
        assert_eq!(state.vision_summary(), NO_IMAGE_SUMMARY);
    }

    #[tokio::test]
    async fn ended_chat_rejects_new_input() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let (consultation, _) = consultation(model.clone());
        let (mut state, _) = consultation.start(None).await;

        let first = consultation.dispatch(&mut state, Action::EndChat).await.unwrap();
        let second = consultation.dispatch(&mut state, Action::EndChat).await.unwrap();
        assert!(matches!(first, Outcome::ChatEnded { newly_ended: true }));
        assert!(matches!(second, Outcome::ChatEnded { newly_ended: false }));

        let err = consultation.submit_message(&mut state, "one more thing").await;
        assert!(matches!(err, Err(ConsultError::ChatEnded)));
        let err = consultation.upload_image(&mut state, &png()).await;
        assert!(matches!(err, Err(ConsultError::ChatEnded)));
        assert!(state.chat_ended());
        assert_eq!(state.turns().len(), 1);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn report_requires_ended_chat() {
        let (consultation, _) = consultation(Arc::new(ScriptedModel::new(vec![])));
        let (state, _) = consultation.start(None).await;

        let err = consultation.request_report(&state).await.unwrap_err();
        assert!(matches!(err, ConsultError::ChatNotEnded));
    }

    #[tokio::test]
    async fn report_contains_transcript_and_vision_once() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok("Hydrate.".to_string()),
            Ok("Healing abrasion".to_string()),
            Ok("Assessment: tension headache\n\nPlan: rest".to_string()),
        ]));
        let (consultation, _) = consultation(model.clone());
        let (mut state, _) = consultation.start(None).await;
        consultation.submit_message(&mut state, "I have a headache").await.unwrap();
        consultation.upload_image(&mut state, &png()).await.unwrap();
        end_chat(&mut state);

        let report = consultation.request_report(&state).await.unwrap();

        let doc = &report.document;
        assert!(report.degraded.is_none());
        assert_eq!(doc.summary, vec!["Assessment: tension headache", "Plan: rest"]);
        for line in state.transcript_lines() {
            assert_eq!(doc.transcript.iter().filter(|l| **l == line).count(), 1);
        }
        assert_eq!(doc.vision_summary, "Healing abrasion");

        let prompts = model.prompts.lock().unwrap();
        let report_prompt = prompts.last().unwrap();
        assert_eq!(report_prompt.matches("Image: Healing abrasion").count(), 1);
    }

    #[tokio::test]
    async fn report_falls_back_when_model_fails() {
        let (consultation, _) = consultation(Arc::new(ScriptedModel::new(vec![Err(
            ServiceError::transport("connection reset"),
        )])));
        let (mut state, _) = consultation.start(None).await;
        end_chat(&mut state);

        let report = consultation.request_report(&state).await.unwrap();

        assert_eq!(report.degraded, Some(ServiceErrorKind::Transport));
        assert_eq!(report.document.summary, vec![FALLBACK_SUMMARY]);
        assert_eq!(report.document.transcript.len(), 1);
    }

    #[tokio::test]
    async fn patient_requires_name() {
        let (consultation, _) = consultation(Arc::new(ScriptedModel::new(vec![])));
        let (mut state, _) = consultation.start(None).await;

        let err = consultation
            .dispatch(
                &mut state,
                Action::SetPatient(Patient {
                    name: "  ".to_string(),
                    age: None,
                }),
            )
            .await;
        assert!(matches!(err, Err(ConsultError::InvalidPatient(_))));

        let ok = consultation
            .dispatch(
                &mut state,
                Action::SetPatient(Patient {
                    name: " Hamza ".to_string(),
                    age: Some(52),
                }),
            )
            .await
            .unwrap();
        assert!(matches!(ok, Outcome::PatientRecorded));
        assert_eq!(state.patient().map(|p| p.name.as_str()), Some("Hamza"));
    }
}
