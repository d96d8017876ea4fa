use serde::{Deserialize, Serialize};

use crate::conversation::ConversationState;
use crate::error::ServiceErrorKind;

pub const REPORT_TITLE: &str = "AI DOCTOR PRO - MEDICAL REPORT";
pub const REPORT_FOOTER: &str = "AI Generated Report";
pub const REPORT_DISCLAIMER: &str = "AI Report - See a Doctor";
pub const REPORT_FILENAME: &str = "Medical_Report.pdf";

/// Summary used when the model could not produce one
pub const FALLBACK_SUMMARY: &str =
    "Automated summary unavailable. The full consultation transcript is attached below.";

/// Prompt asking the model to turn the consultation into a report
pub fn report_prompt(state: &ConversationState) -> String {
    let chat = state.transcript_lines().join("\n");
    let patient = state
        .patient()
        .map(|p| format!("Patient: {}\n", p.describe()))
        .unwrap_or_default();
    format!(
        "Make a clean report:\n{}Chat:\n{}\n\nImage: {}",
        patient,
        chat,
        state.vision_summary()
    )
}

/// Everything that goes into the exported PDF, in reading order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub title: String,
    pub patient: Option<String>,
    pub summary: Vec<String>,
    pub vision_summary: String,
    pub transcript: Vec<String>,
    pub disclaimer: String,
    pub footer: String,
}

impl ReportDocument {
    pub fn compose(summary_text: &str, state: &ConversationState) -> Self {
        Self {
            title: REPORT_TITLE.to_string(),
            patient: state.patient().map(|p| p.describe()),
            summary: summary_text
                .lines()
                .map(str::trim_end)
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect(),
            vision_summary: state.vision_summary().to_string(),
            transcript: state.transcript_lines(),
            disclaimer: REPORT_DISCLAIMER.to_string(),
            footer: REPORT_FOOTER.to_string(),
        }
    }
}

/// A finished report and how it was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub document: ReportDocument,
    /// Set when the summary is the fallback text
    pub degraded: Option<ServiceErrorKind>,
}
