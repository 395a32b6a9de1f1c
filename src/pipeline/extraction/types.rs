use serde::{Deserialize, Serialize};

use crate::models::StudentProfile;

/// One event of an extraction run.
///
/// `Partial` carries a single chunk's raw text, not the cumulative buffer.
/// `Final` is emitted at most once and always last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExtractionUpdate {
    Partial { text: String },
    Final { profile: StudentProfile },
}

impl ExtractionUpdate {
    pub fn partial_text(&self) -> Option<&str> {
        match self {
            ExtractionUpdate::Partial { text } => Some(text),
            ExtractionUpdate::Final { .. } => None,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ExtractionUpdate::Final { .. })
    }
}
