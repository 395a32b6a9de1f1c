use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// A student message waiting in the support-staff inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentMessage {
    pub student_name: String,
    pub student_id: String,
    pub received_at: DateTime<Local>,
    pub subject: String,
    pub message_text: String,
    pub is_urgent: bool,
}

impl StudentMessage {
    /// Relative age of the message: "Just now", "12m ago", "5h ago", "2d ago".
    pub fn time_ago(&self, now: DateTime<Local>) -> String {
        let diff = now.signed_duration_since(self.received_at);
        if diff.num_minutes() < 1 {
            "Just now".to_string()
        } else if diff.num_minutes() < 60 {
            format!("{}m ago", diff.num_minutes())
        } else if diff.num_hours() < 24 {
            format!("{}h ago", diff.num_hours())
        } else {
            format!("{}d ago", diff.num_days())
        }
    }
}
