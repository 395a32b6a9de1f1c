use serde::{Deserialize, Serialize};

use super::enums::{CitizenshipStatus, HighSchoolStatus};

/// Student details extracted from a free-text message.
///
/// Every field is independently optional: `None` means the message did not
/// mention it, not that the value is known to be false or zero. Field names
/// on the wire follow the extraction schema (`FirstName`, `SSN`, `GPA`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    #[serde(rename = "FirstName", default)]
    pub first_name: Option<String>,
    #[serde(rename = "LastName", default)]
    pub last_name: Option<String>,
    #[serde(rename = "CitizenshipStatus", default)]
    pub citizenship_status: Option<CitizenshipStatus>,
    #[serde(rename = "SSN", default)]
    pub ssn: Option<String>,
    #[serde(rename = "HighSchoolStatus", default)]
    pub high_school_status: Option<HighSchoolStatus>,
    /// Whether the student reported past problems with federal loans.
    #[serde(rename = "HasFederalLoanIssues", default)]
    pub has_federal_loan_issues: Option<bool>,
    #[serde(rename = "GPA", default)]
    pub gpa: Option<f64>,
}

impl StudentProfile {
    /// True when nothing was extracted.
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.citizenship_status.is_none()
            && self.ssn.is_none()
            && self.high_school_status.is_none()
            && self.has_federal_loan_issues.is_none()
            && self.gpa.is_none()
    }

    /// Full name when at least one part is known.
    pub fn display_name(&self) -> Option<String> {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(first), None) => Some(first.to_string()),
            (None, Some(last)) => Some(last.to_string()),
            (None, None) => None,
        }
    }

    /// Label/value pairs for every field, with "Not provided" for gaps.
    pub fn summary_lines(&self) -> Vec<(&'static str, String)> {
        const MISSING: &str = "Not provided";
        let text = |v: &Option<String>| v.clone().unwrap_or_else(|| MISSING.to_string());

        vec![
            ("First name", text(&self.first_name)),
            ("Last name", text(&self.last_name)),
            (
                "Citizenship",
                self.citizenship_status
                    .map(|c| c.label().to_string())
                    .unwrap_or_else(|| MISSING.to_string()),
            ),
            ("SSN", text(&self.ssn)),
            (
                "High school",
                self.high_school_status
                    .map(|h| h.label().to_string())
                    .unwrap_or_else(|| MISSING.to_string()),
            ),
            (
                "Federal loan issues",
                match self.has_federal_loan_issues {
                    Some(true) => "Yes".to_string(),
                    Some(false) => "No".to_string(),
                    None => MISSING.to_string(),
                },
            ),
            (
                "GPA",
                self.gpa
                    .map(|g| format!("{g:.2}"))
                    .unwrap_or_else(|| MISSING.to_string()),
            ),
        ]
    }
}
