use crate::models::StudentProfile;

pub const ELIGIBILITY_SYSTEM_PROMPT: &str = r#"You are an assistant for financial aid office staff. You help staff answer questions about a student's eligibility for federal student aid.

RULES:
1. Base every statement on the STUDENT PROFILE below and on general federal aid eligibility requirements.
2. When a requirement depends on information the profile does not contain, say which information is missing instead of guessing.
3. Never promise or guarantee an award amount or an eligibility decision; final determinations are made by the financial aid office.
4. Keep answers short and practical so staff can relay them to the student.
5. Do not repeat the student's Social Security number."#;

/// Render the profile as a context block for the system message.
///
/// The SSN value itself never enters the chat prompt; only whether one was
/// provided.
pub fn build_profile_context(profile: &StudentProfile) -> String {
    let mut context = String::from("STUDENT PROFILE:\n");
    for (label, value) in profile.summary_lines() {
        let value = if label == "SSN" && profile.ssn.is_some() {
            "Provided".to_string()
        } else {
            value
        };
        context.push_str(&format!("- {label}: {value}\n"));
    }
    context
}

/// Full system message: instructions followed by the profile block.
pub fn build_system_message(profile: &StudentProfile) -> String {
    format!(
        "{ELIGIBILITY_SYSTEM_PROMPT}\n\n{}",
        build_profile_context(profile)
    )
}
