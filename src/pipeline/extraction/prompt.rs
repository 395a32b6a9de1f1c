/// Instruction text placed before the schema.
pub const EXTRACTION_PREAMBLE: &str = "Parse the provided user text into a JSON object that matches the provided JSON schema. If a property isn't found from the user text, leave it null. Be sure to set the HighSchoolStatus and CitizenshipStatus fields exactly as their enum string values are specified in the schema, do not add spaces or punctuation. Respond ONLY with the JSON object.";

/// JSON schema of `StudentProfile` as sent to the model.
///
/// Field names and enum spellings must match the serde mapping of
/// `StudentProfile`; models were tuned against this exact text.
pub const STUDENT_PROFILE_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "FirstName": {
      "type": ["string", "null"]
    },
    "LastName": {
      "type": ["string", "null"]
    },
    "CitizenshipStatus": {
      "type": ["string", "null"],
      "enum": [null, "USCitizen", "PermanentResident", "NonResidentAlien", "Other"]
    },
    "SSN": {
      "type": ["string", "null"]
    },
    "HighSchoolStatus": {
      "type": ["string", "null"],
      "enum": [null, "Graduated", "NotGraduated", "GED", "Other"]
    },
    "HasFederalLoanIssues": {
      "type": ["boolean", "null"]
    },
    "GPA": {
      "type": ["number", "null"]
    }
  }
}"#;

/// Build the single-message extraction prompt for a student message.
pub fn build_extraction_prompt(user_message: &str) -> String {
    format!(
        "{EXTRACTION_PREAMBLE}\n\nJSON SCHEMA:\n\n{STUDENT_PROFILE_SCHEMA}\n\nUSER TEXT:\n\n{user_message}"
    )
}
