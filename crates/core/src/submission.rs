//! Intake request accepted from clients.

use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::error::CoreError;
use crate::job::Language;

/// Upper bound on submitted source size, in bytes.
pub const MAX_CODE_BYTES: usize = 65_536;

/// Body of a submission request.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewSubmission {
    #[validate(length(min = 1, max = 64))]
    pub problem_id: String,
    pub language: Language,
    #[validate(length(min = 1), custom(function = "code_within_size_limit"))]
    pub code: String,
    /// Caller identity used for rate limiting, when sent in the body.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// The bound is on encoded size, not on characters.
fn code_within_size_limit(code: &str) -> Result<(), ValidationError> {
    if code.len() > MAX_CODE_BYTES {
        return Err(ValidationError::new("length"));
    }
    Ok(())
}

impl NewSubmission {
    /// Run field validation and flatten the report into a [`CoreError`].
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()
            .map_err(|errors| CoreError::Validation(errors.to_string()))
    }
}
