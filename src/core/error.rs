use thiserror::Error;

use crate::core::firewall::RuleId;

/// Core error types for dfw-analyzer
///
/// Evaluation itself never fails; these errors come from loading and
/// validating a policy document, parsing connection specs and the CLI.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Policy document validation failed
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// A rule or filter references an endpoint or group that does not exist
    #[error("Unknown endpoint or group: {0}")]
    UnknownEndpoint(String),

    /// Two rules share the same id
    #[error("Duplicate rule id: {0}")]
    DuplicateRuleId(RuleId),

    /// A connection spec could not be parsed
    #[error("Invalid connection spec: {0}")]
    InvalidConnection(String),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns a user-facing translation with hints for fixing the input.
    pub fn translate(&self) -> ErrorTranslation {
        match self {
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ErrorTranslation::new("Policy document not found")
                    .with_suggestion("Check the path passed on the command line")
            }
            Error::Io(e) => ErrorTranslation::new(format!("Could not read input: {e}")),
            Error::Serialization(e) => {
                ErrorTranslation::new(format!("Policy document is not valid JSON: {e}"))
                    .with_suggestion("Validate the file with a JSON linter")
                    .with_suggestion("Field names are snake_case, e.g. `source_exclude`")
            }
            Error::Validation { field, message } => {
                ErrorTranslation::new(format!("Invalid value in {field}: {message}"))
            }
            Error::UnknownEndpoint(name) => {
                ErrorTranslation::new(format!("'{name}' is neither an endpoint nor a group"))
                    .with_suggestion("Use ANY for all endpoints")
                    .with_suggestion("Endpoint and group names are case-sensitive")
            }
            Error::DuplicateRuleId(id) => {
                ErrorTranslation::new(format!("Rule id {id} is used more than once"))
                    .with_suggestion(
                        "Rule ids define priority and must be unique across categories",
                    )
            }
            Error::InvalidConnection(spec) => {
                ErrorTranslation::new(format!("Cannot parse connection '{spec}'"))
                    .with_suggestion("Examples: tcp/445, udp/53-60, icmp/8/0, icmp, any")
            }
            Error::Internal(msg) => ErrorTranslation::new(format!("Internal error: {msg}")),
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

pub type Result<T> = std::result::Result<T, Error>;
