use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid {parameter} '{value}', expected one of: {}", .accepted.join(", "))]
    InvalidParameter {
        parameter: &'static str,
        value: String,
        accepted: Vec<&'static str>,
    },

    #[error("Quantity must be a positive integer, got '{0}'")]
    InvalidQuantity(String),

    #[error("VM name '{name}' does not follow the '{prefix}<index>' pattern")]
    MalformedVmName { name: String, prefix: String },

    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),
}

impl CoreError {
    /// Human-readable messages, one per problem.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        match self {
            CoreError::Validation(messages) => messages.clone(),
            other => vec![other.to_string()],
        }
    }
}
