use std::io;

/// Everything that can abort an encoding run.
///
/// Only `UnknownClass` and `UnknownAttribute` are policy-gated: a session in
/// non-strict mode never produces them and skips the item instead.
#[derive(Debug, thiserror::Error)]
pub enum SencError {
    /// Malformed or unsupported WKB input.
    #[error("invalid geometry in {context}: {reason}")]
    Format { context: String, reason: String },

    #[error("unknown feature class {0}")]
    UnknownClass(String),

    #[error("unknown attribute {attribute} for feature {feature} id={id}")]
    UnknownAttribute {
        attribute: String,
        feature: String,
        id: u32,
    },

    /// The encoder reached a state that valid input can never produce.
    #[error("encoder consistency violation: {0}")]
    Consistency(String),

    #[error("value {value:?} of attribute {attribute} cannot be encoded as {kind}")]
    AttributeValue {
        attribute: String,
        value: String,
        kind: &'static str,
    },

    #[error("mapping catalog: {0}")]
    Catalog(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SencError {
    pub(crate) fn format(context: &str, reason: impl Into<String>) -> Self {
        SencError::Format {
            context: context.to_owned(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SencError>;
