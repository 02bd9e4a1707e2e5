use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON parse error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {message}")]
    Config { message: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("{context}: {message}")]
    Model {
        context: &'static str,
        message: String,
    },
}

impl DecodeError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn model(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Model {
            context,
            message: err.to_string(),
        }
    }
}
