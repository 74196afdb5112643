use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    /// True if this error is the cancellation signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind(), ErrorKind::Cancelled)
    }

    pub fn config_parse(option: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::ConfigParse {
                option: option.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn reader_state(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::ReaderState {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_attribute(name: impl Into<String>) -> Error {
        Error(ErrorKind::InvalidAttribute { name: name.into() }.into())
    }

    pub fn type_mismatch(context: impl Into<String>) -> Error {
        Error(
            ErrorKind::TypeMismatch {
                context: context.into(),
            }
            .into(),
        )
    }

    pub fn allocation(context: impl Into<String>) -> Error {
        Error(
            ErrorKind::Allocation {
                context: context.into(),
            }
            .into(),
        )
    }

    pub fn fragment_metadata(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::FragmentMetadata {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn vfs_io(uri: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::VfsIo {
                uri: uri.into(),
                source,
            }
            .into(),
        )
    }

    pub fn cache(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::Cache {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn filter(filter: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::Filter {
                filter: filter.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn cancelled() -> Error {
        Error(ErrorKind::Cancelled.into())
    }

    pub fn internal(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::Internal {
                message: message.into(),
            }
            .into(),
        )
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("cannot parse config option '{option}': {message}")]
    ConfigParse { option: String, message: String },

    #[error("invalid reader state: {message}")]
    ReaderState { message: String },

    #[error("invalid attribute '{name}'")]
    InvalidAttribute { name: String },

    #[error("type mismatch: {context}")]
    TypeMismatch { context: String },

    #[error("allocation failed: {context}")]
    Allocation { context: String },

    #[error("fragment metadata error: {message}")]
    FragmentMetadata { message: String },

    #[error("I/O error for '{uri}': {source}")]
    VfsIo {
        uri: String,
        source: std::io::Error,
    },

    #[error("tile cache error: {message}")]
    Cache { message: String },

    #[error("filter '{filter}' failed: {message}")]
    Filter { filter: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal invariant violation: {message}")]
    Internal { message: String },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::vfs_io("", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_roundtrip() {
        let err = Error::invalid_attribute("humidity");
        assert!(matches!(
            err.kind(),
            ErrorKind::InvalidAttribute { name } if name == "humidity"
        ));
        assert!(!err.is_cancelled());
        assert!(Error::cancelled().is_cancelled());
    }

    #[test]
    fn display_carries_context() {
        let err = Error::config_parse("sm.memory_budget", "not a number");
        let text = err.to_string();
        assert!(text.contains("sm.memory_budget"));
        assert!(text.contains("not a number"));
    }
}
