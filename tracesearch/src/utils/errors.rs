//! The error type for tracesearch

use http::StatusCode;

/// An error from tracesearch
#[derive(Debug)]
pub enum Error {
    /// A generic error with a message
    Generic(String),
    /// A downstream request returned a status code
    Status {
        code: StatusCode,
        msg: Option<String>,
    },
    /// An object does not exist in our backend
    DoesNotExist(String),
    /// A versioned write or delete was attempted against a stale version
    VersionDoesNotMatch {
        /// The name of the object we tried to update
        name: String,
        /// The version the caller expected
        expected: String,
        /// The version that is currently stored if one exists
        current: Option<String>,
    },
    /// A job saw our cancellation token fire before it completed
    Cancelled,
    /// An IO Error
    IO(std::io::Error),
    /// An error from converting a value with serde
    Serde(serde_json::Error),
    /// An error from loading a config
    Config(config::ConfigError),
    /// An error from joining a tokio task
    JoinError(tokio::task::JoinError),
    /// An error from sending a kanal message
    KanalSend(kanal::SendError),
}

impl Error {
    /// Create a new generic error
    ///
    /// # Arguments
    ///
    /// * `msg` - The error message to set
    pub fn new<T: Into<String>>(msg: T) -> Self {
        Error::Generic(msg.into())
    }

    /// Create a new error from a downstream status code
    ///
    /// # Arguments
    ///
    /// * `code` - The status code that was returned
    /// * `msg` - The message that came with this status code
    pub fn from_status<T: Into<String>>(code: StatusCode, msg: T) -> Self {
        Error::Status {
            code,
            msg: Some(msg.into()),
        }
    }

    /// Get the status code from this error if one exists
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Get the error message for this error if one exists
    pub fn msg(&self) -> Option<String> {
        // get the msg from any error types that support it
        match self {
            Error::Generic(msg) => Some(msg.clone()),
            Error::Status { msg, .. } => msg.clone(),
            Error::DoesNotExist(name) => Some(format!("{name} does not exist")),
            Error::VersionDoesNotMatch {
                name,
                expected,
                current,
            } => Some(format!(
                "version for {name} does not match: expected '{expected}' found {current:?}"
            )),
            Error::Cancelled => None,
            Error::IO(err) => Some(err.to_string()),
            Error::Serde(err) => Some(err.to_string()),
            Error::Config(err) => Some(err.to_string()),
            Error::JoinError(err) => Some(err.to_string()),
            Error::KanalSend(err) => Some(err.to_string()),
        }
    }

    /// get the kind of error as a str
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Generic(_) => "Generic",
            Error::Status { .. } => "Status",
            Error::DoesNotExist(_) => "DoesNotExist",
            Error::VersionDoesNotMatch { .. } => "VersionDoesNotMatch",
            Error::Cancelled => "Cancelled",
            Error::IO(_) => "IO",
            Error::Serde(_) => "Serde",
            Error::Config(_) => "Config",
            Error::JoinError(_) => "JoinError",
            Error::KanalSend(_) => "KanalSend",
        }
    }

    /// Whether retrying the same operation could succeed
    ///
    /// Version mismatches are never retryable as is. The caller must re-read
    /// the object and redo its own compare step first.
    pub fn retryable(&self) -> bool {
        match self {
            Error::Status { code, .. } => code.is_server_error(),
            Error::IO(_) | Error::JoinError(_) => true,
            _ => false,
        }
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match (self, self.msg()) {
            // status errors always show their code
            (Error::Status { code, .. }, Some(msg)) => write!(f, "Status {}: {msg}", code.as_u16()),
            (Error::Status { code, .. }, None) => write!(f, "Status {code}"),
            (_, Some(msg)) => write!(f, "{}: {msg}", self.kind()),
            (_, None) => write!(f, "{}", self.kind()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IO(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serde(error)
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Error::Config(error)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(error: tokio::task::JoinError) -> Self {
        Error::JoinError(error)
    }
}

impl From<kanal::SendError> for Error {
    fn from(error: kanal::SendError) -> Self {
        Error::KanalSend(error)
    }
}
