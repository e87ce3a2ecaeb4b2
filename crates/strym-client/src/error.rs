use strym_protocol::ServerErrorCode;
use thiserror::Error;

/// Errors surfaced to the application through send futures and producer
/// operations.
///
/// Variants carry owned strings rather than source errors so a single
/// failure can fan out to every callback of a batched send.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Producer already closed")]
    AlreadyClosed,

    #[error("Producer not connected")]
    NotConnected,

    #[error("Producer send queue is full")]
    QueueFull,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Could not send message to broker within given timeout")]
    Timeout,

    #[error("Producer is blocked: backlog quota exceeded on topic")]
    ProducerBlockedQuotaExceeded,

    #[error("Could not send pending messages as backlog exceeded")]
    BacklogQuotaExceeded,

    #[error("Send interrupted")]
    Interrupted,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Server error ({code:?}): {message}")]
    Server {
        code: ServerErrorCode,
        message: String,
    },

    #[error("Producer error: {0}")]
    Producer(String),
}

impl Error {
    /// Whether a producer registration failure is worth retrying.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Connection(_)
            | Error::Io(_)
            | Error::Timeout
            | Error::ProducerBlockedQuotaExceeded => true,
            Error::Server { code, .. } => code.is_retriable(),
            _ => false,
        }
    }

    pub(crate) fn from_server(code: ServerErrorCode, message: String) -> Self {
        match code {
            ServerErrorCode::BacklogQuotaBlocked => Error::ProducerBlockedQuotaExceeded,
            ServerErrorCode::BacklogQuotaExceeded => Error::BacklogQuotaExceeded,
            _ => Error::Server { code, message },
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<strym_protocol::ProtocolError> for Error {
    fn from(e: strym_protocol::ProtocolError) -> Self {
        Error::Protocol(e.to_string())
    }
}

impl From<strym_core::CompressionError> for Error {
    fn from(e: strym_core::CompressionError) -> Self {
        Error::Compression(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        assert!(Error::Connection("reset".into()).is_retriable());
        assert!(Error::Timeout.is_retriable());
        assert!(Error::Server {
            code: ServerErrorCode::ServiceNotReady,
            message: "starting".into()
        }
        .is_retriable());

        assert!(Error::ProducerBlockedQuotaExceeded.is_retriable());
        assert!(!Error::BacklogQuotaExceeded.is_retriable());
        assert!(!Error::AlreadyClosed.is_retriable());
        assert!(!Error::QueueFull.is_retriable());
    }

    #[test]
    fn server_code_mapping() {
        assert!(matches!(
            Error::from_server(ServerErrorCode::BacklogQuotaBlocked, String::new()),
            Error::ProducerBlockedQuotaExceeded
        ));
        assert!(matches!(
            Error::from_server(ServerErrorCode::BacklogQuotaExceeded, String::new()),
            Error::BacklogQuotaExceeded
        ));
        assert!(matches!(
            Error::from_server(ServerErrorCode::PersistenceError, "disk".into()),
            Error::Server { .. }
        ));
    }
}
