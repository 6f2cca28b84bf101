use domain::DomainError;
use thiserror::Error;

/// 传输层错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connection closed")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable(message.into())
    }

    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake(message.into())
    }
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("no open connection")]
    NotConnected,
    #[error("session has ended")]
    SessionEnded,
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;
