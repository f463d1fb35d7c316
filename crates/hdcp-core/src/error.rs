//! Error types for the HDCP 2.2 authentication engine.

use crate::ids::{LinkType, MessageId};
use thiserror::Error;

/// Primary error type for all engine operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Crypto gateway error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
}

/// Errors from the session/link registry and the control surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown handle: {0}")]
    InvalidHandle(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Protocol message encode/decode errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Empty or missing message buffer")]
    WrongBuffer,

    #[error("Wrong message length for {id:?}: expected at least {expected}, got {actual}")]
    WrongLength {
        id: MessageId,
        expected: usize,
        actual: usize,
    },

    #[error("Wrong message id: expected {expected:?}, got 0x{actual:02x}")]
    WrongMessageId { expected: MessageId, actual: u8 },

    #[error("Receiver certificate verification failed")]
    VerifyCertFailed,

    #[error("{id:?} is not carried by the {link_type:?} transport")]
    Unsupported { id: MessageId, link_type: LinkType },

    #[error("Receiver ID list exceeds topology limits: {0}")]
    ListTooLarge(String),

    #[error("Too many streams: {count} (max {max})")]
    TooManyStreams { count: usize, max: usize },

    #[error("Invalid field: {0}")]
    InvalidField(String),
}

/// Errors reported by the secure crypto gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Gateway operation {op} failed: {reason}")]
    Gateway { op: &'static str, reason: String },

    #[error("HMAC mismatch in {0}")]
    HmacMismatch(&'static str),

    #[error("Certificate rejected: {0}")]
    CertificateRejected(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Key wrap failed: {0}")]
    Wrap(String),
}

/// Errors moving bytes through the transport adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Write of {field} failed: {reason}")]
    Write { field: String, reason: String },

    #[error("Read of {field} failed: {reason}")]
    Read { field: String, reason: String },

    #[error("Short read of {field}: expected {expected}, got {actual}")]
    ShortRead {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("Link is disconnected")]
    Disconnected,
}

/// Terminal outcomes of an authentication step or attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Receiver is not HDCP 2.x capable")]
    RxNotCapable,

    #[error("Master key exchange failed")]
    ExchangeKmFailed,

    #[error("Locality check failed")]
    LocalityCheckFailed,

    #[error("Session key exchange failed")]
    ExchangeKsFailed,

    #[error("Timed out waiting for the receiver ID list")]
    WaitReceiverIdListFailed,

    #[error("Receiver ID list verification failed")]
    VerifyReceiverIdListFailed,

    #[error("Content stream management failed")]
    StreamManageFailed,

    #[error("Authentication aborted by receiver")]
    Aborted,

    #[error("Authentication failed after {attempts} attempts: {cause}")]
    AuthenticationFailed { attempts: u32, cause: Box<AuthError> },
}

impl AuthError {
    /// The step error that ended the last attempt.
    pub fn root_cause(&self) -> &AuthError {
        match self {
            AuthError::AuthenticationFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

impl Error {
    /// Authentication outcome carried by this error, if any.
    pub fn as_auth(&self) -> Option<&AuthError> {
        match self {
            Error::Auth(e) => Some(e),
            _ => None,
        }
    }

    /// True when the receiver cancelled the attempt.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Auth(AuthError::Aborted))
    }
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats() {
        let err = Error::Registry(RegistryError::InvalidState("session has 2 links".into()));
        assert!(err.to_string().contains("Registry error"));
        assert!(err.to_string().contains("2 links"));

        let err = Error::Codec(CodecError::WrongLength {
            id: MessageId::AkeInit,
            expected: 9,
            actual: 8,
        });
        assert!(err.to_string().contains("expected at least 9"));

        let err = Error::Codec(CodecError::WrongMessageId {
            expected: MessageId::AkeSendCert,
            actual: 0x07,
        });
        assert!(err.to_string().contains("0x07"));

        let err = AuthError::AuthenticationFailed {
            attempts: 5,
            cause: Box::new(AuthError::ExchangeKmFailed),
        };
        assert!(err.to_string().contains("after 5 attempts"));
        assert!(err.to_string().contains("Master key exchange"));
    }

    #[test]
    fn error_conversions() {
        let err: Error = RegistryError::InvalidInput("bad".into()).into();
        assert!(matches!(err, Error::Registry(_)));

        let err: Error = CodecError::WrongBuffer.into();
        assert!(matches!(err, Error::Codec(_)));

        let err: Error = CryptoError::HmacMismatch("H'").into();
        assert!(matches!(err, Error::Crypto(_)));

        let err: Error = TransportError::Disconnected.into();
        assert!(matches!(err, Error::Transport(_)));

        let err: Error = AuthError::Aborted.into();
        assert!(err.is_aborted());
    }

    #[test]
    fn root_cause_unwraps_attempt_failure() {
        let err = AuthError::AuthenticationFailed {
            attempts: 5,
            cause: Box::new(AuthError::LocalityCheckFailed),
        };
        assert_eq!(err.root_cause(), &AuthError::LocalityCheckFailed);
        assert_eq!(AuthError::Aborted.root_cause(), &AuthError::Aborted);
    }

    #[test]
    fn error_source_chain() {
        use std::error::Error as StdError;

        let err = Error::Auth(AuthError::RxNotCapable);
        assert!(err.source().is_some());
        assert!(err.as_auth().is_some());
    }
}
