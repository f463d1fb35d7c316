//! # hdcp-core
//!
//! Core types and error definitions shared across the HDCP 2.2 crates.
//!
//! This crate provides:
//! - Protocol message identifiers and field lengths
//! - Capability, status and topology bit fields
//! - Authentication and session states
//! - Per-link transmitter and receiver contexts
//! - Retry/timeout policy
//! - Common error types

pub mod caps;
pub mod context;
pub mod error;
pub mod ids;
pub mod policy;
pub mod state;

pub use caps::{Caps, RxInfo, RxStatus};
pub use context::{ReceiverId, ReceiverIdList, RxContext, StreamEntry, TxContext};
pub use error::{AuthError, CodecError, CryptoError, Error, RegistryError, Result, TransportError};
pub use ids::{LinkType, MessageId};
pub use policy::AuthPolicy;
pub use state::{AuthState, SessionState};
