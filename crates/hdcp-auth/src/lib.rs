//! # hdcp-auth
//!
//! HDCP 2.2 transmitter authentication.
//!
//! This crate implements:
//! - The session/link registry
//! - The H0/H1/A0..A9 authentication state machine with retry policy
//! - Repeater receiver ID list verification and stream management
//! - Receiver signal latching and servicing
//! - A simulated receiver for tests and demos

mod engine;
mod machine;
mod registry;
mod repeater;
mod signals;
mod sim;
mod traits;

pub use engine::{Engine, EngineBuilder, ServiceOutcome};
pub use machine::AuthContext;
pub use registry::{Link, LinkContext, LinkHandle, Registry, Session, SessionHandle, SessionKeys};
pub use signals::{LinkSignals, RxSignal};
pub use sim::{SimulatedReceiver, StreamManageRecord};
pub use traits::{Delay, NoDelay, TokioDelay, Transport};

#[cfg(test)]
pub use traits::MockTransport;
