//! # hdcp-protocol
//!
//! HDCP 2.2 message codec.
//!
//! This crate provides:
//! - Typed messages and their DisplayPort and IIA byte layouts
//! - The DisplayPort logical field layout used by transport adapters
//! - The context codec the authentication state machine drives

pub mod codec;
pub mod fields;
pub mod wire;

pub use fields::Field;
pub use wire::Message;
