//! # hdcp-crypto
//!
//! Secure crypto gateway for HDCP 2.2 authentication.
//!
//! This crate provides:
//! - The `CryptoGateway` trait the engine calls for every cryptographic step
//! - Key types that are zeroized on drop
//! - A software gateway and key schedule for simulation and tests
//! - AES-128 block helpers used for key wrapping

pub mod aes;
pub mod derive;
pub mod gateway;
pub mod keys;
pub mod software;

#[cfg(any(test, feature = "mock"))]
pub use gateway::MockCryptoGateway;
pub use gateway::{CryptoGateway, PairingInfo, RandomKind, StreamManagement, VersionInfo};
pub use keys::WrappedKey;
pub use software::{GatewayOp, SoftwareGateway};
