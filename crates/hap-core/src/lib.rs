//! # hap-core
//!
//! Error definitions and configuration shared across the HAP pairing crates.
//!
//! This crate provides:
//! - Pairing, crypto, parse and store error types
//! - Setup code parsing
//! - Accessory pairing configuration

pub mod config;
pub mod error;

pub use config::{PairingConfig, SetupCode};
pub use error::{CryptoError, Error, PairingError, ParseError, Result, StoreError};
