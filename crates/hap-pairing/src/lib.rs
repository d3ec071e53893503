//! # hap-pairing
//!
//! Accessory side of HAP pairing.
//!
//! This crate implements:
//! - Pair-setup (SRP-6a, then an Ed25519 identity exchange)
//! - Pair-verify (X25519 + Ed25519), yielding the session cipher
//! - Add, remove and list pairings over a verified session
//! - A controller driver for the same exchanges
//!
//! [`Accessory`] routes request bodies to the right exchange per connection;
//! pairings are read and written through an [`IdentityStore`].

pub mod accessory;
pub mod controller;
pub mod outcome;
pub mod pair_setup;
pub mod pair_verify;
pub mod pairings;
pub mod store;

pub use accessory::{Accessory, ConnectionId, Reply};
pub use controller::{ControllerIdentity, PairedAccessory, SetupClient, VerifyClient};
pub use outcome::{Rejection, Session, VerifiedController};
pub use pairings::PairingsRequest;
pub use store::{AccessoryIdentity, IdentityStore, MemoryStore, PairingRecord, Permissions};
