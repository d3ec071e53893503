//! Per-connection pairing state for an accessory.
//!
//! [`Accessory`] is shared by every connection. Each connection owns at most
//! one slot: a pair-setup or pair-verify exchange in progress, or the
//! controller its session was verified as. A step takes the slot's state
//! out, runs without the lock held, and puts a successor back only when the
//! exchange continues.

use crate::outcome::{Rejection, Session, VerifiedController};
use crate::pair_setup::{PairSetup, PairSetupRequest, SetupContext, SetupTransition};
use crate::pair_verify::{PairVerify, PairVerifyRequest, VerifyTransition};
use crate::pairings::{self, PairingsOutcome, PairingsRequest};
use crate::store::IdentityStore;
use hap_core::config::PairingConfig;
use hap_core::error::{PairingError, Result};
use hap_crypto::tlv::Tlv8;
use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Transport-assigned connection identifier.
pub type ConnectionId = u64;

/// Result of feeding one request to the accessory.
#[derive(Debug)]
pub enum Reply {
    /// Send `response`; the exchange goes on.
    Continue(Vec<u8>),
    /// Pair-setup finished and `controller` is now paired.
    Paired { response: Vec<u8>, controller: String },
    /// Send the error TLV; the exchange is over.
    Rejected(Rejection),
    /// Send `response` in plaintext, then encrypt the connection with `session`.
    Verified { response: Vec<u8>, session: Session },
    /// Send `response`, then close `dropped_connections`.
    Removed {
        response: Vec<u8>,
        dropped_connections: Vec<ConnectionId>,
    },
}

impl Reply {
    /// Bytes to send back to the controller.
    pub fn response(&self) -> Vec<u8> {
        match self {
            Self::Continue(response)
            | Self::Paired { response, .. }
            | Self::Verified { response, .. }
            | Self::Removed { response, .. } => response.clone(),
            Self::Rejected(rejection) => rejection.encode(),
        }
    }
}

enum Slot {
    Setup(PairSetup),
    Verify(PairVerify),
    Verified(VerifiedController),
}

/// Pairing endpoint shared by all connections of one accessory.
pub struct Accessory<S> {
    store: Arc<S>,
    config: PairingConfig,
    slots: Mutex<HashMap<ConnectionId, Slot>>,
    failed_setup_attempts: AtomicU32,
}

impl<S: IdentityStore> Accessory<S> {
    pub fn new(store: Arc<S>, config: PairingConfig) -> Self {
        Self {
            store,
            config,
            slots: Mutex::new(HashMap::new()),
            failed_setup_attempts: AtomicU32::new(0),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &PairingConfig {
        &self.config
    }

    /// Handle a `/pair-setup` request body.
    pub fn pair_setup(&self, conn: ConnectionId, body: &[u8]) -> Result<Reply> {
        let request = PairSetupRequest::parse(&Tlv8::parse(body)?)?;
        debug!("Connection {}: pair-setup M{}", conn, request.state());

        let state = match request {
            PairSetupRequest::Start { .. } => {
                self.restart(conn);
                info!("Connection {}: pair-setup started", conn);
                PairSetup::AwaitingM1
            }
            _ => self.take(conn, |slot| match slot {
                Slot::Setup(state) => Ok(state),
                other => Err(other),
            })?,
        };

        let ctx = SetupContext {
            store: self.store.as_ref(),
            config: &self.config,
            failed_attempts: &self.failed_setup_attempts,
        };
        match state.handle(request, &ctx)? {
            SetupTransition::Continue(next, response) => {
                self.put(conn, Slot::Setup(next));
                Ok(Reply::Continue(response))
            }
            SetupTransition::Paired {
                response,
                controller,
            } => {
                info!("Connection {}: paired controller {}", conn, controller);
                Ok(Reply::Paired {
                    response,
                    controller,
                })
            }
            SetupTransition::Rejected(rejection) => {
                warn!("Connection {}: pair-setup rejected: {}", conn, rejection);
                Ok(Reply::Rejected(rejection))
            }
        }
    }

    /// Handle a `/pair-verify` request body.
    pub fn pair_verify(&self, conn: ConnectionId, body: &[u8]) -> Result<Reply> {
        let request = PairVerifyRequest::parse(&Tlv8::parse(body)?)?;
        debug!("Connection {}: pair-verify M{}", conn, request.state());

        let state = match request {
            PairVerifyRequest::Start { .. } => {
                self.restart(conn);
                PairVerify::AwaitingM1
            }
            _ => self.take(conn, |slot| match slot {
                Slot::Verify(state) => Ok(state),
                other => Err(other),
            })?,
        };

        match state.handle(request, self.store.as_ref())? {
            VerifyTransition::Continue(next, response) => {
                self.put(conn, Slot::Verify(next));
                Ok(Reply::Continue(response))
            }
            VerifyTransition::Verified { response, session } => {
                info!(
                    "Connection {}: verified controller {}",
                    conn, session.controller.username
                );
                self.put(conn, Slot::Verified(session.controller.clone()));
                Ok(Reply::Verified { response, session })
            }
            VerifyTransition::Rejected(rejection) => {
                warn!("Connection {}: pair-verify rejected: {}", conn, rejection);
                Ok(Reply::Rejected(rejection))
            }
        }
    }

    /// Handle a `/pairings` request body received on a verified connection.
    pub fn pairings(&self, conn: ConnectionId, body: &[u8]) -> Result<Reply> {
        let request = PairingsRequest::parse(&Tlv8::parse(body)?)?;

        let controller = match self.slots().get(&conn) {
            Some(Slot::Verified(controller)) => controller.clone(),
            _ => return Err(PairingError::NotVerified.into()),
        };

        match pairings::handle(request, &controller, self.store.as_ref())? {
            PairingsOutcome::Done(response) => Ok(Reply::Continue(response)),
            PairingsOutcome::Removed { response, username } => {
                let dropped_connections = self.drop_sessions_of(&username);
                if !dropped_connections.is_empty() {
                    info!(
                        "Dropping {} session(s) of removed controller {}",
                        dropped_connections.len(),
                        username
                    );
                }
                Ok(Reply::Removed {
                    response,
                    dropped_connections,
                })
            }
            PairingsOutcome::Rejected(rejection) => {
                warn!("Connection {}: pairings request rejected: {}", conn, rejection);
                Ok(Reply::Rejected(rejection))
            }
        }
    }

    /// Forget everything about a closed connection.
    pub fn disconnect(&self, conn: ConnectionId) {
        if self.slots().remove(&conn).is_some() {
            debug!("Connection {}: pairing state discarded", conn);
        }
    }

    /// Controller a connection was verified as, if any.
    pub fn verified_controller(&self, conn: ConnectionId) -> Option<VerifiedController> {
        match self.slots().get(&conn) {
            Some(Slot::Verified(controller)) => Some(controller.clone()),
            _ => None,
        }
    }

    /// Number of connections holding any pairing state.
    pub fn active_connections(&self) -> usize {
        self.slots().len()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ConnectionId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Discard whatever the connection held before a new exchange.
    fn restart(&self, conn: ConnectionId) {
        if self.slots().remove(&conn).is_some() {
            debug!("Connection {}: previous pairing state discarded", conn);
        }
    }

    /// Remove the connection's state if `select` accepts it.
    ///
    /// State of another kind stays in place.
    fn take<T>(
        &self,
        conn: ConnectionId,
        select: impl FnOnce(Slot) -> std::result::Result<T, Slot>,
    ) -> Result<T> {
        let mut slots = self.slots();
        let Some(slot) = slots.remove(&conn) else {
            return Err(PairingError::InvalidState("no exchange in progress".to_string()).into());
        };
        select(slot).map_err(|other| {
            slots.insert(conn, other);
            PairingError::InvalidState("a different exchange is in progress".to_string()).into()
        })
    }

    fn put(&self, conn: ConnectionId, slot: Slot) {
        self.slots().insert(conn, slot);
    }

    fn drop_sessions_of(&self, username: &str) -> Vec<ConnectionId> {
        let mut slots = self.slots();
        let mut dropped: Vec<_> = slots
            .iter()
            .filter_map(|(conn, slot)| match slot {
                Slot::Verified(controller) if controller.username == username => Some(*conn),
                _ => None,
            })
            .collect();
        for conn in &dropped {
            slots.remove(conn);
        }
        dropped.sort_unstable();
        dropped
    }
}
