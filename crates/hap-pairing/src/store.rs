//! Accessory identity and the pairing records it trusts.
//!
//! The handshakes only read and write pairings through [`IdentityStore`];
//! persisting them is up to the implementation. [`MemoryStore`] keeps them
//! in memory and is what tests and simple accessories use.

use hap_core::config::DEFAULT_MAX_PAIRINGS;
use hap_core::error::StoreError;
use hap_crypto::ed25519::IdentityKeyPair;
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Permission level of a paired controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Permissions {
    User = 0x00,
    /// May add, remove and list pairings.
    Admin = 0x01,
}

impl Permissions {
    /// Convert from raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::User),
            0x01 => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn is_admin(self) -> bool {
        self == Self::Admin
    }
}

/// A controller the accessory trusts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRecord {
    /// Controller pairing identifier, usually an uppercase UUID.
    pub username: String,
    /// Controller long-term Ed25519 public key (LTPK).
    pub public_key: [u8; 32],
    pub permissions: Permissions,
}

impl PairingRecord {
    pub fn new(username: impl Into<String>, public_key: [u8; 32], permissions: Permissions) -> Self {
        Self {
            username: username.into(),
            public_key,
            permissions,
        }
    }
}

/// The accessory's long-term identity.
///
/// `mac_id` is the `XX:XX:XX:XX:XX:XX` style device id; it is both the
/// accessory's pairing identifier and part of every signed transcript.
#[derive(Clone)]
pub struct AccessoryIdentity {
    keypair: IdentityKeyPair,
    mac_id: String,
}

impl AccessoryIdentity {
    /// Generate a fresh long-term key for `mac_id`.
    pub fn generate(mac_id: impl Into<String>) -> Self {
        Self {
            keypair: IdentityKeyPair::generate(),
            mac_id: mac_id.into(),
        }
    }

    /// Restore a provisioned identity from its Ed25519 seed.
    pub fn from_seed(seed: &[u8; 32], mac_id: impl Into<String>) -> Self {
        Self {
            keypair: IdentityKeyPair::from_seed(seed),
            mac_id: mac_id.into(),
        }
    }

    pub fn mac_id(&self) -> &str {
        &self.mac_id
    }

    /// Accessory LTPK.
    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.keypair.sign(message)
    }

    /// Ed25519 seed, for persisting the identity.
    pub fn seed(&self) -> [u8; 32] {
        self.keypair.seed()
    }
}

impl fmt::Debug for AccessoryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessoryIdentity")
            .field("mac_id", &self.mac_id)
            .finish_non_exhaustive()
    }
}

/// Storage contract used by the pairing exchanges.
///
/// Implementations must serialize writes; reads may run concurrently.
#[cfg_attr(test, mockall::automock)]
pub trait IdentityStore: Send + Sync {
    /// The accessory's long-term identity.
    fn accessory(&self) -> &AccessoryIdentity;

    /// Look up the pairing for a controller.
    fn find_pairing(&self, username: &str) -> Result<Option<PairingRecord>, StoreError>;

    /// Create or replace the pairing for `record.username`.
    ///
    /// Must leave no record behind when it fails. `Declined` is the
    /// accessory's policy veto.
    fn commit_pairing(&self, record: PairingRecord) -> Result<(), StoreError>;

    /// Remove a pairing. Returns whether one existed.
    fn remove_pairing(&self, username: &str) -> Result<bool, StoreError>;

    fn list_pairings(&self) -> Result<Vec<PairingRecord>, StoreError>;

    /// Whether any controller is paired.
    fn is_paired(&self) -> Result<bool, StoreError> {
        Ok(!self.list_pairings()?.is_empty())
    }
}

type CommitPolicy = Box<dyn Fn(&PairingRecord) -> bool + Send + Sync>;

/// In-memory [`IdentityStore`].
pub struct MemoryStore {
    identity: AccessoryIdentity,
    pairings: RwLock<HashMap<String, PairingRecord>>,
    capacity: usize,
    policy: Option<CommitPolicy>,
}

impl MemoryStore {
    /// Empty store holding up to the default number of pairings.
    pub fn new(identity: AccessoryIdentity) -> Self {
        Self {
            identity,
            pairings: RwLock::new(HashMap::new()),
            capacity: DEFAULT_MAX_PAIRINGS,
            policy: None,
        }
    }

    /// Limit the number of pairings; commits beyond it fail with `Full`.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Install a commit policy. Commits it returns `false` for fail with
    /// `Declined`.
    pub fn with_policy<F>(mut self, policy: F) -> Self
    where
        F: Fn(&PairingRecord) -> bool + Send + Sync + 'static,
    {
        self.policy = Some(Box::new(policy));
        self
    }

    /// Seed a pairing without going through the commit policy.
    pub fn with_pairing(self, record: PairingRecord) -> Self {
        self.pairings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.username.clone(), record);
        self
    }

    pub fn len(&self) -> usize {
        self.pairings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdentityStore for MemoryStore {
    fn accessory(&self) -> &AccessoryIdentity {
        &self.identity
    }

    fn find_pairing(&self, username: &str) -> Result<Option<PairingRecord>, StoreError> {
        let pairings = self.pairings.read().unwrap_or_else(PoisonError::into_inner);
        Ok(pairings.get(username).cloned())
    }

    fn commit_pairing(&self, record: PairingRecord) -> Result<(), StoreError> {
        if let Some(policy) = &self.policy {
            if !policy(&record) {
                return Err(StoreError::Declined);
            }
        }

        let mut pairings = self.pairings.write().unwrap_or_else(PoisonError::into_inner);
        if !pairings.contains_key(&record.username) && pairings.len() >= self.capacity {
            return Err(StoreError::Full);
        }
        pairings.insert(record.username.clone(), record);
        Ok(())
    }

    fn remove_pairing(&self, username: &str) -> Result<bool, StoreError> {
        let mut pairings = self.pairings.write().unwrap_or_else(PoisonError::into_inner);
        Ok(pairings.remove(username).is_some())
    }

    fn list_pairings(&self) -> Result<Vec<PairingRecord>, StoreError> {
        let pairings = self.pairings.read().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<_> = pairings.values().cloned().collect();
        records.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(records)
    }

    fn is_paired(&self) -> Result<bool, StoreError> {
        Ok(!self.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new(AccessoryIdentity::generate("AA:BB:CC:DD:EE:FF"))
    }

    fn record(username: &str, permissions: Permissions) -> PairingRecord {
        PairingRecord::new(username, [0x11; 32], permissions)
    }

    mod accessory_identity {
        use super::*;

        #[test]
        fn from_seed_is_deterministic() {
            let a = AccessoryIdentity::from_seed(&[0x07; 32], "11:22:33:44:55:66");
            let b = AccessoryIdentity::from_seed(&a.seed(), "11:22:33:44:55:66");
            assert_eq!(a.public_key(), b.public_key());
            assert_eq!(a.mac_id(), "11:22:33:44:55:66");
        }

        #[test]
        fn debug_hides_key_material() {
            let identity = AccessoryIdentity::from_seed(&[0x07; 32], "11:22:33:44:55:66");
            let debug = format!("{:?}", identity);
            assert!(debug.contains("11:22:33:44:55:66"));
            assert!(!debug.contains("keypair"));
        }
    }

    mod memory_store {
        use super::*;

        #[test]
        fn starts_unpaired() {
            let store = store();
            assert!(!store.is_paired().unwrap());
            assert!(store.find_pairing("controller").unwrap().is_none());
        }

        #[test]
        fn commit_then_find() {
            let store = store();
            store.commit_pairing(record("controller", Permissions::Admin)).unwrap();

            let found = store.find_pairing("controller").unwrap().unwrap();
            assert_eq!(found.public_key, [0x11; 32]);
            assert!(found.permissions.is_admin());
            assert!(store.is_paired().unwrap());
        }

        #[test]
        fn commit_replaces_existing_key() {
            let store = store();
            store.commit_pairing(record("controller", Permissions::Admin)).unwrap();
            store
                .commit_pairing(PairingRecord::new("controller", [0x22; 32], Permissions::User))
                .unwrap();

            let found = store.find_pairing("controller").unwrap().unwrap();
            assert_eq!(found.public_key, [0x22; 32]);
            assert_eq!(store.len(), 1);
        }

        #[test]
        fn remove_is_idempotent() {
            let store = store();
            store.commit_pairing(record("controller", Permissions::User)).unwrap();

            assert!(store.remove_pairing("controller").unwrap());
            assert!(!store.remove_pairing("controller").unwrap());
            assert!(!store.is_paired().unwrap());
        }

        #[test]
        fn list_is_sorted_by_username() {
            let store = store();
            store.commit_pairing(record("b", Permissions::User)).unwrap();
            store.commit_pairing(record("a", Permissions::Admin)).unwrap();

            let names: Vec<_> = store
                .list_pairings()
                .unwrap()
                .into_iter()
                .map(|r| r.username)
                .collect();
            assert_eq!(names, ["a", "b"]);
        }
    }

    mod limits {
        use super::*;

        #[test]
        fn full_store_rejects_new_username() {
            let store = store().with_capacity(1);
            store.commit_pairing(record("first", Permissions::Admin)).unwrap();

            assert_eq!(
                store.commit_pairing(record("second", Permissions::User)),
                Err(StoreError::Full)
            );
            assert!(store.find_pairing("second").unwrap().is_none());
        }

        #[test]
        fn full_store_still_replaces_existing_username() {
            let store = store().with_capacity(1);
            store.commit_pairing(record("first", Permissions::Admin)).unwrap();
            assert!(store.commit_pairing(record("first", Permissions::User)).is_ok());
        }

        #[test]
        fn policy_veto_declines_without_writing() {
            let store = store().with_policy(|r| r.username != "blocked");

            assert_eq!(
                store.commit_pairing(record("blocked", Permissions::User)),
                Err(StoreError::Declined)
            );
            assert!(store.is_empty());
            assert!(store.commit_pairing(record("allowed", Permissions::User)).is_ok());
        }

        #[test]
        fn with_pairing_bypasses_policy() {
            let store = store()
                .with_policy(|_| false)
                .with_pairing(record("seeded", Permissions::Admin));
            assert!(store.is_paired().unwrap());
        }

        #[test]
        fn concurrent_commits_respect_capacity() {
            use std::sync::atomic::{AtomicUsize, Ordering};
            use std::thread;

            const CAPACITY: usize = 10;
            let store = store().with_capacity(CAPACITY);
            let committed = AtomicUsize::new(0);
            let full = AtomicUsize::new(0);

            thread::scope(|scope| {
                for t in 0..8 {
                    let (store, committed, full) = (&store, &committed, &full);
                    scope.spawn(move || {
                        for i in 0..16 {
                            let username = format!("controller-{}-{}", t, i);
                            match store.commit_pairing(record(&username, Permissions::User)) {
                                Ok(()) => committed.fetch_add(1, Ordering::SeqCst),
                                Err(StoreError::Full) => full.fetch_add(1, Ordering::SeqCst),
                                Err(e) => panic!("unexpected store error: {}", e),
                            };
                        }
                    });
                }
            });

            assert_eq!(committed.load(Ordering::SeqCst), CAPACITY);
            assert_eq!(full.load(Ordering::SeqCst), 8 * 16 - CAPACITY);
            assert_eq!(store.len(), CAPACITY);
            assert_eq!(store.list_pairings().unwrap().len(), CAPACITY);
        }
    }
}
