//! Credential issuer collaborator
//!
//! A generic non-fungible ownership ledger: one credential per successful
//! claim, each carrying the bounty's metadata reference.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{CredentialId, Principal};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub owner: Principal,
    pub metadata_ref: String,
}

pub trait CredentialIssuer: Send + Sync {
    /// Mint a new credential. Ids are strictly increasing and never reused.
    fn mint(&self, owner: &Principal, metadata_ref: &str) -> CredentialId;

    /// Destroy a credential. Returns false if it does not exist.
    fn burn(&self, id: CredentialId) -> bool;

    fn ownership_count_of(&self, owner: &Principal) -> u64;

    fn owner_of(&self, id: CredentialId) -> Option<Principal>;

    fn metadata_of(&self, id: CredentialId) -> Option<String>;
}

#[derive(Debug, Default)]
struct IssuerState {
    next_id: u64,
    credentials: HashMap<CredentialId, Credential>,
    counts: HashMap<Principal, u64>,
}

#[derive(Debug, Default)]
pub struct InMemoryCredentials {
    state: Mutex<IssuerState>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total credentials currently in existence
    pub fn total_supply(&self) -> usize {
        self.state.lock().credentials.len()
    }
}

impl CredentialIssuer for InMemoryCredentials {
    fn mint(&self, owner: &Principal, metadata_ref: &str) -> CredentialId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = CredentialId(state.next_id);

        state.credentials.insert(
            id,
            Credential {
                id,
                owner: owner.clone(),
                metadata_ref: metadata_ref.to_string(),
            },
        );
        *state.counts.entry(owner.clone()).or_insert(0) += 1;

        debug!("Minted credential {} to {}", id, owner);
        id
    }

    fn burn(&self, id: CredentialId) -> bool {
        let mut state = self.state.lock();
        let Some(credential) = state.credentials.remove(&id) else {
            return false;
        };
        if let Some(count) = state.counts.get_mut(&credential.owner) {
            *count = count.saturating_sub(1);
        }
        debug!("Burned credential {} owned by {}", id, credential.owner);
        true
    }

    fn ownership_count_of(&self, owner: &Principal) -> u64 {
        self.state.lock().counts.get(owner).copied().unwrap_or(0)
    }

    fn owner_of(&self, id: CredentialId) -> Option<Principal> {
        self.state
            .lock()
            .credentials
            .get(&id)
            .map(|c| c.owner.clone())
    }

    fn metadata_of(&self, id: CredentialId) -> Option<String> {
        self.state
            .lock()
            .credentials
            .get(&id)
            .map(|c| c.metadata_ref.clone())
    }
}
