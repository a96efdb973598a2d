//! Registry tables
//!
//! Three keyed tables: bounties by key, winner ranks by (key, principal) and
//! claim records by (key, principal). Backends report infrastructure failures
//! through `anyhow`; domain rules live in the registry.

use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, Result};
use parking_lot::RwLock;

use crate::types::{Bounty, ClaimRecord, Principal, WinnerRank};

pub trait RegistryStore: Send + Sync {
    /// Insert a new bounty. Returns false if the key is already taken.
    fn insert_bounty(&self, bounty: &Bounty) -> Result<bool>;

    fn get_bounty(&self, key: &str) -> Result<Option<Bounty>>;

    fn list_bounties(&self) -> Result<Vec<Bounty>>;

    /// Upsert a batch of ranks for one bounty as a single write
    fn set_ranks(&self, key: &str, ranks: &[WinnerRank]) -> Result<()>;

    fn get_rank(&self, key: &str, principal: &Principal) -> Result<Option<u32>>;

    /// All ranks of a bounty ordered by rank
    fn winners_of(&self, key: &str) -> Result<Vec<WinnerRank>>;

    fn get_claim(&self, key: &str, principal: &Principal) -> Result<Option<ClaimRecord>>;

    /// Record a claim and add its payout to the bounty's `paid_out` in one write.
    /// Returns false if the pair already has a claim.
    fn commit_claim(&self, record: &ClaimRecord) -> Result<bool>;

    /// Delete a committed claim and subtract its payout from `paid_out` in
    /// one write. Only removes the record carrying `record.credential_id`;
    /// returns false if no such claim exists.
    fn revoke_claim(&self, record: &ClaimRecord) -> Result<bool>;
}

#[derive(Default)]
struct Tables {
    bounties: BTreeMap<String, Bounty>,
    ranks: HashMap<(String, Principal), u32>,
    claims: HashMap<(String, Principal), ClaimRecord>,
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryStore for MemoryStore {
    fn insert_bounty(&self, bounty: &Bounty) -> Result<bool> {
        let mut tables = self.tables.write();
        if tables.bounties.contains_key(&bounty.key) {
            return Ok(false);
        }
        tables.bounties.insert(bounty.key.clone(), bounty.clone());
        Ok(true)
    }

    fn get_bounty(&self, key: &str) -> Result<Option<Bounty>> {
        Ok(self.tables.read().bounties.get(key).cloned())
    }

    fn list_bounties(&self) -> Result<Vec<Bounty>> {
        Ok(self.tables.read().bounties.values().cloned().collect())
    }

    fn set_ranks(&self, key: &str, ranks: &[WinnerRank]) -> Result<()> {
        let mut tables = self.tables.write();
        for entry in ranks {
            tables
                .ranks
                .insert((key.to_string(), entry.principal.clone()), entry.rank);
        }
        Ok(())
    }

    fn get_rank(&self, key: &str, principal: &Principal) -> Result<Option<u32>> {
        Ok(self
            .tables
            .read()
            .ranks
            .get(&(key.to_string(), principal.clone()))
            .copied())
    }

    fn winners_of(&self, key: &str) -> Result<Vec<WinnerRank>> {
        let tables = self.tables.read();
        let mut winners: Vec<WinnerRank> = tables
            .ranks
            .iter()
            .filter(|((bounty_key, _), _)| bounty_key == key)
            .map(|((_, principal), rank)| WinnerRank {
                principal: principal.clone(),
                rank: *rank,
            })
            .collect();
        winners.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.principal.cmp(&b.principal)));
        Ok(winners)
    }

    fn get_claim(&self, key: &str, principal: &Principal) -> Result<Option<ClaimRecord>> {
        Ok(self
            .tables
            .read()
            .claims
            .get(&(key.to_string(), principal.clone()))
            .cloned())
    }

    fn commit_claim(&self, record: &ClaimRecord) -> Result<bool> {
        let mut tables = self.tables.write();
        let pair = (record.bounty_key.clone(), record.principal.clone());
        if tables.claims.contains_key(&pair) {
            return Ok(false);
        }

        let bounty = tables
            .bounties
            .get_mut(&record.bounty_key)
            .ok_or_else(|| anyhow!("bounty {} vanished during claim", record.bounty_key))?;
        bounty.paid_out = bounty
            .paid_out
            .checked_add(record.payout)
            .ok_or_else(|| anyhow!("paid_out overflow for bounty {}", record.bounty_key))?;

        tables.claims.insert(pair, record.clone());
        Ok(true)
    }

    fn revoke_claim(&self, record: &ClaimRecord) -> Result<bool> {
        let mut tables = self.tables.write();
        let pair = (record.bounty_key.clone(), record.principal.clone());
        match tables.claims.get(&pair) {
            Some(existing) if existing.credential_id == record.credential_id => {}
            _ => return Ok(false),
        }

        let bounty = tables
            .bounties
            .get_mut(&record.bounty_key)
            .ok_or_else(|| anyhow!("bounty {} vanished during revoke", record.bounty_key))?;
        bounty.paid_out = bounty
            .paid_out
            .checked_sub(record.payout)
            .ok_or_else(|| anyhow!("paid_out underflow for bounty {}", record.bounty_key))?;

        tables.claims.remove(&pair);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CredentialId;
    use chrono::Utc;

    fn bounty(key: &str) -> Bounty {
        Bounty {
            key: key.to_string(),
            metadata_ref: "ipfs://meta/".to_string(),
            token_limit: 3,
            active: true,
            reward_schedule: vec![300, 200, 100],
            escrowed_total: 600,
            paid_out: 0,
            issuer: Principal::from("issuer"),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_bounty_once() {
        let store = MemoryStore::new();
        assert!(store.insert_bounty(&bounty("VVS")).unwrap());
        assert!(!store.insert_bounty(&bounty("VVS")).unwrap());
        assert_eq!(store.list_bounties().unwrap().len(), 1);
    }

    #[test]
    fn test_winners_ordered_by_rank() {
        let store = MemoryStore::new();
        store.insert_bounty(&bounty("VVS")).unwrap();
        store
            .set_ranks(
                "VVS",
                &[
                    WinnerRank { principal: "carol".into(), rank: 3 },
                    WinnerRank { principal: "alice".into(), rank: 1 },
                    WinnerRank { principal: "bob".into(), rank: 2 },
                ],
            )
            .unwrap();

        let names: Vec<_> = store
            .winners_of("VVS")
            .unwrap()
            .into_iter()
            .map(|w| w.principal.to_string())
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
        assert_eq!(store.get_rank("VVS", &"dave".into()).unwrap(), None);
    }

    #[test]
    fn test_commit_claim_updates_paid_out() {
        let store = MemoryStore::new();
        store.insert_bounty(&bounty("VVS")).unwrap();
        let record = ClaimRecord {
            bounty_key: "VVS".to_string(),
            principal: "alice".into(),
            rank: 1,
            payout: 300,
            credential_id: CredentialId(1),
            claimed_at: Utc::now(),
        };

        assert!(store.commit_claim(&record).unwrap());
        assert!(!store.commit_claim(&record).unwrap());
        assert_eq!(store.get_bounty("VVS").unwrap().unwrap().paid_out, 300);
    }

    #[test]
    fn test_revoke_claim_restores_paid_out() {
        let store = MemoryStore::new();
        store.insert_bounty(&bounty("VVS")).unwrap();
        let record = ClaimRecord {
            bounty_key: "VVS".to_string(),
            principal: "alice".into(),
            rank: 1,
            payout: 300,
            credential_id: CredentialId(7),
            claimed_at: Utc::now(),
        };
        store.commit_claim(&record).unwrap();

        let other = ClaimRecord {
            credential_id: CredentialId(8),
            ..record.clone()
        };
        assert!(!store.revoke_claim(&other).unwrap());
        assert!(store.revoke_claim(&record).unwrap());
        assert!(!store.revoke_claim(&record).unwrap());

        assert!(store.get_claim("VVS", &"alice".into()).unwrap().is_none());
        assert_eq!(store.get_bounty("VVS").unwrap().unwrap().paid_out, 0);
    }

    #[test]
    fn test_commit_claim_unknown_bounty_fails() {
        let store = MemoryStore::new();
        let record = ClaimRecord {
            bounty_key: "nope".to_string(),
            principal: "alice".into(),
            rank: 1,
            payout: 0,
            credential_id: CredentialId(1),
            claimed_at: Utc::now(),
        };
        assert!(store.commit_claim(&record).is_err());
    }
}
