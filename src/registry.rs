//! Bounty registry and claim engine
//!
//! Owns the bounty, winner-rank and claim tables (through a [`RegistryStore`])
//! and coordinates the escrow ledger and credential issuer:
//!
//! 1. `create_bounty` pulls the whole reward schedule into custody up front
//! 2. `set_winners` assigns 1-indexed ranks by list position
//! 3. `claim_self` / `claim_for` pay `reward_schedule[rank - 1]` (or nothing
//!    for ranks past the schedule), mint one credential and record the claim
//!
//! Each mutating call holds the bounty key's lock scope for its whole
//! check-then-act sequence, so a winner can never be paid twice.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::auth::{AdminRoster, Authorizer};
use crate::config::{Config, WinnerPolicy};
use crate::credential::{CredentialIssuer, InMemoryCredentials};
use crate::error::{BountyError, Result};
use crate::ledger::{EscrowLedger, InMemoryLedger};
use crate::lock::{ScopeLocks, StripedLocks};
use crate::storage::SqliteStore;
use crate::store::{MemoryStore, RegistryStore};
use crate::types::{
    Amount, Bounty, ClaimReceipt, ClaimRecord, CredentialId, Principal, WinnerRank,
};

pub struct BountyRegistry {
    store: Arc<dyn RegistryStore>,
    ledger: Arc<dyn EscrowLedger>,
    credentials: Arc<dyn CredentialIssuer>,
    authorizer: Arc<dyn Authorizer>,
    locks: Arc<dyn ScopeLocks>,
    winner_policy: WinnerPolicy,
}

impl BountyRegistry {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        ledger: Arc<dyn EscrowLedger>,
        credentials: Arc<dyn CredentialIssuer>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            store,
            ledger,
            credentials,
            authorizer,
            locks: Arc::new(StripedLocks::default()),
            winner_policy: WinnerPolicy::default(),
        }
    }

    pub fn with_locks(mut self, locks: Arc<dyn ScopeLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_winner_policy(mut self, policy: WinnerPolicy) -> Self {
        self.winner_policy = policy;
        self
    }

    /// Build a registry with the bundled collaborators described by `config`
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn RegistryStore> = match &config.database.path {
            Some(path) => {
                info!("Using SQLite registry at {}", path.display());
                Arc::new(SqliteStore::new(path)?)
            }
            None => {
                info!("Using in-memory registry");
                Arc::new(MemoryStore::new())
            }
        };

        let ledger = InMemoryLedger::new();
        for account in &config.ledger.accounts {
            ledger
                .deposit(&Principal::new(account.principal.clone()), account.balance)
                .with_context(|| format!("Failed to seed account {}", account.principal))?;
        }

        let roster = AdminRoster::new(config.registry.admins.iter().cloned())
            .with_issuer_admin(config.registry.issuer_is_admin);

        Ok(Self::new(
            store,
            Arc::new(ledger),
            Arc::new(InMemoryCredentials::new()),
            Arc::new(roster),
        )
        .with_locks(Arc::new(StripedLocks::new(config.registry.lock_stripes)))
        .with_winner_policy(config.registry.winner_policy))
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    /// Register a bounty and move its full reward schedule into custody
    pub fn create_bounty(
        &self,
        issuer: &Principal,
        key: &str,
        metadata_ref: &str,
        token_limit: u32,
        reward_schedule: Vec<Amount>,
    ) -> Result<Bounty> {
        if key.trim().is_empty() {
            return Err(BountyError::InvalidInput(
                "bounty key must not be empty".to_string(),
            ));
        }
        if token_limit == 0 {
            return Err(BountyError::InvalidInput(
                "token limit must be at least 1".to_string(),
            ));
        }
        let escrowed_total = reward_schedule
            .iter()
            .try_fold(0 as Amount, |acc, reward| acc.checked_add(*reward))
            .ok_or_else(|| {
                BountyError::InvalidInput("reward schedule total overflows".to_string())
            })?;

        let _guard = self.locks.acquire(key);

        if self.store.get_bounty(key)?.is_some() {
            warn!("Rejected duplicate bounty key {}", key);
            return Err(BountyError::DuplicateBountyKey(key.to_string()));
        }

        if escrowed_total > 0 {
            self.ledger.debit(issuer, escrowed_total).map_err(|e| {
                warn!("Failed to escrow {} for bounty {}: {}", escrowed_total, key, e);
                BountyError::from(e)
            })?;
        }

        let bounty = Bounty {
            key: key.to_string(),
            metadata_ref: metadata_ref.to_string(),
            token_limit,
            active: true,
            reward_schedule,
            escrowed_total,
            paid_out: 0,
            issuer: issuer.clone(),
            created_at: Utc::now(),
        };

        match self.store.insert_bounty(&bounty) {
            Ok(true) => {}
            Ok(false) => {
                self.return_escrow(issuer, escrowed_total);
                return Err(BountyError::DuplicateBountyKey(key.to_string()));
            }
            Err(e) => {
                self.return_escrow(issuer, escrowed_total);
                return Err(e.into());
            }
        }

        info!(
            "Created bounty {} (issuer: {}, token_limit: {}, escrowed: {})",
            key, issuer, token_limit, escrowed_total
        );
        Ok(bounty)
    }

    /// Assign ranks 1..=n to `principals` in list order
    pub fn set_winners(
        &self,
        caller: &Principal,
        key: &str,
        principals: &[Principal],
    ) -> Result<()> {
        let _guard = self.locks.acquire(key);

        let bounty = self.require_bounty(key)?;
        self.require_admin(caller, &bounty)?;

        if self.winner_policy == WinnerPolicy::Strict {
            self.check_winners(&bounty, principals)?;
        }

        let ranks = principals
            .iter()
            .enumerate()
            .map(|(idx, principal)| -> Result<WinnerRank> {
                let rank = u32::try_from(idx + 1).map_err(|_| BountyError::InvalidWinners {
                    key: key.to_string(),
                    reason: "too many winners".to_string(),
                })?;
                Ok(WinnerRank {
                    principal: principal.clone(),
                    rank,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.store.set_ranks(key, &ranks)?;

        info!("Set {} winners for bounty {} (by {})", ranks.len(), key, caller);
        Ok(())
    }

    /// Claim the caller's own prize
    pub fn claim_self(&self, caller: &Principal, key: &str) -> Result<ClaimReceipt> {
        let _guard = self.locks.acquire(key);

        let bounty = self.require_bounty(key)?;
        self.claim_locked(&bounty, caller)
    }

    /// Claim on behalf of `principal`; admin only
    pub fn claim_for(
        &self,
        caller: &Principal,
        key: &str,
        principal: &Principal,
    ) -> Result<ClaimReceipt> {
        let _guard = self.locks.acquire(key);

        let bounty = self.require_bounty(key)?;
        self.require_admin(caller, &bounty)?;
        self.claim_locked(&bounty, principal)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn get_bounty(&self, key: &str) -> Result<Option<Bounty>> {
        Ok(self.store.get_bounty(key)?)
    }

    pub fn list_bounties(&self) -> Result<Vec<Bounty>> {
        Ok(self.store.list_bounties()?)
    }

    /// Reward at a 0-based schedule index
    pub fn get_reward_at(&self, key: &str, index: usize) -> Result<Amount> {
        let bounty = self.require_bounty(key)?;
        bounty
            .reward_schedule
            .get(index)
            .copied()
            .ok_or_else(|| BountyError::RewardIndexOutOfRange {
                key: key.to_string(),
                index,
                len: bounty.reward_schedule.len(),
            })
    }

    /// `None` means not a winner of this bounty
    pub fn get_rank(&self, principal: &Principal, key: &str) -> Result<Option<u32>> {
        Ok(self.store.get_rank(key, principal)?)
    }

    pub fn get_claimed(&self, principal: &Principal, key: &str) -> Result<Option<ClaimRecord>> {
        Ok(self.store.get_claim(key, principal)?)
    }

    pub fn winners_of(&self, key: &str) -> Result<Vec<WinnerRank>> {
        self.require_bounty(key)?;
        Ok(self.store.winners_of(key)?)
    }

    pub fn credential_owner_balance(&self, principal: &Principal) -> u64 {
        self.credentials.ownership_count_of(principal)
    }

    pub fn credential_owner(&self, id: CredentialId) -> Option<Principal> {
        self.credentials.owner_of(id)
    }

    pub fn credential_metadata(&self, id: CredentialId) -> Option<String> {
        self.credentials.metadata_of(id)
    }

    pub fn balance_of(&self, principal: &Principal) -> Amount {
        self.ledger.balance_of(principal)
    }

    pub fn custody_balance(&self) -> Amount {
        self.ledger.custody_balance()
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn require_bounty(&self, key: &str) -> Result<Bounty> {
        self.store
            .get_bounty(key)?
            .ok_or_else(|| BountyError::UnknownBounty(key.to_string()))
    }

    fn require_admin(&self, caller: &Principal, bounty: &Bounty) -> Result<()> {
        if self.authorizer.is_admin(caller, bounty) {
            return Ok(());
        }
        warn!("Unauthorized admin call by {} on bounty {}", caller, bounty.key);
        Err(BountyError::Unauthorized {
            caller: caller.clone(),
            key: bounty.key.clone(),
        })
    }

    fn check_winners(&self, bounty: &Bounty, principals: &[Principal]) -> Result<()> {
        let invalid = |reason: String| BountyError::InvalidWinners {
            key: bounty.key.clone(),
            reason,
        };

        if principals.len() > bounty.token_limit as usize {
            return Err(invalid(format!(
                "{} winners exceed token limit {}",
                principals.len(),
                bounty.token_limit
            )));
        }

        let mut seen = HashSet::with_capacity(principals.len());
        for principal in principals {
            if !seen.insert(principal) {
                return Err(invalid(format!("{} listed more than once", principal)));
            }
        }

        // Ranks already handed out are fixed; a later list may only restate
        // them and append new ones.
        for holder in self.store.winners_of(&bounty.key)? {
            let slot = holder
                .rank
                .checked_sub(1)
                .and_then(|idx| principals.get(idx as usize));
            match slot {
                Some(listed) if listed != &holder.principal => {
                    return Err(invalid(format!(
                        "rank {} already held by {}",
                        holder.rank, holder.principal
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Shared claim algorithm. Caller must hold the bounty's lock scope and
    /// `bounty` must have been read under it.
    fn claim_locked(&self, bounty: &Bounty, principal: &Principal) -> Result<ClaimReceipt> {
        let key = bounty.key.as_str();

        let rank = self
            .store
            .get_rank(key, principal)?
            .ok_or_else(|| BountyError::NotAWinner {
                principal: principal.clone(),
                key: key.to_string(),
            })?;

        if self.store.get_claim(key, principal)?.is_some() {
            debug!("{} tried to claim bounty {} twice", principal, key);
            return Err(BountyError::AlreadyClaimed {
                principal: principal.clone(),
                key: key.to_string(),
            });
        }

        let payout = bounty.reward_for_rank(rank);
        let remaining = bounty.remaining_escrow();
        if payout > remaining {
            error!(
                "Escrow for bounty {} cannot cover payout {} (remaining {})",
                key, payout, remaining
            );
            return Err(BountyError::EscrowExhausted {
                key: key.to_string(),
                payout,
                remaining,
            });
        }

        let credential_id = self.credentials.mint(principal, &bounty.metadata_ref);
        let record = ClaimRecord {
            bounty_key: key.to_string(),
            principal: principal.clone(),
            rank,
            payout,
            credential_id,
            claimed_at: Utc::now(),
        };

        // Nothing leaves custody until the claim and its paid_out are durable
        match self.store.commit_claim(&record) {
            Ok(true) => {}
            Ok(false) => {
                self.burn_credential(&record);
                return Err(BountyError::AlreadyClaimed {
                    principal: principal.clone(),
                    key: key.to_string(),
                });
            }
            Err(e) => {
                self.burn_credential(&record);
                return Err(e.into());
            }
        }

        if payout > 0 {
            if let Err(e) = self.ledger.credit(principal, payout) {
                self.revoke_claim(&record);
                return Err(e.into());
            }
        }

        info!(
            "{} claimed bounty {} at rank {} (payout: {}, credential: {})",
            principal, key, rank, payout, credential_id
        );
        Ok(ClaimReceipt::from(&record))
    }

    fn burn_credential(&self, record: &ClaimRecord) {
        if !self.credentials.burn(record.credential_id) {
            error!(
                "Credential {} missing while unwinding claim on {}",
                record.credential_id, record.bounty_key
            );
        }
    }

    /// Undo a committed claim whose payout could not be credited. The funds
    /// never left custody, so only the record and credential are reversed.
    fn revoke_claim(&self, record: &ClaimRecord) {
        match self.store.revoke_claim(record) {
            Ok(true) => {}
            Ok(false) => error!(
                "Claim by {} on bounty {} vanished before revoke",
                record.principal, record.bounty_key
            ),
            Err(e) => error!(
                "Failed to revoke claim by {} on bounty {}: {}",
                record.principal, record.bounty_key, e
            ),
        }
        self.burn_credential(record);
        warn!(
            "Revoked claim by {} on bounty {}",
            record.principal, record.bounty_key
        );
    }

    fn return_escrow(&self, issuer: &Principal, amount: Amount) {
        if amount == 0 {
            return;
        }
        if let Err(e) = self.ledger.credit(issuer, amount) {
            error!("Failed to return escrow {} to {}: {}", amount, issuer, e);
        }
    }
}
