//! Domain types shared by the registry, its stores and the HTTP surface

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fungible reward currency amount
pub type Amount = u64;

/// Opaque caller identity.
///
/// Authentication happens outside this crate; a `Principal` is trusted to be
/// unforgeable once it reaches the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for Principal {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a minted proof-of-claim credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(pub u64);

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A funded campaign.
///
/// Everything except `active` and the `paid_out` accounting is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounty {
    pub key: String,
    pub metadata_ref: String,
    pub token_limit: u32,
    /// Reserved for deactivation; never gates claims
    pub active: bool,
    /// Index 0 is the rank-1 reward
    pub reward_schedule: Vec<Amount>,
    pub escrowed_total: Amount,
    pub paid_out: Amount,
    pub issuer: Principal,
    pub created_at: DateTime<Utc>,
}

impl Bounty {
    /// Funds still held in custody for this bounty
    pub fn remaining_escrow(&self) -> Amount {
        self.escrowed_total.saturating_sub(self.paid_out)
    }

    /// Reward owed to a 1-indexed rank; ranks past the schedule get nothing
    pub fn reward_for_rank(&self, rank: u32) -> Amount {
        rank.checked_sub(1)
            .and_then(|idx| self.reward_schedule.get(idx as usize))
            .copied()
            .unwrap_or(0)
    }
}

/// A winner's position in a bounty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerRank {
    pub principal: Principal,
    pub rank: u32,
}

/// Proof that a winner has claimed their prize
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub bounty_key: String,
    pub principal: Principal,
    pub rank: u32,
    pub payout: Amount,
    pub credential_id: CredentialId,
    pub claimed_at: DateTime<Utc>,
}

/// Outcome of a successful claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub bounty_key: String,
    pub principal: Principal,
    pub rank: u32,
    pub payout: Amount,
    pub credential_id: CredentialId,
}

impl From<&ClaimRecord> for ClaimReceipt {
    fn from(record: &ClaimRecord) -> Self {
        Self {
            bounty_key: record.bounty_key.clone(),
            principal: record.principal.clone(),
            rank: record.rank,
            payout: record.payout,
            credential_id: record.credential_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounty(schedule: Vec<Amount>) -> Bounty {
        let total = schedule.iter().sum();
        Bounty {
            key: "VVS".to_string(),
            metadata_ref: "ipfs://meta/".to_string(),
            token_limit: 5,
            active: true,
            reward_schedule: schedule,
            escrowed_total: total,
            paid_out: 0,
            issuer: Principal::from("issuer"),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_reward_for_rank() {
        let b = bounty(vec![300, 200, 100]);
        assert_eq!(b.reward_for_rank(1), 300);
        assert_eq!(b.reward_for_rank(3), 100);
        assert_eq!(b.reward_for_rank(4), 0);
        assert_eq!(b.reward_for_rank(0), 0);
    }

    #[test]
    fn test_remaining_escrow() {
        let mut b = bounty(vec![300, 200]);
        assert_eq!(b.remaining_escrow(), 500);
        b.paid_out = 300;
        assert_eq!(b.remaining_escrow(), 200);
    }

    #[test]
    fn test_principal_serializes_as_string() {
        let json = serde_json::to_string(&Principal::from("alice")).unwrap();
        assert_eq!(json, "\"alice\"");
    }
}
