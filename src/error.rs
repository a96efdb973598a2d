//! Error taxonomy for registry operations

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::types::{Amount, Principal};

pub type Result<T, E = BountyError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BountyError {
    #[error("bounty `{0}` already exists")]
    DuplicateBountyKey(String),

    #[error("bounty `{0}` not found")]
    UnknownBounty(String),

    #[error("{caller} is not authorized to administer bounty `{key}`")]
    Unauthorized { caller: Principal, key: String },

    #[error("{principal} is not a winner of bounty `{key}`")]
    NotAWinner { principal: Principal, key: String },

    #[error("{principal} has already claimed bounty `{key}`")]
    AlreadyClaimed { principal: Principal, key: String },

    #[error("insufficient funds for {principal}: need {required}, have {available}")]
    InsufficientFunds {
        principal: Principal,
        required: Amount,
        available: Amount,
    },

    #[error("escrow for bounty `{key}` exhausted: payout {payout}, remaining {remaining}")]
    EscrowExhausted {
        key: String,
        payout: Amount,
        remaining: Amount,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid winners for bounty `{key}`: {reason}")]
    InvalidWinners { key: String, reason: String },

    #[error("reward index {index} out of range for bounty `{key}` ({len} rewards)")]
    RewardIndexOutOfRange { key: String, index: usize, len: usize },

    #[error("ledger error: {0}")]
    Ledger(LedgerError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl BountyError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateBountyKey(_) => "duplicate_bounty_key",
            Self::UnknownBounty(_) => "unknown_bounty",
            Self::Unauthorized { .. } => "unauthorized",
            Self::NotAWinner { .. } => "not_a_winner",
            Self::AlreadyClaimed { .. } => "already_claimed",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::EscrowExhausted { .. } => "escrow_exhausted",
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidWinners { .. } => "invalid_winners",
            Self::RewardIndexOutOfRange { .. } => "reward_index_out_of_range",
            Self::Ledger(_) => "ledger_error",
            Self::Storage(_) => "storage_error",
        }
    }
}

impl From<LedgerError> for BountyError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                principal,
                required,
                available,
            } => Self::InsufficientFunds {
                principal,
                required,
                available,
            },
            other => Self::Ledger(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_shortfall_maps_to_insufficient_funds() {
        let err: BountyError = LedgerError::InsufficientFunds {
            principal: Principal::from("alice"),
            required: 600,
            available: 10,
        }
        .into();
        assert_eq!(err.code(), "insufficient_funds");
        assert_eq!(
            err.to_string(),
            "insufficient funds for alice: need 600, have 10"
        );
    }

    #[test]
    fn test_custody_error_stays_ledger_error() {
        let err: BountyError = LedgerError::CustodyShortfall {
            required: 5,
            available: 0,
        }
        .into();
        assert_eq!(err.code(), "ledger_error");
    }

    #[test]
    fn test_storage_error_is_transparent() {
        let err: BountyError = anyhow::anyhow!("disk full").into();
        assert_eq!(err.code(), "storage_error");
        assert_eq!(err.to_string(), "disk full");
    }
}
