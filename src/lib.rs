//! Bounty Registry - escrowed prize campaigns with one-time claims
//!
//! An issuer funds a bounty's whole reward schedule up front. An admin later
//! records the winners in order, and each winner claims exactly once: they
//! receive a proof-of-claim credential plus the reward for their rank, if the
//! schedule has one.
//!
//! # How it works
//!
//! 1. `create_bounty` debits the schedule total from the issuer into custody
//! 2. `set_winners` assigns rank `i + 1` to the i-th listed principal
//! 3. `claim_self` / `claim_for` pay `reward_schedule[rank - 1]` (or nothing
//!    past the end of the schedule) and mint a credential
//!
//! # Guarantees
//!
//! - Bounty keys are unique; a failed funding debit leaves no record
//! - At most one claim per (bounty, principal), enforced under a lock scope
//!   that covers payout, mint and record
//! - Payouts never exceed a bounty's remaining escrow

pub mod auth;
pub mod config;
pub mod credential;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod registry;
pub mod server;
pub mod storage;
pub mod store;
pub mod types;

pub use auth::{AdminRoster, Authorizer};
pub use config::{Config, WinnerPolicy};
pub use credential::{Credential, CredentialIssuer, InMemoryCredentials};
pub use error::BountyError;
pub use ledger::{EscrowLedger, InMemoryLedger, LedgerError};
pub use lock::{GlobalLock, ScopeLocks, StripedLocks};
pub use registry::BountyRegistry;
pub use storage::SqliteStore;
pub use store::{MemoryStore, RegistryStore};
pub use types::{
    Amount, Bounty, ClaimReceipt, ClaimRecord, CredentialId, Principal, WinnerRank,
};
