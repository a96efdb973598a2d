//! Escrow ledger collaborator
//!
//! The registry only needs three things from whatever holds balances:
//! pull funds into custody, push funds out of custody, and report balances.
//! `InMemoryLedger` is the bundled implementation.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::types::{Amount, Principal};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient funds for {principal}: need {required}, have {available}")]
    InsufficientFunds {
        principal: Principal,
        required: Amount,
        available: Amount,
    },

    #[error("custody holds {available}, cannot release {required}")]
    CustodyShortfall { required: Amount, available: Amount },

    #[error("balance overflow for {0}")]
    Overflow(Principal),
}

/// Account-balance store with an internal custody account.
///
/// Each call is atomic: it either moves the full amount or changes nothing.
pub trait EscrowLedger: Send + Sync {
    /// Move `amount` from `principal` into custody
    fn debit(&self, principal: &Principal, amount: Amount) -> Result<(), LedgerError>;

    /// Move `amount` from custody to `principal`
    fn credit(&self, principal: &Principal, amount: Amount) -> Result<(), LedgerError>;

    fn balance_of(&self, principal: &Principal) -> Amount;

    fn custody_balance(&self) -> Amount;
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<Principal, Amount>,
    custody: Amount,
}

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-seeded with account balances
    pub fn with_balances<I, P>(accounts: I) -> Result<Self, LedgerError>
    where
        I: IntoIterator<Item = (P, Amount)>,
        P: Into<Principal>,
    {
        let ledger = Self::new();
        for (principal, amount) in accounts {
            ledger.deposit(&principal.into(), amount)?;
        }
        Ok(ledger)
    }

    /// Add freshly issued funds to an account
    pub fn deposit(&self, principal: &Principal, amount: Amount) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        let balance = state.balances.entry(principal.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow(principal.clone()))?;
        debug!("Deposited {} to {}", amount, principal);
        Ok(())
    }
}

impl EscrowLedger for InMemoryLedger {
    fn debit(&self, principal: &Principal, amount: Amount) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        let available = state.balances.get(principal).copied().unwrap_or(0);
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                principal: principal.clone(),
                required: amount,
                available,
            });
        }
        let custody = state
            .custody
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow(principal.clone()))?;

        state.custody = custody;
        state.balances.insert(principal.clone(), available - amount);
        debug!("Debited {} from {} into custody", amount, principal);
        Ok(())
    }

    fn credit(&self, principal: &Principal, amount: Amount) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        if state.custody < amount {
            return Err(LedgerError::CustodyShortfall {
                required: amount,
                available: state.custody,
            });
        }
        let current = state.balances.get(principal).copied().unwrap_or(0);
        let updated = current
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow(principal.clone()))?;

        state.custody -= amount;
        state.balances.insert(principal.clone(), updated);
        debug!("Credited {} from custody to {}", amount, principal);
        Ok(())
    }

    fn balance_of(&self, principal: &Principal) -> Amount {
        self.state.lock().balances.get(principal).copied().unwrap_or(0)
    }

    fn custody_balance(&self) -> Amount {
        self.state.lock().custody
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debit_moves_funds_into_custody() {
        let alice = Principal::from("alice");
        let ledger = InMemoryLedger::with_balances([("alice", 1_000)]).unwrap();

        ledger.debit(&alice, 600).unwrap();
        assert_eq!(ledger.balance_of(&alice), 400);
        assert_eq!(ledger.custody_balance(), 600);
    }

    #[test]
    fn test_debit_is_all_or_nothing() {
        let alice = Principal::from("alice");
        let ledger = InMemoryLedger::with_balances([("alice", 100)]).unwrap();

        let err = ledger.debit(&alice, 101).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                principal: alice.clone(),
                required: 101,
                available: 100,
            }
        );
        assert_eq!(ledger.balance_of(&alice), 100);
        assert_eq!(ledger.custody_balance(), 0);
    }

    #[test]
    fn test_credit_requires_custody() {
        let bob = Principal::from("bob");
        let ledger = InMemoryLedger::new();

        assert!(matches!(
            ledger.credit(&bob, 1),
            Err(LedgerError::CustodyShortfall { .. })
        ));

        ledger.deposit(&bob, 50).unwrap();
        ledger.debit(&bob, 50).unwrap();
        ledger.credit(&bob, 20).unwrap();
        assert_eq!(ledger.balance_of(&bob), 20);
        assert_eq!(ledger.custody_balance(), 30);
    }

    #[test]
    fn test_seeding_rejects_overflow() {
        let err = InMemoryLedger::with_balances([("alice", Amount::MAX), ("alice", 1)]).unwrap_err();
        assert_eq!(err, LedgerError::Overflow(Principal::from("alice")));

        let ledger = InMemoryLedger::with_balances([("alice", 40), ("alice", 2)]).unwrap();
        assert_eq!(ledger.balance_of(&Principal::from("alice")), 42);
    }

    #[test]
    fn test_unknown_principal_has_zero_balance() {
        let ledger = InMemoryLedger::new();
        assert_eq!(ledger.balance_of(&Principal::from("nobody")), 0);
    }
}
