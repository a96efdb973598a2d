//! Authorization for admin-privileged operations
//!
//! - Admin predicate over caller identity
//! - Configured admin roster, optionally extended to each bounty's issuer

use std::collections::HashSet;

use tracing::debug;

use crate::types::{Bounty, Principal};

pub trait Authorizer: Send + Sync {
    /// Whether `caller` may set winners and claim on behalf of others for `bounty`
    fn is_admin(&self, caller: &Principal, bounty: &Bounty) -> bool;
}

/// Fixed set of admin principals
#[derive(Debug, Clone, Default)]
pub struct AdminRoster {
    admins: HashSet<Principal>,
    issuer_is_admin: bool,
}

impl AdminRoster {
    pub fn new<I, P>(admins: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Principal>,
    {
        Self {
            admins: admins.into_iter().map(Into::into).collect(),
            issuer_is_admin: false,
        }
    }

    /// Also treat whoever funded a bounty as its admin
    pub fn with_issuer_admin(mut self, enabled: bool) -> Self {
        self.issuer_is_admin = enabled;
        self
    }
}

impl Authorizer for AdminRoster {
    fn is_admin(&self, caller: &Principal, bounty: &Bounty) -> bool {
        if self.admins.contains(caller) {
            return true;
        }
        if self.issuer_is_admin && &bounty.issuer == caller {
            return true;
        }
        debug!("{} denied admin access to bounty {}", caller, bounty.key);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bounty_from(issuer: &str) -> Bounty {
        Bounty {
            key: "VVS".to_string(),
            metadata_ref: String::new(),
            token_limit: 1,
            active: true,
            reward_schedule: vec![],
            escrowed_total: 0,
            paid_out: 0,
            issuer: Principal::from(issuer),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_roster_admin() {
        let roster = AdminRoster::new(["owner"]);
        let bounty = bounty_from("issuer");
        assert!(roster.is_admin(&Principal::from("owner"), &bounty));
        assert!(!roster.is_admin(&Principal::from("issuer"), &bounty));
        assert!(!roster.is_admin(&Principal::from("stranger"), &bounty));
    }

    #[test]
    fn test_issuer_admin() {
        let roster = AdminRoster::new(["owner"]).with_issuer_admin(true);
        let bounty = bounty_from("issuer");
        assert!(roster.is_admin(&Principal::from("issuer"), &bounty));
        assert!(!roster.is_admin(&Principal::from("issuer"), &bounty_from("other")));
    }
}
