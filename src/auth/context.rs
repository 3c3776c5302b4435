use uuid::Uuid;

use crate::domain::{Role, User};

/// Caller identity as the lifecycles see it: who, in which role, with which ledger address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
    pub wallet_address: Option<String>,
}

impl AuthContext {
    pub fn new(user_id: Uuid, role: Role, wallet_address: Option<String>) -> Self {
        Self {
            user_id,
            role,
            wallet_address: wallet_address.filter(|w| !w.trim().is_empty()),
        }
    }

    pub fn from_user(user: &User) -> Self {
        Self::new(user.id, user.role, user.wallet_address.clone())
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// True when the caller holds one of `roles`.
    pub fn has_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_wallet_is_no_wallet() {
        let ctx = AuthContext::new(Uuid::new_v4(), Role::Bidder, Some("  ".into()));
        assert_eq!(ctx.wallet_address, None);
        assert!(ctx.has_role(&[Role::Admin, Role::Bidder]));
        assert!(!ctx.is_admin());
    }
}
