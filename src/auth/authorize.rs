use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::auth::claims::{Claims, Identity};
use crate::auth::repo_types::{AccountStatus, Role, User};
use crate::error::{AuthError, AuthResult};

/// The authenticated caller, built from the freshly loaded user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub status: AccountStatus,
}

impl Principal {
    pub fn is_privileged(&self) -> bool {
        matches!(self.role, Role::Admin | Role::SuperAdmin)
    }
}

impl From<&User> for Principal {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            role: u.role,
            status: u.status,
        }
    }
}

impl Role {
    /// Roles this role may act as.
    pub fn acts_as(&self) -> &'static [Role] {
        match self {
            Role::SuperAdmin => &[Role::SuperAdmin, Role::Admin, Role::Farmer],
            Role::Admin => &[Role::Admin, Role::Farmer],
            Role::Farmer => &[Role::Farmer],
        }
    }
}

/// Allowed when the caller's hierarchy set meets the route's required roles.
pub fn authorize(principal: &Principal, required: &[Role]) -> AuthResult<()> {
    if principal.role.acts_as().iter().any(|r| required.contains(r)) {
        Ok(())
    } else {
        warn!(user_id = %principal.id, role = %principal.role, ?required, "access denied");
        Err(AuthError::forbidden("Access denied"))
    }
}

/// Compares a verified token with the current record of its subject.
pub fn check_session(claims: &Claims, current: Option<&User>) -> AuthResult<Principal> {
    let user = current.ok_or_else(|| AuthError::unauthenticated("User no longer exists"))?;

    match user.status {
        AccountStatus::Blocked => {
            return Err(AuthError::unauthenticated("Your account has been blocked"));
        }
        AccountStatus::Pending => {
            return Err(AuthError::unauthenticated("Your account is pending approval"));
        }
        AccountStatus::Active => {}
    }

    if claims.identity() != Identity::from(user) {
        warn!(user_id = %user.id, "stale token for changed account");
        return Err(AuthError::ExpiredSession);
    }

    Ok(Principal::from(user))
}

/// Non-privileged callers may only act on resources they own.
pub fn check_ownership(principal: &Principal, owner_id: Uuid) -> AuthResult<()> {
    if principal.is_privileged() || principal.id == owner_id {
        Ok(())
    } else {
        warn!(user_id = %principal.id, %owner_id, "ownership check failed");
        Err(AuthError::forbidden("Not authorized to access this resource"))
    }
}

/// Admins never get to see or touch super admin records.
pub fn check_visible(principal: &Principal, target: &User) -> AuthResult<()> {
    if principal.role == Role::Admin && target.role == Role::SuperAdmin {
        return Err(AuthError::forbidden(
            "Not authorized to access super admin details",
        ));
    }
    Ok(())
}
