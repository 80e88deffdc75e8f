//! Account status transitions and the login lockout counter.
//!
//! Everything here mutates a [`User`] in memory only. Status and role changes
//! are committed with a guarded `UserStore::update`; the lockout rules are
//! applied by the store itself against the current row.

use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use crate::auth::authorize::Principal;
use crate::auth::repo_types::{AccountStatus, Role, User};
use crate::config::AuthPolicy;
use crate::error::{AuthError, AuthResult};

#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub threshold: u32,
    pub duration: Duration,
}

impl From<&AuthPolicy> for LockoutPolicy {
    fn from(p: &AuthPolicy) -> Self {
        Self {
            threshold: p.lockout_threshold,
            duration: Duration::minutes(p.lockout_duration_minutes),
        }
    }
}

fn locked_error(until: OffsetDateTime, now: OffsetDateTime) -> AuthError {
    AuthError::AccountLocked {
        retry_after_secs: (until - now).whole_seconds().max(1),
    }
}

/// Refuses while a lock is active. An elapsed lock does not block; the next
/// recorded failure restarts the count.
pub fn ensure_not_locked(user: &User, now: OffsetDateTime) -> AuthResult<()> {
    match user.lock_until {
        Some(until) if until > now => {
            warn!(user_id = %user.id, "login refused, account locked");
            Err(locked_error(until, now))
        }
        _ => Ok(()),
    }
}

/// Status gate applied at login, after the lock check.
pub fn ensure_can_login(user: &User) -> AuthResult<()> {
    match user.status {
        AccountStatus::Active => Ok(()),
        AccountStatus::Blocked => Err(AuthError::AccountBlocked),
        AccountStatus::Pending => Err(AuthError::AccountPending),
    }
}

/// Counts a password mismatch. Stores apply this to the current record under
/// their own atomicity, never to a snapshot held across the request.
pub fn record_failed_attempt(user: &mut User, policy: LockoutPolicy, now: OffsetDateTime) {
    if user.lock_until.is_some_and(|until| until <= now) {
        reset_lockout(user);
    }
    user.login_attempts = user.login_attempts.saturating_add(1);
    if user.login_attempts as u32 >= policy.threshold && user.lock_until.is_none() {
        user.lock_until = Some(now + policy.duration);
        warn!(user_id = %user.id, attempts = user.login_attempts, "account locked after failed attempts");
    }
    user.touch(now);
}

/// The error to report once a failure has been recorded.
pub fn failed_attempt_error(user: &User, now: OffsetDateTime) -> AuthError {
    match user.lock_until {
        Some(until) if until > now => locked_error(until, now),
        _ => AuthError::InvalidCredentials,
    }
}

/// Clears the counter after a good password. Returns whether anything changed.
pub fn record_success(user: &mut User, now: OffsetDateTime) -> bool {
    if user.login_attempts == 0 && user.lock_until.is_none() {
        return false;
    }
    reset_lockout(user);
    user.touch(now);
    true
}

pub fn reset_lockout(user: &mut User) {
    user.login_attempts = 0;
    user.lock_until = None;
}

fn ensure_actor_may_manage(actor: &Principal, target: &User) -> AuthResult<()> {
    if !actor.is_privileged() {
        return Err(AuthError::forbidden("Access denied"));
    }
    if target.role == Role::SuperAdmin {
        return Err(AuthError::forbidden("Cannot modify super admin accounts"));
    }
    if target.role == Role::Admin && actor.role != Role::SuperAdmin {
        return Err(AuthError::forbidden("Only super admin can modify admin accounts"));
    }
    Ok(())
}

/// Approve, reject, block or unblock `target`.
pub fn transition_status(
    actor: &Principal,
    target: &mut User,
    to: AccountStatus,
    reason: Option<String>,
    now: OffsetDateTime,
) -> AuthResult<()> {
    ensure_actor_may_manage(actor, target)?;

    let reason = reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());

    let from = target.status;
    match (from, to) {
        (AccountStatus::Pending, AccountStatus::Active)
        | (AccountStatus::Pending, AccountStatus::Blocked)
        | (AccountStatus::Active, AccountStatus::Blocked)
        | (AccountStatus::Blocked, AccountStatus::Active) => {}
        (_, AccountStatus::Pending) => {
            return Err(AuthError::validation(
                "Invalid status. Must be either active or blocked",
            ));
        }
        _ => {
            return Err(AuthError::validation(format!("Account is already {from}")));
        }
    }

    if to == AccountStatus::Blocked && actor.role == Role::Admin && reason.is_none() {
        return Err(AuthError::validation(
            "Please provide a reason for blocking the user",
        ));
    }

    target.status = to;
    target.status_reason = reason;
    reset_lockout(target);
    target.touch(now);
    info!(actor_id = %actor.id, user_id = %target.id, %from, %to, "account status changed");
    Ok(())
}

pub fn change_role(
    actor: &Principal,
    target: &mut User,
    role: Role,
    now: OffsetDateTime,
) -> AuthResult<()> {
    if actor.role != Role::SuperAdmin {
        return Err(AuthError::forbidden("Only super admin can change roles"));
    }
    if target.role == Role::SuperAdmin {
        return Err(AuthError::forbidden("Cannot modify super admin roles"));
    }
    if role == Role::SuperAdmin {
        return Err(AuthError::validation(
            "Invalid role. Must be either farmer or admin",
        ));
    }
    if target.role == role {
        return Ok(());
    }
    let from = target.role;
    target.role = role;
    target.touch(now);
    info!(actor_id = %actor.id, user_id = %target.id, %from, to = %role, "role changed");
    Ok(())
}

pub fn ensure_deletable(actor: &Principal, target: &User) -> AuthResult<()> {
    if actor.role != Role::SuperAdmin {
        return Err(AuthError::forbidden("Only super admin can delete users"));
    }
    if target.role == Role::SuperAdmin {
        return Err(AuthError::forbidden("Cannot delete super admin accounts"));
    }
    Ok(())
}

pub fn ensure_can_provision(actor: &Principal, role: Role) -> AuthResult<()> {
    if actor.role != Role::SuperAdmin {
        return Err(AuthError::forbidden("Only super admin can create users"));
    }
    if role == Role::SuperAdmin {
        return Err(AuthError::forbidden(
            "Cannot create super admin users through this route",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use uuid::Uuid;

    const NOW: OffsetDateTime = datetime!(2024-05-01 12:00 UTC);

    fn policy() -> LockoutPolicy {
        LockoutPolicy::from(&AuthPolicy::default())
    }

    fn user(role: Role, status: AccountStatus) -> User {
        let mut u = User::provision("u@x.com".into(), None, "h".into(), role, NOW);
        u.status = status;
        u
    }

    fn actor(role: Role) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            email: format!("{role}@x.com"),
            role,
            status: AccountStatus::Active,
        }
    }

    #[test]
    fn fifth_failure_locks_for_an_hour() {
        let mut u = user(Role::Farmer, AccountStatus::Active);
        for _ in 0..4 {
            record_failed_attempt(&mut u, policy(), NOW);
            assert_eq!(failed_attempt_error(&u, NOW), AuthError::InvalidCredentials);
        }
        assert!(u.lock_until.is_none());
        record_failed_attempt(&mut u, policy(), NOW);
        assert_eq!(
            failed_attempt_error(&u, NOW),
            AuthError::AccountLocked { retry_after_secs: 3600 }
        );
        assert_eq!(u.login_attempts, 5);
        assert_eq!(u.lock_until, Some(NOW + Duration::hours(1)));
    }

    #[test]
    fn failures_while_locked_keep_the_original_deadline() {
        let mut u = user(Role::Farmer, AccountStatus::Active);
        for _ in 0..5 {
            record_failed_attempt(&mut u, policy(), NOW);
        }
        record_failed_attempt(&mut u, policy(), NOW + Duration::minutes(10));
        assert_eq!(u.lock_until, Some(NOW + Duration::hours(1)));
    }

    #[test]
    fn active_lock_refuses_and_reports_remaining() {
        let mut u = user(Role::Farmer, AccountStatus::Active);
        u.login_attempts = 5;
        u.lock_until = Some(NOW + Duration::minutes(30));
        let err = ensure_not_locked(&u, NOW).unwrap_err();
        assert_eq!(err, AuthError::AccountLocked { retry_after_secs: 1800 });
    }

    #[test]
    fn elapsed_lock_restarts_the_count() {
        let mut u = user(Role::Farmer, AccountStatus::Active);
        u.login_attempts = 5;
        u.lock_until = Some(NOW - Duration::seconds(1));
        assert!(ensure_not_locked(&u, NOW).is_ok());

        record_failed_attempt(&mut u, policy(), NOW);
        assert_eq!(failed_attempt_error(&u, NOW), AuthError::InvalidCredentials);
        assert_eq!(u.login_attempts, 1);
        assert!(u.lock_until.is_none());
    }

    #[test]
    fn success_only_writes_when_dirty() {
        let mut u = user(Role::Farmer, AccountStatus::Active);
        assert!(!record_success(&mut u, NOW));
        u.login_attempts = 2;
        assert!(record_success(&mut u, NOW));
        assert_eq!(u.login_attempts, 0);
    }

    #[test]
    fn reset_lockout_is_idempotent() {
        let mut u = user(Role::Farmer, AccountStatus::Active);
        u.login_attempts = 3;
        u.lock_until = Some(NOW);
        reset_lockout(&mut u);
        assert_eq!((u.login_attempts, u.lock_until), (0, None));
        reset_lockout(&mut u);
        assert_eq!((u.login_attempts, u.lock_until), (0, None));
    }

    #[test]
    fn status_gate_distinguishes_blocked_and_pending() {
        assert_eq!(
            ensure_can_login(&user(Role::Farmer, AccountStatus::Blocked)),
            Err(AuthError::AccountBlocked)
        );
        assert_eq!(
            ensure_can_login(&user(Role::Farmer, AccountStatus::Pending)),
            Err(AuthError::AccountPending)
        );
        assert!(ensure_can_login(&user(Role::Farmer, AccountStatus::Active)).is_ok());
    }

    #[test]
    fn approve_resets_counters() {
        let mut u = user(Role::Farmer, AccountStatus::Pending);
        u.login_attempts = 2;
        transition_status(&actor(Role::Admin), &mut u, AccountStatus::Active, None, NOW).unwrap();
        assert_eq!(u.status, AccountStatus::Active);
        assert_eq!(u.login_attempts, 0);
    }

    #[test]
    fn reject_blocks_pending_and_keeps_reason() {
        let mut u = user(Role::Farmer, AccountStatus::Pending);
        transition_status(
            &actor(Role::Admin),
            &mut u,
            AccountStatus::Blocked,
            Some("  duplicate account ".into()),
            NOW,
        )
        .unwrap();
        assert_eq!(u.status, AccountStatus::Blocked);
        assert_eq!(u.status_reason.as_deref(), Some("duplicate account"));
        assert_eq!(ensure_can_login(&u), Err(AuthError::AccountBlocked));
    }

    #[test]
    fn unblock_clears_lockout() {
        let mut u = user(Role::Farmer, AccountStatus::Blocked);
        u.status_reason = Some("fraud".into());
        u.login_attempts = 5;
        u.lock_until = Some(NOW + Duration::minutes(20));
        transition_status(&actor(Role::Admin), &mut u, AccountStatus::Active, None, NOW).unwrap();
        assert_eq!(u.status, AccountStatus::Active);
        assert_eq!(u.status_reason, None);
        assert_eq!(u.login_attempts, 0);
        assert!(u.lock_until.is_none());
        assert!(ensure_not_locked(&u, NOW).is_ok());
    }

    #[test]
    fn super_admin_never_transitions() {
        for caller in [Role::Farmer, Role::Admin, Role::SuperAdmin] {
            let mut root = user(Role::SuperAdmin, AccountStatus::Active);
            let err = transition_status(
                &actor(caller),
                &mut root,
                AccountStatus::Blocked,
                Some("because".into()),
                NOW,
            )
            .unwrap_err();
            assert_eq!(err.kind(), "forbidden");
            assert_eq!(root.status, AccountStatus::Active);
        }
    }

    #[test]
    fn only_super_admin_manages_admins() {
        let mut adm = user(Role::Admin, AccountStatus::Active);
        let err = transition_status(
            &actor(Role::Admin),
            &mut adm,
            AccountStatus::Blocked,
            Some("r".into()),
            NOW,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "forbidden");

        transition_status(&actor(Role::SuperAdmin), &mut adm, AccountStatus::Blocked, None, NOW)
            .unwrap();
        assert_eq!(adm.status, AccountStatus::Blocked);
    }

    #[test]
    fn admin_must_give_reason_to_block() {
        let mut u = user(Role::Farmer, AccountStatus::Active);
        let err = transition_status(&actor(Role::Admin), &mut u, AccountStatus::Blocked, Some("  ".into()), NOW)
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");

        transition_status(
            &actor(Role::Admin),
            &mut u,
            AccountStatus::Blocked,
            Some("spam".into()),
            NOW,
        )
        .unwrap();
        assert_eq!(u.status_reason.as_deref(), Some("spam"));
    }

    #[test]
    fn invalid_edges_are_rejected() {
        let mut u = user(Role::Farmer, AccountStatus::Active);
        let err = transition_status(&actor(Role::SuperAdmin), &mut u, AccountStatus::Pending, None, NOW)
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        let err = transition_status(&actor(Role::SuperAdmin), &mut u, AccountStatus::Active, None, NOW)
            .unwrap_err();
        assert!(err.to_string().contains("already active"));
    }

    #[test]
    fn farmer_cannot_transition() {
        let mut u = user(Role::Farmer, AccountStatus::Pending);
        let err = transition_status(&actor(Role::Farmer), &mut u, AccountStatus::Active, None, NOW)
            .unwrap_err();
        assert_eq!(err.kind(), "forbidden");
    }

    #[test]
    fn role_changes_are_super_admin_only() {
        let mut u = user(Role::Farmer, AccountStatus::Active);
        assert!(change_role(&actor(Role::Admin), &mut u, Role::Admin, NOW).is_err());
        change_role(&actor(Role::SuperAdmin), &mut u, Role::Admin, NOW).unwrap();
        assert_eq!(u.role, Role::Admin);
        assert!(change_role(&actor(Role::SuperAdmin), &mut u, Role::SuperAdmin, NOW).is_err());

        let mut root = user(Role::SuperAdmin, AccountStatus::Active);
        assert!(change_role(&actor(Role::SuperAdmin), &mut root, Role::Farmer, NOW).is_err());
        assert_eq!(root.role, Role::SuperAdmin);
    }

    #[test]
    fn delete_and_provision_guards() {
        let root = user(Role::SuperAdmin, AccountStatus::Active);
        assert!(ensure_deletable(&actor(Role::SuperAdmin), &root).is_err());
        assert!(ensure_deletable(&actor(Role::Admin), &user(Role::Farmer, AccountStatus::Active)).is_err());
        assert!(ensure_deletable(&actor(Role::SuperAdmin), &user(Role::Admin, AccountStatus::Active)).is_ok());

        assert!(ensure_can_provision(&actor(Role::SuperAdmin), Role::Admin).is_ok());
        assert!(ensure_can_provision(&actor(Role::SuperAdmin), Role::SuperAdmin).is_err());
        assert!(ensure_can_provision(&actor(Role::Admin), Role::Farmer).is_err());
    }
}
