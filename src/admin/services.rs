use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::authorize::{authorize, check_ownership, check_visible, Principal};
use crate::auth::dto::{CreateUserRequest, UpdateStatusRequest};
use crate::auth::lifecycle;
use crate::auth::repo::UserFilter;
use crate::auth::repo_types::{AccountStatus, Role, User};
use crate::auth::services::{normalize_name, require_fields, validate_email, validate_password};
use crate::config::SuperAdminSeed;
use crate::error::{AuthError, AuthResult};
use crate::state::AppState;

async fn load_target(state: &AppState, id: Uuid) -> AuthResult<User> {
    state
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(|| AuthError::not_found("User not found"))
}

/// Admins see everyone except super admins; super admins see everyone.
pub async fn list_users(state: &AppState, actor: &Principal) -> AuthResult<Vec<User>> {
    authorize(actor, &[Role::Admin])?;
    let filter = UserFilter {
        exclude_super_admin: actor.role == Role::Admin,
        ..Default::default()
    };
    state.users.list(&filter).await
}

pub async fn pending_registrations(state: &AppState, actor: &Principal) -> AuthResult<Vec<User>> {
    authorize(actor, &[Role::Admin])?;
    let filter = UserFilter {
        role: Some(Role::Farmer),
        status: Some(AccountStatus::Pending),
        exclude_super_admin: true,
    };
    state.users.list(&filter).await
}

/// Any authenticated user may read their own record; admins may read others.
pub async fn get_user(state: &AppState, actor: &Principal, id: Uuid) -> AuthResult<User> {
    authorize(actor, &[Role::Farmer])?;
    check_ownership(actor, id)?;
    let user = load_target(state, id).await?;
    check_visible(actor, &user)?;
    Ok(user)
}

pub async fn create_user(
    state: &AppState,
    actor: &Principal,
    req: CreateUserRequest,
) -> AuthResult<User> {
    authorize(actor, &[Role::SuperAdmin])?;
    lifecycle::ensure_can_provision(actor, req.role)?;

    let email = req.email.trim().to_string();
    require_fields(&[("email", email.as_str()), ("password", req.password.as_str())])?;
    validate_email(&email)?;
    validate_password(&state.config.policy, &req.password)?;

    if state.users.find_by_email(&email).await?.is_some() {
        return Err(AuthError::Conflict("User with that email already exists".into()));
    }

    let hash = state.hasher.hash_blocking(req.password).await?;
    let user = User::provision(
        email,
        normalize_name(req.name),
        hash,
        req.role,
        OffsetDateTime::now_utc(),
    );
    let user = state.users.create(user).await?;
    info!(actor_id = %actor.id, user_id = %user.id, role = %user.role, "user created");
    Ok(user)
}

pub async fn update_status(
    state: &AppState,
    actor: &Principal,
    id: Uuid,
    req: UpdateStatusRequest,
) -> AuthResult<User> {
    authorize(actor, &[Role::Admin])?;
    let mut user = load_target(state, id).await?;
    let seen = user.updated_at;
    lifecycle::transition_status(actor, &mut user, req.status, req.reason, OffsetDateTime::now_utc())?;
    state.users.update(&user, seen).await?;
    Ok(user)
}

pub async fn update_role(
    state: &AppState,
    actor: &Principal,
    id: Uuid,
    role: Role,
) -> AuthResult<User> {
    authorize(actor, &[Role::SuperAdmin])?;
    let mut user = load_target(state, id).await?;
    let seen = user.updated_at;
    lifecycle::change_role(actor, &mut user, role, OffsetDateTime::now_utc())?;
    if user.updated_at != seen {
        state.users.update(&user, seen).await?;
    }
    Ok(user)
}

pub async fn delete_user(state: &AppState, actor: &Principal, id: Uuid) -> AuthResult<()> {
    authorize(actor, &[Role::SuperAdmin])?;
    let user = load_target(state, id).await?;
    if let Err(e) = lifecycle::ensure_deletable(actor, &user) {
        warn!(actor_id = %actor.id, user_id = %id, "delete refused");
        return Err(e);
    }
    state.users.delete(id).await?;
    info!(actor_id = %actor.id, user_id = %id, "user deleted");
    Ok(())
}

/// Creates the root identity once. Returns `None` when one already exists.
pub async fn seed_super_admin(state: &AppState, seed: &SuperAdminSeed) -> AuthResult<Option<User>> {
    let existing = state
        .users
        .list(&UserFilter {
            role: Some(Role::SuperAdmin),
            ..Default::default()
        })
        .await?;
    if !existing.is_empty() {
        info!("super admin already exists");
        return Ok(None);
    }

    let email = seed.email.trim().to_string();
    validate_email(&email)?;
    validate_password(&state.config.policy, &seed.password)?;

    let hash = state.hasher.hash_blocking(seed.password.clone()).await?;
    let user = User::provision(
        email,
        Some("Super Admin".into()),
        hash,
        Role::SuperAdmin,
        OffsetDateTime::now_utc(),
    );
    let user = state.users.create(user).await?;
    info!(user_id = %user.id, email = %user.email, "super admin created");
    Ok(Some(user))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_user(state: &AppState, email: &str, role: Role, status: AccountStatus) -> User {
        let mut u = User::provision(
            email.into(),
            None,
            state.hasher.hash_password("password1").unwrap(),
            role,
            OffsetDateTime::now_utc(),
        );
        u.status = status;
        state.users.create(u).await.unwrap()
    }

    async fn seeded() -> (AppState, User, User, User) {
        let state = AppState::fake();
        let root = make_user(&state, "root@x.com", Role::SuperAdmin, AccountStatus::Active).await;
        let admin = make_user(&state, "adm@x.com", Role::Admin, AccountStatus::Active).await;
        let farmer = make_user(&state, "f@x.com", Role::Farmer, AccountStatus::Pending).await;
        (state, root, admin, farmer)
    }

    #[tokio::test]
    async fn admin_cannot_delete_super_admin() {
        let (state, root, admin, _) = seeded().await;
        let err = delete_user(&state, &Principal::from(&admin), root.id).await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");

        let err = delete_user(&state, &Principal::from(&root), root.id).await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");

        let still = state.users.find_by_id(root.id).await.unwrap();
        assert_eq!(still, Some(root));
    }

    #[tokio::test]
    async fn super_admin_deletes_farmer() {
        let (state, root, _, farmer) = seeded().await;
        delete_user(&state, &Principal::from(&root), farmer.id).await.unwrap();
        assert!(state.users.find_by_id(farmer.id).await.unwrap().is_none());
        let err = delete_user(&state, &Principal::from(&root), farmer.id).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn admin_list_hides_super_admin() {
        let (state, root, admin, _) = seeded().await;
        let seen = list_users(&state, &Principal::from(&admin)).await.unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|u| u.role != Role::SuperAdmin));

        let all = list_users(&state, &Principal::from(&root)).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn pending_registrations_lists_farmers_only() {
        let (state, _, admin, farmer) = seeded().await;
        let pending = pending_registrations(&state, &Principal::from(&admin)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, farmer.id);
    }

    #[tokio::test]
    async fn farmer_may_only_read_own_record() {
        let (state, root, admin, farmer) = seeded().await;
        let me = Principal::from(&farmer);
        assert_eq!(get_user(&state, &me, farmer.id).await.unwrap().id, farmer.id);
        assert_eq!(get_user(&state, &me, admin.id).await.unwrap_err().kind(), "forbidden");
        assert_eq!(
            get_user(&state, &Principal::from(&admin), root.id).await.unwrap_err().kind(),
            "forbidden"
        );
        assert!(get_user(&state, &Principal::from(&root), admin.id).await.is_ok());
    }

    #[tokio::test]
    async fn approve_persists_status() {
        let (state, _, admin, farmer) = seeded().await;
        update_status(
            &state,
            &Principal::from(&admin),
            farmer.id,
            UpdateStatusRequest { status: AccountStatus::Active, reason: None },
        )
        .await
        .unwrap();
        let stored = state.users.find_by_id(farmer.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn unblock_clears_a_standing_lockout() {
        let (state, _, admin, _) = seeded().await;
        let mut u = User::provision(
            "locked@x.com".into(),
            None,
            state.hasher.hash_password("password1").unwrap(),
            Role::Farmer,
            OffsetDateTime::now_utc(),
        );
        u.status = AccountStatus::Blocked;
        u.login_attempts = 5;
        u.lock_until = Some(OffsetDateTime::now_utc() + time::Duration::minutes(45));
        let u = state.users.create(u).await.unwrap();

        update_status(
            &state,
            &Principal::from(&admin),
            u.id,
            UpdateStatusRequest { status: AccountStatus::Active, reason: None },
        )
        .await
        .unwrap();

        let stored = state.users.find_by_id(u.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Active);
        assert_eq!(stored.login_attempts, 0);
        assert!(stored.lock_until.is_none());

        let pair = crate::auth::services::login(
            &state,
            crate::auth::dto::LoginRequest {
                email: "locked@x.com".into(),
                password: "password1".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(pair.user.status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn status_change_on_stale_read_is_refused() {
        let (state, _, admin, farmer) = seeded().await;
        let stale = state.users.find_by_id(farmer.id).await.unwrap().unwrap();

        update_status(
            &state,
            &Principal::from(&admin),
            farmer.id,
            UpdateStatusRequest {
                status: AccountStatus::Blocked,
                reason: Some("spam".into()),
            },
        )
        .await
        .unwrap();

        let mut approved = stale.clone();
        approved.status = AccountStatus::Active;
        approved.touch(OffsetDateTime::now_utc());
        let err = state.users.update(&approved, stale.updated_at).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");

        let stored = state.users.find_by_id(farmer.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Blocked);
    }

    #[tokio::test]
    async fn blocking_super_admin_fails_for_everyone() {
        let (state, root, admin, _) = seeded().await;
        for actor in [&root, &admin] {
            let err = update_status(
                &state,
                &Principal::from(actor),
                root.id,
                UpdateStatusRequest {
                    status: AccountStatus::Blocked,
                    reason: Some("test".into()),
                },
            )
            .await
            .unwrap_err();
            assert_eq!(err.kind(), "forbidden");
        }
        let stored = state.users.find_by_id(root.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn farmer_cannot_reach_admin_operations() {
        let (state, _, _, farmer) = seeded().await;
        let me = Principal::from(&farmer);
        assert_eq!(list_users(&state, &me).await.unwrap_err().kind(), "forbidden");
        assert_eq!(
            update_role(&state, &me, farmer.id, Role::Admin).await.unwrap_err().kind(),
            "forbidden"
        );
    }

    #[tokio::test]
    async fn create_user_is_super_admin_only() {
        let (state, root, admin, _) = seeded().await;
        let req = || CreateUserRequest {
            email: "new@x.com".into(),
            password: "password1".into(),
            name: None,
            role: Role::Admin,
        };
        assert_eq!(
            create_user(&state, &Principal::from(&admin), req()).await.unwrap_err().kind(),
            "forbidden"
        );
        let created = create_user(&state, &Principal::from(&root), req()).await.unwrap();
        assert_eq!(created.status, AccountStatus::Active);
        assert_eq!(created.role, Role::Admin);

        let err = create_user(
            &state,
            &Principal::from(&root),
            CreateUserRequest { role: Role::SuperAdmin, email: "x@x.com".into(), ..req() },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "forbidden");
    }

    #[tokio::test]
    async fn seed_runs_once() {
        let state = AppState::fake();
        let seed = SuperAdminSeed {
            email: "super@admin.com".into(),
            password: "superadmin123".into(),
        };
        let first = seed_super_admin(&state, &seed).await.unwrap().unwrap();
        assert_eq!(first.role, Role::SuperAdmin);
        assert_eq!(first.status, AccountStatus::Active);
        assert!(seed_super_admin(&state, &seed).await.unwrap().is_none());
    }
}
