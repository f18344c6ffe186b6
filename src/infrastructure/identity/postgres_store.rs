//! PostgreSQL user store.
//!
//! Every lookup is one set-based query (`= ANY($1)` or a join against `UNNEST`),
//! re-expanded to the request's shape. Batch writes run in one transaction together
//! with the staged login and role changes; a stale concurrency stamp or a unique
//! violation rolls the transaction back and fails every item of the batch.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::staging::{ChangeSet, StagedChange, StagingArea};
use super::stamp::new_concurrency_stamp;
use crate::domain::identity::resolve::{align_to_request, distinct_keys, group_to_request};
use crate::domain::identity::{
    ensure_not_cancelled, ensure_paired, IdentityError, IdentityResult, LoginKey, Role, RoleId,
    User, UserEmailStore, UserId, UserLockoutStore, UserLoginInfo, UserLoginStore,
    UserPasswordStore, UserRoleStore, UserSecurityStampStore, UserStore,
};
use crate::domain::DomainError;

const USER_COLUMNS: &str = "u.id, u.user_name, u.normalized_user_name, u.email, \
    u.normalized_email, u.email_confirmed, u.password_hash, u.security_stamp, \
    u.concurrency_stamp, u.lockout_enabled, u.lockout_end";

/// Users transposed into one array per column, for `UNNEST` binds
#[derive(Debug, Default)]
struct UserColumns {
    ids: Vec<String>,
    user_names: Vec<Option<String>>,
    normalized_user_names: Vec<Option<String>>,
    emails: Vec<Option<String>>,
    normalized_emails: Vec<Option<String>>,
    email_confirmed: Vec<bool>,
    password_hashes: Vec<Option<String>>,
    security_stamps: Vec<Option<String>>,
    concurrency_stamps: Vec<String>,
    lockout_enabled: Vec<bool>,
    lockout_ends: Vec<Option<DateTime<Utc>>>,
}

impl<'a> FromIterator<&'a User> for UserColumns {
    fn from_iter<I: IntoIterator<Item = &'a User>>(iter: I) -> Self {
        let mut columns = UserColumns::default();
        for user in iter {
            columns.ids.push(user.id().as_str().to_owned());
            columns.user_names.push(user.user_name().map(str::to_owned));
            columns
                .normalized_user_names
                .push(user.normalized_user_name().map(str::to_owned));
            columns.emails.push(user.email().map(str::to_owned));
            columns
                .normalized_emails
                .push(user.normalized_email().map(str::to_owned));
            columns.email_confirmed.push(user.email_confirmed());
            columns
                .password_hashes
                .push(user.password_hash().map(str::to_owned));
            columns
                .security_stamps
                .push(user.security_stamp().map(str::to_owned));
            columns
                .concurrency_stamps
                .push(user.concurrency_stamp().to_owned());
            columns.lockout_enabled.push(user.lockout_enabled());
            columns.lockout_ends.push(user.lockout_end());
        }
        columns
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, DomainError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| DomainError::storage(format!("Failed to read column {}: {}", name, e)))
}

fn row_to_user(row: &PgRow) -> Result<User, DomainError> {
    let id: String = column(row, "id")?;
    let id = UserId::new(id)
        .map_err(|e| DomainError::storage(format!("Invalid user ID in database: {}", e)))?;

    let mut user = User::with_id(id, "");
    user.set_user_name(column(row, "user_name")?);
    user.set_normalized_user_name(column(row, "normalized_user_name")?);
    user.set_email(column(row, "email")?);
    user.set_normalized_email(column(row, "normalized_email")?);
    user.set_email_confirmed(column(row, "email_confirmed")?);
    user.set_password_hash(column(row, "password_hash")?);
    user.set_security_stamp(column(row, "security_stamp")?);
    user.set_concurrency_stamp(column::<String>(row, "concurrency_stamp")?);
    user.set_lockout_enabled(column(row, "lockout_enabled")?);
    user.set_lockout_end(column(row, "lockout_end")?);

    Ok(user)
}

fn is_conflict(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation()
    )
}

fn ids_of(users: &[&User]) -> Vec<String> {
    users.iter().map(|user| user.id().as_str().to_owned()).collect()
}

/// Flush staged login and role changes inside the write's transaction
async fn apply_changes(
    tx: &mut Transaction<'_, Postgres>,
    changes: ChangeSet,
) -> Result<(), sqlx::Error> {
    if !changes.removed_logins.is_empty() {
        let (user_ids, keys): (Vec<String>, Vec<LoginKey>) = changes
            .removed_logins
            .into_iter()
            .map(|(user_id, key)| (String::from(user_id), key))
            .unzip();
        let (providers, provider_keys): (Vec<String>, Vec<String>) = keys
            .into_iter()
            .map(|key| (key.login_provider, key.provider_key))
            .unzip();

        sqlx::query(
            r#"
            DELETE FROM identity_user_logins AS l
            USING UNNEST($1::text[], $2::text[], $3::text[]) AS v(user_id, login_provider, provider_key)
            WHERE l.user_id = v.user_id
              AND l.login_provider = v.login_provider
              AND l.provider_key = v.provider_key
            "#,
        )
        .bind(user_ids)
        .bind(providers)
        .bind(provider_keys)
        .execute(&mut **tx)
        .await?;
    }

    if !changes.added_logins.is_empty() {
        let mut providers = Vec::with_capacity(changes.added_logins.len());
        let mut provider_keys = Vec::with_capacity(changes.added_logins.len());
        let mut display_names = Vec::with_capacity(changes.added_logins.len());
        let mut user_ids = Vec::with_capacity(changes.added_logins.len());

        for (user_id, info) in changes.added_logins {
            providers.push(info.login_provider);
            provider_keys.push(info.provider_key);
            display_names.push(info.provider_display_name);
            user_ids.push(String::from(user_id));
        }

        sqlx::query(
            r#"
            INSERT INTO identity_user_logins (login_provider, provider_key, provider_display_name, user_id)
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[])
            "#,
        )
        .bind(providers)
        .bind(provider_keys)
        .bind(display_names)
        .bind(user_ids)
        .execute(&mut **tx)
        .await?;
    }

    if !changes.removed_roles.is_empty() {
        let (user_ids, role_ids): (Vec<String>, Vec<String>) = changes
            .removed_roles
            .into_iter()
            .map(|(user_id, role_id)| (String::from(user_id), role_id.as_str().to_owned()))
            .unzip();

        sqlx::query(
            r#"
            DELETE FROM identity_user_roles AS ur
            USING UNNEST($1::text[], $2::text[]) AS v(user_id, role_id)
            WHERE ur.user_id = v.user_id AND ur.role_id = v.role_id
            "#,
        )
        .bind(user_ids)
        .bind(role_ids)
        .execute(&mut **tx)
        .await?;
    }

    if !changes.added_roles.is_empty() {
        let (user_ids, role_ids): (Vec<String>, Vec<String>) = changes
            .added_roles
            .into_iter()
            .map(|(user_id, role_id)| (String::from(user_id), role_id.as_str().to_owned()))
            .unzip();

        sqlx::query(
            r#"
            INSERT INTO identity_user_roles (user_id, role_id)
            SELECT * FROM UNNEST($1::text[], $2::text[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_ids)
        .bind(role_ids)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// PostgreSQL implementation of every store capability
pub struct PostgresUserStore {
    pool: PgPool,
    staged: StagingArea,
    closed: AtomicBool,
}

impl std::fmt::Debug for PostgresUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresUserStore")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            staged: StagingArea::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert roles, skipping identifiers that already exist
    pub async fn create_roles(&self, roles: &[Role]) -> Result<(), DomainError> {
        self.ensure_open()?;

        let ids: Vec<String> = roles.iter().map(|r| r.id().as_str().to_owned()).collect();
        let names: Vec<String> = roles.iter().map(|r| r.name().to_owned()).collect();
        let normalized: Vec<String> = roles
            .iter()
            .map(|r| r.normalized_name().to_owned())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO identity_roles (id, name, normalized_name)
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[])
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(ids)
        .bind(names)
        .bind(normalized)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to create roles: {}", e)))?;

        Ok(())
    }

    async fn fetch_users(&self, sql: &str, keys: Vec<String>) -> Result<Vec<User>, DomainError> {
        let rows = sqlx::query(sql)
            .bind(keys)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to query users: {}", e)))?;

        rows.iter().map(row_to_user).collect()
    }

    /// Role identifiers by normalized name, for the roles that exist
    async fn resolve_roles(
        &self,
        normalized_role_names: &[String],
    ) -> Result<HashMap<String, RoleId>, DomainError> {
        let rows = sqlx::query(
            "SELECT id, normalized_name FROM identity_roles WHERE normalized_name = ANY($1)",
        )
        .bind(distinct_keys(normalized_role_names))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to resolve roles: {}", e)))?;

        rows.iter()
            .map(|row| -> Result<(String, RoleId), DomainError> {
                let id: String = column(row, "id")?;
                Ok((column(row, "normalized_name")?, RoleId::new(id)))
            })
            .collect()
    }

    /// Map a write outcome to per-item results; `Ok(false)` means a stale stamp
    fn finish(
        &self,
        operation: &'static str,
        count: usize,
        outcome: Result<bool, sqlx::Error>,
    ) -> Result<Vec<IdentityResult>, DomainError> {
        match outcome {
            Ok(true) => {
                debug!(operation, batch = count, "Batch written");
                Ok(vec![IdentityResult::Success; count])
            }
            Ok(false) => {
                warn!(operation, batch = count, "Stale concurrency stamp in batch");
                Ok(vec![IdentityResult::failed(IdentityError::ConcurrencyFailure); count])
            }
            Err(e) if is_conflict(&e) => {
                warn!(operation, batch = count, error = %e, "Batch write conflicted");
                Ok(vec![IdentityResult::failed(IdentityError::ConcurrencyFailure); count])
            }
            Err(e) => Err(DomainError::storage(format!(
                "Failed to {} users: {}",
                operation, e
            ))),
        }
    }

    async fn insert_users(&self, users: &[&User], changes: ChangeSet) -> Result<bool, sqlx::Error> {
        let columns: UserColumns = users.iter().copied().collect();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO identity_users (
                id, user_name, normalized_user_name, email, normalized_email, email_confirmed,
                password_hash, security_stamp, concurrency_stamp, lockout_enabled, lockout_end
            )
            SELECT * FROM UNNEST(
                $1::text[], $2::text[], $3::text[], $4::text[], $5::text[], $6::bool[],
                $7::text[], $8::text[], $9::text[], $10::bool[], $11::timestamptz[]
            )
            "#,
        )
        .bind(columns.ids)
        .bind(columns.user_names)
        .bind(columns.normalized_user_names)
        .bind(columns.emails)
        .bind(columns.normalized_emails)
        .bind(columns.email_confirmed)
        .bind(columns.password_hashes)
        .bind(columns.security_stamps)
        .bind(columns.concurrency_stamps)
        .bind(columns.lockout_enabled)
        .bind(columns.lockout_ends)
        .execute(&mut *tx)
        .await?;

        apply_changes(&mut tx, changes).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn update_users(
        &self,
        users: &[&User],
        new_stamps: &[String],
        changes: ChangeSet,
    ) -> Result<bool, sqlx::Error> {
        let columns: UserColumns = users.iter().copied().collect();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE identity_users AS u SET
                user_name = v.user_name,
                normalized_user_name = v.normalized_user_name,
                email = v.email,
                normalized_email = v.normalized_email,
                email_confirmed = v.email_confirmed,
                password_hash = v.password_hash,
                security_stamp = v.security_stamp,
                concurrency_stamp = v.new_concurrency_stamp,
                lockout_enabled = v.lockout_enabled,
                lockout_end = v.lockout_end
            FROM UNNEST(
                $1::text[], $2::text[], $3::text[], $4::text[], $5::text[], $6::bool[],
                $7::text[], $8::text[], $9::text[], $10::bool[], $11::timestamptz[], $12::text[]
            ) AS v(
                id, user_name, normalized_user_name, email, normalized_email, email_confirmed,
                password_hash, security_stamp, concurrency_stamp, lockout_enabled, lockout_end,
                new_concurrency_stamp
            )
            WHERE u.id = v.id AND u.concurrency_stamp = v.concurrency_stamp
            "#,
        )
        .bind(columns.ids)
        .bind(columns.user_names)
        .bind(columns.normalized_user_names)
        .bind(columns.emails)
        .bind(columns.normalized_emails)
        .bind(columns.email_confirmed)
        .bind(columns.password_hashes)
        .bind(columns.security_stamps)
        .bind(columns.concurrency_stamps)
        .bind(columns.lockout_enabled)
        .bind(columns.lockout_ends)
        .bind(new_stamps.to_vec())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated != users.len() as u64 {
            return Ok(false);
        }

        apply_changes(&mut tx, changes).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete_users(&self, users: &[&User]) -> Result<bool, sqlx::Error> {
        let stamps: Vec<String> = users
            .iter()
            .map(|user| user.concurrency_stamp().to_owned())
            .collect();
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM identity_users AS u
            USING UNNEST($1::text[], $2::text[]) AS v(id, concurrency_stamp)
            WHERE u.id = v.id AND u.concurrency_stamp = v.concurrency_stamp
            "#,
        )
        .bind(ids_of(users))
        .bind(stamps)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if deleted != users.len() as u64 {
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    fn ensure_open(&self) -> Result<(), DomainError> {
        if self.closed.load(Ordering::Acquire) {
            Err(DomainError::disposed("PostgresUserStore"))
        } else {
            Ok(())
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    async fn create(
        &self,
        users: &[&User],
        cancel: &CancellationToken,
    ) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        let written: HashSet<UserId> = users.iter().map(|user| user.id().clone()).collect();
        let changes = self.staged.drain_for(&written).await;
        if users.is_empty() {
            return Ok(Vec::new());
        }

        let outcome = self.insert_users(users, changes).await;
        self.finish("create", users.len(), outcome)
    }

    async fn update(
        &self,
        users: &mut [&mut User],
        cancel: &CancellationToken,
    ) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        let written: HashSet<UserId> = users.iter().map(|user| user.id().clone()).collect();
        let changes = self.staged.drain_for(&written).await;
        if users.is_empty() {
            return Ok(Vec::new());
        }

        let new_stamps: Vec<String> = users.iter().map(|_| new_concurrency_stamp()).collect();
        let shared: Vec<&User> = users.iter().map(|user| &**user).collect();
        let outcome = self.update_users(&shared, &new_stamps, changes).await;

        let committed = matches!(outcome, Ok(true));
        let results = self.finish("update", users.len(), outcome)?;

        if committed {
            for (user, stamp) in users.iter_mut().zip(new_stamps) {
                user.set_concurrency_stamp(stamp);
            }
        }

        Ok(results)
    }

    async fn delete(
        &self,
        users: &[&User],
        cancel: &CancellationToken,
    ) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        self.staged.clear().await;
        if users.is_empty() {
            return Ok(Vec::new());
        }

        let outcome = self.delete_users(users).await;
        self.finish("delete", users.len(), outcome)
    }

    async fn find_by_ids(
        &self,
        ids: &[UserId],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<User>>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        let keys: Vec<String> = distinct_keys(ids)
            .into_iter()
            .map(String::from)
            .collect();
        let users = self
            .fetch_users(
                &format!("SELECT {} FROM identity_users AS u WHERE u.id = ANY($1)", USER_COLUMNS),
                keys,
            )
            .await?;

        Ok(align_to_request(ids, users, |user| Some(user.id().clone())))
    }

    async fn find_by_names(
        &self,
        normalized_user_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<User>>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        let users = self
            .fetch_users(
                &format!(
                    "SELECT {} FROM identity_users AS u WHERE u.normalized_user_name = ANY($1)",
                    USER_COLUMNS
                ),
                distinct_keys(normalized_user_names),
            )
            .await?;

        Ok(align_to_request(normalized_user_names, users, |user| {
            user.normalized_user_name().map(str::to_owned)
        }))
    }

    fn email_store(&self) -> Option<&dyn UserEmailStore> {
        Some(self)
    }

    fn lockout_store(&self) -> Option<&dyn UserLockoutStore> {
        Some(self)
    }

    fn login_store(&self) -> Option<&dyn UserLoginStore> {
        Some(self)
    }

    fn password_store(&self) -> Option<&dyn UserPasswordStore> {
        Some(self)
    }

    fn role_store(&self) -> Option<&dyn UserRoleStore> {
        Some(self)
    }

    fn security_stamp_store(&self) -> Option<&dyn UserSecurityStampStore> {
        Some(self)
    }
}

#[async_trait]
impl UserEmailStore for PostgresUserStore {
    async fn find_by_emails(
        &self,
        normalized_emails: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<User>>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        let users = self
            .fetch_users(
                &format!(
                    "SELECT {} FROM identity_users AS u WHERE u.normalized_email = ANY($1)",
                    USER_COLUMNS
                ),
                distinct_keys(normalized_emails),
            )
            .await?;

        Ok(align_to_request(normalized_emails, users, |user| {
            user.normalized_email().map(str::to_owned)
        }))
    }
}

impl UserLockoutStore for PostgresUserStore {}

impl UserPasswordStore for PostgresUserStore {}

impl UserSecurityStampStore for PostgresUserStore {}

#[async_trait]
impl UserLoginStore for PostgresUserStore {
    async fn add_logins(
        &self,
        users: &[&User],
        logins: Vec<UserLoginInfo>,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        ensure_paired(users.len(), logins.len())?;

        self.staged
            .stage(users.iter().zip(logins).map(|(user, info)| StagedChange::AddLogin {
                user_id: user.id().clone(),
                info,
            }))
            .await;
        Ok(())
    }

    async fn find_by_logins(
        &self,
        keys: &[LoginKey],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<User>>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        let (providers, provider_keys): (Vec<String>, Vec<String>) = distinct_keys(keys)
            .into_iter()
            .map(|key| (key.login_provider, key.provider_key))
            .unzip();

        let rows = sqlx::query(&format!(
            r#"
            SELECT l.login_provider, l.provider_key, {}
            FROM identity_user_logins AS l
            JOIN identity_users AS u ON u.id = l.user_id
            JOIN UNNEST($1::text[], $2::text[]) AS v(login_provider, provider_key)
              ON l.login_provider = v.login_provider AND l.provider_key = v.provider_key
            "#,
            USER_COLUMNS
        ))
        .bind(providers)
        .bind(provider_keys)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to find users by login: {}", e)))?;

        let owners = rows
            .iter()
            .map(|row| {
                let key = LoginKey::new(
                    column::<String>(row, "login_provider")?,
                    column::<String>(row, "provider_key")?,
                );
                Ok((key, row_to_user(row)?))
            })
            .collect::<Result<Vec<_>, DomainError>>()?;

        Ok(align_to_request(keys, owners, |(key, _)| Some(key.clone()))
            .into_iter()
            .map(|owner| owner.map(|(_, user)| user))
            .collect())
    }

    async fn logins(
        &self,
        users: &[&User],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<UserLoginInfo>>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        let rows = sqlx::query(
            r#"
            SELECT user_id, login_provider, provider_key, provider_display_name
            FROM identity_user_logins
            WHERE user_id = ANY($1)
            ORDER BY login_provider, provider_key
            "#,
        )
        .bind(ids_of(users))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to get logins: {}", e)))?;

        let logins = rows
            .iter()
            .map(|row| {
                let user_id = UserId::new(column::<String>(row, "user_id")?)?;
                let info = UserLoginInfo::new(
                    column::<String>(row, "login_provider")?,
                    column::<String>(row, "provider_key")?,
                    column(row, "provider_display_name")?,
                );
                Ok((user_id, info))
            })
            .collect::<Result<Vec<_>, DomainError>>()?;

        let request: Vec<UserId> = users.iter().map(|user| user.id().clone()).collect();
        Ok(group_to_request(&request, logins))
    }

    async fn remove_logins(
        &self,
        users: &[&User],
        keys: Vec<LoginKey>,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        ensure_paired(users.len(), keys.len())?;

        self.staged
            .stage(users.iter().zip(keys).map(|(user, key)| StagedChange::RemoveLogin {
                user_id: user.id().clone(),
                key,
            }))
            .await;
        Ok(())
    }
}

#[async_trait]
impl UserRoleStore for PostgresUserStore {
    async fn add_to_roles(
        &self,
        users: &[&User],
        normalized_role_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        ensure_paired(users.len(), normalized_role_names.len())?;

        let roles = self.resolve_roles(normalized_role_names).await?;
        let missing: Vec<String> = distinct_keys(normalized_role_names)
            .into_iter()
            .filter(|name| !roles.contains_key(name))
            .collect();
        if !missing.is_empty() {
            warn!(roles = ?missing, "Cannot add users to missing roles");
            return Err(DomainError::missing_roles(missing));
        }

        let additions: Vec<StagedChange> = users
            .iter()
            .zip(normalized_role_names)
            .filter_map(|(user, name)| {
                roles.get(name).map(|role_id| StagedChange::AddRole {
                    user_id: user.id().clone(),
                    role_id: role_id.clone(),
                })
            })
            .collect();

        self.staged.stage(additions).await;
        Ok(())
    }

    async fn are_in_roles(
        &self,
        users: &[&User],
        normalized_role_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<bool>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        ensure_paired(users.len(), normalized_role_names.len())?;

        let rows = sqlx::query(
            r#"
            SELECT ur.user_id, r.normalized_name
            FROM identity_user_roles AS ur
            JOIN identity_roles AS r ON r.id = ur.role_id
            WHERE ur.user_id = ANY($1) AND r.normalized_name = ANY($2)
            "#,
        )
        .bind(ids_of(users))
        .bind(distinct_keys(normalized_role_names))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to check role membership: {}", e)))?;

        let memberships = rows
            .iter()
            .map(|row| Ok((column::<String>(row, "user_id")?, column::<String>(row, "normalized_name")?)))
            .collect::<Result<HashSet<_>, DomainError>>()?;

        Ok(users
            .iter()
            .zip(normalized_role_names)
            .map(|(user, name)| memberships.contains(&(user.id().as_str().to_owned(), name.clone())))
            .collect())
    }

    async fn roles(
        &self,
        users: &[&User],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<String>>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        let rows = sqlx::query(
            r#"
            SELECT ur.user_id, r.name
            FROM identity_user_roles AS ur
            JOIN identity_roles AS r ON r.id = ur.role_id
            WHERE ur.user_id = ANY($1)
            ORDER BY r.name
            "#,
        )
        .bind(ids_of(users))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to get roles: {}", e)))?;

        let names = rows
            .iter()
            .map(|row| Ok((UserId::new(column::<String>(row, "user_id")?)?, column(row, "name")?)))
            .collect::<Result<Vec<(UserId, String)>, DomainError>>()?;

        let request: Vec<UserId> = users.iter().map(|user| user.id().clone()).collect();
        Ok(group_to_request(&request, names))
    }

    async fn users_in_roles(
        &self,
        normalized_role_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<User>>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT r.normalized_name AS role_normalized_name, {}
            FROM identity_user_roles AS ur
            JOIN identity_roles AS r ON r.id = ur.role_id
            JOIN identity_users AS u ON u.id = ur.user_id
            WHERE r.normalized_name = ANY($1)
            ORDER BY u.id
            "#,
            USER_COLUMNS
        ))
        .bind(distinct_keys(normalized_role_names))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to get users in roles: {}", e)))?;

        let members = rows
            .iter()
            .map(|row| Ok((column::<String>(row, "role_normalized_name")?, row_to_user(row)?)))
            .collect::<Result<Vec<_>, DomainError>>()?;

        Ok(group_to_request(normalized_role_names, members))
    }

    async fn remove_from_roles(
        &self,
        users: &[&User],
        normalized_role_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        ensure_paired(users.len(), normalized_role_names.len())?;

        let roles = self.resolve_roles(normalized_role_names).await?;
        let removals: Vec<StagedChange> = users
            .iter()
            .zip(normalized_role_names)
            .filter_map(|(user, name)| {
                roles.get(name).map(|role_id| StagedChange::RemoveRole {
                    user_id: user.id().clone(),
                    role_id: role_id.clone(),
                })
            })
            .collect();

        self.staged.stage(removals).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_columns_transpose_users() {
        let mut alice = User::new("alice").with_email("alice@example.com");
        alice.set_normalized_user_name(Some("ALICE".to_string()));
        alice.set_lockout_enabled(true);
        let bob = User::new("bob");

        let columns: UserColumns = [&alice, &bob].into_iter().collect();

        assert_eq!(
            columns.ids,
            vec![alice.id().as_str().to_owned(), bob.id().as_str().to_owned()]
        );
        assert_eq!(columns.normalized_user_names, vec![Some("ALICE".to_string()), None]);
        assert_eq!(columns.emails, vec![Some("alice@example.com".to_string()), None]);
        assert_eq!(columns.lockout_enabled, vec![true, false]);
        assert_eq!(columns.concurrency_stamps[1], bob.concurrency_stamp());
    }

    #[test]
    fn test_user_columns_empty() {
        let columns: UserColumns = std::iter::empty::<&User>().collect();
        assert!(columns.ids.is_empty());
        assert!(columns.lockout_ends.is_empty());
    }

    #[test]
    fn test_user_columns_select_list() {
        for name in ["u.id", "u.normalized_email", "u.concurrency_stamp", "u.lockout_end"] {
            assert!(USER_COLUMNS.contains(name));
        }
    }
}
