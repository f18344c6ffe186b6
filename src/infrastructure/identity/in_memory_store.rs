//! In-memory user store implementing every capability

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
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

#[derive(Debug, Clone)]
struct LoginRow {
    user_id: UserId,
    info: UserLoginInfo,
}

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, User>,
    roles: HashMap<RoleId, Role>,
    logins: HashMap<LoginKey, LoginRow>,
    user_roles: HashSet<(UserId, RoleId)>,
}

impl State {
    fn role_ids_by_name(&self) -> HashMap<&str, &RoleId> {
        self.roles
            .values()
            .map(|role| (role.normalized_name(), role.id()))
            .collect()
    }

    /// A write would break the unique normalized user name index
    fn violates_unique_names(&self, users: &[&User]) -> bool {
        let mut batch: HashMap<&str, &UserId> = HashMap::new();

        for user in users {
            let Some(name) = user.normalized_user_name() else {
                continue;
            };

            if batch.insert(name, user.id()).is_some_and(|other| other != user.id()) {
                return true;
            }

            let taken = self.users.values().any(|stored| {
                stored.id() != user.id() && stored.normalized_user_name() == Some(name)
            });
            if taken {
                return true;
            }
        }

        false
    }

    /// A stored copy is missing or carries another concurrency stamp
    fn has_stale(&self, users: &[&User]) -> bool {
        users.iter().any(|user| {
            self.users
                .get(user.id())
                .is_none_or(|stored| stored.concurrency_stamp() != user.concurrency_stamp())
        })
    }

    /// Apply committed staged changes. Returns false, changing nothing, when a
    /// staged login would duplicate an existing one.
    fn commit(&mut self, changes: ChangeSet) -> bool {
        let mut added = HashSet::new();
        for (_, info) in &changes.added_logins {
            let key = info.key();
            let freed = changes.removed_logins.iter().any(|(_, removed)| *removed == key);
            if (self.logins.contains_key(&key) && !freed) || !added.insert(key) {
                return false;
            }
        }

        for (_, key) in changes.removed_logins {
            self.logins.remove(&key);
        }
        for (user_id, info) in changes.added_logins {
            self.logins.insert(info.key(), LoginRow { user_id, info });
        }
        for membership in changes.removed_roles {
            self.user_roles.remove(&membership);
        }
        for membership in changes.added_roles {
            self.user_roles.insert(membership);
        }

        true
    }
}

fn concurrency_failures(count: usize) -> Vec<IdentityResult> {
    vec![IdentityResult::failed(IdentityError::ConcurrencyFailure); count]
}

/// In-memory store for tests and embedded use.
///
/// Stored users are copies; callers keep working on their own instances and see
/// fresh concurrency stamps written back after each successful update.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    state: RwLock<State>,
    staged: StagingArea,
    closed: AtomicBool,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with roles
    pub fn with_roles(roles: impl IntoIterator<Item = Role>) -> Self {
        let state = State {
            roles: roles
                .into_iter()
                .map(|role| (role.id().clone(), role))
                .collect(),
            ..State::default()
        };

        Self {
            state: RwLock::new(state),
            ..Self::default()
        }
    }

    pub async fn add_role(&self, role: Role) {
        self.state
            .write()
            .await
            .roles
            .insert(role.id().clone(), role);
    }

    /// Stored copy of a user
    pub async fn user(&self, id: &UserId) -> Option<User> {
        self.state.read().await.users.get(id).cloned()
    }

    pub async fn user_count(&self) -> usize {
        self.state.read().await.users.len()
    }

    pub async fn login_count(&self) -> usize {
        self.state.read().await.logins.len()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    fn ensure_open(&self) -> Result<(), DomainError> {
        if self.closed.load(Ordering::Acquire) {
            Err(DomainError::disposed("InMemoryUserStore"))
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
        let mut state = self.state.write().await;

        let duplicate_id = written.len() != users.len()
            || users.iter().any(|user| state.users.contains_key(user.id()));

        if duplicate_id || state.violates_unique_names(users) || !state.commit(changes) {
            warn!(batch = users.len(), "Create conflicted with stored users");
            return Ok(concurrency_failures(users.len()));
        }

        for user in users {
            state.users.insert(user.id().clone(), (*user).clone());
        }

        debug!(batch = users.len(), "Created users");
        Ok(vec![IdentityResult::Success; users.len()])
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
        let mut state = self.state.write().await;

        let shared: Vec<&User> = users.iter().map(|user| &**user).collect();

        if state.has_stale(&shared)
            || state.violates_unique_names(&shared)
            || !state.commit(changes)
        {
            warn!(batch = users.len(), "Update hit a concurrency conflict");
            return Ok(concurrency_failures(users.len()));
        }

        for user in users.iter_mut() {
            user.set_concurrency_stamp(new_concurrency_stamp());
            state.users.insert(user.id().clone(), (**user).clone());
        }

        debug!(batch = users.len(), "Updated users");
        Ok(vec![IdentityResult::Success; users.len()])
    }

    async fn delete(
        &self,
        users: &[&User],
        cancel: &CancellationToken,
    ) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        self.staged.clear().await;
        let mut state = self.state.write().await;

        if state.has_stale(users) {
            warn!(batch = users.len(), "Delete hit a concurrency conflict");
            return Ok(concurrency_failures(users.len()));
        }

        let deleted: HashSet<UserId> = users.iter().map(|user| user.id().clone()).collect();
        state.users.retain(|id, _| !deleted.contains(id));
        state.logins.retain(|_, row| !deleted.contains(&row.user_id));
        state.user_roles.retain(|(user_id, _)| !deleted.contains(user_id));

        debug!(batch = users.len(), "Deleted users");
        Ok(vec![IdentityResult::Success; users.len()])
    }

    async fn find_by_ids(
        &self,
        ids: &[UserId],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<User>>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        let state = self.state.read().await;
        let rows: Vec<User> = distinct_keys(ids)
            .iter()
            .filter_map(|id| state.users.get(id).cloned())
            .collect();

        Ok(align_to_request(ids, rows, |user| Some(user.id().clone())))
    }

    async fn find_by_names(
        &self,
        normalized_user_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<User>>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        let wanted: HashSet<&str> = normalized_user_names.iter().map(String::as_str).collect();
        let state = self.state.read().await;
        let rows: Vec<User> = state
            .users
            .values()
            .filter(|user| user.normalized_user_name().is_some_and(|n| wanted.contains(n)))
            .cloned()
            .collect();

        Ok(align_to_request(normalized_user_names, rows, |user| {
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
impl UserEmailStore for InMemoryUserStore {
    async fn find_by_emails(
        &self,
        normalized_emails: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<User>>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        let wanted: HashSet<&str> = normalized_emails.iter().map(String::as_str).collect();
        let state = self.state.read().await;
        let rows: Vec<User> = state
            .users
            .values()
            .filter(|user| user.normalized_email().is_some_and(|e| wanted.contains(e)))
            .cloned()
            .collect();

        Ok(align_to_request(normalized_emails, rows, |user| {
            user.normalized_email().map(str::to_owned)
        }))
    }
}

impl UserLockoutStore for InMemoryUserStore {}

impl UserPasswordStore for InMemoryUserStore {}

impl UserSecurityStampStore for InMemoryUserStore {}

#[async_trait]
impl UserLoginStore for InMemoryUserStore {
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

        let state = self.state.read().await;
        let rows: Vec<(LoginKey, User)> = distinct_keys(keys)
            .into_iter()
            .filter_map(|key| {
                let owner = state.logins.get(&key)?;
                let user = state.users.get(&owner.user_id)?;
                Some((key, user.clone()))
            })
            .collect();

        Ok(align_to_request(keys, rows, |(key, _)| Some(key.clone()))
            .into_iter()
            .map(|row| row.map(|(_, user)| user))
            .collect())
    }

    async fn logins(
        &self,
        users: &[&User],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<UserLoginInfo>>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        let ids: Vec<UserId> = users.iter().map(|user| user.id().clone()).collect();
        let wanted: HashSet<&UserId> = ids.iter().collect();

        let state = self.state.read().await;
        let mut rows: Vec<(UserId, UserLoginInfo)> = state
            .logins
            .values()
            .filter(|row| wanted.contains(&row.user_id))
            .map(|row| (row.user_id.clone(), row.info.clone()))
            .collect();
        rows.sort_by(|(_, a), (_, b)| {
            (&a.login_provider, &a.provider_key).cmp(&(&b.login_provider, &b.provider_key))
        });

        Ok(group_to_request(&ids, rows))
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

        let state = self.state.read().await;
        let removals: Vec<StagedChange> = users
            .iter()
            .zip(keys)
            .filter(|(user, key)| {
                state
                    .logins
                    .get(key)
                    .is_some_and(|row| &row.user_id == user.id())
            })
            .map(|(user, key)| StagedChange::RemoveLogin {
                user_id: user.id().clone(),
                key,
            })
            .collect();
        drop(state);

        self.staged.stage(removals).await;
        Ok(())
    }
}

#[async_trait]
impl UserRoleStore for InMemoryUserStore {
    async fn add_to_roles(
        &self,
        users: &[&User],
        normalized_role_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        ensure_paired(users.len(), normalized_role_names.len())?;

        let state = self.state.read().await;
        let by_name = state.role_ids_by_name();

        let missing: Vec<String> = distinct_keys(normalized_role_names)
            .into_iter()
            .filter(|name| !by_name.contains_key(name.as_str()))
            .collect();
        if !missing.is_empty() {
            warn!(roles = ?missing, "Cannot add users to missing roles");
            return Err(DomainError::missing_roles(missing));
        }

        let additions: Vec<StagedChange> = users
            .iter()
            .zip(normalized_role_names)
            .filter_map(|(user, name)| {
                by_name.get(name.as_str()).map(|role_id| StagedChange::AddRole {
                    user_id: user.id().clone(),
                    role_id: (*role_id).clone(),
                })
            })
            .collect();
        drop(by_name);
        drop(state);

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

        let state = self.state.read().await;
        let by_name = state.role_ids_by_name();

        Ok(users
            .iter()
            .zip(normalized_role_names)
            .map(|(user, name)| {
                by_name.get(name.as_str()).is_some_and(|role_id| {
                    state
                        .user_roles
                        .contains(&(user.id().clone(), (*role_id).clone()))
                })
            })
            .collect())
    }

    async fn roles(
        &self,
        users: &[&User],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<String>>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        let ids: Vec<UserId> = users.iter().map(|user| user.id().clone()).collect();
        let wanted: HashSet<&UserId> = ids.iter().collect();

        let state = self.state.read().await;
        let mut rows: Vec<(UserId, String)> = state
            .user_roles
            .iter()
            .filter(|(user_id, _)| wanted.contains(user_id))
            .filter_map(|(user_id, role_id)| {
                state
                    .roles
                    .get(role_id)
                    .map(|role| (user_id.clone(), role.name().to_owned()))
            })
            .collect();
        rows.sort_by(|(_, a), (_, b)| a.cmp(b));

        Ok(group_to_request(&ids, rows))
    }

    async fn users_in_roles(
        &self,
        normalized_role_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<User>>, DomainError> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        let wanted: HashSet<&str> = normalized_role_names.iter().map(String::as_str).collect();

        let state = self.state.read().await;
        let mut rows: Vec<(String, User)> = state
            .user_roles
            .iter()
            .filter_map(|(user_id, role_id)| {
                let role = state.roles.get(role_id)?;
                if !wanted.contains(role.normalized_name()) {
                    return None;
                }
                let user = state.users.get(user_id)?;
                Some((role.normalized_name().to_owned(), user.clone()))
            })
            .collect();
        rows.sort_by(|(_, a), (_, b)| a.id().cmp(b.id()));

        Ok(group_to_request(normalized_role_names, rows))
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

        let state = self.state.read().await;
        let by_name = state.role_ids_by_name();

        let removals: Vec<StagedChange> = users
            .iter()
            .zip(normalized_role_names)
            .filter_map(|(user, name)| {
                let role_id = by_name.get(name.as_str())?;
                let membership = (user.id().clone(), (*role_id).clone());
                state
                    .user_roles
                    .contains(&membership)
                    .then(|| StagedChange::RemoveRole {
                        user_id: membership.0,
                        role_id: membership.1,
                    })
            })
            .collect();
        drop(by_name);
        drop(state);

        self.staged.stage(removals).await;
        Ok(())
    }
}
