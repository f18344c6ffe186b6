//! External logins and role memberships

use std::collections::HashSet;

use tracing::{debug, instrument, warn};

use super::UserManager;
use crate::domain::identity::{
    FilteredBatch, IdentityError, IdentityResult, LoginKey, User, UserLogin, UserLoginInfo,
    UserLoginKey, UserRoleName,
};
use crate::domain::DomainError;
use crate::infrastructure::observability::record_results;

impl UserManager {
    /// Bind external logins to users.
    ///
    /// A login already bound to any user fails with `LoginAlreadyAssociated`, as
    /// does a login repeated within the batch after its first occurrence.
    #[instrument(skip_all, fields(batch = pairs.len()))]
    pub async fn add_logins(
        &self,
        pairs: Vec<UserLogin<'_>>,
    ) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_active()?;
        let store = self.login_store()?;

        let keys: Vec<LoginKey> = pairs.iter().map(|pair| pair.login.key()).collect();
        let owners = store.find_by_logins(&keys, &self.cancel).await?;
        DomainError::ensure_aligned("find logins", keys.len(), owners.len())?;

        let mut seen = HashSet::with_capacity(keys.len());
        let guard = keys
            .iter()
            .zip(&owners)
            .map(|(key, owner)| {
                if owner.is_some() || !seen.insert(key) {
                    IdentityResult::failed(IdentityError::LoginAlreadyAssociated)
                } else {
                    IdentityResult::Success
                }
            })
            .collect();

        let mut batch = FilteredBatch::new(pairs);
        batch.apply("login guard", guard)?;
        debug!(live = batch.len(), "Logins not yet associated");

        let users: Vec<&User> = batch.items().iter().map(|pair| &*pair.user).collect();
        let logins: Vec<UserLoginInfo> = batch
            .items()
            .iter()
            .map(|pair| pair.login.clone())
            .collect();
        store.add_logins(&users, logins, &self.cancel).await?;

        let mut users: Vec<&mut User> = batch
            .items_mut()
            .iter_mut()
            .map(|pair| &mut *pair.user)
            .collect();
        let outcomes = self.update_internal(&mut users).await?;
        batch.apply("update users", outcomes)?;

        let results = batch.into_results();
        record_results("add_logins", &results);
        Ok(results)
    }

    /// Unbind external logins; bindings that do not exist are ignored
    #[instrument(skip_all, fields(batch = pairs.len()))]
    pub async fn remove_logins(
        &self,
        pairs: Vec<UserLoginKey<'_>>,
    ) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_active()?;
        let store = self.login_store()?;

        let (mut users, keys): (Vec<&mut User>, Vec<LoginKey>) =
            pairs.into_iter().map(|pair| (pair.user, pair.key)).unzip();

        let readonly: Vec<&User> = users.iter().map(|user| &**user).collect();
        store.remove_logins(&readonly, keys, &self.cancel).await?;

        self.update_security_stamps_internal(&mut users)?;

        let results = self.update_internal(&mut users).await?;
        record_results("remove_logins", &results);
        Ok(results)
    }

    pub async fn find_by_logins(&self, keys: &[LoginKey]) -> Result<Vec<Option<User>>, DomainError> {
        self.ensure_active()?;

        let found = self.login_store()?.find_by_logins(keys, &self.cancel).await?;
        DomainError::ensure_aligned("find users by login", keys.len(), found.len())?;
        Ok(found)
    }

    pub async fn get_logins(&self, users: &[&User]) -> Result<Vec<Vec<UserLoginInfo>>, DomainError> {
        self.ensure_active()?;

        let logins = self.login_store()?.logins(users, &self.cancel).await?;
        DomainError::ensure_aligned("get logins", users.len(), logins.len())?;
        Ok(logins)
    }

    /// Add users to roles.
    ///
    /// Users already in the named role fail with `UserAlreadyInRole`. Every named
    /// role must exist: a missing role fails the whole call and nothing is added.
    #[instrument(skip_all, fields(batch = pairs.len()))]
    pub async fn add_to_roles(
        &self,
        pairs: Vec<UserRoleName<'_>>,
    ) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_active()?;
        let store = self.role_store()?;

        let mut batch = FilteredBatch::new(pairs);

        let users: Vec<&User> = batch.items().iter().map(|pair| &*pair.user).collect();
        let roles = self.normalized_role_names(batch.items());
        let memberships = store.are_in_roles(&users, &roles, &self.cancel).await?;
        DomainError::ensure_aligned("check roles", users.len(), memberships.len())?;

        let guard = batch
            .items()
            .iter()
            .zip(memberships)
            .map(|(pair, is_member)| {
                if is_member {
                    IdentityResult::failed(IdentityError::UserAlreadyInRole(
                        pair.role_name.clone(),
                    ))
                } else {
                    IdentityResult::Success
                }
            })
            .collect();
        batch.apply("role guard", guard)?;

        let users: Vec<&User> = batch.items().iter().map(|pair| &*pair.user).collect();
        let roles = self.normalized_role_names(batch.items());
        if let Err(error) = store.add_to_roles(&users, &roles, &self.cancel).await {
            warn!(%error, "Adding users to roles failed");
            return Err(error);
        }

        let mut users: Vec<&mut User> = batch
            .items_mut()
            .iter_mut()
            .map(|pair| &mut *pair.user)
            .collect();
        let outcomes = self.update_internal(&mut users).await?;
        batch.apply("update users", outcomes)?;

        let results = batch.into_results();
        record_results("add_to_roles", &results);
        Ok(results)
    }

    /// Remove users from roles; users not in the named role fail with `UserNotInRole`
    #[instrument(skip_all, fields(batch = pairs.len()))]
    pub async fn remove_from_roles(
        &self,
        pairs: Vec<UserRoleName<'_>>,
    ) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_active()?;
        let store = self.role_store()?;

        let mut batch = FilteredBatch::new(pairs);

        let users: Vec<&User> = batch.items().iter().map(|pair| &*pair.user).collect();
        let roles = self.normalized_role_names(batch.items());
        let memberships = store.are_in_roles(&users, &roles, &self.cancel).await?;
        DomainError::ensure_aligned("check roles", users.len(), memberships.len())?;

        let guard = batch
            .items()
            .iter()
            .zip(memberships)
            .map(|(pair, is_member)| {
                if is_member {
                    IdentityResult::Success
                } else {
                    IdentityResult::failed(IdentityError::UserNotInRole(pair.role_name.clone()))
                }
            })
            .collect();
        batch.apply("role guard", guard)?;

        let users: Vec<&User> = batch.items().iter().map(|pair| &*pair.user).collect();
        let roles = self.normalized_role_names(batch.items());
        store.remove_from_roles(&users, &roles, &self.cancel).await?;

        let mut users: Vec<&mut User> = batch
            .items_mut()
            .iter_mut()
            .map(|pair| &mut *pair.user)
            .collect();
        let outcomes = self.update_internal(&mut users).await?;
        batch.apply("update users", outcomes)?;

        let results = batch.into_results();
        record_results("remove_from_roles", &results);
        Ok(results)
    }

    /// Role names held by each user
    pub async fn get_roles(&self, users: &[&User]) -> Result<Vec<Vec<String>>, DomainError> {
        self.ensure_active()?;

        let roles = self.role_store()?.roles(users, &self.cancel).await?;
        DomainError::ensure_aligned("get roles", users.len(), roles.len())?;
        Ok(roles)
    }

    /// Members of each named role
    pub async fn get_users_in_roles(
        &self,
        role_names: &[&str],
    ) -> Result<Vec<Vec<User>>, DomainError> {
        self.ensure_active()?;

        let normalized: Vec<String> = role_names
            .iter()
            .map(|name| self.normalize_name(name))
            .collect();
        let members = self
            .role_store()?
            .users_in_roles(&normalized, &self.cancel)
            .await?;
        DomainError::ensure_aligned("get users in roles", role_names.len(), members.len())?;
        Ok(members)
    }

    fn normalized_role_names(&self, pairs: &[UserRoleName<'_>]) -> Vec<String> {
        pairs
            .iter()
            .map(|pair| self.normalize_name(&pair.role_name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn github(key: &str) -> UserLoginInfo {
        UserLoginInfo::new("github", key, Some("GitHub".to_string()))
    }

    #[tokio::test]
    async fn test_add_logins_rejects_bound_and_repeated_keys() {
        let (manager, store) = manager();
        let mut users = created(&manager, &["alice", "bob", "carol"]).await;
        let [alice, bob, carol] = &mut users[..] else {
            unreachable!()
        };

        let results = manager
            .add_logins(vec![UserLogin::new(alice, github("k1"))])
            .await
            .unwrap();
        assert!(results[0].succeeded());

        let results = manager
            .add_logins(vec![
                UserLogin::new(alice, github("k1")),
                UserLogin::new(bob, github("k2")),
                UserLogin::new(carol, github("k2")),
            ])
            .await
            .unwrap();

        assert_eq!(results[0].errors(), &[IdentityError::LoginAlreadyAssociated]);
        assert!(results[1].succeeded());
        assert_eq!(results[2].errors(), &[IdentityError::LoginAlreadyAssociated]);
        assert_eq!(store.login_count().await, 2);

        let owners = manager
            .find_by_logins(&[
                LoginKey::new("github", "k2"),
                LoginKey::new("github", "k1"),
                LoginKey::new("github", "missing"),
            ])
            .await
            .unwrap();
        assert_eq!(owners[0].as_ref(), Some(&users[1]));
        assert_eq!(owners[1].as_ref(), Some(&users[0]));
        assert!(owners[2].is_none());
    }

    #[tokio::test]
    async fn test_login_of_user_failing_validation_is_not_written() {
        let (manager, store) = manager();
        let mut users = created(&manager, &["alice"]).await;
        users[0].set_user_name(Some("not valid".to_string()));

        let results = manager
            .add_logins(vec![UserLogin::new(&mut users[0], github("k1"))])
            .await
            .unwrap();

        assert!(matches!(
            results[0].errors(),
            [IdentityError::InvalidUserName(_)]
        ));
        assert_eq!(store.login_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_logins_refreshes_stamp() {
        let (manager, store) = manager();
        let mut users = created(&manager, &["alice"]).await;

        manager
            .add_logins(vec![UserLogin::new(&mut users[0], github("k1"))])
            .await
            .unwrap();
        let stamp = users[0].security_stamp().map(str::to_owned);

        let results = manager
            .remove_logins(vec![
                UserLoginKey::new(&mut users[0], LoginKey::new("github", "k1")),
            ])
            .await
            .unwrap();

        assert!(results[0].succeeded());
        assert_ne!(users[0].security_stamp().map(str::to_owned), stamp);
        assert_eq!(store.login_count().await, 0);
        let logins = manager.get_logins(&[&users[0]]).await.unwrap();
        assert!(logins[0].is_empty());
    }

    #[tokio::test]
    async fn test_add_to_roles_guards_membership() {
        let (manager, _) = manager();
        let mut users = created(&manager, &["alice", "bob"]).await;
        let [alice, bob] = &mut users[..] else {
            unreachable!()
        };

        manager
            .add_to_roles(vec![UserRoleName::new(alice, "editor")])
            .await
            .unwrap();

        let results = manager
            .add_to_roles(vec![
                UserRoleName::new(alice, "Editor"),
                UserRoleName::new(bob, "editor"),
            ])
            .await
            .unwrap();

        assert_eq!(
            results[0].errors(),
            &[IdentityError::UserAlreadyInRole("Editor".to_string())]
        );
        assert!(results[1].succeeded());

        let roles = manager.get_roles(&[&users[0], &users[1]]).await.unwrap();
        assert_eq!(roles, vec![vec!["editor".to_string()], vec!["editor".to_string()]]);

        let members = manager
            .get_users_in_roles(&["editor", "admin", "ghost"])
            .await
            .unwrap();
        assert_eq!(members[0].len(), 2);
        assert!(members[1].is_empty());
        assert!(members[2].is_empty());
    }

    /// A missing role fails the whole call instead of the affected items; kept for
    /// compatibility, unlike every other precondition.
    #[tokio::test]
    async fn test_add_to_missing_role_fails_whole_call() {
        let (manager, _) = manager();
        let mut users = created(&manager, &["alice", "bob"]).await;
        let [alice, bob] = &mut users[..] else {
            unreachable!()
        };

        let error = manager
            .add_to_roles(vec![
                UserRoleName::new(alice, "editor"),
                UserRoleName::new(bob, "ghost"),
            ])
            .await
            .unwrap_err();

        match error {
            DomainError::MissingRoles { names } => assert_eq!(names, vec!["GHOST".to_string()]),
            other => panic!("unexpected error: {}", other),
        }

        let roles = manager.get_roles(&[&users[0], &users[1]]).await.unwrap();
        assert_eq!(roles, vec![Vec::<String>::new(), Vec::new()]);

        // nothing staged by the failed call leaks into the next write
        manager.update(&mut [&mut users[0]]).await.unwrap();
        let roles = manager.get_roles(&[&users[0]]).await.unwrap();
        assert!(roles[0].is_empty());
    }

    #[tokio::test]
    async fn test_remove_from_roles_requires_membership() {
        let (manager, _) = manager();
        let mut users = created(&manager, &["alice", "bob"]).await;
        let [alice, bob] = &mut users[..] else {
            unreachable!()
        };

        manager
            .add_to_roles(vec![UserRoleName::new(alice, "admin")])
            .await
            .unwrap();

        let results = manager
            .remove_from_roles(vec![
                UserRoleName::new(alice, "admin"),
                UserRoleName::new(bob, "admin"),
            ])
            .await
            .unwrap();

        assert!(results[0].succeeded());
        assert_eq!(
            results[1].errors(),
            &[IdentityError::UserNotInRole("admin".to_string())]
        );

        let members = manager.get_users_in_roles(&["admin"]).await.unwrap();
        assert!(members[0].is_empty());
    }
}
