//! Unit-of-work staging shared by the stores.
//!
//! Login and role mutations are queued here and flushed by the next batch write.
//! Every write drains the queue: changes belonging to the users it writes are
//! committed, the rest are dropped.

use std::collections::HashSet;

use tokio::sync::Mutex;

use crate::domain::identity::{LoginKey, RoleId, UserId, UserLoginInfo};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StagedChange {
    AddLogin { user_id: UserId, info: UserLoginInfo },
    RemoveLogin { user_id: UserId, key: LoginKey },
    AddRole { user_id: UserId, role_id: RoleId },
    RemoveRole { user_id: UserId, role_id: RoleId },
}

impl StagedChange {
    pub(crate) fn user_id(&self) -> &UserId {
        match self {
            Self::AddLogin { user_id, .. }
            | Self::RemoveLogin { user_id, .. }
            | Self::AddRole { user_id, .. }
            | Self::RemoveRole { user_id, .. } => user_id,
        }
    }
}

/// Staged changes split by kind, in staging order
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    pub added_logins: Vec<(UserId, UserLoginInfo)>,
    pub removed_logins: Vec<(UserId, LoginKey)>,
    pub added_roles: Vec<(UserId, RoleId)>,
    pub removed_roles: Vec<(UserId, RoleId)>,
}

impl ChangeSet {
    pub(crate) fn is_empty(&self) -> bool {
        self.added_logins.is_empty()
            && self.removed_logins.is_empty()
            && self.added_roles.is_empty()
            && self.removed_roles.is_empty()
    }
}

impl FromIterator<StagedChange> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = StagedChange>>(iter: I) -> Self {
        let mut set = ChangeSet::default();
        for change in iter {
            match change {
                StagedChange::AddLogin { user_id, info } => set.added_logins.push((user_id, info)),
                StagedChange::RemoveLogin { user_id, key } => {
                    set.removed_logins.push((user_id, key))
                }
                StagedChange::AddRole { user_id, role_id } => {
                    set.added_roles.push((user_id, role_id))
                }
                StagedChange::RemoveRole { user_id, role_id } => {
                    set.removed_roles.push((user_id, role_id))
                }
            }
        }
        set
    }
}

#[derive(Debug, Default)]
pub(crate) struct StagingArea {
    changes: Mutex<Vec<StagedChange>>,
}

impl StagingArea {
    pub(crate) async fn stage(&self, changes: impl IntoIterator<Item = StagedChange>) {
        self.changes.lock().await.extend(changes);
    }

    /// Drain the queue, keeping the changes of the written users
    pub(crate) async fn drain_for(&self, written: &HashSet<UserId>) -> ChangeSet {
        let changes = std::mem::take(&mut *self.changes.lock().await);
        changes
            .into_iter()
            .filter(|change| written.contains(change.user_id()))
            .collect()
    }

    pub(crate) async fn clear(&self) {
        self.changes.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_keeps_only_written_users() {
        let staging = StagingArea::default();
        let alice = UserId::new("alice").unwrap();
        let bob = UserId::new("bob").unwrap();

        staging
            .stage([
                StagedChange::AddRole {
                    user_id: alice.clone(),
                    role_id: RoleId::new("r1"),
                },
                StagedChange::AddLogin {
                    user_id: bob.clone(),
                    info: UserLoginInfo::new("github", "1", None),
                },
                StagedChange::RemoveLogin {
                    user_id: alice.clone(),
                    key: LoginKey::new("github", "2"),
                },
            ])
            .await;

        let written: HashSet<UserId> = [alice.clone()].into_iter().collect();
        let set = staging.drain_for(&written).await;

        assert_eq!(set.added_roles, vec![(alice.clone(), RoleId::new("r1"))]);
        assert_eq!(set.removed_logins, vec![(alice, LoginKey::new("github", "2"))]);
        assert!(set.added_logins.is_empty());

        let empty = staging.drain_for(&[bob].into_iter().collect()).await;
        assert!(empty.is_empty());
    }
}
