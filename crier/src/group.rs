//! Named-subset membership
//!
//! Groups are created on first join and removed as soon as their last member
//! leaves, so every group visible through [`GroupRegistry::exists`] has at
//! least one member. A reverse index from listener to group names keeps
//! "leave every group" proportional to the listener's own memberships.

use std::collections::{HashMap, HashSet};

use crate::listener::ListenerId;

#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: HashMap<String, HashSet<ListenerId>>,
    memberships: HashMap<ListenerId, HashSet<String>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `listener` to `group`, creating the group if absent.
    ///
    /// Returns `false` if the listener was already a member.
    pub fn join(&mut self, group: &str, listener: ListenerId) -> bool {
        let added = self
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(listener);

        if added {
            self.memberships
                .entry(listener)
                .or_default()
                .insert(group.to_string());
        }

        added
    }

    /// Remove `listener` from `group`, dropping the group once it is empty.
    ///
    /// Returns `false` if the group does not exist or the listener was not a member.
    pub fn leave(&mut self, group: &str, listener: ListenerId) -> bool {
        let Some(members) = self.groups.get_mut(group) else {
            return false;
        };

        if !members.remove(&listener) {
            return false;
        }

        if members.is_empty() {
            self.groups.remove(group);
            tracing::debug!(group, "removed empty group");
        }

        if let Some(names) = self.memberships.get_mut(&listener) {
            names.remove(group);
            if names.is_empty() {
                self.memberships.remove(&listener);
            }
        }

        true
    }

    /// Remove `listener` from every group it belongs to.
    ///
    /// Returns the names of the groups it left.
    pub fn leave_all(&mut self, listener: ListenerId) -> Vec<String> {
        let Some(names) = self.memberships.remove(&listener) else {
            return Vec::new();
        };

        let mut left = Vec::with_capacity(names.len());
        for name in names {
            if let Some(members) = self.groups.get_mut(&name) {
                members.remove(&listener);
                if members.is_empty() {
                    self.groups.remove(&name);
                    tracing::debug!(group = %name, "removed empty group");
                }
            }
            left.push(name);
        }

        left
    }

    /// Members of `group`, or `None` if it does not exist.
    pub fn members_of(&self, group: &str) -> Option<&HashSet<ListenerId>> {
        self.groups.get(group)
    }

    pub fn exists(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// Whether `listener` is a member of `group`.
    pub fn contains(&self, group: &str, listener: ListenerId) -> bool {
        self.groups
            .get(group)
            .is_some_and(|members| members.contains(&listener))
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Number of live groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.memberships.clear();
    }
}
