//! Bonus claim blocks granted to everyone holding a permission.

use std::collections::BTreeMap;

use crate::host::PermissionOracle;

/// Group name (a permission string) to bonus blocks.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GroupBonusTable {
    groups: BTreeMap<String, i32>,
}

impl GroupBonusTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, group: impl Into<String>, amount: i32) {
        self.groups.insert(group.into(), amount);
    }

    pub fn get(&self, group: &str) -> Option<i32> {
        self.groups.get(group).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.groups.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Sum of the bonuses of every group the player holds right now.
    pub fn total_for(&self, player: &str, permissions: &dyn PermissionOracle) -> i32 {
        self.groups
            .iter()
            .filter(|(group, _)| permissions.has_permission(player, group))
            .fold(0i32, |acc, (_, amount)| acc.saturating_add(*amount))
    }
}

impl FromIterator<(String, i32)> for GroupBonusTable {
    fn from_iter<T: IntoIterator<Item = (String, i32)>>(iter: T) -> Self {
        Self {
            groups: iter.into_iter().collect(),
        }
    }
}
