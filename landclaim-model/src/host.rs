//! Hooks into the hosting game server.
//!
//! Storage code never reaches for process-wide state; whatever it needs from
//! the host is handed to it through these traits.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Answers "does player X currently hold permission Y". Must be free of side
/// effects; it is called while backend locks are held.
pub trait PermissionOracle: Send + Sync {
    fn has_permission(&self, player: &str, permission: &str) -> bool;
}

/// Tells the boundary codec which worlds are loaded.
pub trait WorldRegistry: Send + Sync {
    fn is_world_loaded(&self, world: &str) -> bool;
}

/// Everything a backend borrows from the host.
#[derive(Clone)]
pub struct Collaborators {
    pub permissions: Arc<dyn PermissionOracle>,
    pub worlds: Arc<dyn WorldRegistry>,
}

impl Collaborators {
    pub fn new(permissions: Arc<dyn PermissionOracle>, worlds: Arc<dyn WorldRegistry>) -> Self {
        Self {
            permissions,
            worlds,
        }
    }
}

/// Treats every world as loaded. Used by offline tooling.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllWorlds;

impl WorldRegistry for AllWorlds {
    fn is_world_loaded(&self, _world: &str) -> bool {
        true
    }
}

/// A fixed set of loaded worlds.
#[derive(Debug, Default, Clone)]
pub struct StaticWorlds {
    loaded: HashSet<String>,
}

impl StaticWorlds {
    pub fn new<I, S>(worlds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            loaded: worlds.into_iter().map(Into::into).collect(),
        }
    }
}

impl WorldRegistry for StaticWorlds {
    fn is_world_loaded(&self, world: &str) -> bool {
        self.loaded.contains(world)
    }
}

/// Permission grants held in memory, keyed by lower-cased player name.
#[derive(Debug, Default, Clone)]
pub struct StaticPermissions {
    grants: HashMap<String, HashSet<String>>,
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, player: &str, permission: impl Into<String>) {
        self.grants
            .entry(player.to_lowercase())
            .or_default()
            .insert(permission.into());
    }

    pub fn with_grant(mut self, player: &str, permission: impl Into<String>) -> Self {
        self.grant(player, permission);
        self
    }
}

impl PermissionOracle for StaticPermissions {
    fn has_permission(&self, player: &str, permission: &str) -> bool {
        self.grants
            .get(&player.to_lowercase())
            .is_some_and(|perms| perms.contains(permission))
    }
}
