//! Claims and their subdivisions.
//!
//! A top-level claim owns its subdivisions outright (`children`); a
//! subdivision only remembers its parent's identifier. Nesting stops at one
//! level.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::boundary::Boundary;

pub type ClaimId = i64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("corners are in different worlds ({0} and {1})")]
    WorldMismatch(String, String),
    #[error("subdivisions cannot own subdivisions")]
    NestedSubdivision,
    #[error("subdivision lies in world {child}, parent claim is in {parent}")]
    SubdivisionWorld { parent: String, child: String },
}

/// Trust levels a claim can hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimPermission {
    Build,
    Inventory,
    Access,
    Manage,
}

/// The four permission lists, in the order they are persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionLists {
    pub builders: Vec<String>,
    pub containers: Vec<String>,
    pub accessors: Vec<String>,
    pub managers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Claim {
    pub id: Option<ClaimId>,
    lesser: Boundary,
    greater: Boundary,
    /// Empty for administrative claims.
    pub owner_name: String,
    builders: BTreeSet<String>,
    containers: BTreeSet<String>,
    accessors: BTreeSet<String>,
    managers: BTreeSet<String>,
    /// Identifier of the owning top-level claim. `None` both for top-level
    /// claims and for subdivisions whose parent has not been saved yet.
    pub parent: Option<ClaimId>,
    subdivision: bool,
    pub children: Vec<Claim>,
    pub never_delete: bool,
    pub modified_date: DateTime<Utc>,
    /// Set once the claim is registered in a backend's claim index.
    pub in_data_store: bool,
}

impl Claim {
    /// Build a claim from two opposite corners. The corners are normalized so
    /// `lesser` holds the minimum of each axis.
    pub fn new(a: Boundary, b: Boundary, owner_name: impl Into<String>) -> Result<Self, ClaimError> {
        if a.world != b.world {
            return Err(ClaimError::WorldMismatch(a.world, b.world));
        }
        let lesser = Boundary::new(a.world.clone(), a.x.min(b.x), a.y.min(b.y), a.z.min(b.z));
        let greater = Boundary::new(a.world, a.x.max(b.x), a.y.max(b.y), a.z.max(b.z));

        Ok(Self {
            id: None,
            lesser,
            greater,
            owner_name: owner_name.into(),
            builders: BTreeSet::new(),
            containers: BTreeSet::new(),
            accessors: BTreeSet::new(),
            managers: BTreeSet::new(),
            parent: None,
            subdivision: false,
            children: Vec::new(),
            never_delete: false,
            modified_date: Utc::now(),
            in_data_store: false,
        })
    }

    pub fn with_id(mut self, id: ClaimId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn lesser_corner(&self) -> &Boundary {
        &self.lesser
    }

    pub fn greater_corner(&self) -> &Boundary {
        &self.greater
    }

    pub fn world(&self) -> &str {
        &self.lesser.world
    }

    pub fn is_admin_claim(&self) -> bool {
        self.owner_name.is_empty()
    }

    pub fn is_subdivision(&self) -> bool {
        self.subdivision
    }

    /// Whether the point lies inside this claim's box. With `ignore_height`
    /// the claim extends over the whole build height.
    pub fn contains(&self, point: &Boundary, ignore_height: bool) -> bool {
        point.world == self.lesser.world
            && (self.lesser.x..=self.greater.x).contains(&point.x)
            && (self.lesser.z..=self.greater.z).contains(&point.z)
            && (ignore_height || (self.lesser.y..=self.greater.y).contains(&point.y))
    }

    /// Whether the two boxes share any column, ignoring height.
    pub fn overlaps(&self, other: &Claim) -> bool {
        self.world() == other.world()
            && self.lesser.x <= other.greater.x
            && other.lesser.x <= self.greater.x
            && self.lesser.z <= other.greater.z
            && other.lesser.z <= self.greater.z
    }

    /// Whether `other` lies entirely within this claim's columns.
    pub fn encloses(&self, other: &Claim) -> bool {
        self.contains(other.lesser_corner(), true) && self.contains(other.greater_corner(), true)
    }

    pub fn set_permission(&mut self, player: impl Into<String>, permission: ClaimPermission) {
        let player = player.into();
        self.drop_permission(&player);
        self.permission_set_mut(permission).insert(player);
    }

    pub fn drop_permission(&mut self, player: &str) {
        self.builders.remove(player);
        self.containers.remove(player);
        self.accessors.remove(player);
        self.managers.remove(player);
    }

    /// Add a manager without touching the other lists. Managers may also hold
    /// one of the other trust levels.
    pub fn add_manager(&mut self, player: impl Into<String>) {
        self.managers.insert(player.into());
    }

    pub fn has_permission(&self, player: &str, permission: ClaimPermission) -> bool {
        match permission {
            ClaimPermission::Build => self.builders.contains(player),
            ClaimPermission::Inventory => self.containers.contains(player),
            ClaimPermission::Access => self.accessors.contains(player),
            ClaimPermission::Manage => self.managers.contains(player),
        }
    }

    fn permission_set_mut(&mut self, permission: ClaimPermission) -> &mut BTreeSet<String> {
        match permission {
            ClaimPermission::Build => &mut self.builders,
            ClaimPermission::Inventory => &mut self.containers,
            ClaimPermission::Access => &mut self.accessors,
            ClaimPermission::Manage => &mut self.managers,
        }
    }

    /// Snapshot of all four lists, sorted.
    pub fn permissions(&self) -> PermissionLists {
        PermissionLists {
            builders: self.builders.iter().cloned().collect(),
            containers: self.containers.iter().cloned().collect(),
            accessors: self.accessors.iter().cloned().collect(),
            managers: self.managers.iter().cloned().collect(),
        }
    }

    /// Replace all four lists. Blank entries are dropped.
    pub fn set_permissions(&mut self, lists: PermissionLists) {
        fn collect(names: Vec<String>) -> BTreeSet<String> {
            names
                .into_iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect()
        }
        self.builders = collect(lists.builders);
        self.containers = collect(lists.containers);
        self.accessors = collect(lists.accessors);
        self.managers = collect(lists.managers);
    }

    /// Attach a subdivision. Containment inside this claim's box is the
    /// caller's business.
    pub fn add_subdivision(&mut self, mut child: Claim) -> Result<&mut Claim, ClaimError> {
        if self.subdivision || !child.children.is_empty() {
            return Err(ClaimError::NestedSubdivision);
        }
        if child.world() != self.world() {
            return Err(ClaimError::SubdivisionWorld {
                parent: self.world().to_string(),
                child: child.world().to_string(),
            });
        }
        child.parent = self.id;
        child.subdivision = true;
        self.children.push(child);
        let last = self.children.len() - 1;
        Ok(&mut self.children[last])
    }

    /// Point every child back at this claim's current identifier.
    pub fn relink_children(&mut self) {
        for child in &mut self.children {
            child.parent = self.id;
        }
    }

    /// Position of a subdivision in the children list.
    pub fn child_index(&self, id: ClaimId) -> Option<usize> {
        self.children.iter().position(|c| c.id == Some(id))
    }
}
