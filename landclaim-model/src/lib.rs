//! Land claim model: boundaries, claims and their subdivisions, the claim
//! index, player accounting and group bonuses.

pub mod boundary;
pub mod claim;
pub mod group;
pub mod host;
pub mod index;
pub mod player;

pub use boundary::{Boundary, BoundaryError};
pub use claim::{Claim, ClaimError, ClaimId, ClaimPermission, PermissionLists};
pub use group::GroupBonusTable;
pub use host::{AllWorlds, Collaborators, PermissionOracle, StaticPermissions, StaticWorlds, WorldRegistry};
pub use index::{Admission, ClaimIndex};
pub use player::{PlayerData, PlayerLedger};
