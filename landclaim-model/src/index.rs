//! In-memory index of loaded top-level claims.

use crate::boundary::Boundary;
use crate::claim::{Claim, ClaimId};

/// Outcome of offering a freshly read claim to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Indexed,
    /// A claim with the same identifier is already indexed; the candidate is
    /// dropped and storage is left alone.
    AlreadyIndexed,
    /// Another claim already covers the candidate's lesser corner. The
    /// candidate loses and should be purged from storage.
    Conflict { winner: Option<ClaimId> },
}

#[derive(Debug, Default, Clone)]
pub struct ClaimIndex {
    claims: Vec<Claim>,
}

impl ClaimIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Claim> {
        self.claims.iter()
    }

    pub fn in_world<'a>(&'a self, world: &'a str) -> impl Iterator<Item = &'a Claim> + 'a {
        self.claims.iter().filter(move |c| c.world() == world)
    }

    pub fn contains_id(&self, id: ClaimId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: ClaimId) -> Option<&Claim> {
        self.claims.iter().find(|c| c.id == Some(id))
    }

    pub fn get_mut(&mut self, id: ClaimId) -> Option<&mut Claim> {
        self.claims.iter_mut().find(|c| c.id == Some(id))
    }

    /// Top-level claim covering the point, if any.
    pub fn claim_at(&self, point: &Boundary, ignore_height: bool) -> Option<&Claim> {
        self.claims.iter().find(|c| c.contains(point, ignore_height))
    }

    /// Index a top-level claim read from storage unless it is already present
    /// or collides with an indexed claim. The first claim indexed wins.
    pub fn admit(&mut self, mut claim: Claim) -> Admission {
        if let Some(id) = claim.id {
            if self.contains_id(id) {
                return Admission::AlreadyIndexed;
            }
        }

        if let Some(existing) = self.claim_at(claim.lesser_corner(), true) {
            return Admission::Conflict { winner: existing.id };
        }

        claim.in_data_store = true;
        for child in &mut claim.children {
            child.in_data_store = true;
        }
        self.claims.push(claim);
        Admission::Indexed
    }

    /// Insert without the overlap check, replacing any claim with the same id.
    pub fn insert(&mut self, mut claim: Claim) {
        if let Some(id) = claim.id {
            self.remove(id);
        }
        claim.in_data_store = true;
        for child in &mut claim.children {
            child.in_data_store = true;
        }
        self.claims.push(claim);
    }

    pub fn remove(&mut self, id: ClaimId) -> Option<Claim> {
        let pos = self.claims.iter().position(|c| c.id == Some(id))?;
        let mut claim = self.claims.remove(pos);
        claim.in_data_store = false;
        Some(claim)
    }
}
