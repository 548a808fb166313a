//! The data store the rest of the server talks to: one backend, the index of
//! loaded claims and a cache of player records.

use anyhow::{Context, Result};
use landclaim_model::{Boundary, Claim, ClaimId, ClaimIndex, PlayerData, PlayerLedger};

use crate::ClaimBackend;

pub struct DataStore {
    backend: Box<dyn ClaimBackend>,
    claims: ClaimIndex,
    players: PlayerLedger,
}

impl DataStore {
    pub fn new(backend: Box<dyn ClaimBackend>) -> Self {
        Self {
            backend,
            claims: ClaimIndex::new(),
            players: PlayerLedger::new(),
        }
    }

    pub fn backend(&self) -> &dyn ClaimBackend {
        self.backend.as_ref()
    }

    pub fn claims(&self) -> &ClaimIndex {
        &self.claims
    }

    /// Load a world's claims into the index. Safe to call again for a world
    /// that is already loaded.
    pub fn world_loaded(&mut self, world: &str) -> usize {
        let loaded = self.backend.world_loaded(world, &mut self.claims);
        log::info!("Loaded {} claims in world {}", loaded, world);
        loaded
    }

    /// Create, persist and index a new top-level claim.
    pub fn create_claim(&mut self, a: Boundary, b: Boundary, owner: &str) -> Result<ClaimId> {
        let mut claim = Claim::new(a, b, owner)?;
        if let Some(existing) = self.claims.in_world(claim.world()).find(|c| c.overlaps(&claim)) {
            anyhow::bail!(
                "Claim at {} would overlap claim {:?}",
                claim.lesser_corner(),
                existing.id
            );
        }

        self.backend.write_claim_to_storage(&mut claim);
        let id = claim
            .id
            .with_context(|| format!("No id assigned to claim at {}", claim.lesser_corner()))?;
        self.claims.insert(claim);
        Ok(id)
    }

    /// Carve a subdivision out of an indexed top-level claim. Returns the
    /// subdivision's id.
    pub fn create_subdivision(&mut self, parent: ClaimId, a: Boundary, b: Boundary) -> Result<ClaimId> {
        let claim = self
            .claims
            .get_mut(parent)
            .with_context(|| format!("Claim {} is not loaded", parent))?;
        let child = Claim::new(a, b, claim.owner_name.clone())?;
        if !claim.encloses(&child) {
            anyhow::bail!("Subdivision at {} leaves claim {}", child.lesser_corner(), parent);
        }
        if claim.children.iter().any(|c| c.overlaps(&child)) {
            anyhow::bail!("Subdivision at {} overlaps another subdivision", child.lesser_corner());
        }

        claim.add_subdivision(child)?;
        self.backend.write_claim_to_storage(claim);
        let child = claim
            .children
            .last_mut()
            .with_context(|| format!("Subdivision of claim {} vanished", parent))?;
        child.in_data_store = true;
        child
            .id
            .with_context(|| format!("No id assigned to subdivision of claim {}", parent))
    }

    /// Persist an indexed claim after it was changed through
    /// [`claim_mut`](Self::claim_mut).
    pub fn save_claim(&mut self, id: ClaimId) -> Result<()> {
        let claim = self
            .claims
            .get_mut(id)
            .with_context(|| format!("Claim {} is not loaded", id))?;
        self.backend.write_claim_to_storage(claim);
        Ok(())
    }

    pub fn claim_mut(&mut self, id: ClaimId) -> Option<&mut Claim> {
        self.claims.get_mut(id)
    }

    /// Drop a top-level claim from the index and from storage.
    pub fn delete_claim(&mut self, id: ClaimId) -> Option<Claim> {
        let claim = self.claims.remove(id)?;
        self.backend.delete_claim_from_secondary_storage(&claim);
        Some(claim)
    }

    /// Remove one subdivision from its parent claim and from storage.
    pub fn delete_subdivision(&mut self, parent: ClaimId, id: ClaimId) -> Option<Claim> {
        let claim = self.claims.get_mut(parent)?;
        let pos = claim.child_index(id)?;
        let child = claim.children.remove(pos);
        self.backend.delete_claim_from_secondary_storage(&child);
        Some(child)
    }

    /// Cached player record, pulled from the backend on first use.
    pub fn player_data(&mut self, player_name: &str) -> &mut PlayerData {
        let backend = &self.backend;
        self.players
            .get_or_insert_with(player_name, || backend.get_player_data_from_storage(player_name))
    }

    /// Write the cached record for the player, if any.
    pub fn save_player_data(&mut self, player_name: &str) {
        if let Some(data) = self.players.get_mut(player_name) {
            self.backend.save_player_data(player_name, data);
        }
    }

    /// Accrued plus bonus blocks plus whatever the player's groups grant.
    pub fn total_claim_blocks(&mut self, player_name: &str) -> i32 {
        let own = self.player_data(player_name).own_claim_blocks();
        own.saturating_add(self.backend.group_bonus_blocks(player_name))
    }

    /// Flush cached player records and close the backend.
    pub fn close(mut self) -> Result<()> {
        let names: Vec<String> = self.players.keys().map(str::to_string).collect();
        for name in names {
            self.save_player_data(&name);
        }
        self.backend.close()
    }
}
