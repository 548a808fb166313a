//! Per-player claim block accounting.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerData {
    pub player_name: String,
    /// `None` until the record is first written; the write stamps "now".
    pub last_login: Option<DateTime<Utc>>,
    pub accrued_claim_blocks: i32,
    pub bonus_claim_blocks: i32,
    pub clear_inventory_on_join: bool,
}

impl PlayerData {
    pub fn new(player_name: impl Into<String>) -> Self {
        Self {
            player_name: player_name.into(),
            ..Self::default()
        }
    }

    /// Blocks available from this record alone, before group bonuses.
    pub fn own_claim_blocks(&self) -> i32 {
        self.accrued_claim_blocks.saturating_add(self.bonus_claim_blocks)
    }
}

/// Ledger keys are lower-cased player names.
pub fn ledger_key(player_name: &str) -> String {
    player_name.to_lowercase()
}

/// Cache of player records already pulled from a backend.
#[derive(Debug, Default)]
pub struct PlayerLedger {
    entries: HashMap<String, PlayerData>,
}

impl PlayerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, player_name: &str) -> Option<&PlayerData> {
        self.entries.get(&ledger_key(player_name))
    }

    pub fn get_mut(&mut self, player_name: &str) -> Option<&mut PlayerData> {
        self.entries.get_mut(&ledger_key(player_name))
    }

    pub fn insert(&mut self, player_name: &str, data: PlayerData) -> &mut PlayerData {
        let slot = self.entries.entry(ledger_key(player_name)).or_default();
        *slot = data;
        slot
    }

    /// Cached record for the player, filled from `load` on a miss.
    pub fn get_or_insert_with(
        &mut self,
        player_name: &str,
        load: impl FnOnce() -> PlayerData,
    ) -> &mut PlayerData {
        self.entries.entry(ledger_key(player_name)).or_insert_with(load)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn remove(&mut self, player_name: &str) -> Option<PlayerData> {
        self.entries.remove(&ledger_key(player_name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
