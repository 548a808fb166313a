//! File backend: three JSON documents in one data folder.
//!
//! - `claims.json` - claim nodes keyed by id; subdivisions are separate nodes
//!   referenced from their parent's `Children` list and carry a `Parent`
//!   marker
//! - `players.json` - player records keyed by lower-cased name
//! - `server.json` - `NextClaimId` and the `GroupBonusBlocks` table
//!
//! Documents are held in memory and each one is rewritten wholesale after
//! every change to it.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use landclaim_model::{
    Admission, Boundary, Claim, ClaimId, ClaimIndex, Collaborators, GroupBonusTable,
    PermissionLists, PlayerData, WorldRegistry,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{self, ConfigSection};
use crate::{lock, log_skipped, ClaimBackend, RecordError};

const CLAIM_FILENAME: &str = "claims.json";
const PLAYER_FILENAME: &str = "players.json";
const SERVER_FILENAME: &str = "server.json";
const DEFAULT_DATA_FOLDER: &str = "data";

/// Format of `LastLogin`, in server local time.
pub const DATE_FORMAT: &str = "%Y.%m.%d.%H.%M.%S";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ClaimNode {
    lesser_boundary: String,
    greater_boundary: String,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    builders: Vec<String>,
    #[serde(default)]
    containers: Vec<String>,
    #[serde(default)]
    accessors: Vec<String>,
    #[serde(default)]
    managers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<ClaimId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<ClaimId>,
    #[serde(default)]
    never_delete: bool,
    #[serde(default)]
    last_modified: i64,
}

impl ClaimNode {
    fn from_claim(claim: &Claim, children: Vec<ClaimId>) -> Self {
        let perms = claim.permissions();
        Self {
            lesser_boundary: claim.lesser_corner().to_token(),
            greater_boundary: claim.greater_corner().to_token(),
            owner: claim.owner_name.clone(),
            builders: perms.builders,
            containers: perms.containers,
            accessors: perms.accessors,
            managers: perms.managers,
            children,
            parent: if claim.is_subdivision() { claim.parent } else { None },
            never_delete: claim.never_delete,
            last_modified: claim.modified_date.timestamp_millis(),
        }
    }

    fn to_claim(&self, id: ClaimId, worlds: &dyn WorldRegistry) -> Result<Claim, RecordError> {
        let lesser = Boundary::from_token(&self.lesser_boundary, worlds)?;
        let greater = Boundary::from_token(&self.greater_boundary, worlds)?;
        let mut claim = Claim::new(lesser, greater, self.owner.clone())?.with_id(id);
        claim.set_permissions(PermissionLists {
            builders: self.builders.clone(),
            containers: self.containers.clone(),
            accessors: self.accessors.clone(),
            managers: self.managers.clone(),
        });
        claim.never_delete = self.never_delete;
        if let Some(modified) = DateTime::from_timestamp_millis(self.last_modified) {
            claim.modified_date = modified;
        }
        Ok(claim)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PlayerNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_login: Option<String>,
    #[serde(default)]
    accrued_blocks: i32,
    #[serde(default)]
    bonus_blocks: i32,
    #[serde(default)]
    clear_inventory_on_join: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServerNode {
    #[serde(default)]
    next_claim_id: ClaimId,
    #[serde(default)]
    group_bonus_blocks: BTreeMap<String, i32>,
}

pub fn format_login(when: &DateTime<Utc>) -> String {
    when.with_timezone(&Local).format(DATE_FORMAT).to_string()
}

pub fn parse_login(text: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(text, DATE_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

struct FileState {
    claims: BTreeMap<String, Value>,
    players: BTreeMap<String, Value>,
    server: ServerNode,
    groups: GroupBonusTable,
}

pub struct FileBackend {
    folder: PathBuf,
    collaborators: Collaborators,
    state: Mutex<FileState>,
}

impl FileBackend {
    /// Open (or create) the data folder named by `DataFolder` and load all
    /// three documents. A document that exists but cannot be parsed is fatal.
    pub fn open(
        source: &ConfigSection,
        target: &mut ConfigSection,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let folder = PathBuf::from(source.get_str(config::DATA_FOLDER, DEFAULT_DATA_FOLDER));
        target.set(config::DATA_FOLDER, folder.display().to_string());

        std::fs::create_dir_all(&folder)
            .with_context(|| format!("Failed to create data folder {}", folder.display()))
            .inspect_err(|e| log::error!("File storage unavailable: {:#}", e))?;

        let claims: BTreeMap<String, Value> = read_document(&folder.join(CLAIM_FILENAME))?;
        let players: BTreeMap<String, Value> = read_document(&folder.join(PLAYER_FILENAME))?;
        let server: ServerNode = read_document(&folder.join(SERVER_FILENAME))?;

        let groups: GroupBonusTable = server
            .group_bonus_blocks
            .iter()
            .map(|(name, amount)| (name.clone(), *amount))
            .collect();

        log::info!(
            "File storage opened at {} ({} claim records, {} players, next claim id {})",
            folder.display(),
            claims.len(),
            players.len(),
            server.next_claim_id
        );

        Ok(Self {
            folder,
            collaborators,
            state: Mutex::new(FileState {
                claims,
                players,
                server,
                groups,
            }),
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn path(&self, name: &str) -> PathBuf {
        self.folder.join(name)
    }

    fn save_claims(&self, state: &FileState) -> Result<()> {
        write_document(&self.path(CLAIM_FILENAME), &state.claims)
    }

    fn save_players(&self, state: &FileState) -> Result<()> {
        write_document(&self.path(PLAYER_FILENAME), &state.players)
    }

    fn save_server(&self, state: &FileState) -> Result<()> {
        write_document(&self.path(SERVER_FILENAME), &state.server)
    }

    fn save_all(&self, state: &FileState) -> Result<()> {
        self.save_claims(state)?;
        self.save_players(state)?;
        self.save_server(state)
    }

    fn flush(&self, what: &str, result: Result<()>) {
        if let Err(e) = result {
            log::error!("Failed to save {}: {:#}", what, e);
        }
    }
}

impl FileState {
    fn node(&self, id: ClaimId) -> Result<ClaimNode, RecordError> {
        let value = self.claims.get(&id.to_string()).ok_or(RecordError::Missing(id))?;
        serde_json::from_value(value.clone())
            .map_err(|e| RecordError::Malformed(format!("claim {}: {}", id, e)))
    }

    /// Read a top-level claim and attach its subdivisions. Children that fail
    /// to load are dropped; a child list that repeats an id or points back at
    /// the claim rejects the whole claim.
    fn read_claim(&self, id: ClaimId, worlds: &dyn WorldRegistry) -> Result<Claim, RecordError> {
        let node = self.node(id)?;
        let mut claim = node.to_claim(id, worlds)?;

        let mut visited = HashSet::from([id]);
        for &child_id in &node.children {
            if !visited.insert(child_id) {
                return Err(RecordError::Cycle { claim: id, child: child_id });
            }
        }

        for &child_id in &node.children {
            let child = match self.node(child_id) {
                Ok(child_node) if child_node.children.contains(&id) => {
                    return Err(RecordError::Cycle { claim: id, child: child_id });
                }
                Ok(child_node) => {
                    if !child_node.children.is_empty() {
                        log::warn!(
                            "Subdivision {} of claim {} lists children of its own; ignoring them",
                            child_id,
                            id
                        );
                    }
                    child_node.to_claim(child_id, worlds)
                }
                Err(e) => Err(e),
            };
            match child {
                Ok(child) => {
                    if let Err(e) = claim.add_subdivision(child) {
                        log_skipped(&format!("subdivision {} of claim {}", child_id, id), &e.into());
                    }
                }
                Err(e) => log_skipped(&format!("subdivision {} of claim {}", child_id, id), &e),
            }
        }

        Ok(claim)
    }

    /// Ids of top-level records whose greater corner lies in `world`, oldest
    /// first.
    fn top_level_ids(&self, world: &str) -> Vec<ClaimId> {
        let mut ids: Vec<ClaimId> = self
            .claims
            .iter()
            .filter_map(|(key, value)| {
                let Ok(id) = key.parse::<ClaimId>() else {
                    log::warn!("Ignoring claim record with non-numeric key {:?}", key);
                    return None;
                };
                let greater = value.get("GreaterBoundary")?.as_str()?;
                let is_subdivision = value.get("Parent").is_some_and(|p| !p.is_null());
                (Boundary::world_of(greater) == Some(world) && !is_subdivision).then_some(id)
            })
            .collect();
        ids.sort_unstable();
        ids
    }

    fn allocate_id(&mut self) -> ClaimId {
        let id = self.server.next_claim_id;
        self.server.next_claim_id += 1;
        id
    }

    /// Store the claim's node and, first, its children's. Returns whether a
    /// new id was drawn from the counter.
    fn put_claim(&mut self, claim: &mut Claim) -> Result<bool> {
        let mut allocated = false;
        match claim.id {
            None => {
                claim.id = Some(self.allocate_id());
                allocated = true;
            }
            // Claims and subdivisions share one keyspace here.
            Some(id) if id >= self.server.next_claim_id => {
                self.server.next_claim_id = id + 1;
                allocated = true;
            }
            Some(_) => {}
        }
        let id = claim.id.context("claim id missing after allocation")?;
        claim.modified_date = Utc::now();
        claim.relink_children();

        let mut child_ids = Vec::with_capacity(claim.children.len());
        for child in &mut claim.children {
            allocated |= self.put_claim(child)?;
            if let Some(child_id) = child.id {
                child_ids.push(child_id);
            }
        }

        // Subdivisions dropped since the last write would otherwise linger.
        if let Ok(previous) = self.node(id) {
            for stale in previous.children.iter().filter(|c| !child_ids.contains(c)) {
                self.claims.remove(&stale.to_string());
            }
        }

        let node = ClaimNode::from_claim(claim, child_ids);
        self.claims.insert(id.to_string(), serde_json::to_value(node)?);
        Ok(allocated)
    }

    fn remove_claim(&mut self, id: ClaimId, children: impl IntoIterator<Item = ClaimId>) {
        let stored_children = self.node(id).map(|n| n.children).unwrap_or_default();
        for child in stored_children.into_iter().chain(children) {
            self.claims.remove(&child.to_string());
        }
        self.claims.remove(&id.to_string());
    }

    /// Drop `child` from the parent node's `Children` list.
    fn unlink_child(&mut self, parent: ClaimId, child: ClaimId) {
        let Some(Value::Object(node)) = self.claims.get_mut(&parent.to_string()) else {
            return;
        };
        let now_empty = match node.get_mut("Children") {
            Some(Value::Array(children)) => {
                children.retain(|c| c.as_i64() != Some(child));
                children.is_empty()
            }
            _ => false,
        };
        if now_empty {
            node.remove("Children");
        }
    }

    fn read_player(&self, key: &str) -> Option<PlayerData> {
        let value = self.players.get(key)?;
        let node: PlayerNode = match serde_json::from_value(value.clone()) {
            Ok(node) => node,
            Err(e) => {
                log::warn!("Unable to load data for player {:?}: {}", key, e);
                PlayerNode::default()
            }
        };

        let last_login = node.last_login.as_deref().map(|text| {
            parse_login(text).unwrap_or_else(|| {
                log::warn!("Unable to load last login for {:?}", key);
                Utc::now() - chrono::Duration::days(365)
            })
        });

        Some(PlayerData {
            player_name: key.to_string(),
            last_login,
            accrued_claim_blocks: node.accrued_blocks,
            bonus_claim_blocks: node.bonus_blocks,
            clear_inventory_on_join: node.clear_inventory_on_join,
        })
    }

    fn put_player(&mut self, key: String, data: &mut PlayerData) -> Result<()> {
        let last_login = *data.last_login.get_or_insert_with(Utc::now);
        let node = PlayerNode {
            last_login: Some(format_login(&last_login)),
            accrued_blocks: data.accrued_claim_blocks,
            bonus_blocks: data.bonus_claim_blocks,
            clear_inventory_on_join: data.clear_inventory_on_join,
        };
        self.players.insert(key, serde_json::to_value(node)?);
        Ok(())
    }
}

impl ClaimBackend for FileBackend {
    fn world_loaded(&self, world: &str, index: &mut ClaimIndex) -> usize {
        let mut state = lock(&self.state);
        let worlds = self.collaborators.worlds.as_ref();

        log::debug!("Loading claims in world {}", world);
        let mut indexed = 0;
        let mut losers = Vec::new();
        for id in state.top_level_ids(world) {
            let claim = match state.read_claim(id, worlds) {
                Ok(claim) => claim,
                Err(e) => {
                    log_skipped(&format!("claim {}", id), &e);
                    continue;
                }
            };
            let children: Vec<ClaimId> = claim.children.iter().filter_map(|c| c.id).collect();
            match index.admit(claim) {
                Admission::Indexed => indexed += 1,
                Admission::AlreadyIndexed => {}
                Admission::Conflict { winner } => {
                    log::debug!("Claim {} overlaps claim {:?}; removing it", id, winner);
                    losers.push((id, children));
                }
            }
        }

        if !losers.is_empty() {
            for (id, children) in losers {
                state.remove_claim(id, children);
            }
            let result = self.save_claims(&state);
            self.flush(CLAIM_FILENAME, result);
        }
        indexed
    }

    fn write_claim_to_storage(&self, claim: &mut Claim) {
        let mut state = lock(&self.state);
        let result = state.put_claim(claim).and_then(|allocated| {
            if allocated {
                self.save_server(&state)?;
            }
            self.save_claims(&state)
        });
        if let Err(e) = result {
            log::error!(
                "Unable to save data for claim at {}: {:#}",
                claim.lesser_corner(),
                e
            );
        }
    }

    fn delete_claim_from_secondary_storage(&self, claim: &Claim) {
        let Some(id) = claim.id else {
            return;
        };
        let mut state = lock(&self.state);
        state.remove_claim(id, claim.children.iter().filter_map(|c| c.id));
        if let (true, Some(parent)) = (claim.is_subdivision(), claim.parent) {
            state.unlink_child(parent, id);
        }
        let result = self.save_claims(&state);
        self.flush(CLAIM_FILENAME, result);
    }

    fn get_player_data_from_storage(&self, player_name: &str) -> PlayerData {
        let key = player_name.to_lowercase();
        let mut state = lock(&self.state);
        if let Some(data) = state.read_player(&key) {
            return data;
        }

        let mut data = PlayerData::new(key.clone());
        if !key.is_empty() {
            let result = state
                .put_player(key, &mut data)
                .and_then(|_| self.save_players(&state));
            self.flush(PLAYER_FILENAME, result);
        }
        data
    }

    fn save_player_data(&self, player_name: &str, data: &mut PlayerData) {
        if player_name.is_empty() {
            return;
        }
        let mut state = lock(&self.state);
        let result = state
            .put_player(player_name.to_lowercase(), data)
            .and_then(|_| self.save_players(&state));
        if let Err(e) = result {
            log::error!("Unable to save data for player {}: {:#}", player_name, e);
        }
    }

    fn has_player_data(&self, player_name: &str) -> bool {
        lock(&self.state).players.contains_key(&player_name.to_lowercase())
    }

    fn delete_player_data(&self, player_name: &str) -> bool {
        let mut state = lock(&self.state);
        let removed = state.players.remove(&player_name.to_lowercase()).is_some();
        if removed {
            let result = self.save_players(&state);
            self.flush(PLAYER_FILENAME, result);
        }
        removed
    }

    fn get_all_player_data(&self) -> Vec<PlayerData> {
        let state = lock(&self.state);
        state
            .players
            .keys()
            .filter_map(|key| state.read_player(key))
            .collect()
    }

    fn next_claim_id(&self) -> ClaimId {
        lock(&self.state).server.next_claim_id
    }

    fn set_next_claim_id(&self, next: ClaimId) {
        let mut state = lock(&self.state);
        state.server.next_claim_id = next;
        let result = self.save_server(&state);
        self.flush(SERVER_FILENAME, result);
    }

    fn increment_next_claim_id(&self) {
        let mut state = lock(&self.state);
        state.server.next_claim_id += 1;
        let result = self.save_server(&state);
        self.flush(SERVER_FILENAME, result);
    }

    fn save_group_bonus_blocks(&self, group: &str, amount: i32) {
        let mut state = lock(&self.state);
        state.groups.set(group, amount);
        state.server.group_bonus_blocks.insert(group.to_string(), amount);
        let result = self.save_server(&state);
        self.flush(SERVER_FILENAME, result);
    }

    fn group_bonus_blocks(&self, player_name: &str) -> i32 {
        let state = lock(&self.state);
        state
            .groups
            .total_for(player_name, self.collaborators.permissions.as_ref())
    }

    fn group_bonus_table(&self) -> GroupBonusTable {
        lock(&self.state).groups.clone()
    }

    fn close(self: Box<Self>) -> Result<()> {
        let state = lock(&self.state);
        self.save_all(&state)?;
        log::info!("File storage at {} closed", self.folder.display());
        Ok(())
    }
}

fn read_document<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if text.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse {}", path.display()))
        .inspect_err(|e| log::error!("File storage unavailable: {:#}", e))
}

/// Write through a temporary file so a crash never leaves half a document.
fn write_document<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, text).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))
}
