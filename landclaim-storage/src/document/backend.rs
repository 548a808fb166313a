//! Claim backend over a [`DocumentStore`].
//!
//! Collections:
//! - `claimdata` - one record per claim; subdivisions carry their parent's id
//!   in `parentid`, top-level claims carry `-1`
//! - `playerdata` - one record per lower-cased player name, plus one `$group`
//!   record per group bonus
//! - `nextclaimid` - a single `{nextid}` document

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use landclaim_model::{
    Admission, Boundary, Claim, ClaimId, ClaimIndex, Collaborators, GroupBonusTable,
    PermissionLists, PlayerData, WorldRegistry,
};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use super::{document, Document, DocumentStore, PostgresDocumentStore, PostgresSettings};
use crate::config::{self, ConfigSection};
use crate::{lock, log_skipped, ClaimBackend, RecordError};

const CLAIMS: &str = "claimdata";
const PLAYERS: &str = "playerdata";
const NEXT_ID: &str = "nextclaimid";

/// Player records whose name starts with this hold a group bonus.
const GROUP_PREFIX: char = '$';
const TOP_LEVEL: ClaimId = -1;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;
const DEFAULT_DATABASE: &str = "landclaim";
const DEFAULT_USER: &str = "postgres";

#[derive(Debug, Deserialize)]
struct ClaimRecord {
    id: ClaimId,
    #[serde(default = "top_level")]
    parentid: ClaimId,
    lessercorner: String,
    greatercorner: String,
    #[serde(default)]
    owner: String,
    #[serde(default, deserialize_with = "names")]
    builders: Vec<String>,
    #[serde(default, deserialize_with = "names")]
    containers: Vec<String>,
    #[serde(default, deserialize_with = "names")]
    accessors: Vec<String>,
    #[serde(default, deserialize_with = "names")]
    managers: Vec<String>,
    #[serde(default, deserialize_with = "flag")]
    neverdelete: bool,
    #[serde(default)]
    modified: Option<i64>,
}

fn top_level() -> ClaimId {
    TOP_LEVEL
}

/// Permission lists are arrays; older records joined them with `;`.
fn names<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Names {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match Names::deserialize(deserializer)? {
        Names::List(names) => names,
        Names::Joined(joined) => joined.split(';').map(str::to_string).collect(),
    })
}

/// Flags are booleans; older records stored 0/1.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(n) => n != 0,
    })
}

impl ClaimRecord {
    fn decode(doc: Document) -> Result<Self, RecordError> {
        let id = doc.get("id").cloned().unwrap_or(Value::Null);
        serde_json::from_value(Value::Object(doc))
            .map_err(|e| RecordError::Malformed(format!("claim record {}: {}", id, e)))
    }

    fn to_claim(&self, worlds: &dyn WorldRegistry) -> Result<Claim, RecordError> {
        let lesser = Boundary::from_token(&self.lessercorner, worlds)?;
        let greater = Boundary::from_token(&self.greatercorner, worlds)?;
        let mut claim = Claim::new(lesser, greater, self.owner.clone())?.with_id(self.id);
        claim.set_permissions(PermissionLists {
            builders: self.builders.clone(),
            containers: self.containers.clone(),
            accessors: self.accessors.clone(),
            managers: self.managers.clone(),
        });
        claim.never_delete = self.neverdelete;
        if let Some(modified) = self.modified.and_then(DateTime::from_timestamp_millis) {
            claim.modified_date = modified;
        }
        Ok(claim)
    }
}

/// Everything but the key fields of a claim record.
fn claim_fields(claim: &Claim) -> Document {
    let perms = claim.permissions();
    document(json!({
        "world": claim.world(),
        "owner": claim.owner_name,
        "lessercorner": claim.lesser_corner().to_token(),
        "greatercorner": claim.greater_corner().to_token(),
        "builders": perms.builders,
        "containers": perms.containers,
        "accessors": perms.accessors,
        "managers": perms.managers,
        "neverdelete": claim.never_delete,
        "modified": claim.modified_date.timestamp_millis(),
    }))
}

fn claim_key(id: ClaimId, parent: ClaimId) -> Document {
    document(json!({ "id": id, "parentid": parent }))
}

fn children_of(parent: ClaimId) -> Document {
    document(json!({ "parentid": parent }))
}

/// Identifiers for a claim's subdivisions: the explicit id when present,
/// otherwise the position in the list, moved up past ids already in use.
fn subdivision_ids(children: &[Claim]) -> Vec<ClaimId> {
    let mut taken: HashSet<ClaimId> = children.iter().filter_map(|c| c.id).collect();
    children
        .iter()
        .enumerate()
        .map(|(pos, child)| match child.id {
            Some(id) => id,
            None => {
                let mut id = pos as ClaimId;
                while !taken.insert(id) {
                    id += 1;
                }
                id
            }
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct PlayerRecord {
    #[serde(default)]
    lastlogin: Option<i64>,
    #[serde(default)]
    accruedblocks: i32,
    #[serde(default)]
    bonusblocks: i32,
    #[serde(default, deserialize_with = "flag")]
    clearonjoin: bool,
}

impl PlayerRecord {
    fn decode(key: &str, doc: Document) -> Self {
        serde_json::from_value(Value::Object(doc)).unwrap_or_else(|e| {
            log::warn!("Unable to load data for player {:?}: {}", key, e);
            Self::default()
        })
    }

    fn into_player(self, key: &str) -> PlayerData {
        PlayerData {
            player_name: key.to_string(),
            last_login: self.lastlogin.and_then(DateTime::from_timestamp_millis),
            accrued_claim_blocks: self.accruedblocks,
            bonus_claim_blocks: self.bonusblocks,
            clear_inventory_on_join: self.clearonjoin,
        }
    }
}

fn player_key(name: &str) -> Document {
    document(json!({ "name": name }))
}

fn is_group_record(name: &str) -> bool {
    name.starts_with(GROUP_PREFIX)
}

struct DocState {
    next_claim_id: ClaimId,
    groups: GroupBonusTable,
}

pub struct DocumentBackend {
    store: Box<dyn DocumentStore>,
    collaborators: Collaborators,
    state: Mutex<DocState>,
}

impl DocumentBackend {
    /// Connect to PostgreSQL with the `Host`, `Port`, `Database`, `Username`,
    /// `Password` and `TablePrefix` settings. The resolved values are written
    /// to `target`.
    pub fn connect(
        source: &ConfigSection,
        target: &mut ConfigSection,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let mut user = source.get_str(config::USERNAME, "");
        if user.is_empty() {
            user = DEFAULT_USER.to_string();
        }
        let settings = PostgresSettings {
            host: source.get_str(config::HOST, DEFAULT_HOST),
            port: source.get_u16(config::PORT, DEFAULT_PORT),
            database: source.get_str(config::DATABASE, DEFAULT_DATABASE),
            user,
            password: source.get_str(config::PASSWORD, ""),
            table_prefix: source.get_str(config::TABLE_PREFIX, ""),
        };

        target.set(config::HOST, settings.host.clone());
        target.set(config::PORT, settings.port);
        target.set(config::DATABASE, settings.database.clone());
        target.set(config::USERNAME, settings.user.clone());
        target.set(config::PASSWORD, settings.password.clone());
        target.set(config::TABLE_PREFIX, settings.table_prefix.clone());

        log::info!(
            "Connecting to PostgreSQL at {} (database {})",
            settings.address(),
            settings.database
        );
        let store = PostgresDocumentStore::connect(&settings, &[CLAIMS, PLAYERS, NEXT_ID])
            .with_context(|| format!("Could not connect to PostgreSQL at {}", settings.address()))
            .inspect_err(|e| log::error!("Database storage unavailable: {:#}", e))?;

        Self::open(Box::new(store), collaborators)
    }

    /// Load the counter and the group bonus table from an open store.
    pub fn open(store: Box<dyn DocumentStore>, collaborators: Collaborators) -> Result<Self> {
        let next_claim_id = Self::load_counter(store.as_ref())?;

        let mut groups = GroupBonusTable::new();
        for doc in store.find(PLAYERS, &Document::new()).context("Failed to read player records")? {
            let Some(name) = doc.get("name").and_then(Value::as_str) else {
                continue;
            };
            if let Some(group) = name.strip_prefix(GROUP_PREFIX) {
                let amount = doc.get("bonusblocks").and_then(Value::as_i64).unwrap_or(0);
                groups.set(group, i32::try_from(amount).unwrap_or(0));
            }
        }

        log::info!(
            "Document storage opened ({} group bonuses, next claim id {})",
            groups.len(),
            next_claim_id
        );

        Ok(Self {
            store,
            collaborators,
            state: Mutex::new(DocState {
                next_claim_id,
                groups,
            }),
        })
    }

    /// Read the counter, collapsing duplicate counter documents into one
    /// holding the highest value.
    fn load_counter(store: &dyn DocumentStore) -> Result<ClaimId> {
        let counters = store.find(NEXT_ID, &Document::new()).context("Failed to read claim counter")?;
        let next = counters
            .iter()
            .filter_map(|doc| doc.get("nextid").and_then(Value::as_i64))
            .max()
            .unwrap_or(0);

        let single = counters.len() == 1
            && counters[0].get("nextid").and_then(Value::as_i64) == Some(next);
        if !single {
            if counters.len() > 1 {
                log::warn!("Found {} claim counters; keeping {}", counters.len(), next);
            }
            store.remove_all(NEXT_ID, &Document::new())?;
            store.insert(NEXT_ID, &document(json!({ "nextid": next })))?;
        }
        Ok(next)
    }

    fn save_counter(&self, next: ClaimId) -> Result<()> {
        self.store
            .upsert(NEXT_ID, &Document::new(), &document(json!({ "nextid": next })))
    }

    /// Decode a top-level record and attach its subdivisions, ordered by id.
    fn read_claim(&self, record: &ClaimRecord, worlds: &dyn WorldRegistry) -> Result<Claim> {
        let mut claim = record.to_claim(worlds)?;

        let mut children = Vec::new();
        for doc in self.store.find(CLAIMS, &children_of(record.id))? {
            match ClaimRecord::decode(doc) {
                Ok(child) => children.push(child),
                Err(e) => log_skipped(&format!("subdivision of claim {}", record.id), &e),
            }
        }
        children.sort_by_key(|child| child.id);

        let mut seen = HashSet::new();
        for child in children {
            if !seen.insert(child.id) {
                log::warn!("Claim {} has duplicate subdivision {}", record.id, child.id);
                continue;
            }
            let what = format!("subdivision {} of claim {}", child.id, record.id);
            match child.to_claim(worlds) {
                Ok(sub) => {
                    if let Err(e) = claim.add_subdivision(sub) {
                        log_skipped(&what, &e.into());
                    }
                }
                Err(e) => log_skipped(&what, &e),
            }
        }
        Ok(claim)
    }

    fn put_claim(&self, state: &mut DocState, claim: &mut Claim) -> Result<()> {
        if claim.is_subdivision() {
            let parent = claim.parent.context("subdivision of an unsaved claim")?;
            let id = claim.id.context("subdivision has no id")?;
            claim.modified_date = Utc::now();
            return self.store.upsert(CLAIMS, &claim_key(id, parent), &claim_fields(claim));
        }

        let id = match claim.id {
            Some(id) => {
                if id >= state.next_claim_id {
                    state.next_claim_id = id + 1;
                    self.save_counter(state.next_claim_id)?;
                }
                id
            }
            None => {
                let id = state.next_claim_id;
                state.next_claim_id += 1;
                self.save_counter(state.next_claim_id)?;
                claim.id = Some(id);
                id
            }
        };
        claim.modified_date = Utc::now();
        claim.relink_children();
        self.store.upsert(CLAIMS, &claim_key(id, TOP_LEVEL), &claim_fields(claim))?;

        let child_ids = subdivision_ids(&claim.children);
        for (child, &child_id) in claim.children.iter_mut().zip(&child_ids) {
            child.id = Some(child_id);
            child.modified_date = claim.modified_date;
            self.store.upsert(CLAIMS, &claim_key(child_id, id), &claim_fields(child))?;
        }

        // Subdivisions dropped since the last write would otherwise linger.
        for doc in self.store.find(CLAIMS, &children_of(id))? {
            if let Some(stale) = doc.get("id").and_then(Value::as_i64) {
                if !child_ids.contains(&stale) {
                    self.store.remove_all(CLAIMS, &claim_key(stale, id))?;
                }
            }
        }
        Ok(())
    }

    fn remove_claim(&self, id: ClaimId) -> Result<()> {
        self.store.remove_all(CLAIMS, &claim_key(id, TOP_LEVEL))?;
        self.store.remove_all(CLAIMS, &children_of(id))?;
        Ok(())
    }

    fn read_player(&self, key: &str) -> Result<Option<PlayerData>> {
        Ok(self
            .store
            .find_one(PLAYERS, &player_key(key))?
            .map(|doc| PlayerRecord::decode(key, doc).into_player(key)))
    }

    fn put_player(&self, key: &str, data: &mut PlayerData) -> Result<()> {
        let last_login = *data.last_login.get_or_insert_with(Utc::now);
        let fields = document(json!({
            "lastlogin": last_login.timestamp_millis(),
            "accruedblocks": data.accrued_claim_blocks,
            "bonusblocks": data.bonus_claim_blocks,
            "clearonjoin": data.clear_inventory_on_join,
        }));
        self.store.upsert(PLAYERS, &player_key(key), &fields)
    }
}

impl ClaimBackend for DocumentBackend {
    fn world_loaded(&self, world: &str, index: &mut ClaimIndex) -> usize {
        let _state = lock(&self.state);
        let worlds = self.collaborators.worlds.as_ref();

        log::debug!("Loading claims in world {}", world);
        let records = match self.store.find(CLAIMS, &document(json!({ "world": world }))) {
            Ok(records) => records,
            Err(e) => {
                log::error!("Unable to load claims in world {}: {:#}", world, e);
                return 0;
            }
        };

        let mut indexed = 0;
        let mut losers = Vec::new();
        for doc in records {
            let record = match ClaimRecord::decode(doc) {
                Ok(record) => record,
                Err(e) => {
                    log_skipped("claim record", &e);
                    continue;
                }
            };
            if record.parentid != TOP_LEVEL || index.contains_id(record.id) {
                continue;
            }

            let claim = match self.read_claim(&record, worlds) {
                Ok(claim) => claim,
                Err(e) => match e.downcast::<RecordError>() {
                    Ok(e) => {
                        log_skipped(&format!("claim {}", record.id), &e);
                        continue;
                    }
                    Err(e) => {
                        log::error!("Unable to load claim {}: {:#}", record.id, e);
                        continue;
                    }
                },
            };
            match index.admit(claim) {
                Admission::Indexed => indexed += 1,
                Admission::AlreadyIndexed => {}
                Admission::Conflict { winner } => {
                    log::debug!("Claim {} overlaps claim {:?}; removing it", record.id, winner);
                    losers.push(record.id);
                }
            }
        }

        for id in losers {
            if let Err(e) = self.remove_claim(id) {
                log::error!("Unable to remove overlapping claim {}: {:#}", id, e);
            }
        }
        indexed
    }

    fn write_claim_to_storage(&self, claim: &mut Claim) {
        let mut state = lock(&self.state);
        if let Err(e) = self.put_claim(&mut state, claim) {
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
        let _state = lock(&self.state);
        let result = if claim.is_subdivision() {
            match claim.parent {
                Some(parent) => self.store.remove_all(CLAIMS, &claim_key(id, parent)).map(|_| ()),
                None => Ok(()),
            }
        } else {
            self.remove_claim(id)
        };
        if let Err(e) = result {
            log::error!("Unable to delete claim {}: {:#}", id, e);
        }
    }

    fn get_player_data_from_storage(&self, player_name: &str) -> PlayerData {
        let key = player_name.to_lowercase();
        let _state = lock(&self.state);
        if is_group_record(&key) {
            log::warn!("Player name {:?} is reserved for group records", player_name);
            return PlayerData::new(key);
        }

        match self.read_player(&key) {
            Ok(Some(data)) => return data,
            Ok(None) => {}
            Err(e) => {
                log::error!("Unable to read data for player {}: {:#}", player_name, e);
                return PlayerData::new(key);
            }
        }

        let mut data = PlayerData::new(key.clone());
        if !key.is_empty() {
            if let Err(e) = self.put_player(&key, &mut data) {
                log::error!("Unable to save data for player {}: {:#}", player_name, e);
            }
        }
        data
    }

    fn save_player_data(&self, player_name: &str, data: &mut PlayerData) {
        if player_name.is_empty() {
            return;
        }
        if is_group_record(player_name) {
            log::warn!("Refusing to save player {:?}: reserved name", player_name);
            return;
        }
        let _state = lock(&self.state);
        if let Err(e) = self.put_player(&player_name.to_lowercase(), data) {
            log::error!("Unable to save data for player {}: {:#}", player_name, e);
        }
    }

    fn has_player_data(&self, player_name: &str) -> bool {
        let key = player_name.to_lowercase();
        if is_group_record(&key) {
            return false;
        }
        let _state = lock(&self.state);
        match self.store.find_one(PLAYERS, &player_key(&key)) {
            Ok(doc) => doc.is_some(),
            Err(e) => {
                log::error!("Unable to read data for player {}: {:#}", player_name, e);
                false
            }
        }
    }

    fn delete_player_data(&self, player_name: &str) -> bool {
        let key = player_name.to_lowercase();
        if is_group_record(&key) {
            return false;
        }
        let _state = lock(&self.state);
        match self.store.remove_all(PLAYERS, &player_key(&key)) {
            Ok(removed) => removed > 0,
            Err(e) => {
                log::error!("Unable to delete data for player {}: {:#}", player_name, e);
                false
            }
        }
    }

    fn get_all_player_data(&self) -> Vec<PlayerData> {
        let _state = lock(&self.state);
        let docs = match self.store.find(PLAYERS, &Document::new()) {
            Ok(docs) => docs,
            Err(e) => {
                log::error!("Unable to read player records: {:#}", e);
                return Vec::new();
            }
        };

        docs.into_iter()
            .filter_map(|doc| {
                let name = doc.get("name")?.as_str()?.to_string();
                if is_group_record(&name) {
                    return None;
                }
                Some(PlayerRecord::decode(&name, doc).into_player(&name))
            })
            .collect()
    }

    fn next_claim_id(&self) -> ClaimId {
        lock(&self.state).next_claim_id
    }

    fn set_next_claim_id(&self, next: ClaimId) {
        let mut state = lock(&self.state);
        state.next_claim_id = next;
        if let Err(e) = self.save_counter(next) {
            log::error!("Unable to save claim counter: {:#}", e);
        }
    }

    fn increment_next_claim_id(&self) {
        let mut state = lock(&self.state);
        state.next_claim_id += 1;
        if let Err(e) = self.save_counter(state.next_claim_id) {
            log::error!("Unable to save claim counter: {:#}", e);
        }
    }

    fn save_group_bonus_blocks(&self, group: &str, amount: i32) {
        let mut state = lock(&self.state);
        state.groups.set(group, amount);
        let name = format!("{}{}", GROUP_PREFIX, group);
        let fields = document(json!({ "bonusblocks": amount }));
        if let Err(e) = self.store.upsert(PLAYERS, &player_key(&name), &fields) {
            log::error!("Unable to save bonus blocks for group {}: {:#}", group, e);
        }
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
        log::info!("Document storage closed (next claim id {})", state.next_claim_id);
        Ok(())
    }
}
