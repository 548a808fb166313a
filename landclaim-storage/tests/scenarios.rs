//! Properties every backend has to satisfy, run against the file backend and
//! the document backend over an in-memory store.

use std::sync::Arc;

use landclaim_model::{
    Boundary, Claim, ClaimIndex, ClaimPermission, Collaborators, PlayerData, StaticPermissions,
    StaticWorlds,
};
use landclaim_storage::config::{self, ConfigSection};
use landclaim_storage::{ClaimBackend, DocumentBackend, FileBackend, MemoryDocumentStore};
use tempfile::TempDir;

enum Fixture {
    File(TempDir),
    Document(Arc<MemoryDocumentStore>),
}

impl Fixture {
    fn all() -> Vec<Fixture> {
        vec![
            Fixture::File(TempDir::new().unwrap()),
            Fixture::Document(Arc::new(MemoryDocumentStore::new())),
        ]
    }

    fn name(&self) -> &'static str {
        match self {
            Fixture::File(_) => "file",
            Fixture::Document(_) => "document",
        }
    }

    /// A fresh backend instance over the same persisted data.
    fn open(&self) -> Box<dyn ClaimBackend> {
        let collaborators = Collaborators::new(
            Arc::new(
                StaticPermissions::new()
                    .with_grant("alice", "group.builders")
                    .with_grant("alice", "group.veterans"),
            ),
            Arc::new(StaticWorlds::new(["earth"])),
        );
        match self {
            Fixture::File(dir) => {
                let source = ConfigSection::new().with(config::DATA_FOLDER, dir.path().to_str().unwrap());
                Box::new(FileBackend::open(&source, &mut ConfigSection::new(), collaborators).unwrap())
            }
            Fixture::Document(store) => {
                Box::new(DocumentBackend::open(Box::new(store.clone()), collaborators).unwrap())
            }
        }
    }
}

fn claim(a: (i32, i32, i32), b: (i32, i32, i32), owner: &str) -> Claim {
    Claim::new(
        Boundary::new("earth", a.0, a.1, a.2),
        Boundary::new("earth", b.0, b.1, b.2),
        owner,
    )
    .unwrap()
}

#[test]
fn test_claim_with_explicit_id_reloads_exactly() {
    for fixture in Fixture::all() {
        let backend = fixture.open();
        let mut original = claim((0, 0, 0), (10, 10, 10), "alice").with_id(5);
        original.set_permission("bob", ClaimPermission::Build);
        backend.write_claim_to_storage(&mut original);
        backend.close().unwrap();

        let backend = fixture.open();
        let mut index = ClaimIndex::new();
        assert_eq!(backend.world_loaded("earth", &mut index), 1, "{}", fixture.name());

        let loaded = index.get(5).unwrap();
        assert_eq!(loaded.lesser_corner(), &Boundary::new("earth", 0, 0, 0));
        assert_eq!(loaded.greater_corner(), &Boundary::new("earth", 10, 10, 10));
        assert_eq!(loaded.owner_name, "alice");
        let perms = loaded.permissions();
        assert_eq!(perms.builders, vec!["bob".to_string()]);
        assert!(perms.containers.is_empty() && perms.accessors.is_empty() && perms.managers.is_empty());
        assert!(loaded.children.is_empty(), "{}", fixture.name());
        assert!(!loaded.never_delete);
    }
}

#[test]
fn test_world_load_is_idempotent() {
    for fixture in Fixture::all() {
        let backend = fixture.open();
        let mut top = claim((0, 0, 0), (30, 30, 30), "alice");
        top.add_subdivision(claim((1, 1, 1), (3, 3, 3), "alice")).unwrap();
        backend.write_claim_to_storage(&mut top);
        backend.write_claim_to_storage(&mut claim((40, 0, 40), (50, 9, 50), "bob"));

        let mut index = ClaimIndex::new();
        let first = backend.world_loaded("earth", &mut index);
        let size = index.len();
        backend.world_loaded("earth", &mut index);
        assert_eq!(first, 2, "{}", fixture.name());
        assert_eq!(index.len(), size, "{}", fixture.name());
        assert_eq!(index.get(top.id.unwrap()).unwrap().children.len(), 1);
    }
}

#[test]
fn test_rewrite_overwrites_in_place() {
    for fixture in Fixture::all() {
        let backend = fixture.open();
        let mut top = claim((0, 0, 0), (30, 30, 30), "alice");
        backend.write_claim_to_storage(&mut top);
        let id = top.id;
        top.owner_name = "carol".into();
        top.never_delete = true;
        backend.write_claim_to_storage(&mut top);
        assert_eq!(top.id, id);
        assert_eq!(backend.next_claim_id(), 1, "{}", fixture.name());

        let backend = fixture.open();
        let mut index = ClaimIndex::new();
        assert_eq!(backend.world_loaded("earth", &mut index), 1);
        let loaded = index.iter().next().unwrap();
        assert_eq!(loaded.owner_name, "carol");
        assert!(loaded.never_delete);
    }
}

#[test]
fn test_counter_is_monotonic_across_reopen() {
    for fixture in Fixture::all() {
        let backend = fixture.open();
        let start = backend.next_claim_id();
        for _ in 0..7 {
            backend.increment_next_claim_id();
        }
        assert_eq!(backend.next_claim_id(), start + 7);
        backend.close().unwrap();
        assert_eq!(fixture.open().next_claim_id(), start + 7, "{}", fixture.name());
    }
}

#[test]
fn test_overlapping_records_resolve_to_first() {
    for fixture in Fixture::all() {
        let backend = fixture.open();
        backend.write_claim_to_storage(&mut claim((0, 0, 0), (10, 10, 10), "alice"));
        backend.write_claim_to_storage(&mut claim((0, 0, 0), (3, 3, 3), "mallory"));
        backend.close().unwrap();

        let backend = fixture.open();
        let mut index = ClaimIndex::new();
        backend.world_loaded("earth", &mut index);
        assert_eq!(index.len(), 1, "{}", fixture.name());
        assert_eq!(index.iter().next().unwrap().owner_name, "alice");

        // The loser is gone from storage, not just from this index.
        let mut fresh = ClaimIndex::new();
        assert_eq!(fixture.open().world_loaded("earth", &mut fresh), 1, "{}", fixture.name());
    }
}

#[test]
fn test_group_bonuses_add_up() {
    for fixture in Fixture::all() {
        let backend = fixture.open();
        backend.save_group_bonus_blocks("group.builders", 100);
        backend.save_group_bonus_blocks("group.veterans", 25);
        backend.save_group_bonus_blocks("group.staff", 1000);
        assert_eq!(backend.group_bonus_blocks("alice"), 125, "{}", fixture.name());
        assert_eq!(backend.group_bonus_blocks("bob"), 0);
        backend.close().unwrap();

        let backend = fixture.open();
        assert_eq!(backend.group_bonus_blocks("alice"), 125, "{}", fixture.name());
        assert_eq!(backend.group_bonus_table().len(), 3);
    }
}

#[test]
fn test_admin_account_is_never_persisted() {
    for fixture in Fixture::all() {
        let backend = fixture.open();
        let mut admin = PlayerData::default();
        admin.accrued_claim_blocks = 10;
        backend.save_player_data("", &mut admin);
        assert!(!backend.has_player_data(""), "{}", fixture.name());
        assert!(backend.get_all_player_data().is_empty(), "{}", fixture.name());
    }
}

#[test]
fn test_player_records_survive_reopen() {
    for fixture in Fixture::all() {
        let backend = fixture.open();
        let mut data = backend.get_player_data_from_storage("Dana");
        data.accrued_claim_blocks = 64;
        data.bonus_claim_blocks = 16;
        backend.save_player_data("Dana", &mut data);
        backend.close().unwrap();

        let backend = fixture.open();
        assert!(backend.has_player_data("DANA"));
        let loaded = backend.get_player_data_from_storage("dana");
        assert_eq!(loaded.own_claim_blocks(), 80, "{}", fixture.name());
    }
}

#[test]
fn test_deleted_claim_stays_deleted() {
    for fixture in Fixture::all() {
        let backend = fixture.open();
        let mut top = claim((0, 0, 0), (30, 30, 30), "alice");
        top.add_subdivision(claim((1, 1, 1), (3, 3, 3), "alice")).unwrap();
        backend.write_claim_to_storage(&mut top);
        let mut other = claim((40, 0, 40), (50, 9, 50), "bob");
        backend.write_claim_to_storage(&mut other);

        backend.delete_claim_from_secondary_storage(&top);
        backend.close().unwrap();

        let mut index = ClaimIndex::new();
        assert_eq!(fixture.open().world_loaded("earth", &mut index), 1, "{}", fixture.name());
        assert!(index.get(other.id.unwrap()).is_some());
    }
}

#[test]
fn test_explicit_ids_are_never_reissued() {
    for fixture in Fixture::all() {
        let backend = fixture.open();
        backend.write_claim_to_storage(&mut claim((0, 0, 0), (10, 10, 10), "alice").with_id(1));

        let mut bob = claim((20, 0, 20), (30, 10, 30), "bob");
        backend.write_claim_to_storage(&mut bob);
        let mut carol = claim((40, 0, 40), (50, 10, 50), "carol");
        backend.write_claim_to_storage(&mut carol);
        assert_eq!(bob.id, Some(2), "{}", fixture.name());
        assert_eq!(carol.id, Some(3), "{}", fixture.name());
        assert_eq!(backend.next_claim_id(), 4, "{}", fixture.name());
        backend.close().unwrap();

        let backend = fixture.open();
        assert_eq!(backend.next_claim_id(), 4, "{}", fixture.name());
        let mut index = ClaimIndex::new();
        assert_eq!(backend.world_loaded("earth", &mut index), 3, "{}", fixture.name());
        assert_eq!(index.get(1).unwrap().owner_name, "alice", "{}", fixture.name());
        assert_eq!(index.get(2).unwrap().owner_name, "bob");
        assert_eq!(index.get(3).unwrap().owner_name, "carol");
    }
}
