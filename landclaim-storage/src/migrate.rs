//! Copy everything one backend holds into another.

use landclaim_model::{ClaimId, ClaimIndex};

use crate::ClaimBackend;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub claims: usize,
    pub subdivisions: usize,
    pub players: usize,
    pub groups: usize,
    /// Target counter after the copy.
    pub next_claim_id: ClaimId,
}

/// Copy the claims of `worlds`, every player record and the group bonus
/// table from `source` to `target`.
///
/// Top-level claims keep their identifiers. Subdivisions are renumbered by
/// the target, since the two backends scope subdivision ids differently. The
/// target counter is raised past every copied id before anything is written.
pub fn migrate(source: &dyn ClaimBackend, target: &dyn ClaimBackend, worlds: &[String]) -> MigrationReport {
    let mut index = ClaimIndex::new();
    for world in worlds {
        let loaded = source.world_loaded(world, &mut index);
        log::info!("Read {} claims in world {} from source", loaded, world);
    }

    let highest = index.iter().filter_map(|c| c.id).max().map_or(0, |id| id + 1);
    let next = source.next_claim_id().max(target.next_claim_id()).max(highest);
    target.set_next_claim_id(next);

    let mut report = MigrationReport::default();
    for claim in index.iter() {
        let mut copy = claim.clone();
        copy.in_data_store = false;
        for child in &mut copy.children {
            child.id = None;
            child.in_data_store = false;
        }
        report.subdivisions += copy.children.len();
        target.write_claim_to_storage(&mut copy);
        report.claims += 1;
    }

    for mut data in source.get_all_player_data() {
        let name = data.player_name.clone();
        target.save_player_data(&name, &mut data);
        report.players += 1;
    }

    for (group, amount) in source.group_bonus_table().iter() {
        target.save_group_bonus_blocks(group, amount);
        report.groups += 1;
    }

    report.next_claim_id = target.next_claim_id();
    log::info!(
        "Migrated {} claims ({} subdivisions), {} players, {} group bonuses; next claim id {}",
        report.claims,
        report.subdivisions,
        report.players,
        report.groups,
        report.next_claim_id
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, ConfigSection};
    use crate::document::{DocumentBackend, MemoryDocumentStore};
    use crate::file::FileBackend;
    use landclaim_model::{Boundary, Claim, ClaimPermission, Collaborators, StaticPermissions, StaticWorlds};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn collaborators() -> Collaborators {
        Collaborators::new(
            Arc::new(StaticPermissions::new().with_grant("carol", "rank.vip")),
            Arc::new(StaticWorlds::new(["earth", "mars"])),
        )
    }

    fn claim(world: &str, a: (i32, i32), b: (i32, i32), owner: &str) -> Claim {
        Claim::new(
            Boundary::new(world, a.0, 0, a.1),
            Boundary::new(world, b.0, 255, b.1),
            owner,
        )
        .unwrap()
    }

    #[test]
    fn test_file_to_document_keeps_ids() {
        let dir = TempDir::new().unwrap();
        let source_config = ConfigSection::new().with(config::DATA_FOLDER, dir.path().to_str().unwrap());
        let source = FileBackend::open(&source_config, &mut ConfigSection::new(), collaborators()).unwrap();

        let mut home = claim("earth", (0, 0), (40, 40), "alice");
        home.set_permission("bob", ClaimPermission::Build);
        home.add_subdivision(claim("earth", (1, 1), (9, 9), "alice")).unwrap();
        home.add_subdivision(claim("earth", (20, 20), (30, 30), "alice")).unwrap();
        source.write_claim_to_storage(&mut home);
        let mut outpost = claim("mars", (0, 0), (5, 5), "bob");
        source.write_claim_to_storage(&mut outpost);
        let mut farm = claim("earth", (100, 100), (110, 110), "dave");
        source.write_claim_to_storage(&mut farm);

        let mut carol = source.get_player_data_from_storage("carol");
        carol.accrued_claim_blocks = 300;
        source.save_player_data("carol", &mut carol);
        source.save_group_bonus_blocks("rank.vip", 75);

        let docs = Arc::new(MemoryDocumentStore::new());
        let target = DocumentBackend::open(Box::new(docs.clone()), collaborators()).unwrap();
        let report = migrate(&source, &target, &["earth".to_string(), "mars".to_string()]);

        assert_eq!(report.claims, 3);
        assert_eq!(report.subdivisions, 2);
        assert_eq!(report.players, 1);
        assert_eq!(report.groups, 1);
        assert_eq!(report.next_claim_id, source.next_claim_id());

        let mut index = ClaimIndex::new();
        assert_eq!(target.world_loaded("earth", &mut index), 2);
        let copied = index.get(home.id.unwrap()).unwrap();
        assert_eq!(copied.permissions(), home.permissions());
        assert_eq!(copied.children.len(), 2);
        assert_eq!(copied.children[1].greater_corner(), home.children[1].greater_corner());
        assert_eq!(target.world_loaded("mars", &mut index), 1);
        assert!(index.get(outpost.id.unwrap()).is_some());

        assert_eq!(target.get_player_data_from_storage("carol").accrued_claim_blocks, 300);
        assert_eq!(target.group_bonus_blocks("carol"), 75);
    }

    #[test]
    fn test_document_to_file_renumbers_subdivisions() {
        let docs = Arc::new(MemoryDocumentStore::new());
        let source = DocumentBackend::open(Box::new(docs.clone()), collaborators()).unwrap();
        let mut first = claim("earth", (0, 0), (40, 40), "alice");
        first.add_subdivision(claim("earth", (1, 1), (9, 9), "alice")).unwrap();
        source.write_claim_to_storage(&mut first);
        let mut second = claim("earth", (50, 50), (60, 60), "bob");
        second.add_subdivision(claim("earth", (51, 51), (52, 52), "bob")).unwrap();
        source.write_claim_to_storage(&mut second);

        // Both subdivisions carry id 0 in the document store.
        assert_eq!(first.children[0].id, Some(0));
        assert_eq!(second.children[0].id, Some(0));

        let dir = TempDir::new().unwrap();
        let target_config = ConfigSection::new().with(config::DATA_FOLDER, dir.path().to_str().unwrap());
        let target = FileBackend::open(&target_config, &mut ConfigSection::new(), collaborators()).unwrap();
        let report = migrate(&source, &target, &["earth".to_string()]);
        assert_eq!(report.claims, 2);
        assert_eq!(report.next_claim_id, 4);

        let mut index = ClaimIndex::new();
        assert_eq!(target.world_loaded("earth", &mut index), 2);
        assert_eq!(index.get(0).unwrap().children.len(), 1);
        assert_eq!(index.get(1).unwrap().children.len(), 1);
    }
}
