use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use landclaim_model::{AllWorlds, ClaimId, Collaborators, StaticPermissions};
use landclaim_storage::config::{self, ConfigSection};
use landclaim_storage::{migrate, open_backend, BackendKind, ClaimBackend, DataStore};

#[derive(Parser)]
#[command(name = "landclaim", about = "Inspect and maintain land claim storage")]
pub struct Args {
    /// Storage backend: "file", "postgres" or "memory"
    #[arg(long, env = "STORAGE", default_value = "file")]
    pub storage: String,

    /// Data folder for the file backend (overrides the config file)
    #[arg(long, env = "DATA_FOLDER")]
    pub data_folder: Option<PathBuf>,

    /// JSON file with backend settings (Host, Port, Database, ...)
    #[arg(long, env = "STORAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write the resolved settings back to the config file
    #[arg(long)]
    pub save_config: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Load a world's claims and list them
    Load { world: String },
    /// Show a player's claim blocks
    Player {
        name: String,
        /// Permissions the player holds, for group bonuses
        #[arg(long = "holds")]
        holds: Vec<String>,
    },
    /// Set the bonus blocks granted to everyone holding a group permission
    GroupBonus { group: String, amount: i32 },
    /// Show the next claim id, or set it
    NextId {
        #[arg(long)]
        set: Option<ClaimId>,
    },
    /// Copy claims, players and group bonuses into another backend
    Migrate {
        /// Target backend
        #[arg(long)]
        to: String,
        /// Settings file for the target backend
        #[arg(long)]
        to_config: Option<PathBuf>,
        /// Data folder for a file target
        #[arg(long)]
        to_data_folder: Option<PathBuf>,
        /// Worlds whose claims are copied
        #[arg(long = "world", required = true)]
        worlds: Vec<String>,
    },
}

fn load_section(path: Option<&Path>, data_folder: Option<&Path>) -> Result<ConfigSection> {
    let mut section = match path {
        Some(path) => ConfigSection::load(path)?,
        None => ConfigSection::new(),
    };
    if let Some(folder) = data_folder {
        section.set(config::DATA_FOLDER, folder.display().to_string());
    }
    Ok(section)
}

fn open(
    kind: BackendKind,
    source: &ConfigSection,
    save_to: Option<&Path>,
    collaborators: Collaborators,
) -> Result<Box<dyn ClaimBackend>> {
    let mut target = source.clone();
    let backend = open_backend(kind, source, &mut target, collaborators)?;
    if let Some(path) = save_to {
        target
            .save(path)
            .with_context(|| format!("Failed to save settings to {}", path.display()))?;
        log::info!("Saved storage settings to {}", path.display());
    }
    Ok(backend)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let kind: BackendKind = args.storage.parse()?;
    let source = load_section(args.config.as_deref(), args.data_folder.as_deref())?;
    let save_to = if args.save_config { args.config.as_deref() } else { None };

    let mut permissions = StaticPermissions::new();
    if let Command::Player { name, holds } = &args.command {
        for permission in holds {
            permissions.grant(name, permission.clone());
        }
    }
    let collaborators = Collaborators::new(Arc::new(permissions), Arc::new(AllWorlds));

    println!("Storage: {:?}", kind);
    let backend = open(kind, &source, save_to, collaborators.clone())?;

    match args.command {
        Command::Load { world } => {
            let mut store = DataStore::new(backend);
            let loaded = store.world_loaded(&world);
            println!("{} claims in {}", loaded, world);
            for claim in store.claims().in_world(&world) {
                let owner = if claim.is_admin_claim() { "(admin)" } else { claim.owner_name.as_str() };
                println!(
                    "  #{} {} .. {} owner={} subdivisions={}{}",
                    claim.id.map_or_else(|| "?".to_string(), |id| id.to_string()),
                    claim.lesser_corner(),
                    claim.greater_corner(),
                    owner,
                    claim.children.len(),
                    if claim.never_delete { " never-delete" } else { "" }
                );
            }
            store.close()?;
        }
        Command::Player { name, .. } => {
            let mut store = DataStore::new(backend);
            let data = store.player_data(&name).clone();
            let group_bonus = store.backend().group_bonus_blocks(&name);
            println!("Player {}", data.player_name);
            if let Some(last_login) = data.last_login {
                println!("  last login:  {}", last_login);
            }
            println!("  accrued:     {}", data.accrued_claim_blocks);
            println!("  bonus:       {}", data.bonus_claim_blocks);
            println!("  group bonus: {}", group_bonus);
            println!("  total:       {}", store.total_claim_blocks(&name));
            store.close()?;
        }
        Command::GroupBonus { group, amount } => {
            backend.save_group_bonus_blocks(&group, amount);
            println!("Group {} now grants {} bonus blocks", group, amount);
            backend.close()?;
        }
        Command::NextId { set } => {
            if let Some(next) = set {
                backend.set_next_claim_id(next);
            }
            println!("Next claim id: {}", backend.next_claim_id());
            backend.close()?;
        }
        Command::Migrate {
            to,
            to_config,
            to_data_folder,
            worlds,
        } => {
            let target_kind: BackendKind = to.parse()?;
            let target_source = load_section(to_config.as_deref(), to_data_folder.as_deref())?;
            let target = open(target_kind, &target_source, None, collaborators)?;

            println!("Migrating {:?} -> {:?}", kind, target_kind);
            let report = migrate(backend.as_ref(), target.as_ref(), &worlds);
            println!(
                "Copied {} claims ({} subdivisions), {} players, {} group bonuses; next claim id {}",
                report.claims,
                report.subdivisions,
                report.players,
                report.groups,
                report.next_claim_id
            );
            target.close()?;
            backend.close()?;
        }
    }

    Ok(())
}
