//! lineage CLI - Command line interface for lineage_db
//!
//! Provides commands for recording character and campaign history, branching
//! and merging it, and moving characters between themes. Every command
//! prints JSON so the binary can be driven by other tools.

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use lineage_db::config::Config;
use lineage_db::{
    BranchKind, Change, Database, EdgeKind, EntityType, EquipmentStrategy, FieldKey, FieldValue,
    Hash, MergeOutcome, Metadata, NewCommit, NodeId, ThemeTransitionRequest,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lineage")]
#[command(about = "A branchable, mergeable version graph for tabletop characters")]
#[command(version)]
struct Cli {
    /// Path to the database file [default: from config, then .lineage]
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// Author recorded on new commits [default: from config]
    #[arg(short, long, global = true)]
    author: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new database
    Init,

    // === Branch Commands ===
    /// Create a new branch
    Branch {
        /// Branch name
        name: String,
        /// main, alternate or what-if
        #[arg(short, long, default_value = "alternate")]
        kind: String,
        /// Branch this one forks from
        #[arg(long, default_value = "main")]
        base: String,
        /// Commit to fork at [default: head of the base branch]
        #[arg(long)]
        from: Option<String>,
    },

    /// List all branches
    Branches,

    /// Archive a branch
    Archive {
        /// Branch name
        name: String,
    },

    /// Move a branch head forward to a descendant commit
    FastForward {
        /// Branch name
        name: String,
        /// Commit or branch reference to move to
        to: String,
    },

    // === Commit Commands ===
    /// Record a commit of field changes
    Commit {
        /// Changes as a JSON array of
        /// {entity_type, entity_id, field_name, old_value?, new_value}
        changes: String,
        /// Commit message
        #[arg(short, long)]
        message: String,
        /// Branch to commit on
        #[arg(short, long, default_value = "main")]
        branch: String,
        /// Expected parent [default: current branch head]
        #[arg(long)]
        parent: Option<String>,
    },

    /// Show commit history
    Log {
        /// Branch name
        #[arg(short, long, default_value = "main")]
        branch: String,
        /// Maximum number of commits to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show one commit
    Show {
        /// Commit or branch reference
        reference: String,
    },

    /// Show net field changes between two commits
    Diff {
        /// Base reference (e.g. main~1)
        from: String,
        /// Head reference
        #[arg(default_value = "main")]
        to: String,
    },

    /// Merge a branch into another
    Merge {
        /// Branch to merge
        source: String,
        /// Branch to merge into
        #[arg(long, default_value = "main")]
        into: String,
        /// Conflict resolutions as a JSON array of
        /// {entity_type, entity_id, field_name, value}
        #[arg(short, long)]
        resolutions: Option<String>,
        /// Commit message
        #[arg(short, long)]
        message: Option<String>,
    },

    // === Version Graph Commands ===
    /// Add a version node
    Node {
        /// Entity type (character, equipment, spell, ...)
        entity_type: String,
        /// Entity id
        entity_id: String,
        /// Theme of this snapshot
        theme: String,
        /// Snapshot fields as a JSON object
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Add (or retract) an edge between version nodes
    Edge {
        /// Source node id
        source: String,
        /// Target node id
        target: String,
        /// parent, root, owns, equipped or knows
        kind: String,
        /// Commit the edge is valid from
        #[arg(long, default_value = "main")]
        at: String,
        /// Record a tombstone ending the relationship
        #[arg(long)]
        retract: bool,
    },

    /// Show a node's lineage
    Lineage {
        /// Node id
        node: String,
    },

    /// Show a character's state at a commit
    State {
        /// Character node id
        node: String,
        /// Commit or branch reference
        #[arg(long, default_value = "main")]
        at: String,
    },

    /// Move a character into a new theme
    Transition {
        /// Character node id
        node: String,
        /// New theme
        theme: String,
        /// Chapter the transition belongs to
        #[arg(short, long)]
        chapter: String,
        /// Items as a JSON array of {node, strategy}
        #[arg(short, long)]
        items: Option<String>,
        /// Branch to commit on
        #[arg(short, long, default_value = "main")]
        branch: String,
        /// Fail unless the branch head is still this commit
        #[arg(long)]
        expect: Option<String>,
        /// Validate without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Deserialize)]
struct ChangeInput {
    entity_type: String,
    entity_id: String,
    field_name: String,
    #[serde(default)]
    old_value: serde_json::Value,
    new_value: serde_json::Value,
}

#[derive(Deserialize)]
struct ResolutionInput {
    entity_type: String,
    entity_id: String,
    field_name: String,
    value: serde_json::Value,
}

#[derive(Deserialize)]
struct ItemInput {
    node: String,
    strategy: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    init_tracing(&config.log);

    let db_path = cli.database.clone().unwrap_or_else(|| config.database.clone());
    let author = cli.author.clone().unwrap_or_else(|| config.author.clone());

    match cli.command {
        Commands::Init => {
            let db = Database::create(&db_path)?;
            let main = db.main_branch()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "message": format!("Created database at {}", db_path.display()),
                    "genesis": main.head_commit_id.to_hex()
                }),
            );
        }

        Commands::Branch {
            name,
            kind,
            base,
            from,
        } => {
            let db = open_db(&db_path)?;
            let kind: BranchKind = kind.parse()?;
            let base = db.find_branch(&base)?;
            let from = match from {
                Some(reference) => resolve_ref(&db, &reference)?,
                None => base.head_commit_id,
            };
            let branch = db.create_branch(&name, kind, Some(&base.id), from)?;
            db.sync()?;
            output(&cli.format, &serde_json::to_value(&branch)?);
        }

        Commands::Branches => {
            let db = open_db(&db_path)?;
            let branches = db.list_branches();
            output(
                &cli.format,
                &serde_json::json!({
                    "count": branches.len(),
                    "branches": branches
                }),
            );
        }

        Commands::Archive { name } => {
            let db = open_db(&db_path)?;
            let branch = db.find_branch(&name)?;
            let branch = db.archive_branch(&branch.id)?;
            db.sync()?;
            output(&cli.format, &serde_json::to_value(&branch)?);
        }

        Commands::FastForward { name, to } => {
            let db = open_db(&db_path)?;
            let branch = db.find_branch(&name)?;
            let target = resolve_ref(&db, &to)?;
            let branch = db.fast_forward(&branch.id, target)?;
            db.sync()?;
            output(&cli.format, &serde_json::to_value(&branch)?);
        }

        Commands::Commit {
            changes,
            message,
            branch,
            parent,
        } => {
            let db = open_db(&db_path)?;
            let branch = db.find_branch(&branch)?;
            let parent = match parent {
                Some(reference) => resolve_ref(&db, &reference)?,
                None => branch.head_commit_id,
            };
            let changes = parse_changes(&changes)?;
            let commit = db.create_commit(NewCommit::new(
                parent,
                branch.id.clone(),
                changes,
                author,
                message,
            ))?;
            db.sync()?;
            output(&cli.format, &serde_json::to_value(&commit)?);
        }

        Commands::Log { branch, limit } => {
            let db = open_db(&db_path)?;
            let branch = db.find_branch(&branch)?;
            let commits = db.log(&branch.id, limit)?;
            let items: Vec<_> = commits
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.id.to_hex(),
                        "short": c.id.short(),
                        "parents": c.parents,
                        "author": c.author,
                        "message": c.message,
                        "timestamp": c.timestamp,
                        "changes": c.changes.len()
                    })
                })
                .collect();
            output(
                &cli.format,
                &serde_json::json!({
                    "branch": branch.name,
                    "count": items.len(),
                    "commits": items
                }),
            );
        }

        Commands::Show { reference } => {
            let db = open_db(&db_path)?;
            let id = resolve_ref(&db, &reference)?;
            let commit = db.get_commit(&id)?;
            output(&cli.format, &serde_json::to_value(&commit)?);
        }

        Commands::Diff { from, to } => {
            let db = open_db(&db_path)?;
            let from_hash = resolve_ref(&db, &from)?;
            let to_hash = resolve_ref(&db, &to)?;
            let diff = db.diff(from_hash, to_hash)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "from": from_hash.to_hex(),
                    "to": to_hash.to_hex(),
                    "count": diff.len(),
                    "changes": diff.changes
                }),
            );
        }

        Commands::Merge {
            source,
            into,
            resolutions,
            message,
        } => {
            let db = open_db(&db_path)?;
            let target = db.find_branch(&into)?;
            let source = db.find_branch(&source)?;
            let resolutions = match resolutions {
                Some(json) => parse_resolutions(&json)?,
                None => HashMap::new(),
            };
            let message =
                message.unwrap_or_else(|| format!("Merge {} into {}", source.name, target.name));

            let outcome =
                match db.merge_branches(&target.id, &source.id, resolutions, &author, &message) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        if let Some(conflicts) = e.conflicts() {
                            output(
                                &cli.format,
                                &serde_json::json!({
                                    "status": "conflict",
                                    "conflicts": conflicts
                                }),
                            );
                        }
                        return Err(e.into());
                    }
                };
            db.sync()?;

            let result = match &outcome {
                MergeOutcome::UpToDate { head } => {
                    serde_json::json!({ "status": "up_to_date", "head": head.to_hex() })
                }
                MergeOutcome::FastForward { from, to } => serde_json::json!({
                    "status": "fast_forward",
                    "from": from.to_hex(),
                    "to": to.to_hex()
                }),
                MergeOutcome::Merged(commit) => serde_json::json!({
                    "status": "merged",
                    "commit": commit
                }),
            };
            output(&cli.format, &result);
        }

        Commands::Node {
            entity_type,
            entity_id,
            theme,
            metadata,
        } => {
            let db = open_db(&db_path)?;
            let entity_type: EntityType = entity_type.parse()?;
            let metadata: Metadata = match metadata {
                Some(json) => serde_json::from_str::<HashMap<String, serde_json::Value>>(&json)
                    .context("metadata must be a JSON object")?
                    .into_iter()
                    .map(|(k, v)| (k, FieldValue::from(v)))
                    .collect(),
                None => Metadata::new(),
            };
            let node = db.add_node_with_metadata(&entity_id, entity_type, &theme, metadata)?;
            db.sync()?;
            output(&cli.format, &serde_json::to_value(&node)?);
        }

        Commands::Edge {
            source,
            target,
            kind,
            at,
            retract,
        } => {
            let db = open_db(&db_path)?;
            let kind: EdgeKind = kind.parse()?;
            let at = resolve_ref(&db, &at)?;
            let (source, target) = (NodeId::new(source), NodeId::new(target));
            let edge = if retract {
                db.retract_edge(&source, &target, kind, at)?
            } else {
                db.add_edge(&source, &target, kind, at)?
            };
            db.sync()?;
            output(&cli.format, &serde_json::to_value(&edge)?);
        }

        Commands::Lineage { node } => {
            let db = open_db(&db_path)?;
            let chain = db.lineage(&NodeId::new(node))?;
            output(
                &cli.format,
                &serde_json::json!({
                    "count": chain.len(),
                    "nodes": chain
                }),
            );
        }

        Commands::State { node, at } => {
            let db = open_db(&db_path)?;
            let at = resolve_ref(&db, &at)?;
            let state = db.resolve_current_state(&NodeId::new(node), at)?;
            output(&cli.format, &serde_json::to_value(&state)?);
        }

        Commands::Transition {
            node,
            theme,
            chapter,
            items,
            branch,
            expect,
            dry_run,
        } => {
            let db = open_db(&db_path)?;
            let branch = db.find_branch(&branch)?;
            let mut request =
                ThemeTransitionRequest::new(NodeId::new(node), theme, chapter, branch.id, author);
            if let Some(json) = items {
                let items: Vec<ItemInput> =
                    serde_json::from_str(&json).context("items must be a JSON array")?;
                for item in items {
                    let strategy: EquipmentStrategy = item.strategy.parse()?;
                    request = request.with_item(NodeId::new(item.node), strategy);
                }
            }
            if let Some(reference) = expect {
                request = request.expecting(resolve_ref(&db, &reference)?);
            }

            if dry_run {
                let plan = db.plan_transition(&request)?;
                let items: Vec<_> = plan
                    .items
                    .iter()
                    .map(|i| {
                        serde_json::json!({
                            "entity_id": i.held.node.entity_id,
                            "node": i.held.node.id,
                            "strategy": i.strategy,
                            "equipped": i.equipped
                        })
                    })
                    .collect();
                output(
                    &cli.format,
                    &serde_json::json!({
                        "status": "valid",
                        "head": plan.head.to_hex(),
                        "character": plan.character.node.id,
                        "items": items
                    }),
                );
            } else {
                let report = db.transition_theme(&request)?;
                db.sync()?;
                output(&cli.format, &serde_json::to_value(&report)?);
            }
        }
    }

    Ok(())
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_db(path: &Path) -> anyhow::Result<Database> {
    Database::open(path).with_context(|| {
        format!(
            "No database at {} (run `lineage init` first)",
            path.display()
        )
    })
}

fn output(format: &OutputFormat, value: &serde_json::Value) {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string(value),
        OutputFormat::Text => serde_json::to_string_pretty(value),
    };
    match rendered {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to render output: {}", e),
    }
}

/// Resolve `<branch>`, `<branch>~N` (N first-parent steps back) or a full
/// commit hash
fn resolve_ref(db: &Database, reference: &str) -> anyhow::Result<Hash> {
    if let Ok(hash) = Hash::from_hex(reference) {
        return Ok(hash);
    }

    let (name, steps) = match reference.split_once('~') {
        Some((name, n)) => (name, n.parse::<usize>().context("invalid ~N suffix")?),
        None => (reference, 0),
    };
    let branch = db
        .find_branch(name)
        .map_err(|_| anyhow!("Invalid reference: {}", reference))?;

    let mut id = branch.head_commit_id;
    for _ in 0..steps {
        let commit = db.get_commit(&id)?;
        id = *commit
            .parents
            .first()
            .ok_or_else(|| anyhow!("Not enough commits in history of {}", name))?;
    }
    Ok(id)
}

fn parse_changes(json: &str) -> anyhow::Result<Vec<Change>> {
    let inputs: Vec<ChangeInput> =
        serde_json::from_str(json).context("changes must be a JSON array")?;
    if inputs.is_empty() {
        bail!("at least one change is required");
    }
    inputs
        .into_iter()
        .map(|c| {
            Ok(Change::new(
                c.entity_type.parse::<EntityType>()?,
                c.entity_id,
                c.field_name,
                c.old_value,
                c.new_value,
            ))
        })
        .collect()
}

fn parse_resolutions(json: &str) -> anyhow::Result<HashMap<FieldKey, FieldValue>> {
    let inputs: Vec<ResolutionInput> =
        serde_json::from_str(json).context("resolutions must be a JSON array")?;
    inputs
        .into_iter()
        .map(|r| {
            let key = FieldKey::new(r.entity_type.parse::<EntityType>()?, r.entity_id, r.field_name);
            Ok((key, FieldValue::from(r.value)))
        })
        .collect()
}
