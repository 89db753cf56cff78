use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};

use sprout::persist::{FsDocumentStore, Gatekeeper};
use sprout::reconcile::{FsNoteVault, NoteVault, Reconciler};
use sprout::{CardPayload, CardStore, Grade, Settings, SyncReport};

#[derive(Parser)]
#[command(name = "sprout-cli", about = "Sync and review flashcards embedded in notes", version)]
struct Cli {
    /// Vault directory holding the notes
    #[arg(long, global = true, default_value = ".")]
    vault: PathBuf,

    /// Persisted document path (default: <vault>/.sprout/sprout.json)
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile every note in the vault
    Sync,

    /// Reconcile a single note
    SyncNote {
        /// Vault-relative note path
        path: String,
    },

    /// List cards due for review
    Due,

    /// Grade a card
    Grade {
        id: String,
        grade: CliGrade,
    },

    /// Suspend a card (scheduling frozen, excluded from review)
    Suspend { id: String },

    /// Unsuspend a card, restoring its pre-suspension state
    Unsuspend { id: String },

    /// Reset scheduling of every card to new-card defaults
    ResetScheduling,

    /// Print a fresh anchor line to paste into a note
    NewAnchor,

    /// Show store statistics
    Stats,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliGrade {
    Again,
    Hard,
    Good,
    Easy,
}

impl From<CliGrade> for Grade {
    fn from(grade: CliGrade) -> Self {
        match grade {
            CliGrade::Again => Grade::Again,
            CliGrade::Hard => Grade::Hard,
            CliGrade::Good => Grade::Good,
            CliGrade::Easy => Grade::Easy,
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let data_path = cli
        .data
        .clone()
        .unwrap_or_else(|| cli.vault.join(".sprout").join("sprout.json"));
    let gatekeeper = Gatekeeper::new(FsDocumentStore::new(data_path));
    let (settings, mut store) = gatekeeper.load().context("loading persisted document")?;

    match cli.command {
        Command::Sync => {
            let vault = FsNoteVault::new(cli.vault.clone());
            let report = Reconciler::new(&mut store, settings.delimiter)
                .sync_vault(&vault, Utc::now())
                .context("syncing vault")?;
            print_report(&report);
            save(&gatekeeper, &mut store, &settings)?;
        }
        Command::SyncNote { path } => {
            let vault = FsNoteVault::new(cli.vault.clone());
            let content = vault
                .read_note(&path)
                .with_context(|| format!("reading note {}", path))?;
            let report =
                Reconciler::new(&mut store, settings.delimiter).sync_note(&path, &content, Utc::now());
            print_report(&report);
            save(&gatekeeper, &mut store, &settings)?;
        }
        Command::Due => {
            let now = Utc::now();
            for (card, state) in store.due_cards(now) {
                println!(
                    "{}  [{}]  due {}  {}",
                    card.id,
                    card.payload.type_name(),
                    state.due.format("%Y-%m-%d %H:%M"),
                    summary(card)
                );
            }
        }
        Command::Grade { id, grade } => {
            let state = store
                .grade(&id, grade.into(), &settings.scheduler, Utc::now())
                .with_context(|| format!("grading card {}", id))?;
            println!(
                "{}: stage {:?}, next due {}",
                id,
                state.stage,
                state.due.format("%Y-%m-%d %H:%M")
            );
            save(&gatekeeper, &mut store, &settings)?;
        }
        Command::Suspend { id } => {
            store
                .suspend(&id, Utc::now())
                .with_context(|| format!("suspending card {}", id))?;
            println!("{}: suspended", id);
            save(&gatekeeper, &mut store, &settings)?;
        }
        Command::Unsuspend { id } => {
            let state = store
                .unsuspend(&id)
                .with_context(|| format!("unsuspending card {}", id))?;
            println!("{}: back to stage {:?}", id, state.stage);
            save(&gatekeeper, &mut store, &settings)?;
        }
        Command::ResetScheduling => {
            let count = store.reset_all_scheduling(Utc::now());
            println!("Reset scheduling of {} cards", count);
            save(&gatekeeper, &mut store, &settings)?;
        }
        Command::NewAnchor => {
            println!("^sprout-{}", sprout::cards::new_card_id());
        }
        Command::Stats => {
            let analytics = store.analytics();
            println!("Cards: {}", store.card_count());
            println!("Quarantined: {}", store.quarantine_entries().len());
            println!("Due now: {}", store.due_cards(Utc::now()).len());
            println!("Reviews: {}", analytics.total_reviews);
            println!("Lapses: {}", analytics.total_lapses);
            println!("Tags: {}", store.tag_registry().len());
        }
    }

    Ok(())
}

fn save(
    gatekeeper: &Gatekeeper<FsDocumentStore>,
    store: &mut CardStore,
    settings: &Settings,
) -> anyhow::Result<()> {
    if let Err(e) = gatekeeper.save(store, settings, Utc::now()) {
        bail!("save failed: {}", e);
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!(
        "Added {}, updated {}, removed {}, quarantined {}, tags deleted {}",
        report.added, report.updated, report.removed, report.quarantined, report.tags_deleted
    );
    for id in &report.quarantined_ids {
        println!("  quarantined: {}", id);
    }
}

fn summary(card: &sprout::CardRecord) -> String {
    let text = match &card.payload {
        CardPayload::Basic { question, .. } | CardPayload::Reversed { question, .. } => question,
        CardPayload::Cloze { text } => text,
        CardPayload::MultipleChoice { stem, .. } | CardPayload::OrderedQuestion { stem, .. } => stem,
        CardPayload::ImageOcclusion { image } => image,
        CardPayload::ClozeChild { .. } | CardPayload::ImageOcclusionChild { .. } => {
            return card
                .title
                .clone()
                .unwrap_or_else(|| format!("child of {}", card.parent_id.as_deref().unwrap_or("?")));
        }
    };
    text.lines().next().unwrap_or("").chars().take(60).collect()
}
