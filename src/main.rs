use anyhow::{bail, Context, Result};
use canvas_dashboard_lib::layout::find_overlaps;
use canvas_dashboard_lib::{init_tracing, AutosaveCoordinator, Database, DashboardStore};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

/// Inspect and maintain dashboards stored in a canvas database.
#[derive(Parser, Debug)]
#[command(name = "canvas", version)]
struct Args {
    /// SQLite database holding the dashboard documents.
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List dashboards, most recently updated first.
    List,
    /// Print one dashboard as JSON.
    Show { id: String },
    /// Re-run the auto-layout for a dashboard and save it.
    Reflow { id: String },
    /// Print the settings, or merge a JSON object into them.
    Settings { update: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_dir = args
        .db
        .parent()
        .map(|parent| parent.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    init_tracing(&log_dir).context("initialise logging")?;

    let db = Arc::new(Database::new(&args.db).with_context(|| format!("open {}", args.db.display()))?);
    let settings = db.get_settings()?;

    match args.command {
        Command::List => {
            for summary in db.list_dashboards(&settings)? {
                let updated = summary
                    .updated_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!("{}\t{}\t{} widgets\t{}", summary.id, summary.name, summary.widget_count, updated);
            }
        }
        Command::Show { id } => {
            let Some(dashboard) = db.load_dashboard(&id, &settings)? else {
                bail!("dashboard {} not found", id);
            };
            println!("{}", serde_json::to_string_pretty(&dashboard)?);
            for (left, right) in find_overlaps(&dashboard.widgets) {
                eprintln!("warning: widgets {} and {} overlap", left, right);
            }
        }
        Command::Reflow { id } => {
            let autosave = AutosaveCoordinator::new(db.clone(), settings.clone());
            let Some(dashboard) = autosave.load(&id).await? else {
                bail!("dashboard {} not found", id);
            };
            let mut store = DashboardStore::from_dashboard(dashboard, settings.grid_cols);
            store.reflow()?;
            if let Some(saved_id) = autosave
                .save_now(store.dashboard().clone())
                .await
                .with_context(|| format!("save dashboard {}", id))?
            {
                store.set_document_id(&saved_id);
            }
            println!("reflowed {} widgets in {}", store.widgets().len(), store.dashboard().id);
        }
        Command::Settings { update } => {
            let settings = match update {
                Some(raw) => {
                    let patch: serde_json::Value = serde_json::from_str(&raw).context("parse settings JSON")?;
                    db.update_settings(patch)?
                }
                None => settings,
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }
    Ok(())
}
