use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod access;
mod config;
mod db;
mod export;
mod grades;
mod ingest;
mod models;
mod report;

use access::{Role, ViewerContext};
use config::{current_cycle, Config};

#[derive(Parser)]
#[command(name = "boleta")]
#[command(about = "Grade aggregation and report cards for the school management system", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Viewer {
    /// Role of the person running the command (e.g. ADMIN_ROLE, PADRE_ROLE)
    #[arg(long)]
    viewer_role: Role,
    #[arg(long)]
    viewer_id: String,
}

impl Viewer {
    fn context(&self) -> ViewerContext {
        ViewerContext::new(self.viewer_role, self.viewer_id.clone())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate a saved grade payload without touching the database
    Summarize {
        #[arg(long)]
        json: PathBuf,
    },
    #[command(flatten)]
    Store(StoreCommand),
}

#[derive(Subcommand)]
enum StoreCommand {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import grade entries from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record a new grade entry
    Record {
        #[command(flatten)]
        viewer: Viewer,
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        subject: Uuid,
        #[arg(long)]
        course: Option<Uuid>,
        #[arg(long)]
        cycle: Option<String>,
        #[arg(long)]
        bimester: i64,
        #[arg(long)]
        zone: f64,
        #[arg(long)]
        exam: f64,
        #[arg(long)]
        remarks: Option<String>,
    },
    /// Correct the scores of an existing grade entry
    Correct {
        #[command(flatten)]
        viewer: Viewer,
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        zone: f64,
        #[arg(long)]
        exam: f64,
        #[arg(long)]
        remarks: Option<String>,
    },
    /// Delete a grade entry
    Remove {
        #[command(flatten)]
        viewer: Viewer,
        #[arg(long)]
        id: Uuid,
    },
    /// Print the aggregated grades of a student as JSON
    Summary {
        #[command(flatten)]
        viewer: Viewer,
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        cycle: Option<String>,
    },
    /// Preview or download a student's boleta
    Boleta {
        #[command(flatten)]
        viewer: Viewer,
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        cycle: Option<String>,
        /// Print a markdown preview instead of downloading the PDF
        #[arg(long)]
        preview: bool,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Summarize { json } => {
            let payload = std::fs::read_to_string(&json)
                .with_context(|| format!("failed to read {}", json.display()))?;
            let entries = ingest::parse_payload(&payload)?;
            let result = grades::aggregate(&entries);
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::Store(command) => run_store_command(command).await,
    }
}

async fn run_store_command(command: StoreCommand) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match command {
        StoreCommand::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        StoreCommand::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        StoreCommand::Import { csv } => {
            let written = db::import_csv(&pool, &csv).await?;
            println!("Wrote {written} grade entries from {}.", csv.display());
        }
        StoreCommand::Record {
            viewer,
            student,
            subject,
            course,
            cycle,
            bimester,
            zone,
            exam,
            remarks,
        } => {
            let viewer = viewer.context();
            if !access::can_manage_grades(&viewer) {
                anyhow::bail!("{} may not record grades", viewer.role);
            }
            let cycle = cycle.unwrap_or_else(current_cycle);
            let scope = db::fetch_visibility_scope(&pool, &viewer, &cycle).await?;
            if !access::can_grade_subject(&viewer, &scope, &subject.to_string()) {
                anyhow::bail!("{} may not record grades for subject {subject}", viewer.role);
            }

            let entry = db::NewGradeEntry {
                student_id: student,
                subject_id: subject,
                course_id: course,
                cycle,
                bimester,
                zone_score: zone,
                exam_score: exam,
                remarks,
            };
            let id = db::create_grade_entry(&pool, &entry).await?;
            println!("Recorded grade entry {id} (total {}).", zone + exam);
        }
        StoreCommand::Correct {
            viewer,
            id,
            zone,
            exam,
            remarks,
        } => {
            let viewer = viewer.context();
            let existing = db::fetch_grade_entry(&pool, id)
                .await?
                .with_context(|| format!("grade entry {id} not found"))?;
            let scope = db::fetch_visibility_scope(&pool, &viewer, &existing.cycle).await?;
            if !access::can_edit_entry(&viewer, &scope, &existing) {
                anyhow::bail!("{} may not correct grade entry {id}", viewer.role);
            }

            db::update_grade_entry(&pool, &existing, zone, exam, remarks).await?;
            println!("Corrected grade entry {id} (total {}).", zone + exam);
        }
        StoreCommand::Remove { viewer, id } => {
            let viewer = viewer.context();
            if !access::can_delete_grades(&viewer) {
                anyhow::bail!("{} may not delete grade entries", viewer.role);
            }

            if db::delete_grade_entry(&pool, id).await? {
                println!("Deleted grade entry {id}.");
            } else {
                println!("No grade entry {id} to delete.");
            }
        }
        StoreCommand::Summary {
            viewer,
            student,
            cycle,
        } => {
            let cycle = cycle.unwrap_or_else(current_cycle);
            let entries = visible_student_entries(&pool, &viewer.context(), student, &cycle).await?;
            let result = grades::aggregate(&entries);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        StoreCommand::Boleta {
            viewer,
            student,
            cycle,
            preview,
            out,
        } => {
            let cycle = cycle.unwrap_or_else(current_cycle);
            let entries = visible_student_entries(&pool, &viewer.context(), student, &cycle).await?;
            let result = grades::aggregate(&entries);
            let student_info = db::fetch_student(&pool, student, &cycle)
                .await?
                .with_context(|| format!("student {student} not found"))?;

            if preview {
                let today = chrono::Utc::now().date_naive();
                print!("{}", report::build_preview(&student_info, &cycle, &result, today));
                return Ok(());
            }

            let renderer_url = config.renderer_url.clone().ok_or(export::ExportError::NotConfigured)?;
            let exporter = export::HttpPdfExporter::new(renderer_url);
            let document = export::export_document(&exporter, &result, &student_info, &cycle)
                .await
                .context("failed to generate the boleta")?;

            let path = out.join(&document.file_name);
            std::fs::write(&path, &document.bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Boleta written to {} ({}).", path.display(), document.content_type);
        }
    }

    Ok(())
}

/// Loads one student's entries for a cycle and narrows them to what the
/// viewer is allowed to see.
async fn visible_student_entries(
    pool: &PgPool,
    viewer: &ViewerContext,
    student: Uuid,
    cycle: &str,
) -> anyhow::Result<Vec<models::GradeEntry>> {
    let scope = db::fetch_visibility_scope(pool, viewer, cycle).await?;
    if !access::can_view_report(viewer, &scope, &student.to_string()) {
        anyhow::bail!("{} may not view grades of student {student}", viewer.role);
    }

    let entries = db::fetch_grade_entries(pool, student, cycle).await?;
    let visible = access::visible_entries(viewer, &scope, &entries);
    if visible.len() < entries.len() {
        warn!(
            hidden = entries.len() - visible.len(),
            "some grade entries are outside the viewer's scope"
        );
    }
    info!(%student, cycle, entries = visible.len(), "loaded grade entries");
    Ok(visible)
}
