// Statusync - CLI
// Reconcile status snapshots against the local SQLite store

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use statusync::{
    find_entity_by_key, get_recent_import_runs, get_status_history, insert_mail_item, insert_sale,
    setup_database, ColumnOverrides, Config, Field, OutcomeKind, Pipeline, ReconciliationEngine,
    SaleDraft, UnmatchedLinePolicy,
};

#[derive(Parser, Debug)]
#[command(name = "statusync", version, about = "Bulk status reconciliation for mail, sales and line tracking")]
struct Cli {
    /// SQLite database file (overrides DATABASE_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema (safe to re-run)
    Init,

    /// Register a sale by its code
    AddSale {
        code: String,
        #[arg(long)]
        customer: Option<String>,
        #[arg(long)]
        line: Option<String>,
        #[arg(long)]
        salesperson: Option<String>,
    },

    /// Register a mail item by its tracking code
    AddMail {
        tracking_code: String,
        #[arg(long)]
        sale_id: Option<i64>,
    },

    /// Reconcile a CSV / XLSX snapshot
    Import(ImportArgs),

    /// Show the status history of one entity
    History {
        /// correo | ventas | seguimiento-linea
        #[arg(value_parser = parse_pipeline)]
        pipeline: Pipeline,
        key: String,
    },

    /// List recent import runs
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// correo | ventas | seguimiento-linea
    #[arg(value_parser = parse_pipeline)]
    pipeline: Pipeline,

    file: PathBuf,

    /// 0-based column of the business key (overrides header detection)
    #[arg(long)]
    key_col: Option<usize>,
    #[arg(long)]
    status_col: Option<usize>,
    #[arg(long)]
    description_col: Option<usize>,
    #[arg(long)]
    location_col: Option<usize>,
    #[arg(long)]
    customer_col: Option<usize>,
    #[arg(long)]
    line_col: Option<usize>,
    #[arg(long)]
    salesperson_col: Option<usize>,

    /// What to do with line rows whose sale does not exist (flag | register)
    #[arg(long)]
    line_policy: Option<UnmatchedLinePolicy>,

    /// Actor credited with recorded events (overrides RECONCILE_SYSTEM_ACTOR)
    #[arg(long)]
    system_actor: Option<Uuid>,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
}

impl ImportArgs {
    fn overrides(&self) -> ColumnOverrides {
        ColumnOverrides::new()
            .set_opt(Field::Key, self.key_col)
            .set_opt(Field::Status, self.status_col)
            .set_opt(Field::Description, self.description_col)
            .set_opt(Field::Location, self.location_col)
            .set_opt(Field::Customer, self.customer_col)
            .set_opt(Field::LineNumber, self.line_col)
            .set_opt(Field::Salesperson, self.salesperson_col)
    }
}

fn parse_pipeline(raw: &str) -> Result<Pipeline, String> {
    Pipeline::parse(raw).ok_or_else(|| {
        let known: Vec<&str> = Pipeline::ALL.iter().map(Pipeline::slug).collect();
        format!("unknown pipeline '{}' (expected one of: {})", raw, known.join(", "))
    })
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "statusync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    match cli.command {
        Command::Init => run_init(&config),
        Command::AddSale {
            code,
            customer,
            line,
            salesperson,
        } => {
            let conn = open_database(&config.database_path)?;
            let draft = SaleDraft::new(code)
                .with_customer(customer)
                .with_line_number(line)
                .with_salesperson(salesperson);
            let sale = insert_sale(&conn, &draft)?;
            println!("✓ Sale #{} registered ({})", sale.id, draft.sale_code);
            Ok(())
        }
        Command::AddMail {
            tracking_code,
            sale_id,
        } => {
            let conn = open_database(&config.database_path)?;
            let item = insert_mail_item(&conn, Some(&tracking_code), sale_id)?;
            println!("✓ Mail item #{} registered ({})", item.id, tracking_code);
            Ok(())
        }
        Command::Import(args) => {
            if let Some(policy) = args.line_policy {
                config.unmatched_line_policy = policy;
            }
            if let Some(actor) = args.system_actor {
                config.system_actor = actor;
            }
            run_import(&config, &args)
        }
        Command::History { pipeline, key } => run_history(&config, pipeline, &key),
        Command::Runs { limit } => run_list_imports(&config, limit),
    }
}

fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    setup_database(&conn).context("Failed to prepare database schema")?;
    Ok(conn)
}

fn run_init(config: &Config) -> Result<()> {
    open_database(&config.database_path)?;
    println!("✓ Database ready: {}", config.database_path.display());
    Ok(())
}

fn run_import(config: &Config, args: &ImportArgs) -> Result<()> {
    let conn = open_database(&config.database_path)?;

    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read snapshot file: {}", args.file.display()))?;
    let file_name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.file.display().to_string());

    let engine = ReconciliationEngine::from_config(config);
    let report = engine
        .reconcile_upload(&conn, args.pipeline, &file_name, &bytes, &args.overrides())
        .with_context(|| format!("Import of {} failed", args.file.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("📂 {} ({})", file_name, args.pipeline);
    println!("   {}", report.summary());

    for row in report.rows.iter().filter(|r| !r.is_accepted()) {
        let key = row.key.as_deref().unwrap_or("-");
        let detail = match &row.kind {
            OutcomeKind::Rejected { reason, status } => format!("rejected {:?} ({})", reason, status),
            OutcomeKind::Skipped { reason, raw_status } => match raw_status {
                Some(raw) => format!("skipped {:?} ('{}')", reason, raw),
                None => format!("skipped {:?}", reason),
            },
            OutcomeKind::Unregistered => "sale not registered".to_string(),
            OutcomeKind::Accepted { .. } => continue,
        };
        println!("   row {:>5}  {:<20} {}", row.row, key, detail);
    }

    println!("\n✅ {}", report.message());
    Ok(())
}

fn run_history(config: &Config, pipeline: Pipeline, key: &str) -> Result<()> {
    let conn = open_database(&config.database_path)?;

    let Some(entity) = find_entity_by_key(&conn, pipeline.entity_kind(), key)? else {
        bail!("No {} with key '{}'", pipeline.entity_kind().as_str(), key);
    };

    let events = get_status_history(&conn, entity.entity_ref(), pipeline.stream())?;
    println!("📜 {} {} ({} events)", entity.entity_ref(), key, events.len());

    for event in events {
        let actor = if event.actor_id == config.system_actor {
            "system".to_string()
        } else {
            event.actor_id.to_string()
        };
        println!(
            "   {}  {:<25} {:<36}  {}",
            event.created_at.format("%Y-%m-%d %H:%M:%S"),
            event.status.as_str(),
            actor,
            event.description
        );
    }

    Ok(())
}

fn run_list_imports(config: &Config, limit: usize) -> Result<()> {
    let conn = open_database(&config.database_path)?;

    for run in get_recent_import_runs(&conn, limit)? {
        let outcome = match &run.aborted {
            Some(code) => format!("aborted: {}", code),
            None => format!("{}/{} accepted", run.accepted, run.data_rows),
        };
        println!(
            "{}  {:<18} {:<30} {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.pipeline.slug(),
            run.source_name,
            outcome
        );
    }

    Ok(())
}
