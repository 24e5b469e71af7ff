//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use domainscout_core::persist::load_domain_plans;
use domainscout_core::{HttpEmbedder, ProgressReporter, RunOutcome, RunSummary, run_pipeline};
use domainscout_shared::{
    AppConfig, ContentBlock, ReviewStatus, SourceDocument, init_config, load_config,
    validate_api_key,
};
use domainscout_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// domainscout: consolidate domain concepts across parsed documents.
#[derive(Parser)]
#[command(
    name = "domainscout",
    version,
    about = "Discover canonical domains across parsed documents and curate borderline merges.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database path, overriding `storage.db_path` from the config file.
    #[arg(long, global = true, env = "DOMAINSCOUT_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Register a parsed document and store its content blocks.
    Import {
        /// Document identifier.
        #[arg(long)]
        pdf_id: String,

        /// JSON file holding an array of content blocks.
        #[arg(long)]
        blocks: PathBuf,

        /// Path of the original document (defaults to the blocks file).
        #[arg(long)]
        source: Option<String>,
    },

    /// Remove a document and its content blocks.
    Remove {
        /// Document identifier.
        #[arg(long)]
        pdf_id: String,
    },

    /// Run domain discovery over all imported documents.
    Run,

    /// List discovered domains with their aliases and sources.
    Domains {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Print pending external naming requests as JSON.
    NamingRequests,

    /// Human review of borderline merges.
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Review queue subcommands.
#[derive(Subcommand)]
pub(crate) enum ReviewAction {
    /// List review items, oldest first.
    List {
        /// Only show items in this state.
        #[arg(long, value_parser = parse_status)]
        status: Option<ReviewStatus>,
    },
    /// Mark a pair as the same domain.
    Accept { review_id: String },
    /// Mark a pair as distinct. Later runs never merge it.
    Reject { review_id: String },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Create a default config file at ~/.domainscout/domainscout.toml.
    Init,
    /// Show the current configuration.
    Show,
}

fn parse_status(s: &str) -> std::result::Result<ReviewStatus, String> {
    s.parse().map_err(|e: domainscout_shared::DomainScoutError| e.to_string())
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Initialize tracing-subscriber based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "domainscout=info",
        1 => "domainscout=debug",
        _ => "domainscout=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().with_env_filter(env_filter).json().init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Route a parsed CLI command to its handler.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let db = cli.db;
    match cli.command {
        Command::Import {
            pdf_id,
            blocks,
            source,
        } => cmd_import(db, &pdf_id, &blocks, source).await,
        Command::Remove { pdf_id } => cmd_remove(db, &pdf_id).await,
        Command::Run => cmd_run(db).await,
        Command::Domains { json } => cmd_domains(db, json).await,
        Command::NamingRequests => cmd_naming_requests(db).await,
        Command::Review { action } => match action {
            ReviewAction::List { status } => cmd_review_list(db, status).await,
            ReviewAction::Accept { review_id } => {
                cmd_review_resolve(db, &review_id, ReviewStatus::Accepted).await
            }
            ReviewAction::Reject { review_id } => {
                cmd_review_resolve(db, &review_id, ReviewStatus::Rejected).await
            }
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Load config and apply the `--db` override.
fn resolve_config(db: Option<PathBuf>) -> Result<AppConfig> {
    let mut config = load_config()?;
    if let Some(path) = db {
        config.storage.db_path = path.to_string_lossy().into_owned();
    }
    Ok(config)
}

async fn open_storage(db: Option<PathBuf>) -> Result<Storage> {
    let config = resolve_config(db)?;
    Ok(Storage::open(Path::new(&config.storage.db_path)).await?)
}

async fn open_storage_readonly(db: Option<PathBuf>) -> Result<Option<Storage>> {
    let config = resolve_config(db)?;
    let path = Path::new(&config.storage.db_path);
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(Storage::open_readonly(path).await?))
}

/// Hex SHA-256 of the imported file contents.
fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Parse a blocks file and check every block belongs to `pdf_id`.
fn parse_blocks(bytes: &[u8], pdf_id: &str) -> Result<Vec<ContentBlock>> {
    let blocks: Vec<ContentBlock> =
        serde_json::from_slice(bytes).wrap_err("blocks file must be a JSON array of content blocks")?;
    if let Some(stray) = blocks.iter().find(|b| b.pdf_id != pdf_id) {
        return Err(eyre!(
            "block {} belongs to '{}', not '{pdf_id}'",
            stray.block_id,
            stray.pdf_id
        ));
    }
    Ok(blocks)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_import(
    db: Option<PathBuf>,
    pdf_id: &str,
    blocks_path: &Path,
    source: Option<String>,
) -> Result<()> {
    let bytes = std::fs::read(blocks_path)
        .wrap_err_with(|| format!("failed to read {}", blocks_path.display()))?;
    let checksum = checksum(&bytes);
    let blocks = parse_blocks(&bytes, pdf_id)?;

    let storage = open_storage(db).await?;
    let sources = storage.sources();
    if sources.get_document(pdf_id).await?.is_some() {
        return Err(eyre!("document '{pdf_id}' is already imported"));
    }
    if let Some(existing) = sources.find_by_checksum(&checksum).await? {
        return Err(eyre!(
            "identical content already imported as '{}'",
            existing.pdf_id
        ));
    }

    let doc = SourceDocument {
        pdf_id: pdf_id.to_string(),
        file_path: source.unwrap_or_else(|| blocks_path.to_string_lossy().into_owned()),
        checksum,
        ingested_at: Utc::now(),
    };
    sources.insert_document(&doc).await?;
    let inserted = sources.insert_blocks(&blocks).await?;
    info!(pdf_id, blocks = inserted, "imported document");

    println!("Imported '{pdf_id}' with {inserted} blocks.");
    Ok(())
}

async fn cmd_remove(db: Option<PathBuf>, pdf_id: &str) -> Result<()> {
    let storage = open_storage(db).await?;
    if storage.sources().get_document(pdf_id).await?.is_none() {
        return Err(eyre!("document not found: {pdf_id}"));
    }
    storage.sources().delete_document(pdf_id).await?;
    println!("Removed '{pdf_id}'. Run `domainscout run` to rebuild domains.");
    Ok(())
}

async fn cmd_run(db: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(db)?;
    let api_key = validate_api_key(&config)?;
    let embedder = HttpEmbedder::new(&config.embedding, api_key)?;

    info!(model = %config.embedding.model, "starting discovery run");
    let reporter = CliProgress::new();
    let outcome = run_pipeline(&config, &embedder, &reporter).await;
    reporter.spinner.finish_and_clear();

    match outcome? {
        RunOutcome::NothingToDo(reason) => {
            println!("Nothing to do: {reason}.");
        }
        RunOutcome::Completed(summary) => print_run_summary(&summary),
    }
    Ok(())
}

fn print_run_summary(summary: &RunSummary) {
    println!();
    println!("  Discovery run complete.");
    println!("  Documents:        {}", summary.documents);
    println!("  Candidates:       {}", summary.candidates);
    println!("  Candidate pairs:  {}", summary.candidate_pairs);
    println!("  Scored pairs:     {}", summary.similarity_pairs);
    println!("  Domains:          {}", summary.domains);
    println!(
        "  Review items:     {} new, {} already queued",
        summary.review_items_added, summary.review_items_existing
    );
    println!("  Evidence rows:    {}", summary.similarity_rows);
    if summary.naming_requests > 0 {
        println!(
            "  Naming requests:  {} (see `domainscout naming-requests`)",
            summary.naming_requests
        );
    }
    println!("  Embedding tokens: {}", summary.embedding_tokens);
    println!("  Time:             {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

async fn cmd_domains(db: Option<PathBuf>, json: bool) -> Result<()> {
    let Some(storage) = open_storage_readonly(db).await? else {
        println!("No database yet. Import documents and run `domainscout run`.");
        return Ok(());
    };
    let derived = storage.derived();
    let domains = derived.list_domains().await?;

    let mut aliases: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (domain_id, alias) in derived.list_domain_aliases().await? {
        aliases.entry(domain_id).or_default().push(alias.alias);
    }
    let mut sources: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (domain_id, pdf_id) in derived.list_domain_sources().await? {
        sources.entry(domain_id).or_default().push(pdf_id);
    }

    if json {
        let rows: Vec<serde_json::Value> = domains
            .iter()
            .map(|d| {
                serde_json::json!({
                    "domain_id": d.domain_id,
                    "display_name": d.display_name,
                    "aliases": aliases.get(&d.domain_id).cloned().unwrap_or_default(),
                    "sources": sources.get(&d.domain_id).cloned().unwrap_or_default(),
                    "created_at": d.created_at,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if domains.is_empty() {
        println!("No domains discovered yet. Run `domainscout run`.");
        return Ok(());
    }

    println!("{:<12} {:<30} {:<8} SOURCES", "ID", "NAME", "ALIASES");
    println!("{}", "-".repeat(72));
    for domain in &domains {
        let alias_count = aliases.get(&domain.domain_id).map_or(0, Vec::len);
        let pdfs = sources
            .get(&domain.domain_id)
            .map(|s| s.join(", "))
            .unwrap_or_default();
        println!(
            "{:<12} {:<30} {:<8} {}",
            domain.domain_id, domain.display_name, alias_count, pdfs
        );
    }
    println!();
    println!("{} domain(s)", domains.len());
    Ok(())
}

async fn cmd_naming_requests(db: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(db.clone())?;
    let Some(storage) = open_storage_readonly(db).await? else {
        println!("[]");
        return Ok(());
    };
    let plans = load_domain_plans(&storage, config.naming.preferred_display_language).await?;

    let requests: Vec<serde_json::Value> = plans
        .into_iter()
        .filter_map(|plan| {
            let request = plan.naming_request?;
            Some(serde_json::json!({
                "domain_id": plan.domain_id,
                "provisional_name": plan.display_name,
                "request": request,
            }))
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&requests)?);
    Ok(())
}

async fn cmd_review_list(db: Option<PathBuf>, status: Option<ReviewStatus>) -> Result<()> {
    let Some(storage) = open_storage_readonly(db).await? else {
        println!("No review items.");
        return Ok(());
    };
    let items = storage.curated().list_reviews(status).await?;
    if items.is_empty() {
        println!("No review items.");
        return Ok(());
    }

    println!(
        "{:<18} {:<9} {:<7} {:<28} PAIR",
        "ID", "STATUS", "SCORE", "REASON"
    );
    println!("{}", "-".repeat(90));
    for item in &items {
        println!(
            "{:<18} {:<9} {:<7.3} {:<28} {} <-> {}",
            item.review_id,
            item.status,
            item.similarity,
            item.reason,
            item.candidate_a_id,
            item.candidate_b_id
        );
    }
    Ok(())
}

async fn cmd_review_resolve(db: Option<PathBuf>, review_id: &str, status: ReviewStatus) -> Result<()> {
    let storage = open_storage(db).await?;
    let curated = storage.curated();
    let item = curated
        .get_review(review_id)
        .await?
        .ok_or_else(|| eyre!("review item not found: {review_id}"))?;
    if item.status != ReviewStatus::Pending {
        println!("Note: {review_id} was already {}.", item.status);
    }

    curated.resolve_review(review_id, status, Utc::now()).await?;
    info!(review_id, %status, "review resolved");
    println!(
        "Marked {review_id} ({} <-> {}) as {status}. It takes effect on the next run.",
        item.candidate_a_id, item.candidate_b_id
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
