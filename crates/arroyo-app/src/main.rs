//! Command-line front end for the conjunction tables

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use arroyo_core::events::events::{ResponseDiscarded, RowsDegraded};
use arroyo_core::{
    ColumnId, ConjunctionSource, FilterValue, Predicate, RowKey, SortKey, TableStateController, TableVariant,
};
use arroyo_data::{FetchOrchestrator, HttpSource, SourceConfig, SqliteSource};
use arroyo_views::{DatasetSummaryView, DisplayRow, Severity, TableView};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod create_sample_db;

use config::AppConfig;

#[derive(Parser)]
#[command(name = "arroyo", about = "Browse satellite conjunction tables", version)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch and print one page of a conjunction table
    Page(PageArgs),
    /// Write a SQLite database filled with generated conjunctions
    SampleDb {
        path: PathBuf,
        #[arg(long, default_value_t = 2000)]
        count: usize,
        #[arg(long, default_value_t = 42)]
        seed: u32,
    },
}

#[derive(Args)]
struct PageArgs {
    /// public, comparison or internal
    #[arg(long)]
    variant: Option<TableVariant>,

    /// Read from this SQLite database instead of the configured source
    #[arg(long)]
    db: Option<PathBuf>,

    /// Zero-based page index
    #[arg(long, default_value_t = 0)]
    page: usize,

    #[arg(long)]
    page_size: Option<usize>,

    /// Sort key, `dca` ascending or `-dca` descending; repeat for more keys
    #[arg(long = "sort")]
    sort: Vec<String>,

    /// Column filter, `column=value` or `column=low..high`
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Filter predicate, `column=lessThan`
    #[arg(long = "predicate")]
    predicates: Vec<String>,

    #[arg(long)]
    search: Option<String>,

    /// Show the encounter samples of this conjunction index
    #[arg(long)]
    expand: Option<i64>,

    /// Print rows as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let default_level = if std::env::var("ARROYO_DEVELOPMENT").is_ok() {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Command::Page(args) => run_page(config, args).await,
        Command::SampleDb { path, count, seed } => {
            create_sample_db::create_sample_database(&path, count, seed)?;
            Ok(())
        }
    }
}

async fn run_page(config: AppConfig, args: PageArgs) -> Result<()> {
    let variant = args.variant.unwrap_or(config.variant);
    let source_config = match args.db {
        Some(path) => SourceConfig::Sqlite { path },
        None => config.source.clone(),
    };
    let source = open_source(&source_config, variant).await?;
    info!("Reading {} conjunctions from {}", variant, source.source_name());

    let controller = Arc::new(TableStateController::new(variant.config()));
    if let Some(page_size) = args.page_size.or(config.page_size) {
        controller.set_page_size(page_size)?;
    }
    for text in &args.predicates {
        let (column, predicate) = parse_predicate(text)?;
        controller.set_predicate(column.as_str(), predicate)?;
    }
    let filters = args.filters.iter().map(|f| parse_filter(f)).collect::<Result<Vec<_>>>()?;
    controller.set_filters(filters)?;
    let sort = args.sort.iter().map(|s| parse_sort(s)).collect::<Result<Vec<_>>>()?;
    controller.set_sort(sort)?;
    controller.set_global_search(args.search);
    // Filter and sort changes reset the page, so the index goes last
    controller.set_page_index(args.page);

    let fetcher = FetchOrchestrator::new(source, &config.fetch);
    let view = TableView::new(controller.clone(), fetcher);
    view.events().on::<RowsDegraded, _>(|event| {
        warn!("{} of the rows could not be displayed", event.count);
    });
    view.events().on::<ResponseDiscarded, _>(|_| debug!("Discarded a late response"));

    let state = view.load().await;
    if let Some(message) = state.error() {
        bail!("Failed to load conjunctions: {}", message);
    }
    let display = view.display().ok_or_else(|| anyhow!("No page was loaded"))?;
    let page = display.state.page().ok_or_else(|| anyhow!("No page was loaded"))?;

    if args.json {
        let rows: Vec<serde_json::Value> = display.rows.iter().map(row_json).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for line in DatasetSummaryView::new(&page.summary, page.total_row_count).lines {
            println!("{:<20} {}", line.label, line.value);
        }
        println!(
            "Page {} of {}",
            controller.snapshot().pagination.page_index + 1,
            controller.page_count().unwrap_or(1).max(1)
        );
        println!();

        let titles: Vec<&str> = controller.config().columns.iter().map(|c| c.title.as_str()).collect();
        println!("  {}", titles.join(" | "));
        for row in &display.rows {
            println!("{}", row_line(row));
        }
    }

    if let Some(conj_index) = args.expand {
        let key = RowKey::Source(conj_index);
        if !display.rows.iter().any(|row| row.key == key) {
            bail!("Conjunction {} is not on this page", conj_index);
        }
        view.toggle_expansion(key.clone());
        match view.expanded_samples(&key) {
            Some(Ok(samples)) => {
                println!();
                for sample in samples {
                    println!("{}  {:.6}", sample.timestamp_text(), sample.distance);
                }
            }
            Some(Err(err)) => bail!("Encounter samples of conjunction {} are unreadable: {}", conj_index, err),
            None => bail!("Conjunction {} has no encounter samples", conj_index),
        }
    }

    Ok(())
}

async fn open_source(config: &SourceConfig, variant: TableVariant) -> Result<Arc<dyn ConjunctionSource>> {
    let source: Arc<dyn ConjunctionSource> = match config {
        SourceConfig::Http { base_url, timeout } => Arc::new(HttpSource::new(base_url, variant, *timeout)?),
        SourceConfig::Sqlite { path } => Arc::new(
            SqliteSource::open(path, variant)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?,
        ),
    };
    Ok(source)
}

fn row_line(row: &DisplayRow) -> String {
    let marker = match (&row.degraded, row.severity) {
        (Some(_), _) => '!',
        (None, Some(Severity::High)) => 'H',
        (None, Some(Severity::Medium)) => 'M',
        _ => ' ',
    };
    if let Some(reason) = &row.degraded {
        return format!("{} row {}: {}", marker, row.offset, reason);
    }
    let cells: Vec<&str> = row.cells.iter().map(|c| c.text.as_str()).collect();
    format!("{} {}", marker, cells.join(" | "))
}

fn row_json(row: &DisplayRow) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    for cell in &row.cells {
        object.insert(cell.column.to_string(), cell.text.clone().into());
    }
    if let Some(reason) = &row.degraded {
        object.insert("degraded".to_string(), reason.clone().into());
    }
    serde_json::Value::Object(object)
}

fn parse_sort(text: &str) -> Result<SortKey> {
    match text.trim().strip_prefix('-') {
        Some(column) if !column.is_empty() => Ok(SortKey::descending(column)),
        None if !text.trim().is_empty() => Ok(SortKey::ascending(text.trim())),
        _ => bail!("Empty sort key '{}'", text),
    }
}

fn parse_filter(text: &str) -> Result<(ColumnId, FilterValue)> {
    let (column, value) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("Filter '{}' is not of the form column=value", text))?;
    let value = match value.split_once("..") {
        Some((low, high)) => FilterValue::range(bound(low), bound(high)),
        None => FilterValue::single(value.trim()),
    };
    Ok((ColumnId::from(column.trim()), value))
}

/// A blank range bound is left empty
fn bound(text: &str) -> Option<&str> {
    let text = text.trim();
    (!text.is_empty()).then_some(text)
}

fn parse_predicate(text: &str) -> Result<(ColumnId, Predicate)> {
    let (column, kind) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("Predicate '{}' is not of the form column=kind", text))?;
    let predicate = serde_json::from_value(serde_json::Value::String(kind.trim().to_string()))
        .with_context(|| format!("Unknown predicate '{}'", kind))?;
    Ok((ColumnId::from(column.trim()), predicate))
}
