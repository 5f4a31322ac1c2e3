//! rankdeduce - deduce individual source rankings from pairwise averages
//!
//! ## Commands
//!
//! - `run`: run a full deduction against a fixture file and print the report
//! - `sources`: list the sources a fixture exposes after filtering
//!
//! Every option can also come from the environment (or a `.env` file).

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rankdeduce_core::{
    init_tracing, most_contested, parse_source_filter, ranking_differences, source_coverage,
    source_deviations, Credentials, DeductionEngine, DeductionReport, EngineConfig,
    EntityDirectory, EntityId, FixtureClient, LogFormat, PairQueryClient, SourceCatalog, SourceId,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "rankdeduce")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deduce individual source rankings from pairwise averages", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full deduction and print the aggregated report
    Run(RunArgs),

    /// List the sources a fixture exposes, after filtering
    Sources {
        /// Fixture file (JSON)
        #[arg(long, env = "RANKDEDUCE_FIXTURE")]
        fixture: PathBuf,

        /// Comma-separated allow-list of source names or ids
        #[arg(long, env = "RANKDEDUCE_SOURCES")]
        sources: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Fixture file (JSON)
    #[arg(long, env = "RANKDEDUCE_FIXTURE")]
    fixture: PathBuf,

    /// Comma-separated allow-list of source names or ids; `#` starts a comment
    #[arg(long, env = "RANKDEDUCE_SOURCES")]
    sources: Option<String>,

    /// Cap on selected sources
    #[arg(long, env = "RANKDEDUCE_MAX_SOURCES", default_value_t = 50)]
    max_sources: usize,

    /// Total attempts per pair query
    #[arg(long, env = "RANKDEDUCE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    #[arg(long, env = "RANKDEDUCE_RETRY_DELAY_MS", default_value_t = 1_000)]
    retry_delay_ms: u64,

    /// Pause after every query, success or failure
    #[arg(long, env = "RANKDEDUCE_INTER_QUERY_DELAY_MS", default_value_t = 2_000)]
    inter_query_delay_ms: u64,

    #[arg(long, env = "RANKDEDUCE_QUERY_TIMEOUT_MS", default_value_t = 60_000)]
    query_timeout_ms: u64,

    /// Baseline triple to try first, e.g. "A,B,C" (A anchors propagation)
    #[arg(long, env = "RANKDEDUCE_BASELINE")]
    baseline: Option<String>,

    /// Give up after this many candidate triples
    #[arg(long, env = "RANKDEDUCE_MAX_TRIPLES")]
    max_triples: Option<usize>,

    /// Concurrent propagation queries
    #[arg(long, env = "RANKDEDUCE_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Also write the JSON report to this path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of most-contested entities to show
    #[arg(long, default_value_t = 10)]
    contested: usize,

    /// Minimum contributing sources for the contested list
    #[arg(long, default_value_t = 3)]
    min_sources: usize,

    /// Show per-source deviations for this entity (label or id)
    #[arg(long)]
    entity: Option<String>,

    /// Two source ids to compare, e.g. "Ann (Daily),Ben"
    #[arg(long)]
    compare: Option<String>,

    /// Minimum value gap listed by --compare
    #[arg(long, default_value_t = 10.0)]
    threshold: f64,

    #[arg(long, env = "RANKDEDUCE_USERNAME", default_value = "")]
    username: String,

    #[arg(long, env = "RANKDEDUCE_SECRET", default_value = "", hide_env_values = true)]
    secret: String,
}

impl RunArgs {
    fn engine_config(&self) -> Result<EngineConfig> {
        let baseline_triple_override = match &self.baseline {
            Some(raw) => {
                let names = parse_source_filter(raw);
                match <[String; 3]>::try_from(names) {
                    Ok(triple) => Some(triple),
                    Err(names) => bail!(
                        "--baseline needs exactly three sources, got {}",
                        names.len()
                    ),
                }
            }
            None => None,
        };

        let config = EngineConfig {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            inter_query_delay: Duration::from_millis(self.inter_query_delay_ms),
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            source_filter: self
                .sources
                .as_deref()
                .map(parse_source_filter)
                .filter(|names| !names.is_empty()),
            baseline_triple_override,
            max_sources: Some(self.max_sources),
            max_baseline_triples: self.max_triples,
            propagation_concurrency: self.concurrency,
        };
        config.validate().context("invalid run options")?;
        Ok(config)
    }

    fn compare_pair(&self) -> Result<Option<[SourceId; 2]>> {
        let Some(raw) = &self.compare else {
            return Ok(None);
        };
        match <[String; 2]>::try_from(parse_source_filter(raw)) {
            Ok([x, y]) => Ok(Some([SourceId::new(x), SourceId::new(y)])),
            Err(names) => bail!("--compare needs exactly two sources, got {}", names.len()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_tracing(format, level);

    match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::Sources { fixture, sources } => cmd_sources(&fixture, sources.as_deref()).await,
    }
}

fn load_fixture(path: &Path) -> Result<Arc<FixtureClient>> {
    let client = FixtureClient::from_path(path)
        .with_context(|| format!("failed to load fixture {}", path.display()))?;
    Ok(Arc::new(client))
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let config = args.engine_config()?;
    let compare = args.compare_pair()?;
    let client = load_fixture(&args.fixture)?;
    info!(sources = client.source_count(), fixture = %args.fixture.display(), "fixture loaded");

    let credentials = Credentials::new(args.username.clone(), args.secret.clone());
    let engine = DeductionEngine::new(client, credentials, config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing with partial results");
            on_interrupt.cancel();
        }
    });

    let report = engine.run_with_cancel(cancel).await.context("deduction run failed")?;

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print!("{}", render_text(&report, &args, compare.as_ref())),
    }
    Ok(())
}

async fn cmd_sources(fixture: &Path, filter: Option<&str>) -> Result<()> {
    let client = load_fixture(fixture)?;
    let session = client
        .login(&Credentials::default())
        .await
        .context("fixture login failed")?;
    let catalog = SourceCatalog::load(client.as_ref(), &session)
        .await
        .context("failed to list sources")?;

    let filter = filter.map(parse_source_filter).filter(|names| !names.is_empty());
    let selection = catalog.select(filter.as_deref(), None);
    for source in &selection.sources {
        println!("{}", source.id());
    }
    for name in &selection.unknown {
        println!("unknown: {name}");
    }
    Ok(())
}

/// Entity by display label, falling back to the raw id.
fn resolve_entity(directory: &EntityDirectory, raw: &str) -> EntityId {
    directory
        .find_by_label(raw)
        .cloned()
        .unwrap_or_else(|| EntityId::from(raw))
}

fn render_text(report: &DeductionReport, args: &RunArgs, compare: Option<&[SourceId; 2]>) -> String {
    let mut out = String::new();

    let baseline = report
        .baseline
        .as_ref()
        .map(|b| b.triple.to_string())
        .unwrap_or_else(|| "none".to_string());
    let _ = writeln!(
        out,
        "run {} ({} sources selected, {} deduced, baseline {})",
        report.run_id,
        report.sources.len(),
        report.deduced_sources(),
        baseline
    );
    if report.cancelled {
        let _ = writeln!(out, "CANCELLED: partial results");
    }

    let _ = writeln!(out, "\nConsensus ranking:");
    let _ = writeln!(
        out,
        "{:>4}  {:<24} {:>8} {:>8} {:>4} {:>8} {:>8}",
        "#", "entity", "mean", "std", "n", "min", "max"
    );
    for (i, r) in report.aggregated.iter().enumerate() {
        let name = r.label.as_deref().unwrap_or(r.entity.as_str());
        let _ = writeln!(
            out,
            "{:>4}  {:<24} {:>8.2} {:>8.2} {:>4} {:>8.2} {:>8.2}",
            i + 1,
            name,
            r.mean,
            r.std_dev,
            r.count,
            r.min,
            r.max
        );
    }

    let contested = most_contested(&report.aggregated, args.min_sources, args.contested);
    if !contested.is_empty() {
        let _ = writeln!(out, "\nMost contested (>= {} sources):", args.min_sources);
        for r in &contested {
            let name = r.label.as_deref().unwrap_or(r.entity.as_str());
            let _ = writeln!(
                out,
                "  {:<24} std {:.2}  range {:.1}-{:.1}",
                name, r.std_dev, r.min, r.max
            );
        }
    }

    let _ = writeln!(out, "\nSource coverage:");
    for c in source_coverage(&report.table) {
        let _ = writeln!(
            out,
            "  {:<32} {:>4} entities  mean {:.2}",
            c.source.as_str(),
            c.entities,
            c.mean_value
        );
    }

    if let Some(raw) = &args.entity {
        let entity = resolve_entity(&report.directory, raw);
        let _ = writeln!(out, "\nDeviations for {raw} ({entity}):");
        for d in source_deviations(&report.table, &report.aggregated, &entity) {
            let _ = writeln!(
                out,
                "  {:<32} {:>8.2} ({:+.2})",
                d.source.as_str(),
                d.value,
                d.deviation
            );
        }
    }

    if let Some([x, y]) = compare {
        for id in [x, y] {
            if !report.table.contains_source(id) {
                warn!(source = %id, "--compare source has no deduced values");
            }
        }
        let _ = writeln!(out, "\n{x} vs {y} (gap >= {}):", args.threshold);
        for d in ranking_differences(&report.table, x, y, args.threshold) {
            let name = report.directory.label(&d.entity).unwrap_or(d.entity.as_str());
            let _ = writeln!(
                out,
                "  {:<24} {:>8.2} {:>8.2}  gap {:.2}",
                name, d.x_value, d.y_value, d.gap
            );
        }
    }

    if report.has_failures() {
        let _ = writeln!(out, "\nFailures ({}):", report.failures.len());
        for f in &report.failures {
            let _ = writeln!(
                out,
                "  {} [{}] {:?} after {} attempt(s): {}",
                f.subject, f.kind, f.phase, f.attempts, f.detail
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> RunArgs {
        let mut argv = vec!["rankdeduce", "run", "--fixture", "fixture.json"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Run(args) => args,
            Commands::Sources { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_defaults_match_engine_defaults() {
        let config = parse(&[]).engine_config().unwrap();
        let defaults = EngineConfig::default();
        assert_eq!(config.max_retries, defaults.max_retries);
        assert_eq!(config.retry_delay, defaults.retry_delay);
        assert_eq!(config.inter_query_delay, defaults.inter_query_delay);
        assert_eq!(config.query_timeout, defaults.query_timeout);
        assert_eq!(config.max_sources, Some(50));
        assert_eq!(config.source_filter, None);
    }

    #[test]
    fn test_source_filter_and_baseline_parsing() {
        let config = parse(&["--sources", "Ann, Ben ,# trailing", "--baseline", "Ann,Ben,Cal"])
            .engine_config()
            .unwrap();
        assert_eq!(config.source_filter, Some(vec!["Ann".to_string(), "Ben".to_string()]));
        assert_eq!(
            config.baseline_triple_override,
            Some(["Ann".to_string(), "Ben".to_string(), "Cal".to_string()])
        );
    }

    #[test]
    fn test_comment_only_filter_means_no_filter() {
        let config = parse(&["--sources", "# none"]).engine_config().unwrap();
        assert_eq!(config.source_filter, None);
    }

    #[test]
    fn test_baseline_needs_three_names() {
        assert!(parse(&["--baseline", "Ann,Ben"]).engine_config().is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(parse(&["--concurrency", "0"]).engine_config().is_err());
    }

    #[test]
    fn test_compare_needs_two_sources() {
        let pair = parse(&["--compare", "Ann (Daily), Ben"]).compare_pair().unwrap();
        assert_eq!(pair, Some([SourceId::from("Ann (Daily)"), SourceId::from("Ben")]));
        assert_eq!(parse(&[]).compare_pair().unwrap(), None);
        assert!(parse(&["--compare", "Ann"]).compare_pair().is_err());
        assert_eq!(parse(&[]).threshold, 10.0);
    }

    #[test]
    fn test_entity_resolves_by_label_then_id() {
        let mut directory = EntityDirectory::new();
        let (p1, label) = (EntityId::from("p1"), "Player One".to_string());
        directory.merge([(&p1, &label)]);

        assert_eq!(resolve_entity(&directory, "Player One"), p1);
        assert_eq!(resolve_entity(&directory, "p1"), p1);
        assert_eq!(resolve_entity(&directory, "p7"), EntityId::from("p7"));
    }
}
