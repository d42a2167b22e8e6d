mod classify;
mod config;
mod normalize;
mod parse;
mod reconcile;
mod scrape;
mod summarize;
mod table;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use config::PipelineConfig;
use normalize::{CanonicalRecord, SnapshotSpec};

#[derive(Parser)]
#[command(name = "cartier_pipeline", about = "Catalog snapshot scraper + cross-year price pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Vintage {
    /// 2022 baseline extraction (CR-prefixed references, mixed currencies)
    Baseline2022,
    /// 2026 current extraction (local references, EUR display prices)
    Current2026,
}

impl Vintage {
    fn spec(self) -> SnapshotSpec {
        match self {
            Vintage::Baseline2022 => SnapshotSpec::baseline_2022(),
            Vintage::Current2026 => SnapshotSpec::current_2026(),
        }
    }

    fn raw_prefix(self) -> &'static str {
        match self {
            Vintage::Baseline2022 => "baseline_2022_raw",
            Vintage::Current2026 => "current_2026_raw",
        }
    }

    fn labeled_name(self) -> &'static str {
        match self {
            Vintage::Baseline2022 => "baseline_2022_labeled.csv",
            Vintage::Current2026 => "current_2026_labeled.csv",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the current catalog snapshot into a timestamped raw CSV
    Scrape {
        #[arg(long, default_value = "1000")]
        hits_per_page: usize,
        /// Pause between page requests, in milliseconds
        #[arg(long, default_value = "200")]
        sleep_ms: u64,
        /// 0 means fetch all pages; set 1 or 2 for a quick test
        #[arg(long, default_value = "0")]
        max_pages: usize,
        #[arg(long, default_value = "WATCH")]
        category_filter: String,
        #[arg(long, default_value = "data/raw")]
        out_dir: PathBuf,
        #[arg(long, default_value = "current_2026_raw")]
        out_name: String,
    },
    /// Normalize one raw snapshot CSV into a labeled canonical table
    Normalize {
        #[arg(long, value_enum)]
        vintage: Vintage,
        /// Raw CSV; defaults to the latest matching file under data/raw
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value = "data/processed")]
        out_dir: PathBuf,
    },
    /// Join two labeled tables on reference code and compute price deltas
    Reconcile {
        /// Earlier labeled table (e.g. baseline_2022_labeled.csv)
        before: PathBuf,
        /// Later labeled table (e.g. current_2026_labeled.csv)
        after: PathBuf,
        #[arg(long, default_value = "data/processed")]
        out_dir: PathBuf,
    },
    /// Per-(year, collection) summary over one or more labeled tables
    Summarize {
        inputs: Vec<PathBuf>,
        #[arg(long, default_value = "data/processed/collection_summary.csv")]
        out: PathBuf,
    },
    /// Normalize both vintages, then reconcile and summarize
    Run {
        /// Raw 2022 baseline CSV
        before_raw: PathBuf,
        /// Raw 2026 current CSV
        after_raw: PathBuf,
        #[arg(long, default_value = "data/processed")]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let cfg = PipelineConfig::default();

    let result = match cli.command {
        Commands::Scrape { hits_per_page, sleep_ms, max_pages, category_filter, out_dir, out_name } => {
            let scrape_cfg =
                scrape::ScrapeConfig::from_env(category_filter, hits_per_page, sleep_ms, max_pages)?;
            let rows = scrape::fetch_snapshot(&scrape_cfg).await?;
            let out = out_dir.join(format!("{}_{}.csv", out_name, table::timestamp()));
            let path = table::write_raw(&out, &scrape::RAW_COLUMNS, &rows)?;
            println!("Saved {} ({} rows)", path.display(), rows.len());
            Ok(())
        }
        Commands::Normalize { vintage, input, out_dir } => {
            let input = match input {
                Some(p) => p,
                None => table::latest_matching(Path::new("data/raw"), vintage.raw_prefix())?,
            };
            let records = normalize_file(&input, vintage, &cfg)?;
            let path = table::write_csv(&out_dir.join(vintage.labeled_name()), &records, true)?;
            println!("Saved {} ({} rows)", path.display(), records.len());
            Ok(())
        }
        Commands::Reconcile { before, after, out_dir } => {
            let before_records: Vec<CanonicalRecord> = table::read_records(&before)?;
            let after_records: Vec<CanonicalRecord> = table::read_records(&after)?;
            reconcile_and_save(&before_records, &after_records, &out_dir, &cfg)
        }
        Commands::Summarize { inputs, out } => {
            let mut summary = Vec::new();
            for input in &inputs {
                let records: Vec<CanonicalRecord> = table::read_records(input)?;
                let year = records
                    .first()
                    .map(|r| r.year)
                    .with_context(|| format!("{} is empty", input.display()))?;
                summary.extend(summarize::summarize_by_collection(&records, year));
            }
            let path = table::write_csv(&out, &summary, true)?;
            println!("Saved {} ({} rows)", path.display(), summary.len());
            Ok(())
        }
        Commands::Run { before_raw, after_raw, out_dir } => {
            let before = normalize_file(&before_raw, Vintage::Baseline2022, &cfg)?;
            let after = normalize_file(&after_raw, Vintage::Current2026, &cfg)?;
            for (vintage, records) in
                [(Vintage::Baseline2022, &before), (Vintage::Current2026, &after)]
            {
                let path =
                    table::write_csv(&out_dir.join(vintage.labeled_name()), records, true)?;
                println!("Saved {} ({} rows)", path.display(), records.len());
            }

            reconcile_and_save(&before, &after, &out_dir, &cfg)?;

            let year_before = before.first().map(|r| r.year).unwrap_or(2022);
            let year_after = after.first().map(|r| r.year).unwrap_or(2026);
            let mut summary = summarize::summarize_by_collection(&before, year_before);
            summary.extend(summarize::summarize_by_collection(&after, year_after));
            let path = table::write_csv(&out_dir.join("collection_summary.csv"), &summary, true)?;
            println!("Saved {} ({} rows)", path.display(), summary.len());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn normalize_file(
    input: &Path,
    vintage: Vintage,
    cfg: &PipelineConfig,
) -> Result<Vec<CanonicalRecord>> {
    let raw = table::read_raw(input)?;
    let snap = vintage.spec();
    let (records, report) = normalize::normalize(&raw, &snap, cfg)?;
    println!(
        "{}: {} -> {} rows ({} empty refs, {} duplicates dropped)",
        input.display(),
        report.rows_in,
        report.rows_out,
        report.dropped_empty_ref,
        report.dropped_duplicate
    );
    Ok(records)
}

fn reconcile_and_save(
    before: &[CanonicalRecord],
    after: &[CanonicalRecord],
    out_dir: &Path,
    cfg: &PipelineConfig,
) -> Result<()> {
    let matched = reconcile::reconcile(before, after, cfg);
    let year_before = before.first().map(|r| r.year).unwrap_or(2022);
    let year_after = after.first().map(|r| r.year).unwrap_or(2026);

    let path = table::write_csv(&out_dir.join("reconciled_prices.csv"), &matched, true)?;
    println!("Saved {} ({} matched products)", path.display(), matched.len());

    let stats = reconcile::recon_stats(&matched);
    let path = table::write_csv(&out_dir.join("recon_stats.csv"), &stats, false)?;
    println!("Saved {}", path.display());

    let per_collection = reconcile::collection_stats(&matched);
    let path = table::write_csv(&out_dir.join("collection_stats.csv"), &per_collection, false)?;
    println!("Saved {} ({} collections)", path.display(), per_collection.len());

    let series = reconcile::timeseries(&matched, year_before, year_after);
    let path = table::write_csv(&out_dir.join("price_timeseries.csv"), &series, false)?;
    println!("Saved {} ({} rows)", path.display(), series.len());
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
