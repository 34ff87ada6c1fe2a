//! vaschooldata CLI: coverage, fetch and cache management commands.
//!
//! Commands:
//! - `years`: print the published year range per dataset
//! - `enr`: fetch tidy (or wide) enrollment for one or more years
//! - `grad`: fetch tidy graduation for one or more years
//! - `cache status`: list cached raw tables
//! - `cache clear`: remove cached raw tables

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use polars::prelude::{DataFrame, DataType};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use vaschooldata_core::{DatasetKind, EnrollmentRecord, GraduationRecord, Settings, TidyPanel, VaSchoolData};

#[derive(Parser)]
#[command(
    name = "vaschooldata",
    about = "Virginia public-school enrollment and graduation data"
)]
struct Cli {
    /// Path to a TOML settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the offline synthetic fixture provider instead of the remote source.
    #[arg(long, global = true, default_value_t = false)]
    fixture: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the range of published school years.
    Years {
        /// Dataset: enrollment or graduation. Defaults to both.
        #[arg(long, value_parser = parse_kind)]
        kind: Option<DatasetKind>,
    },
    /// Fetch enrollment for one or more school years (by end year).
    Enr {
        #[arg(required = true)]
        years: Vec<i32>,

        /// Write the wide table as published instead of the tidy panel. One year only.
        #[arg(long, default_value_t = false)]
        wide: bool,

        /// Write rows to this CSV file instead of printing a summary.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Fetch graduation for one or more school years (by end year).
    Grad {
        #[arg(required = true)]
        years: Vec<i32>,

        /// Write rows to this CSV file instead of printing a summary.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached tables with row counts and sizes.
    Status,
    /// Remove cached tables, optionally for one dataset only.
    Clear {
        #[arg(long, value_parser = parse_kind)]
        kind: Option<DatasetKind>,
    },
}

fn parse_kind(s: &str) -> std::result::Result<DatasetKind, String> {
    DatasetKind::parse(s).ok_or_else(|| format!("unknown dataset '{s}' (expected enrollment or graduation)"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let client = build_client(cli.config.as_deref(), cli.fixture)?;

    match cli.command {
        Commands::Years { kind } => run_years(&client, kind),
        Commands::Enr { years, wide, output } => run_enr(&client, &years, wide, output.as_deref()),
        Commands::Grad { years, output } => run_grad(&client, &years, output.as_deref()),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&client),
            CacheAction::Clear { kind } => run_cache_clear(&client, kind),
        },
    }
}

fn build_client(config: Option<&Path>, fixture: bool) -> Result<VaSchoolData> {
    if fixture {
        if config.is_some() {
            bail!("--fixture and --config are mutually exclusive");
        }
        return Ok(VaSchoolData::fixture());
    }

    let settings = match config {
        Some(path) => Settings::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Settings::default(),
    }
    .with_env_overrides();

    let client = VaSchoolData::from_settings(&settings)?;
    tracing::debug!(
        provider = client.provider_name(),
        version = client.provider_version(),
        cache_dir = %settings.cache_dir.display(),
        "client ready"
    );
    Ok(client)
}

fn run_years(client: &VaSchoolData, kind: Option<DatasetKind>) -> Result<()> {
    let kinds = match kind {
        Some(k) => vec![k],
        None => DatasetKind::ALL.to_vec(),
    };
    for kind in kinds {
        let cov = client.get_available_years(kind)?;
        println!("{:<12} {}-{}", kind.as_str(), cov.min_year(), cov.max_year());
    }
    Ok(())
}

fn run_enr(client: &VaSchoolData, years: &[i32], wide: bool, output: Option<&Path>) -> Result<()> {
    if wide {
        let [year] = years else {
            bail!("--wide takes exactly one year, got {}", years.len());
        };
        let raw = client.fetch_enr_wide(*year)?;
        match output {
            Some(path) => {
                write_frame_csv(&raw.frame, path)?;
                println!("Wrote {} locale rows to {}", raw.height(), path.display());
            }
            None => println!(
                "enrollment {}: {} locales x {} columns (use --output to save)",
                raw.end_year,
                raw.height(),
                raw.frame.width()
            ),
        }
        return Ok(());
    }

    let panel = client.fetch_enr_multi(years)?;
    match output {
        Some(path) => write_records_csv(panel.records(), path)?,
        None => print_enr_summary(&panel),
    }
    Ok(())
}

fn run_grad(client: &VaSchoolData, years: &[i32], output: Option<&Path>) -> Result<()> {
    let panel = client.fetch_graduation_multi(years)?;
    match output {
        Some(path) => write_records_csv(panel.records(), path)?,
        None => print_grad_summary(&panel),
    }
    Ok(())
}

fn run_cache_status(client: &VaSchoolData) -> Result<()> {
    let entries = client.cache_status()?;
    if entries.is_empty() {
        println!("Cache is empty");
        return Ok(());
    }

    let total: u64 = entries.iter().map(|e| e.bytes).sum();
    println!("Entries: {}", entries.len());
    println!("Total size: {}", format_size(total));
    println!();
    println!("{:<12} {:<6} {:<12} {:>8} {:>10}  Cached at", "Kind", "Year", "Version", "Rows", "Size");
    println!("{}", "-".repeat(72));
    for e in &entries {
        let cached_at = e
            .cached_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "(no meta)".into());
        println!(
            "{:<12} {:<6} {:<12} {:>8} {:>10}  {cached_at}",
            e.kind.as_str(),
            e.year,
            e.version,
            e.rows,
            format_size(e.bytes)
        );
    }
    Ok(())
}

fn run_cache_clear(client: &VaSchoolData, kind: Option<DatasetKind>) -> Result<()> {
    let removed = client.clear_cache(kind)?;
    match kind {
        Some(k) => println!("Removed {removed} {k} table(s)"),
        None => println!("Removed {removed} table(s)"),
    }
    Ok(())
}

fn print_enr_summary(panel: &TidyPanel<EnrollmentRecord>) {
    println!();
    println!("=== Enrollment ===");
    println!("Rows:  {}", panel.len());
    println!("Years: {}", join_years(&panel.years()));
    println!();
    println!("{:<6} {:>14}", "Year", "State total");
    for r in panel.iter().filter(|r| r.is_state_total()) {
        println!("{:<6} {:>14.0}", r.end_year, r.n_students);
    }
}

fn print_grad_summary(panel: &TidyPanel<GraduationRecord>) {
    println!();
    println!("=== Graduation ===");
    println!("Rows:  {}", panel.len());
    println!("Years: {}", join_years(&panel.years()));
    println!();
    println!("{:<6} {:>10} {:>10} {:>8}", "Year", "Cohort", "Graduates", "Rate");
    for r in panel
        .iter()
        .filter(|r| r.is_aggregate() && r.locale_level == vaschooldata_core::LocaleLevel::State)
    {
        let fmt = |v: Option<f64>| v.map(|v| format!("{v:.0}")).unwrap_or_else(|| "-".into());
        let rate = r
            .grad_rate
            .map(|v| format!("{:.1}%", v * 100.0))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<6} {:>10} {:>10} {:>8}",
            r.end_year,
            fmt(r.cohort_size),
            fmt(r.n_graduates),
            rate
        );
    }
}

fn write_records_csv<R: Serialize>(records: &[R], path: &Path) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    println!("Wrote {} rows to {}", records.len(), path.display());
    Ok(())
}

fn write_frame_csv(frame: &DataFrame, path: &Path) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    let names: Vec<String> = frame.get_column_names().iter().map(|n| n.to_string()).collect();
    writer.write_record(&names)?;

    let mut columns = Vec::with_capacity(names.len());
    for name in &names {
        let cast = frame.column(name)?.cast(&DataType::String)?;
        let values: Vec<String> = cast
            .str()?
            .into_iter()
            .map(|v| v.unwrap_or_default().to_string())
            .collect();
        columns.push(values);
    }
    for row in 0..frame.height() {
        writer.write_record(columns.iter().map(|c| c[row].as_str()))?;
    }
    writer.flush()?;
    Ok(())
}

fn join_years(years: &[i32]) -> String {
    years.iter().map(|y| y.to_string()).collect::<Vec<_>>().join(", ")
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
