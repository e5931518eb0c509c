use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use emissions_processor::config::Settings;
use emissions_processor::processor::{
    export::{ExportFormat, to_json, write_views},
    loader::TableCache,
    views::{ViewAssembler, ViewOutcome, ViewSet},
};
use jemallocator::Jemalloc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// CLI entry point wrapper.
#[derive(Parser, Debug)]
#[command(
    name = "emissions_processor",
    about = "Aggregates a CO2 emissions table into dashboard views"
)]
struct Cli {
    /// Optional TOML settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emissions CSV; overrides `data_path` from the settings
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the selectable region options
    Regions,
    /// Compute every view and print it
    Views(ViewArgs),
    /// Write one file per view into a directory
    Export(ExportArgs),
}

#[derive(clap::Args, Debug)]
struct ViewArgs {
    /// Region to narrow to; the all-regions label (default `World`) means no filter
    #[arg(long)]
    region: Option<String>,

    /// Entities kept by the top-N views
    #[arg(long)]
    top: Option<usize>,

    /// Print the views as JSON records
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct ExportArgs {
    /// Output directory
    #[arg(long)]
    out: PathBuf,

    #[arg(long)]
    region: Option<String>,

    #[arg(long)]
    top: Option<usize>,

    /// `parquet` or `json`
    #[arg(long, default_value = "parquet")]
    format: ExportFormat,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    if let Some(data) = cli.data {
        settings.data_path = data;
    }
    init_tracing(&settings.log_filter);

    match cli.cmd {
        Command::Regions => {
            let assembler = assembler(&settings, None)?;
            for region in assembler.regions() {
                println!("{region}");
            }
        }
        Command::Views(args) => {
            let assembler = assembler(&settings, args.top)?;
            let views = assemble(&assembler, args.region.as_deref());
            if args.json {
                print_json(&views)?;
            } else {
                print_summary(&views);
            }
        }
        Command::Export(args) => {
            let assembler = assembler(&settings, args.top)?;
            let views = assemble(&assembler, args.region.as_deref());
            let written = write_views(&views, &args.out, args.format)
                .with_context(|| format!("exporting views to {}", args.out.display()))?;
            info!(files = written.len(), out = %args.out.display(), "export finished");
        }
    }

    Ok(())
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn assembler(settings: &Settings, top: Option<usize>) -> anyhow::Result<ViewAssembler> {
    let tables = TableCache::with_capacity(settings.cache_capacity());
    let table = tables
        .get_or_load(&settings.data_path)
        .with_context(|| format!("loading {}", settings.data_path.display()))?;

    let mut view_settings = settings.view_settings();
    if let Some(n) = top {
        anyhow::ensure!(n > 0, "--top must be positive");
        view_settings.top_n = n;
    }
    Ok(ViewAssembler::new(table, view_settings))
}

fn assemble(assembler: &ViewAssembler, region: Option<&str>) -> ViewSet {
    let filter = region
        .map(|r| assembler.filter_for(r))
        .unwrap_or_default();
    let views = assembler.assemble(&filter);

    let failed = views.failures().count();
    if failed > 0 {
        warn!(failed, "some views could not be computed");
    }
    views
}

fn print_summary(views: &ViewSet) {
    println!("views for {}", views.filter);
    for (name, outcome) in &views.views {
        match outcome {
            ViewOutcome::Ready(table) => println!("  {:<36} {:>8} rows", name.as_str(), table.len()),
            ViewOutcome::Failed(err) => println!("  {:<36} unavailable: {}", name.as_str(), err),
        }
    }
}

fn print_json(views: &ViewSet) -> anyhow::Result<()> {
    let mut out = serde_json::Map::new();
    for (name, outcome) in &views.views {
        let value = match outcome {
            ViewOutcome::Ready(table) => to_json(table),
            ViewOutcome::Failed(_) => serde_json::Value::Null,
        };
        out.insert(name.as_str().to_string(), value);
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
