//! olmappy - Main entry point

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use colored::Colorize;
use olmappy::constants::{APP_NAME, APP_VERSION};
use olmappy::index::read_map_list;
use olmappy::{HttpMapServer, Layout, MapFilter, Mirror, MirrorOptions, Result, Settings};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

/// Initialize stderr and (optionally) file logging. The returned guard must be
/// held until exit so buffered file output is flushed.
fn init_logging(settings: &Settings, verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if verbose { "debug" } else { settings.log_level.as_str() };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let mut guard = None;
    let file_layer = if settings.log_to_file {
        let logs_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME)
            .join("logs");
        match std::fs::create_dir_all(&logs_dir) {
            Ok(()) => {
                let file_appender = tracing_appender::rolling::daily(&logs_dir, "olmappy.log");
                let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
                guard = Some(worker_guard);
                Some(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true),
                )
            }
            Err(e) => {
                eprintln!("{}: log directory {} unavailable: {}", "warning".yellow().bold(), logs_dir.display(), e);
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

/// Load the config file (a `configFile` override picks it), then apply `--set`
fn load_settings(cli: &Cli) -> Result<Settings> {
    let overrides = cli.overrides();
    let path = overrides
        .iter()
        .rev()
        .find(|(name, _)| name == "configFile")
        .map(|(_, value)| PathBuf::from(value))
        .or_else(|| cli.config.clone())
        .unwrap_or_else(Settings::default_config_file);
    let rest: Vec<(String, String)> = overrides
        .into_iter()
        .filter(|(name, _)| name != "configFile")
        .collect();
    let settings = Settings::load(&path)?.with_overrides(&rest)?;
    Ok(settings)
}

fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli)?;
    let _log_guard = init_logging(&settings, cli.verbose);
    info!(version = APP_VERSION, "olmappy starting");
    debug!(config = ?settings.config_file, map_path = %settings.map_path.display(), "Configuration loaded");

    let filter = cli.filter.build(&settings);
    match cli.command.unwrap_or(Commands::Update) {
        Commands::ShowConfig => println!("{}", settings.to_json()),
        Commands::WriteConfig => {
            let path = settings.config_file.clone().unwrap_or_else(Settings::default_config_file);
            settings.save(&path)?;
            println!("wrote configuration to {}", path.display());
        }
        Commands::Update => {
            let report = open_mirror(&settings)?.update(&filter)?;
            if let Some(import) = report.import {
                println!("{}", import);
            }
            println!("{}", report);
        }
        Commands::Import => println!("{}", open_mirror(&settings)?.import(&filter)?),
        Commands::ListLocal => {
            let mirror = open_mirror(&settings)?;
            for map in mirror.list_local(&filter) {
                println!("{}", map.describe());
            }
        }
        Commands::ListRemote => {
            for map in open_mirror(&settings)?.list_remote(&filter)? {
                println!("{}", map.describe());
            }
        }
        Commands::ListIgnored => {
            for name in open_mirror(&settings)?.list_ignored() {
                println!("\"{}\"", name);
            }
        }
        Commands::Hide => println!("{}", open_mirror(&settings)?.set_hidden(&filter, true)?),
        Commands::Unhide => println!("{}", open_mirror(&settings)?.set_hidden(&filter, false)?),
        Commands::ExportList => {
            let count = open_mirror(&settings)?.export(&filter, &cli.export_file)?;
            println!("EXPORT: {} maps written to {}", count, cli.export_file.display());
        }
        Commands::HideImport => hide_import(&settings, &filter, &cli)?,
    }
    Ok(())
}

fn open_mirror(settings: &Settings) -> Result<Mirror<HttpMapServer>> {
    let server = HttpMapServer::new(settings)?;
    Mirror::open(Layout::new(&settings.map_path), server, MirrorOptions::from(settings))
}

fn hide_import(settings: &Settings, filter: &MapFilter, cli: &Cli) -> Result<()> {
    let records = read_map_list(&cli.import_file)?;
    if records.is_empty() {
        warn!(file = %cli.import_file.display(), "HIDEIMPORT: no valid maps found");
        return Ok(());
    }
    let report = open_mirror(settings)?.hide_import(filter, records, cli.reverse);
    println!("{}", report);
    Ok(())
}
