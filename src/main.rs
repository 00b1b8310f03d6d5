//! Rekordbox MIDI sniffer
//!
//! Shows what a DJ controller sends, labeled with Rekordbox function names.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use colored::*;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rekordbox_sniffer::cli::{
    auto_select_port, session_options, Cli, Command, DirectionArg, MonitorArgs, ReplayArgs,
    TableArgs, TestArgs,
};
use rekordbox_sniffer::config::SnifferConfig;
use rekordbox_sniffer::mapping::discovery::{auto_match_port, find_csv_files};
use rekordbox_sniffer::mapping::MappingTable;
use rekordbox_sniffer::render::View;
use rekordbox_sniffer::replay::ReplayLog;
use rekordbox_sniffer::session_log::{default_file_name, SessionLog};
use rekordbox_sniffer::sniffer::{
    self, connect_input, drive, input_port_names, MonitorSession, SessionStats, Timebase,
    EVENT_CHANNEL_SIZE,
};
use rekordbox_sniffer::simulator;

/// Header columns worth highlighting in `show-headers`
const KEY_COLUMNS: &[&str] = &["#name", "function", "type", "input", "output", "comment"];

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = match &cli.config {
        Some(path) => {
            info!("Configuration file: {}", path.display());
            SnifferConfig::load(path).await?
        }
        None => SnifferConfig::default(),
    };

    match cli.command {
        Command::Monitor(args) => run_monitor(args, &config).await,
        Command::ListPorts => sniffer::list_ports_formatted(),
        Command::ListCsv => {
            list_csv(&config);
            Ok(())
        }
        Command::ShowHeaders(args) => show_headers(args, &config),
        Command::Replay(args) => run_replay(args, &config).await,
        Command::Test(args) => run_test(args, &config).await,
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // stdout carries the monitor display
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

fn apply_color_choice(enabled: bool) {
    if !enabled {
        colored::control::set_override(false);
    }
}

fn print_table_summary(label: &str, table: &MappingTable) {
    println!("{}{}", label.green(), table.device_name().bright_white().bold());
    if let Some(source) = table.source() {
        println!("   CSV: {}", source.display());
    }
    println!("   Functions mapped: {}", table.len());
}

/// Load `--csv` (failure is fatal) or auto-match `port_hint` (failure is a warning)
fn load_table(
    csv: Option<&Path>,
    port_hint: Option<&str>,
    config: &SnifferConfig,
) -> Result<Option<Arc<MappingTable>>> {
    if let Some(path) = csv {
        let table = MappingTable::load(path)
            .with_context(|| format!("Failed to load mapping table: {}", path.display()))?;
        print_table_summary("Loaded CSV: ", &table);
        return Ok(Some(Arc::new(table)));
    }

    let Some(port) = port_hint else {
        return Ok(None);
    };

    let files = find_csv_files(&config.csv_search_paths);
    if files.is_empty() {
        warn!("No CSV files found. Monitoring without function names");
        return Ok(None);
    }

    let Some(path) = auto_match_port(port, &files) else {
        warn!(
            "No matching CSV found for '{}' among {} files (see list-csv). Monitoring without function names",
            port,
            files.len()
        );
        return Ok(None);
    };

    match MappingTable::load(&path) {
        Ok(table) => {
            print_table_summary("Auto-matched CSV: ", &table);
            Ok(Some(Arc::new(table)))
        }
        Err(e) => {
            warn!("{}. Monitoring without function names", e);
            Ok(None)
        }
    }
}

fn print_banner(title: &str, subject: &str) {
    println!("{}{}", title.cyan(), subject.bright_white().bold());
    println!("{}", "   Press Ctrl+C to stop\n".dimmed());
    println!("{}", "=".repeat(80));
}

fn print_stats(stats: &SessionStats) {
    println!(
        "\n{}",
        format!("{} messages, {} lines", stats.events, stats.groups).green()
    );
}

async fn run_monitor(args: MonitorArgs, config: &SnifferConfig) -> Result<()> {
    if args.direction != DirectionArg::In {
        warn!(
            "--direction {:?} is not supported yet, falling back to input-only monitoring",
            args.direction
        );
    }

    let pattern = match args.table.input.clone() {
        Some(pattern) => pattern,
        None => {
            let port = auto_select_port(&input_port_names()?)?;
            println!("{}{}", "Auto-detected controller: ".cyan(), port.bright_white().bold());
            port
        }
    };

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
    let (connection, port_name) = connect_input(&pattern, tx)?;

    let table = load_table(args.table.csv.as_deref(), Some(&port_name), config)?;
    let view = args.view.view(table.as_deref());
    let options = session_options(config, &args.display, view);
    apply_color_choice(options.render.colors);

    let log = if args.no_log {
        None
    } else {
        let path = args.log_file.clone().unwrap_or_else(|| {
            config
                .log_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(default_file_name(&port_name, Local::now()))
        });
        println!("Logging to: {}\n", path.display());
        Some(SessionLog::create(&path, table.as_deref())?)
    };

    print_banner("Monitoring: ", &port_name);

    let mut session = MonitorSession::new(options, table, log, Timebase::session(), std::io::stdout());
    session.begin()?;
    drive(&mut session, rx).await?;

    connection.close();
    let stats = session.finish()?;
    print_stats(&stats);
    Ok(())
}

fn list_csv(config: &SnifferConfig) {
    let files = find_csv_files(&config.csv_search_paths);

    println!("\n{}", "=== Discovered Rekordbox CSV Files ===".bold().cyan());
    if files.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for file in files {
        println!("  {}", file.display());
    }
    println!();
}

fn show_headers(args: TableArgs, config: &SnifferConfig) -> Result<()> {
    let table = match args.csv.as_deref() {
        Some(path) => MappingTable::load(path)
            .with_context(|| format!("Failed to load mapping table: {}", path.display()))?,
        None => {
            let port = match args.input {
                Some(port) => port,
                None => auto_select_port(&input_port_names()?)
                    .context("Specify a mapping file with --csv")?,
            };
            let files = find_csv_files(&config.csv_search_paths);
            let path = auto_match_port(&port, &files)
                .with_context(|| format!("No matching CSV found for '{}'", port))?;
            MappingTable::load(&path)?
        }
    };

    println!(
        "\n{}",
        format!("=== CSV Headers for {} ===", table.device_name()).bold().cyan()
    );
    if let Some(source) = table.source() {
        println!("{}", format!("CSV: {}", source.display()).dimmed());
    }
    println!();

    for (i, header) in table.headers().iter().enumerate() {
        let index = format!("[{}]", i).cyan();
        if KEY_COLUMNS.contains(&header.as_str()) {
            println!("  {} {}", index, header.bright_white().bold());
        } else {
            println!("  {} {}", index, header);
        }
    }

    println!("{}", format!("\nTotal: {} columns", table.headers().len()).dimmed());
    println!("{}", "\nUsage:".yellow());
    println!("  rekordbox-sniffer monitor --columns \"0,1,function,type\"");
    Ok(())
}

async fn run_replay(args: ReplayArgs, config: &SnifferConfig) -> Result<()> {
    let log = ReplayLog::load(&args.logfile).await?;
    if let Some(controller) = &log.controller {
        println!("{}{}", "Log controller: ".cyan(), controller.bright_white());
    }

    let table = load_table(args.csv.as_deref(), log.controller.as_deref(), config)?;
    let view = args.view.view(table.as_deref());
    let options = session_options(config, &args.display, view);
    apply_color_choice(options.render.colors);

    print_banner("Replaying: ", &args.logfile.display().to_string());
    if args.speed > 0.0 {
        println!("{}", format!("   Speed: {}x realtime", args.speed).dimmed());
    }

    let mut session = MonitorSession::new(options, table, None, Timebase::TimeOfDay, std::io::stdout());
    session.begin()?;
    let replayed = sniffer::replay(&mut session, &log, args.speed).await?;
    session.finish()?;

    println!("\n{}", format!("Replayed {} messages", replayed).green());
    Ok(())
}

async fn run_test(args: TestArgs, config: &SnifferConfig) -> Result<()> {
    let table = match args.csv.as_deref() {
        Some(path) => load_table(Some(path), None, config)?,
        None => {
            let ddj = find_csv_files(&config.csv_search_paths).into_iter().find(|f| {
                f.file_name()
                    .is_some_and(|n| n.to_string_lossy().to_uppercase().contains("DDJ"))
            });
            match ddj {
                Some(path) => load_table(Some(path.as_path()), None, config)?,
                None => {
                    warn!("No CSV loaded. Showing raw MIDI only");
                    None
                }
            }
        }
    };

    let options = session_options(config, &args.display, View::Function);
    apply_color_choice(options.render.colors);

    print_banner(
        "Virtual DDJ controller: ",
        &format!("sending test messages for {} seconds", args.duration),
    );

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
    let generator = tokio::spawn(simulator::run(tx, args.duration()));

    let mut session = MonitorSession::new(options, table, None, Timebase::session(), std::io::stdout());
    drive(&mut session, rx).await?;

    let sent = generator.await.context("Simulator task failed")?;
    info!("Simulator sent {} messages", sent);
    let stats = session.finish()?;
    print_stats(&stats);
    Ok(())
}
