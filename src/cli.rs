//! Command-line interface

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::SnifferConfig;
use crate::mapping::MappingTable;
use crate::render::{RenderOptions, View};
use crate::replay::MAX_REPLAY_SPEED;
use crate::sniffer::SessionOptions;

/// Rekordbox MIDI sniffer - show controller traffic with Rekordbox function names
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to an optional YAML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Monitor a MIDI input port
    Monitor(MonitorArgs),
    /// List available MIDI ports
    ListPorts,
    /// List discovered Rekordbox mapping files
    ListCsv,
    /// Show mapping file headers with their column numbers
    ShowHeaders(TableArgs),
    /// Replay a session log with function names
    Replay(ReplayArgs),
    /// Feed synthetic controller traffic through the monitor
    Test(TestArgs),
}

/// Which mapping table to use
#[derive(Args, Debug, Default)]
pub struct TableArgs {
    /// Path to a Rekordbox mapping CSV
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// MIDI input port, by index or name substring
    #[arg(short, long)]
    pub input: Option<String>,
}

/// What the last column shows
#[derive(Args, Debug, Default)]
pub struct ViewArgs {
    /// Show the full mapping row
    #[arg(short, long, conflicts_with = "columns")]
    pub full_row: bool,

    /// Show selected mapping columns, by number or name (e.g. "0,function,14")
    #[arg(short, long)]
    pub columns: Option<String>,
}

/// Display overrides on top of the configuration file
#[derive(Args, Debug, Default)]
pub struct DisplayArgs {
    /// Disable ANSI colors
    #[arg(long)]
    pub no_colors: bool,

    /// Print every message on its own line
    #[arg(long)]
    pub no_grouping: bool,

    /// Grouping window in milliseconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub window_ms: Option<u64>,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub table: TableArgs,

    /// Do not write a log file
    #[arg(short = 'n', long)]
    pub no_log: bool,

    /// Log file name (default: rekordbox_midi_<port>_<time>.log)
    #[arg(short = 'l', long, conflicts_with = "no_log")]
    pub log_file: Option<PathBuf>,

    /// Stream to monitor
    #[arg(long, value_enum, default_value_t = DirectionArg::In)]
    pub direction: DirectionArg,

    #[command(flatten)]
    pub view: ViewArgs,

    #[command(flatten)]
    pub display: DisplayArgs,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Session log to replay
    pub logfile: PathBuf,

    /// Path to a Rekordbox mapping CSV (default: match the log's controller)
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Playback speed (0 = instant, 1 = realtime)
    #[arg(long, default_value_t = 0.0, value_parser = parse_speed)]
    pub speed: f64,

    #[command(flatten)]
    pub view: ViewArgs,

    #[command(flatten)]
    pub display: DisplayArgs,
}

#[derive(Args, Debug)]
pub struct TestArgs {
    /// Test duration in seconds
    #[arg(long, default_value_t = 10)]
    pub duration: u64,

    /// Path to a Rekordbox mapping CSV
    #[arg(long)]
    pub csv: Option<PathBuf>,

    #[command(flatten)]
    pub display: DisplayArgs,
}

impl TestArgs {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionArg {
    In,
    Out,
    Both,
}

fn parse_speed(text: &str) -> Result<f64, String> {
    let speed: f64 = text
        .parse()
        .map_err(|_| format!("'{}' is not a number", text))?;
    if (0.0..=MAX_REPLAY_SPEED).contains(&speed) {
        Ok(speed)
    } else {
        Err(format!("speed must be between 0 and {}", MAX_REPLAY_SPEED))
    }
}

impl ViewArgs {
    /// Resolve against the loaded table; row views need one
    pub fn view(&self, table: Option<&MappingTable>) -> View {
        let Some(table) = table else {
            return View::Function;
        };
        if self.full_row {
            return View::FullRow;
        }
        match self.columns.as_deref().map(|selection| table.select_columns(selection)) {
            Some(columns) if !columns.is_empty() => View::Columns(columns),
            _ => View::Function,
        }
    }
}

/// Merge the configuration file with command-line overrides
pub fn session_options(config: &SnifferConfig, display: &DisplayArgs, view: View) -> SessionOptions {
    let mut grouping = config.grouping_config();
    if display.no_grouping {
        grouping.enabled = false;
    }
    if let Some(ms) = display.window_ms {
        grouping.window = Duration::from_millis(ms);
    }

    SessionOptions {
        grouping,
        render: RenderOptions {
            colors: config.colors && !display.no_colors,
            show_hex: config.show_hex,
            show_timestamp: config.show_timestamp,
            view,
        },
        throttle: config.display_throttle(),
    }
}

/// Pick the only input port when none was named
pub fn auto_select_port(names: &[String]) -> Result<String> {
    match names {
        [] => bail!("No MIDI input ports found. Connect a controller and try again."),
        [only] => Ok(only.clone()),
        _ => {
            let listing = names
                .iter()
                .enumerate()
                .map(|(i, n)| format!("   [{}] {}", i, n))
                .collect::<Vec<_>>()
                .join("\n");
            bail!("Multiple MIDI ports found. Please specify one with --input:\n{}", listing)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::test_support::sample_table;

    #[test]
    fn test_parse_monitor() {
        let cli = Cli::try_parse_from([
            "rekordbox-sniffer",
            "monitor",
            "-i",
            "FLX4",
            "-n",
            "-c",
            "0,function",
            "--no-grouping",
            "--direction",
            "both",
        ])
        .unwrap();

        let Command::Monitor(args) = cli.command else {
            panic!("expected monitor");
        };
        assert_eq!(args.table.input.as_deref(), Some("FLX4"));
        assert!(args.no_log);
        assert_eq!(args.view.columns.as_deref(), Some("0,function"));
        assert!(args.display.no_grouping);
        assert_eq!(args.direction, DirectionArg::Both);
    }

    #[test]
    fn test_full_row_conflicts_with_columns() {
        let result = Cli::try_parse_from(["rekordbox-sniffer", "monitor", "-f", "-c", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_replay_speed_range() {
        let cli = Cli::try_parse_from(["rekordbox-sniffer", "replay", "s.log", "--speed", "2.5"]).unwrap();
        let Command::Replay(args) = cli.command else {
            panic!("expected replay");
        };
        assert_eq!(args.speed, 2.5);

        assert!(Cli::try_parse_from(["rekordbox-sniffer", "replay", "s.log", "--speed", "11"]).is_err());
        assert!(Cli::try_parse_from(["rekordbox-sniffer", "replay", "s.log", "--speed", "-1"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "rekordbox-sniffer",
            "test",
            "--duration",
            "3",
            "--config",
            "sniffer.yaml",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("sniffer.yaml")));
        assert_eq!(cli.log_level, "debug");
        let Command::Test(args) = cli.command else {
            panic!("expected test");
        };
        assert_eq!(args.duration(), Duration::from_secs(3));
    }

    #[test]
    fn test_view_resolution() {
        let table = sample_table();
        let full = ViewArgs {
            full_row: true,
            columns: None,
        };
        assert_eq!(full.view(Some(&table)), View::FullRow);
        assert_eq!(full.view(None), View::Function);

        let cols = ViewArgs {
            full_row: false,
            columns: Some("1,nope".to_string()),
        };
        assert_eq!(cols.view(Some(&table)), View::Columns(vec!["function".to_string()]));

        let none_valid = ViewArgs {
            full_row: false,
            columns: Some("nope".to_string()),
        };
        assert_eq!(none_valid.view(Some(&table)), View::Function);
    }

    #[test]
    fn test_session_options_overrides() {
        let config = SnifferConfig::default();
        let display = DisplayArgs {
            no_colors: true,
            no_grouping: true,
            window_ms: Some(200),
        };
        let options = session_options(&config, &display, View::Function);

        assert!(!options.render.colors);
        assert!(!options.grouping.enabled);
        assert_eq!(options.grouping.window, Duration::from_millis(200));
        assert_eq!(options.throttle, Duration::from_millis(250));

        let options = session_options(&config, &DisplayArgs::default(), View::FullRow);
        assert!(options.render.colors);
        assert!(options.grouping.enabled);
        assert_eq!(options.render.view, View::FullRow);
    }

    #[test]
    fn test_auto_select_port() {
        assert!(auto_select_port(&[]).is_err());
        assert_eq!(auto_select_port(&["DDJ-FLX4".to_string()]).unwrap(), "DDJ-FLX4");

        let err = auto_select_port(&["A".to_string(), "B".to_string()]).unwrap_err();
        assert!(err.to_string().contains("[1] B"));
    }
}
