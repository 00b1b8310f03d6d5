//! MIDI monitor session
//!
//! Every source (a hardware port, the simulator, a replayed log) pushes raw
//! messages into one channel. A single [`MonitorSession`] drains it, so the
//! aggregation engine only ever sees one event at a time.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveTime};
use colored::*;
use midir::{MidiInput, MidiInputConnection, MidiInputPort, MidiOutput};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::aggregate::{AggregationEngine, GroupRecord, GroupingConfig};
use crate::mapping::{MappingTable, ResolvedEvent};
use crate::midi::{format_hex, Direction, Event};
use crate::render::{clock_label, RenderOptions, Renderer};
use crate::replay::{LogClock, Pacer, ReplayLog};
use crate::session_log::SessionLog;

/// Capacity of the source → session channel
pub const EVENT_CHANNEL_SIZE: usize = 1000;

/// Idle tick used to expire groups and refresh the live line
const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Raw message from any source
#[derive(Debug, Clone)]
pub struct SourceEvent {
    pub direction: Direction,
    pub bytes: Vec<u8>,
    pub received: Instant,
}

impl SourceEvent {
    pub fn now(direction: Direction, bytes: Vec<u8>) -> Self {
        Self {
            direction,
            bytes,
            received: Instant::now(),
        }
    }
}

/// Maps engine milliseconds to displayed clock labels
#[derive(Debug, Clone, Copy)]
pub enum Timebase {
    /// Milliseconds since the session started
    Session {
        started: Instant,
        wall: DateTime<Local>,
    },
    /// Milliseconds since midnight, as recorded in logs
    TimeOfDay,
}

impl Timebase {
    pub fn session() -> Self {
        Timebase::Session {
            started: Instant::now(),
            wall: Local::now(),
        }
    }

    /// Engine time for an instant
    pub fn millis(&self, at: Instant) -> u64 {
        match self {
            Timebase::Session { started, .. } => {
                at.saturating_duration_since(*started).as_millis() as u64
            }
            Timebase::TimeOfDay => {
                let now = Local::now().time();
                let elapsed = Instant::now().saturating_duration_since(at);
                time_of_day_ms(now).saturating_sub(elapsed.as_millis() as u64)
            }
        }
    }

    pub fn now(&self) -> u64 {
        self.millis(Instant::now())
    }

    /// `HH:MM:SS.mmm` for engine time `ms`
    pub fn label(&self, ms: u64) -> String {
        match self {
            Timebase::Session { wall, .. } => {
                let at = *wall + chrono::Duration::milliseconds(ms as i64);
                clock_label(at.time())
            }
            Timebase::TimeOfDay => {
                let secs = ((ms / 1000) % 86_400) as u32;
                let nanos = ((ms % 1000) * 1_000_000) as u32;
                NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                    .map(clock_label)
                    .unwrap_or_default()
            }
        }
    }
}

fn time_of_day_ms(time: NaiveTime) -> u64 {
    use chrono::Timelike;
    u64::from(time.num_seconds_from_midnight()) * 1000 + u64::from(time.nanosecond() / 1_000_000)
}

/// Session behavior, after config and CLI overrides
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub grouping: GroupingConfig,
    pub render: RenderOptions,
    /// Minimum time between redraws of the in-progress group
    pub throttle: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            grouping: GroupingConfig::default(),
            render: RenderOptions::default(),
            throttle: Duration::from_millis(250),
        }
    }
}

/// Counters reported when a session ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Decoded events admitted to the engine
    pub events: usize,
    /// Finalized groups printed
    pub groups: usize,
    /// Messages that were not note or control change
    pub ignored: usize,
}

/// One monitoring session: engine, renderer, optional log, console output
pub struct MonitorSession<W: Write> {
    engine: AggregationEngine,
    table: Option<Arc<MappingTable>>,
    renderer: Renderer,
    log: Option<SessionLog>,
    timebase: Timebase,
    out: W,
    throttle: u64,
    last_redraw: Option<u64>,
    /// Width of the in-progress line currently on screen, 0 when none
    live_width: usize,
    stats: SessionStats,
}

impl<W: Write> MonitorSession<W> {
    pub fn new(
        options: SessionOptions,
        table: Option<Arc<MappingTable>>,
        log: Option<SessionLog>,
        timebase: Timebase,
        out: W,
    ) -> Self {
        Self {
            engine: AggregationEngine::new(options.grouping),
            renderer: Renderer::new(options.render, table.clone()),
            table,
            log,
            timebase,
            out,
            throttle: options.throttle.as_millis() as u64,
            last_redraw: None,
            live_width: 0,
            stats: SessionStats::default(),
        }
    }

    pub fn timebase(&self) -> &Timebase {
        &self.timebase
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Print the column header line for row views
    pub fn begin(&mut self) -> Result<()> {
        if let Some(header) = self.renderer.header() {
            writeln!(self.out, "{}", header.colored)?;
            if let Some(log) = self.log.as_mut() {
                log.write_line(&header)?;
            }
        }
        Ok(())
    }

    /// Decode and admit raw bytes observed at engine time `now`
    pub fn handle(&mut self, direction: Direction, bytes: &[u8], now: u64) -> Result<()> {
        match Event::parse(bytes) {
            Some(event) => self.handle_event(direction, event, now),
            None => {
                debug!("Ignoring message: {}", format_hex(bytes));
                self.stats.ignored += 1;
                Ok(())
            }
        }
    }

    pub fn handle_event(&mut self, direction: Direction, event: Event, now: u64) -> Result<()> {
        let resolved = match &self.table {
            Some(table) => table.resolve(&event),
            None => ResolvedEvent::unmapped(event),
        };
        self.stats.events += 1;

        for record in self.engine.admit(resolved, direction, now) {
            self.emit(&record)?;
        }
        self.redraw(now)
    }

    /// Expire the open group when its window has passed, else refresh it
    pub fn tick(&mut self, now: u64) -> Result<()> {
        match self.engine.poll(now) {
            Some(record) => self.emit(&record),
            None => self.redraw(now),
        }
    }

    /// Flush the open group and close the log
    pub fn finish(mut self) -> Result<SessionStats> {
        if let Some(record) = self.engine.flush() {
            self.emit(&record)?;
        }
        self.out.flush()?;
        if let Some(log) = self.log.take() {
            info!("Wrote {} lines to {}", log.lines(), log.path().display());
            log.close()?;
        }
        Ok(self.stats)
    }

    fn emit(&mut self, record: &GroupRecord) -> Result<()> {
        let line = self.renderer.render(record, &self.timebase.label(record.started_at));

        let padding = " ".repeat(self.live_width.saturating_sub(line.width()));
        writeln!(self.out, "\r{}{}", line.colored, padding)?;
        if let Some(log) = self.log.as_mut() {
            log.write_line(&line)?;
        }

        self.stats.groups += 1;
        self.live_width = 0;
        self.last_redraw = None;
        Ok(())
    }

    /// Redraw the in-progress group in place, at most once per throttle period
    fn redraw(&mut self, now: u64) -> Result<()> {
        let Some(current) = self.engine.current() else {
            return Ok(());
        };
        let due = self
            .last_redraw
            .map_or(true, |last| now.saturating_sub(last) >= self.throttle);
        if !due {
            return Ok(());
        }

        let line = self.renderer.render(current, &self.timebase.label(current.started_at));
        let padding = " ".repeat(self.live_width.saturating_sub(line.width()));
        write!(self.out, "\r{}{}", line.colored, padding)?;
        self.out.flush()?;

        self.live_width = line.width();
        self.last_redraw = Some(now);
        Ok(())
    }
}

/// Drain `rx` into the session until every sender is gone or Ctrl+C
pub async fn drive<W: Write>(
    session: &mut MonitorSession<W>,
    mut rx: mpsc::Receiver<SourceEvent>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(event) => {
                    let now = session.timebase().millis(event.received);
                    session.handle(event.direction, &event.bytes, now)?;
                }
                None => break,
            },
            _ = ticker.tick() => {
                let now = session.timebase().now();
                session.tick(now)?;
            }
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
        }
    }

    Ok(())
}

/// Feed a parsed log through the session, optionally paced
pub async fn replay<W: Write>(
    session: &mut MonitorSession<W>,
    log: &ReplayLog,
    speed: f64,
) -> Result<usize> {
    let mut pacer = Pacer::new(speed);
    let mut clock = LogClock::new();
    let mut replayed = 0;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    for entry in &log.entries {
        let stamp = clock.advance(entry.timestamp_ms);
        if let Some(delay) = pacer.delay(entry.timestamp_ms.and(stamp)) {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut ctrl_c => {
                    info!("Interrupted");
                    break;
                }
            }
        }

        session.handle_event(entry.direction, entry.event, stamp.unwrap_or(0))?;
        replayed += 1;
    }

    Ok(replayed)
}

/// Open a MIDI input by index or case-insensitive name substring
///
/// Messages are forwarded to `tx` from midir's callback thread.
pub fn connect_input(
    pattern: &str,
    tx: mpsc::Sender<SourceEvent>,
) -> Result<(MidiInputConnection<()>, String)> {
    let midi_in = MidiInput::new("Rekordbox-Sniffer")?;
    let (port, name) = find_input_port(&midi_in, pattern)?;

    info!("Connecting to: {}", name);
    let conn = midi_in
        .connect(
            &port,
            "rekordbox-sniffer-in",
            move |_timestamp, data, _| {
                // Full channel drops the event rather than blocking the MIDI thread
                let _ = tx.try_send(SourceEvent::now(Direction::In, data.to_vec()));
            },
            (),
        )
        .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", name, e))?;

    Ok((conn, name))
}

fn find_input_port(midi_in: &MidiInput, pattern: &str) -> Result<(MidiInputPort, String)> {
    let ports = midi_in.ports();

    if let Ok(index) = pattern.parse::<usize>() {
        if let Some(port) = ports.get(index) {
            let name = midi_in.port_name(port)?;
            return Ok((port.clone(), name));
        }
        bail!("No port found at index: {}", index);
    }

    let needle = pattern.to_lowercase();
    for port in &ports {
        if let Ok(name) = midi_in.port_name(port) {
            if name.to_lowercase().contains(&needle) {
                return Ok((port.clone(), name));
            }
        }
    }
    bail!("No port found matching pattern: {}", pattern)
}

/// Input port names, in index order
pub fn input_port_names() -> Result<Vec<String>> {
    let midi_in = MidiInput::new("Rekordbox-Sniffer-Scanner")?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect())
}

/// Output port names, in index order
pub fn output_port_names() -> Result<Vec<String>> {
    let midi_out = MidiOutput::new("Rekordbox-Sniffer-Scanner")?;
    Ok(midi_out
        .ports()
        .iter()
        .filter_map(|p| midi_out.port_name(p).ok())
        .collect())
}

/// Print input and output ports
pub fn list_ports_formatted() -> Result<()> {
    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());

    let sections = [
        ("Input Ports:", input_port_names().context("Failed to scan input ports")?),
        ("Output Ports:", output_port_names().context("Failed to scan output ports")?),
    ];
    for (title, names) in sections {
        println!("\n{}", title.bold());
        if names.is_empty() {
            println!("  {}", "No ports found".dimmed());
        }
        for (index, name) in names.iter().enumerate() {
            println!("  {} {}", format!("[{}]", index).yellow(), name);
        }
    }

    println!();
    Ok(())
}
