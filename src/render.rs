//! Console and log line rendering
//!
//! Every line is produced twice: once with ANSI styling for the terminal and
//! once plain for the log file.
//!
//! ```text
//! [23:02:07.155] | IN  | B6 08 33     | MasterLevel (Master Level (built-in)) [KnobSliderHiRes] val=6528 (x4)
//! ```

use std::sync::Arc;

use chrono::NaiveTime;
use colored::{Color, ColoredString, Colorize};

use crate::aggregate::GroupRecord;
use crate::mapping::{MappingEntry, MappingTable, ResolvedEvent};
use crate::midi::{Direction, Event, EventKind};

/// Width of the hex column in plain output
const HEX_WIDTH: usize = 12;

const SEPARATOR: &str = " | ";

const RAINBOW: &[Color] = &[
    Color::Red,
    Color::Yellow,
    Color::Green,
    Color::Cyan,
    Color::Blue,
    Color::Magenta,
    Color::BrightRed,
    Color::BrightYellow,
    Color::BrightGreen,
    Color::BrightCyan,
    Color::BrightBlue,
    Color::BrightMagenta,
];

/// What the last column of a line shows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum View {
    /// Function name, comment, type and value
    #[default]
    Function,
    /// Every column of the mapping row
    FullRow,
    /// Selected mapping columns, by header name
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub colors: bool,
    pub show_hex: bool,
    pub show_timestamp: bool,
    pub view: View,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            colors: true,
            show_hex: true,
            show_timestamp: true,
            view: View::Function,
        }
    }
}

/// One rendered line, styled and plain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedLine {
    pub colored: String,
    pub plain: String,
}

impl RenderedLine {
    /// Visible width of the line
    pub fn width(&self) -> usize {
        self.plain.chars().count()
    }
}

/// Column parts collected before joining
#[derive(Default)]
struct Parts {
    colored: Vec<String>,
    plain: Vec<String>,
}

impl Parts {
    fn push(&mut self, colored: String, plain: String) {
        self.colored.push(colored);
        self.plain.push(plain);
    }

    fn join(self, separator: &str) -> RenderedLine {
        RenderedLine {
            colored: self.colored.join(separator),
            plain: self.plain.join(separator),
        }
    }
}

/// Format a time of day the way lines and logs show it
pub fn clock_label(time: NaiveTime) -> String {
    time.format("%H:%M:%S%.3f").to_string()
}

/// Turns finalized groups into display text
pub struct Renderer {
    options: RenderOptions,
    table: Option<Arc<MappingTable>>,
}

impl Renderer {
    pub fn new(options: RenderOptions, table: Option<Arc<MappingTable>>) -> Self {
        Self { options, table }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    fn paint(&self, text: &str, style: impl FnOnce(&str) -> ColoredString) -> String {
        if self.options.colors {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }

    /// Columns shown by a row view, `None` for the function view
    fn row_columns(&self) -> Option<Vec<String>> {
        let table = self.table.as_ref()?;
        match &self.options.view {
            View::Function => None,
            View::FullRow => Some(table.headers().to_vec()),
            View::Columns(columns) => Some(columns.clone()),
        }
    }

    /// Column header line for row views; printed once per session
    pub fn header(&self) -> Option<RenderedLine> {
        let columns = self.row_columns()?;
        let mut parts = Parts::default();

        if self.options.show_timestamp {
            let placeholder = "-".repeat(14);
            parts.push(self.paint(&placeholder, |s| s.white().dimmed()), placeholder);
        }
        let placeholder = "---".to_string();
        parts.push(self.paint(&placeholder, |s| s.white().dimmed()), placeholder);
        if self.options.show_hex {
            let placeholder = "-".repeat(HEX_WIDTH);
            parts.push(self.paint(&placeholder, |s| s.white().dimmed()), placeholder);
        }

        let names = columns.join(",");
        parts.push(self.paint(&names, |s| s.cyan().bold()), names);

        Some(parts.join(SEPARATOR))
    }

    /// Render a group record
    ///
    /// `timestamp` is the label for the group's first event.
    pub fn render(&self, record: &GroupRecord, timestamp: &str) -> RenderedLine {
        let mut parts = Parts::default();

        if self.options.show_timestamp {
            let ts = format!("[{}]", timestamp);
            parts.push(self.paint(&ts, |s| s.white().dimmed()), ts);
        }

        let dir = record.direction.to_string();
        let dir_color = match record.direction {
            Direction::In => Color::Green,
            Direction::Out => Color::Yellow,
        };
        parts.push(self.paint(&dir, |s| s.color(dir_color).bold()), dir);

        if self.options.show_hex {
            let (colored, plain) = self.hex_text(&record.last.event);
            parts.push(colored, plain);
        }

        let (colored, plain) = match self.row_text(record) {
            Some(text) => text,
            None => self.function_text(record),
        };
        parts.push(colored, plain);

        parts.join(SEPARATOR)
    }

    fn hex_text(&self, event: &Event) -> (String, String) {
        let [status, data1, data2] = event.encode();
        let bytes = [status, data1, data2].map(|b| format!("{:02X}", b));
        let plain = bytes.join(" ");
        let padding = " ".repeat(HEX_WIDTH.saturating_sub(plain.len()));

        let colors = match event.kind {
            EventKind::NoteOn | EventKind::NoteOff => {
                let velocity = if data2 > 0 { Color::Green } else { Color::Red };
                [Color::Cyan, Color::Yellow, velocity]
            }
            EventKind::ControlChange => [Color::Magenta, Color::Yellow, Color::BrightWhite],
        };
        let colored = bytes
            .iter()
            .zip(colors)
            .map(|(b, c)| self.paint(b, |s| s.color(c)))
            .collect::<Vec<_>>()
            .join(" ");

        (colored + &padding, format!("{:width$}", plain, width = HEX_WIDTH))
    }

    /// Function name, comment, type, state and value
    fn function_text(&self, record: &GroupRecord) -> (String, String) {
        let resolved = &record.last;
        let Some(entry) = resolved.entry.as_ref() else {
            return self.raw_text(record);
        };

        let mut parts = Parts::default();
        let color = type_color(&entry.control_type);
        parts.push(
            self.paint(&entry.function, |s| s.color(color).bold()),
            entry.function.clone(),
        );

        if !entry.comment.is_empty() {
            let comment = format!("({})", entry.comment);
            parts.push(self.paint(&comment, |s| s.white().dimmed()), comment);
        }

        if !entry.control_type.is_empty() {
            let kind = format!("[{}]", entry.control_type);
            parts.push(self.paint(&kind, |s| s.blue()), kind);
        }

        if entry.is_readonly {
            let status = "[Status]".to_string();
            parts.push(self.paint(&status, |s| s.yellow().bold()), status);
        }

        if let Some(pressed) = button_state(resolved, entry) {
            let (text, color) = if pressed {
                ("PRESS", Color::Green)
            } else {
                ("release", Color::Red)
            };
            parts.push(self.paint(text, |s| s.color(color).bold()), text.to_string());
        }

        let value = record.value_suffix();
        if !value.is_empty() {
            parts.push(self.paint(&value, |s| s.bright_white()), value);
        }

        let counter = record.counter_suffix();
        if !counter.is_empty() {
            parts.push(self.paint(&counter, |s| s.white().dimmed()), counter);
        }

        let line = parts.join(" ");
        (line.colored, line.plain)
    }

    /// Generic text for events without a mapping
    fn raw_text(&self, record: &GroupRecord) -> (String, String) {
        let mut plain = record.last.event.describe();
        let counter = record.counter_suffix();
        if !counter.is_empty() {
            plain = format!("{} {}", plain, counter);
        }
        (self.paint(&plain, |s| s.white().dimmed()), plain)
    }

    /// Selected row values, or `None` to fall back to the function view
    fn row_text(&self, record: &GroupRecord) -> Option<(String, String)> {
        let columns = self.row_columns()?;
        let table = self.table.as_ref()?;

        let Some(row) = table.raw_row(&row_event(&record.last)) else {
            // Builtins have a mapping but no row
            return (!record.is_mapped()).then(|| self.raw_text(record));
        };

        // Full rows go by position: input and output repeat the deck column names
        let values: Vec<&str> = match &self.options.view {
            View::FullRow => row.fields().iter().map(String::as_str).collect(),
            _ => columns
                .iter()
                .map(|c| row.get(c).unwrap_or_default())
                .collect(),
        };
        let (mut colored, mut plain) = self.row_values(&values);
        let suffix = record.suffix();
        if !suffix.is_empty() {
            colored = format!("{} {}", colored, self.paint(&suffix, |s| s.white().dimmed()));
            plain = format!("{} {}", plain, suffix);
        }
        Some((colored, plain))
    }

    fn row_values(&self, values: &[&str]) -> (String, String) {
        let colored = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let color = RAINBOW[i % RAINBOW.len()];
                self.paint(v, |s| s.color(color))
            })
            .collect::<Vec<_>>()
            .join(",");

        (colored, values.join(","))
    }
}

/// The event whose table row describes `resolved` (the MSB for LSB halves)
fn row_event(resolved: &ResolvedEvent) -> Event {
    match resolved.msb_control {
        Some(msb) => Event {
            data1: msb,
            ..resolved.event
        },
        None => resolved.event,
    }
}

/// Pressed / released for note messages on buttons
fn button_state(resolved: &ResolvedEvent, entry: &MappingEntry) -> Option<bool> {
    (resolved.event.kind.is_note() && entry.control_type == "Button")
        .then_some(resolved.event.data2 > 0)
}

fn type_color(control_type: &str) -> Color {
    match control_type {
        "Button" => Color::BrightCyan,
        "Rotary" | "KnobSlider" | "KnobSliderHiRes" => Color::BrightMagenta,
        "Jog" => Color::BrightYellow,
        _ => Color::BrightWhite,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationEngine;
    use crate::mapping::test_support::sample_table;

    fn plain_options(view: View) -> RenderOptions {
        RenderOptions {
            colors: false,
            view,
            ..RenderOptions::default()
        }
    }

    fn records(table: &MappingTable, events: &[Event]) -> Vec<GroupRecord> {
        let mut engine = AggregationEngine::default();
        let mut out = Vec::new();
        for (t, event) in events.iter().enumerate() {
            out.extend(engine.admit(table.resolve(event), Direction::In, t as u64));
        }
        out.extend(engine.flush());
        out
    }

    #[test]
    fn test_function_line() {
        let table = Arc::new(sample_table());
        let renderer = Renderer::new(plain_options(View::Function), Some(table.clone()));
        let recs = records(&table, &[Event::note_on(0, 11, 127), Event::note_on(0, 11, 127)]);

        let line = renderer.render(&recs[0], "23:02:07.155");
        assert_eq!(
            line.plain,
            "[23:02:07.155] | IN  | 90 0B 7F     | PlayPause (Play/Pause [Deck 1]) [Button] PRESS (x2)"
        );
        assert_eq!(line.colored, line.plain);
    }

    #[test]
    fn test_hi_res_line() {
        let table = Arc::new(sample_table());
        let renderer = Renderer::new(plain_options(View::Function), Some(table.clone()));
        let recs = records(
            &table,
            &[Event::control_change(0, 4, 90), Event::control_change(0, 36, 10)],
        );

        let line = renderer.render(&recs[0], "00:00:00.000");
        assert!(line
            .plain
            .ends_with("B0 24 0A     | Trim (Trim [Deck 1] (LSB)) [KnobSliderHiRes] val=11530 (x2)"));
    }

    #[test]
    fn test_readonly_marker() {
        let table = Arc::new(sample_table());
        let renderer = Renderer::new(plain_options(View::Function), Some(table.clone()));
        let recs = records(&table, &[Event::control_change(1, 2, 100)]);

        let line = renderer.render(&recs[0], "t");
        assert!(line.plain.contains("ChannelLevel (Channel level meter [Deck 2]) [Indicator] [Status] val=100"));
    }

    #[test]
    fn test_unmapped_line() {
        let renderer = Renderer::new(plain_options(View::Function), None);
        let table = sample_table();
        let recs = records(&table, &[Event::control_change(6, 100, 51)]);

        let line = renderer.render(&recs[0], "t");
        assert_eq!(line.plain, "[t] | IN  | B6 64 33     | CC Ch:7 CC:100 Val:51");
    }

    #[test]
    fn test_columns_view() {
        let table = Arc::new(sample_table());
        let columns = table.select_columns("#name,type,14");
        let renderer = Renderer::new(plain_options(View::Columns(columns)), Some(table.clone()));
        let recs = records(&table, &[Event::note_on(6, 0x47, 127)]);

        let line = renderer.render(&recs[0], "t");
        assert!(line.plain.ends_with("| LoadDeck,Button,Load track"));

        let header = renderer.header().unwrap();
        assert_eq!(header.plain, "-------------- | --- | ------------ | #name,type,comment");
    }

    #[test]
    fn test_full_row_uses_msb_row_for_lsb() {
        let table = Arc::new(sample_table());
        let renderer = Renderer::new(plain_options(View::FullRow), Some(table.clone()));
        let recs = records(&table, &[Event::control_change(0, 36, 10)]);

        let line = renderer.render(&recs[0], "t");
        assert!(line
            .plain
            .ends_with("| Trim,Trim,KnobSliderHiRes,B004,0,1,2,3,,,,,,,Trim val=10"));
    }

    #[test]
    fn test_full_row_falls_back_for_builtins() {
        let table = Arc::new(sample_table());
        let renderer = Renderer::new(plain_options(View::FullRow), Some(table.clone()));
        let recs = records(&table, &[Event::control_change(6, 5, 1)]);

        let line = renderer.render(&recs[0], "t");
        assert!(line.plain.contains("MicLevel (Mic Level (built-in))"));
    }

    #[test]
    fn test_no_header_without_row_view() {
        let table = Arc::new(sample_table());
        let renderer = Renderer::new(plain_options(View::Function), Some(table));
        assert!(renderer.header().is_none());
    }

    #[test]
    fn test_hidden_columns() {
        let renderer = Renderer::new(
            RenderOptions {
                colors: false,
                show_hex: false,
                show_timestamp: false,
                view: View::Function,
            },
            None,
        );
        let table = sample_table();
        let recs = records(&table, &[Event::note_off(0, 1, 0)]);
        assert_eq!(renderer.render(&recs[0], "t").plain, "IN  | NOTE_OFF Ch:1 Note:1 Vel:0");
    }

    #[test]
    fn test_clock_label() {
        let time = NaiveTime::from_hms_milli_opt(23, 2, 7, 155).unwrap();
        assert_eq!(clock_label(time), "23:02:07.155");
    }
}
