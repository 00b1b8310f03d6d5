//! Rekordbox MIDI mapping tables
//!
//! A mapping table is built once from a Rekordbox `*.midi.csv` definition and
//! then answers "which function does this MIDI address drive?" for every
//! event the sniffer sees. The table is immutable after construction and can
//! be shared across threads behind an `Arc`.

pub mod builder;
pub mod builtin;
pub mod discovery;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::midi::{Event, EventKind};

/// Control numbers 32-63 carry the LSB half of controls 0-31
pub const HI_RES_LSB_OFFSET: u8 = 32;

/// Reduce a control number to its 0-31 logical control
///
/// An MSB (e.g. CC 4) and its LSB (CC 36) normalize to the same number.
pub fn normalize_control(cc: u8) -> u8 {
    cc % HI_RES_LSB_OFFSET
}

/// True for control numbers that carry the LSB half of a 14-bit control
pub fn is_lsb_control(cc: u8) -> bool {
    (HI_RES_LSB_OFFSET..HI_RES_LSB_OFFSET * 2).contains(&cc)
}

/// Errors raised while constructing a mapping table
///
/// Only whole-table failures surface here. Malformed rows and fields are
/// skipped during the build and never reach the caller.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("mapping table unavailable: {}", .path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mapping table {origin} has no header line")]
    Empty { origin: String },
}

/// Which side of the controller a mapping row describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingDirection {
    /// Controller → Rekordbox (`input` column)
    Input,
    /// Rekordbox → controller LED feedback (`output` column)
    Output,
}

impl fmt::Display for MappingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingDirection::Input => write!(f, "input"),
            MappingDirection::Output => write!(f, "output"),
        }
    }
}

/// A resolvable MIDI address and the Rekordbox function behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub function: String,
    /// Control type from the table, e.g. `Button`, `Jog`, `KnobSliderHiRes`
    pub control_type: String,
    pub comment: String,
    pub direction: MappingDirection,
    pub channel: u8,
    pub data1: u8,
    /// Deck column (1-4) the mapping was generated from
    pub deck: Option<u8>,
    /// Row carried the `RO` option (status / feedback only)
    pub is_readonly: bool,
    /// Injected fallback, not authored in the device table
    pub is_builtin: bool,
}

impl MappingEntry {
    /// 14-bit control made of an MSB/LSB controller pair
    pub fn is_hi_res(&self) -> bool {
        self.control_type.contains("HiRes")
    }
}

/// Composite index key: (kind, channel, data1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LookupKey {
    pub kind: EventKind,
    pub channel: u8,
    pub data1: u8,
}

impl LookupKey {
    pub fn new(kind: EventKind, channel: u8, data1: u8) -> Self {
        Self {
            kind,
            channel,
            data1,
        }
    }

    pub fn of(event: &Event) -> Self {
        Self::new(event.kind, event.channel, event.data1)
    }
}

/// The original table row behind a mapping, kept for full-row display
///
/// Shares the table's header list. Fields are stored positionally so that
/// both name and index lookups work even though Rekordbox headers repeat
/// (`deck1`..`deck4` appear for input and output).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    headers: Arc<[String]>,
    fields: Vec<String>,
}

impl RawRow {
    pub(crate) fn new(headers: Arc<[String]>, fields: Vec<String>) -> Self {
        Self { headers, fields }
    }

    /// Value of the named column
    ///
    /// With duplicate header names the last matching column wins.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.headers
            .iter()
            .take(self.fields.len())
            .rposition(|h| h == column)
            .and_then(|i| self.get_index(i))
    }

    pub fn get_index(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// (header, value) pairs in column order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .zip(self.fields.iter())
            .map(|(h, v)| (h.as_str(), v.as_str()))
    }
}

/// An event together with what the table knows about it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEvent {
    pub event: Event,
    pub entry: Option<MappingEntry>,
    /// Resolved through the MSB of a 14-bit control
    pub is_lsb: bool,
    /// MSB controller number when `is_lsb` is set
    pub msb_control: Option<u8>,
}

impl ResolvedEvent {
    pub fn unmapped(event: Event) -> Self {
        Self {
            event,
            entry: None,
            is_lsb: false,
            msb_control: None,
        }
    }

    pub fn mapped(event: Event, entry: MappingEntry) -> Self {
        Self {
            event,
            entry: Some(entry),
            is_lsb: false,
            msb_control: None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.entry.is_some()
    }

    /// Control change on a 14-bit control (either half)
    pub fn is_hi_res(&self) -> bool {
        self.event.kind == EventKind::ControlChange
            && (self.is_lsb || self.entry.as_ref().is_some_and(MappingEntry::is_hi_res))
    }
}

/// Immutable MIDI address → function index for one device
#[derive(Debug, Clone)]
pub struct MappingTable {
    device_name: String,
    source: Option<PathBuf>,
    headers: Arc<[String]>,
    index: HashMap<LookupKey, MappingEntry>,
    raw_rows: HashMap<LookupKey, Arc<RawRow>>,
}

impl MappingTable {
    /// Build a table from a mapping definition file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TableError::Unavailable {
            path: path.to_path_buf(),
            source,
        })?;
        builder::TableBuilder::new(Some(path.to_path_buf())).build(&text)
    }

    /// Build a table from definition text already in memory
    pub fn parse(text: &str) -> Result<Self, TableError> {
        builder::TableBuilder::new(None).build(text)
    }

    pub(crate) fn from_parts(
        device_name: String,
        source: Option<PathBuf>,
        headers: Arc<[String]>,
        index: HashMap<LookupKey, MappingEntry>,
        raw_rows: HashMap<LookupKey, Arc<RawRow>>,
    ) -> Self {
        Self {
            device_name,
            source,
            headers,
            index,
            raw_rows,
        }
    }

    /// Resolve an event to its mapping
    ///
    /// Misses are normal. A control change on 32-63 that has no mapping of
    /// its own is retried as the LSB of controller `data1 - 32`.
    pub fn resolve(&self, event: &Event) -> ResolvedEvent {
        let key = LookupKey::of(event);
        if let Some(entry) = self.index.get(&key) {
            return ResolvedEvent::mapped(*event, entry.clone());
        }

        if event.kind == EventKind::ControlChange && is_lsb_control(event.data1) {
            let msb_control = event.data1 - HI_RES_LSB_OFFSET;
            let msb_key = LookupKey {
                data1: msb_control,
                ..key
            };
            if let Some(msb) = self.index.get(&msb_key) {
                let mut entry = msb.clone();
                entry.comment = format!("{} (LSB)", msb.comment).trim().to_string();
                return ResolvedEvent {
                    event: *event,
                    entry: Some(entry),
                    is_lsb: true,
                    msb_control: Some(msb_control),
                };
            }
        }

        ResolvedEvent::unmapped(*event)
    }

    /// Direct index lookup, without LSB fallback
    pub fn get(&self, key: &LookupKey) -> Option<&MappingEntry> {
        self.index.get(key)
    }

    /// Column headers in file order
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// The table row that produced the event's mapping
    pub fn raw_row(&self, event: &Event) -> Option<&RawRow> {
        self.raw_rows.get(&LookupKey::of(event)).map(Arc::as_ref)
    }

    /// Resolve a column selection like `"0,function,14"` to header names
    ///
    /// Numbers are 0-based header indices. Unknown names and out-of-range
    /// indices are skipped with a warning.
    pub fn select_columns(&self, selection: &str) -> Vec<String> {
        let mut selected = Vec::new();

        for column in selection.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            if let Ok(index) = column.parse::<usize>() {
                match self.headers.get(index) {
                    Some(header) => selected.push(header.clone()),
                    None => warn!(
                        "Column index {} out of range (0-{})",
                        index,
                        self.headers.len().saturating_sub(1)
                    ),
                }
            } else if self.headers.iter().any(|h| h == column) {
                selected.push(column.to_string());
            } else {
                warn!("Column '{}' not found in mapping table", column);
            }
        }

        selected
    }

    /// Device name from the `@file` directive
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// File the table was loaded from
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Number of resolvable addresses (builtins included)
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// All entries, in no particular order
    pub fn entries(&self) -> impl Iterator<Item = (&LookupKey, &MappingEntry)> {
        self.index.iter()
    }
}

/// Sample DDJ table shared by unit tests across modules
#[cfg(test)]
pub(crate) mod test_support {
    use super::MappingTable;

    pub const SAMPLE_CSV: &str = include_str!("../../fixtures/DDJ-SAMPLE.midi.csv");

    pub fn sample_table() -> MappingTable {
        MappingTable::parse(SAMPLE_CSV).expect("sample table parses")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::sample_table;
    use super::*;

    #[test]
    fn test_direct_hit() {
        let table = sample_table();
        let resolved = table.resolve(&Event::note_on(1, 0x0C, 127));

        let entry = resolved.entry.unwrap();
        assert_eq!(entry.function, "Cue");
        assert_eq!(entry.deck, Some(2));
        assert!(!resolved.is_lsb);
        assert_eq!(resolved.msb_control, None);
    }

    #[test]
    fn test_lsb_falls_back_to_msb() {
        let table = sample_table();
        let resolved = table.resolve(&Event::control_change(0, 36, 10));

        assert!(resolved.is_lsb);
        assert_eq!(resolved.msb_control, Some(4));
        assert!(resolved.is_hi_res());
        let entry = resolved.entry.unwrap();
        assert_eq!(entry.function, "Trim");
        assert_eq!(entry.comment, "Trim [Deck 1] (LSB)");
        assert_eq!(entry.data1, 4);
    }

    #[test]
    fn test_lsb_fallback_only_for_control_change() {
        let table = sample_table();
        // Note 43 = 0x0B + 32, must not fall back to the PlayPause note
        let resolved = table.resolve(&Event::note_on(0, 0x0B + 32, 127));
        assert!(!resolved.is_mapped());
    }

    #[test]
    fn test_unmapped_event_is_not_an_error() {
        let table = sample_table();
        let resolved = table.resolve(&Event::control_change(15, 100, 1));
        assert_eq!(resolved, ResolvedEvent::unmapped(Event::control_change(15, 100, 1)));

        // LSB range with no MSB mapping either
        let resolved = table.resolve(&Event::control_change(15, 40, 1));
        assert!(!resolved.is_mapped());
        assert!(!resolved.is_lsb);
    }

    #[test]
    fn test_raw_row_lookup() {
        let table = sample_table();
        let row = table.raw_row(&Event::note_on(0, 0x0B, 127)).unwrap();

        assert_eq!(row.get("#name"), Some("PlayPause"));
        assert_eq!(row.get("comment"), Some("Play/Pause"));
        assert_eq!(row.get_index(3), Some("900B"));
        // Duplicate header: last `deck1` is the output deck column
        assert_eq!(row.get("deck1"), Some("0"));
        assert_eq!(row.get_index(14), Some("Play/Pause"));
        assert_eq!(row.get("missing"), None);

        assert!(table.raw_row(&Event::control_change(15, 100, 0)).is_none());
    }

    #[test]
    fn test_select_columns() {
        let table = sample_table();
        assert_eq!(
            table.select_columns("0, function ,14"),
            vec!["#name", "function", "comment"]
        );
        assert_eq!(table.select_columns("type,99,nope"), vec!["type"]);
        assert!(table.select_columns("").is_empty());
    }

    #[test]
    fn test_normalize_control() {
        assert_eq!(normalize_control(4), 4);
        assert_eq!(normalize_control(36), 4);
        assert!(is_lsb_control(32));
        assert!(is_lsb_control(63));
        assert!(!is_lsb_control(31));
        assert!(!is_lsb_control(64));
    }

    #[test]
    fn test_load_missing_file() {
        let err = MappingTable::load("/definitely/not/here.midi.csv").unwrap_err();
        assert!(matches!(err, TableError::Unavailable { .. }));
        assert!(err.to_string().contains("not/here.midi.csv"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("DDJ-SAMPLE.midi.csv");
        std::fs::write(&path, super::test_support::SAMPLE_CSV).unwrap();

        let table = MappingTable::load(&path).unwrap();
        assert_eq!(table.device_name(), "DDJ-SAMPLE");
        assert_eq!(table.source(), Some(path.as_path()));
    }
}
