//! Mapping table builder
//!
//! Parses the Rekordbox MIDI Learn CSV format:
//!
//! ```text
//! @file,1,DDJ-FLX10
//! #name,function,type,input,deck1,deck2,deck3,deck4,output,deck1,deck2,deck3,deck4,option,comment
//! PlayPause,PlayPause,Button,900B,0,1,2,3,900B,0,1,2,3,Fast;Priority=50;Dual,Play/Pause
//! ```
//!
//! Addresses are 4 hex digits: status byte (kind nibble + base channel)
//! followed by data1. Each direction uses one of two encodings:
//!
//! - **Offset**: the address column holds the base address and the deck
//!   columns hold channel offsets (`B007` with `0,1,2,3`).
//! - **Direct**: the address column is empty and each deck column holds a
//!   full address of its own (`9646,9647,9648,9649`).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use super::builtin::ConsoleFamily;
use super::{LookupKey, MappingDirection, MappingEntry, MappingTable, RawRow, TableError};
use crate::midi::EventKind;

/// Minimum number of positional fields in a data row
pub const MIN_ROW_FIELDS: usize = 15;

const COL_NAME: usize = 0;
const COL_FUNCTION: usize = 1;
const COL_TYPE: usize = 2;
const COL_INPUT: usize = 3;
const COL_OUTPUT: usize = 8;
const COL_OPTION: usize = 13;
const COL_COMMENT: usize = 14;

/// Parsed `option` column: `Fast;Priority=50;Dual;RO`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowOptions {
    flags: HashMap<String, Option<String>>,
}

impl RowOptions {
    pub fn parse(text: &str) -> Self {
        let mut flags = HashMap::new();

        for token in text.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            match token.split_once('=') {
                Some((key, value)) => {
                    let key = key.trim();
                    if key.is_empty() {
                        debug!("Skipping option token without a key: '{}'", token);
                        continue;
                    }
                    flags.insert(key.to_string(), Some(value.trim().to_string()));
                }
                None => {
                    flags.insert(token.to_string(), None);
                }
            }
        }

        Self { flags }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.flags.contains_key(key)
    }

    /// Value of a `key=value` option
    pub fn value(&self, key: &str) -> Option<&str> {
        self.flags.get(key).and_then(|v| v.as_deref())
    }

    /// `RO`: status/feedback message rather than a user control
    pub fn is_readonly(&self) -> bool {
        self.contains("RO")
    }
}

/// A 4-hex-digit address split into its parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub kind: EventKind,
    pub channel: u8,
    pub data1: u8,
}

impl Address {
    /// Parse `"900B"` / `"B640"`
    ///
    /// Characters past the fourth are ignored. Unsupported kinds and data
    /// bytes above 0x7F are rejected.
    pub fn parse(text: &str) -> Option<Self> {
        let digits = text.get(..4)?;
        let bytes = hex::decode(digits).ok()?;
        let (status, data1) = (bytes[0], bytes[1]);

        let kind = EventKind::from_nibble(status >> 4)?;
        if data1 > 0x7F {
            return None;
        }

        Some(Self {
            kind,
            channel: status & 0x0F,
            data1,
        })
    }
}

/// Address column plus its four deck columns for one direction
struct AddressColumns<'a> {
    address: &'a str,
    decks: [&'a str; 4],
}

impl<'a> AddressColumns<'a> {
    fn from_fields(fields: &[&'a str], start: usize) -> Self {
        Self {
            address: fields[start],
            decks: [
                fields[start + 1],
                fields[start + 2],
                fields[start + 3],
                fields[start + 4],
            ],
        }
    }

    fn has_decks(&self) -> bool {
        self.decks.iter().any(|d| !d.is_empty())
    }
}

/// Row-level fields copied into every mapping the row produces
struct RowTemplate<'a> {
    function: &'a str,
    control_type: &'a str,
    comment: &'a str,
    is_readonly: bool,
}

impl RowTemplate<'_> {
    fn entry(
        &self,
        direction: MappingDirection,
        channel: u8,
        data1: u8,
        deck: Option<u8>,
    ) -> MappingEntry {
        let comment = match (deck, self.comment.is_empty()) {
            (None, _) => self.comment.to_string(),
            (Some(deck), true) => format!("Deck {}", deck),
            (Some(deck), false) => format!("{} [Deck {}]", self.comment, deck),
        };

        MappingEntry {
            function: self.function.to_string(),
            control_type: self.control_type.to_string(),
            comment,
            direction,
            channel,
            data1,
            deck,
            is_readonly: self.is_readonly,
            is_builtin: false,
        }
    }
}

/// Accumulates mappings while a definition is parsed
pub struct TableBuilder {
    source: Option<PathBuf>,
    headers: Arc<[String]>,
    index: HashMap<LookupKey, MappingEntry>,
    raw_rows: HashMap<LookupKey, Arc<RawRow>>,
    overwritten: usize,
}

impl TableBuilder {
    pub fn new(source: Option<PathBuf>) -> Self {
        Self {
            source,
            headers: Arc::from(Vec::new()),
            index: HashMap::new(),
            raw_rows: HashMap::new(),
            overwritten: 0,
        }
    }

    fn origin(&self) -> String {
        self.source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string())
    }

    /// Parse a full definition and produce the finished table
    pub fn build(mut self, text: &str) -> Result<MappingTable, TableError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut rest = text;

        let mut device_name = "Unknown".to_string();
        let mut first = next_line(&mut rest);

        // `@file,<version>,<device>` directive
        if let Some(line) = first.filter(|l| l.trim_start().starts_with('@')) {
            if let Some(name) = line.trim().split(',').nth(2).map(str::trim) {
                if !name.is_empty() {
                    device_name = name.to_string();
                }
            }
            first = next_line(&mut rest);
        }

        let header_line = first
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or_else(|| TableError::Empty {
                origin: self.origin(),
            })?;
        self.headers = header_line.split(',').map(str::to_string).collect();

        let preamble_lines = text[..text.len() - rest.len()].matches('\n').count() as u64;
        let rows = self.read_rows(rest, preamble_lines);

        let family = ConsoleFamily::detect(&device_name);
        let injected = self.add_builtins(family);

        info!(
            "Loaded {} MIDI mappings for {} from {} rows ({} built-in, {} overwritten, {} skipped)",
            self.index.len(),
            device_name,
            rows.controls,
            injected,
            self.overwritten,
            rows.skipped.len()
        );

        Ok(MappingTable::from_parts(
            device_name,
            self.source,
            self.headers,
            self.index,
            self.raw_rows,
        ))
    }

    /// Feed every data row below the header into the table
    ///
    /// `preamble_lines` is the number of file lines before `rows`, so
    /// skipped rows are reported by their line in the file.
    fn read_rows(&mut self, rows: &str, preamble_lines: u64) -> RowStats {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(rows.as_bytes());

        let mut stats = RowStats::default();
        for record in reader.records() {
            match record {
                Ok(record) => {
                    let line = file_line(preamble_lines, record.position());
                    match self.add_row(&record, line) {
                        RowOutcome::Control => stats.controls += 1,
                        RowOutcome::Skipped => stats.skipped.extend(line),
                        RowOutcome::Blank => {}
                    }
                }
                Err(e) => {
                    let line = file_line(preamble_lines, e.position());
                    debug!("Skipping unreadable row at line {}: {}", line.unwrap_or_default(), e);
                    stats.skipped.extend(line);
                }
            }
        }
        stats
    }

    /// Process one data row
    fn add_row(&mut self, record: &csv::StringRecord, line: Option<u64>) -> RowOutcome {
        let fields: Vec<&str> = record.iter().map(str::trim).collect();

        let name = fields.get(COL_NAME).copied().unwrap_or_default();
        if name.is_empty() || name.starts_with('#') {
            return RowOutcome::Blank;
        }
        if fields.len() < MIN_ROW_FIELDS {
            debug!(
                "Skipping row '{}' at line {}: {} fields",
                name,
                line.unwrap_or_default(),
                fields.len()
            );
            return RowOutcome::Skipped;
        }

        let function = match fields[COL_FUNCTION] {
            "" => name,
            f => f,
        };
        let options = RowOptions::parse(fields[COL_OPTION]);
        let template = RowTemplate {
            function,
            control_type: fields[COL_TYPE],
            comment: fields[COL_COMMENT],
            is_readonly: options.is_readonly(),
        };

        let row = Arc::new(RawRow::new(
            self.headers.clone(),
            record.iter().map(str::to_string).collect(),
        ));

        let input = AddressColumns::from_fields(&fields, COL_INPUT);
        let output = AddressColumns::from_fields(&fields, COL_OUTPUT);
        self.add_direction(&input, &template, MappingDirection::Input, &row);
        self.add_direction(&output, &template, MappingDirection::Output, &row);

        RowOutcome::Control
    }

    fn add_direction(
        &mut self,
        columns: &AddressColumns<'_>,
        template: &RowTemplate<'_>,
        direction: MappingDirection,
        row: &Arc<RawRow>,
    ) {
        if columns.address.starts_with('#') {
            return;
        }

        if !columns.address.is_empty() {
            self.add_offset_pattern(columns, template, direction, row);
        } else if columns.has_decks() {
            self.add_direct_pattern(columns, template, direction, row);
        }
    }

    /// Base address + per-deck channel offsets
    fn add_offset_pattern(
        &mut self,
        columns: &AddressColumns<'_>,
        template: &RowTemplate<'_>,
        direction: MappingDirection,
        row: &Arc<RawRow>,
    ) {
        let Some(base) = Address::parse(columns.address) else {
            debug!(
                "Skipping {} address '{}' for {}",
                direction, columns.address, template.function
            );
            return;
        };

        if !columns.has_decks() {
            let entry = template.entry(direction, base.channel, base.data1, None);
            self.insert(LookupKey::new(base.kind, base.channel, base.data1), entry, row);
            return;
        }

        for (deck, offset) in deck_numbers().zip(columns.decks) {
            if offset.is_empty() {
                continue;
            }
            let Ok(offset) = offset.parse::<i16>() else {
                debug!(
                    "Skipping deck {} offset '{}' for {}",
                    deck, offset, template.function
                );
                continue;
            };

            let channel = i16::from(base.channel) + offset;
            if !(0..=15).contains(&channel) {
                debug!(
                    "Deck {} channel {} out of range for {}",
                    deck, channel, template.function
                );
                continue;
            }
            let channel = channel as u8;

            let entry = template.entry(direction, channel, base.data1, Some(deck));
            self.insert(LookupKey::new(base.kind, channel, base.data1), entry, row);
        }
    }

    /// Each deck column holds a complete address
    fn add_direct_pattern(
        &mut self,
        columns: &AddressColumns<'_>,
        template: &RowTemplate<'_>,
        direction: MappingDirection,
        row: &Arc<RawRow>,
    ) {
        for (deck, text) in deck_numbers().zip(columns.decks) {
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            let Some(address) = Address::parse(text) else {
                debug!(
                    "Skipping deck {} address '{}' for {}",
                    deck, text, template.function
                );
                continue;
            };

            let entry = template.entry(direction, address.channel, address.data1, Some(deck));
            self.insert(
                LookupKey::new(address.kind, address.channel, address.data1),
                entry,
                row,
            );
        }
    }

    /// Last write wins on key collisions
    fn insert(&mut self, key: LookupKey, entry: MappingEntry, row: &Arc<RawRow>) {
        if let Some(previous) = self.index.insert(key, entry) {
            self.overwritten += 1;
            debug!(
                "{:?} ch{} {} remapped (was {})",
                key.kind, key.channel, key.data1, previous.function
            );
        }
        self.raw_rows.insert(key, Arc::clone(row));
    }

    /// Add console-reserved controls the device table leaves out
    fn add_builtins(&mut self, family: ConsoleFamily) -> usize {
        let mut injected = 0;

        for control in family.controls() {
            let key = LookupKey::new(EventKind::ControlChange, control.channel, control.cc);
            if self.index.contains_key(&key) {
                continue;
            }
            self.index.insert(key, control.entry());
            injected += 1;
        }

        injected
    }
}

fn deck_numbers() -> impl Iterator<Item = u8> {
    1..=4
}

/// What a data row turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Control,
    /// Empty, or a `#` section comment
    Blank,
    Skipped,
}

#[derive(Debug, Default)]
struct RowStats {
    controls: usize,
    /// File lines of rows that could not be used
    skipped: Vec<u64>,
}

/// 1-based file line of a reader position
fn file_line(preamble_lines: u64, position: Option<&csv::Position>) -> Option<u64> {
    position.map(|p| preamble_lines + p.line())
}

/// Split off the next line (without terminator)
fn next_line<'a>(rest: &mut &'a str) -> Option<&'a str> {
    if rest.is_empty() {
        return None;
    }
    let (line, tail) = rest.split_once('\n').unwrap_or((rest, ""));
    *rest = tail;
    Some(line.strip_suffix('\r').unwrap_or(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::test_support::sample_table;
    use crate::midi::Event;
    use proptest::prelude::*;

    const HEADER: &str = "#name,function,type,input,deck1,deck2,deck3,deck4,output,deck1,deck2,deck3,deck4,option,comment";

    fn table(device: &str, rows: &[&str]) -> MappingTable {
        let mut text = format!("@file,1,{}\n{}\n", device, HEADER);
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        MappingTable::parse(&text).unwrap()
    }

    fn authored(table: &MappingTable) -> Vec<(&LookupKey, &MappingEntry)> {
        let mut entries: Vec<_> = table.entries().filter(|(_, e)| !e.is_builtin).collect();
        entries.sort_by_key(|(k, _)| **k);
        entries
    }

    #[test]
    fn test_sample_table_counts() {
        let table = sample_table();
        assert_eq!(table.device_name(), "DDJ-SAMPLE");
        assert_eq!(table.headers().len(), 15);
        assert_eq!(authored(&table).len(), 36);
        // Channel 6 family, CC 8 is authored so only four builtins remain
        assert_eq!(table.len(), 40);
    }

    #[test]
    fn test_offset_pattern() {
        let table = sample_table();
        for (channel, deck) in [(0u8, 1u8), (1, 2), (2, 3), (3, 4)] {
            let entry = table
                .get(&LookupKey::new(EventKind::ControlChange, channel, 0x22))
                .unwrap();
            assert_eq!(entry.function, "JogScratch");
            assert_eq!(entry.control_type, "Jog");
            assert_eq!(entry.deck, Some(deck));
            assert_eq!(entry.channel, channel);
            assert_eq!(entry.comment, format!("Jog scratch [Deck {}]", deck));
        }
    }

    #[test]
    fn test_offset_pattern_without_decks() {
        let table = sample_table();
        let entry = table
            .get(&LookupKey::new(EventKind::ControlChange, 6, 0x1F))
            .unwrap();
        // Empty function falls back to the row name
        assert_eq!(entry.function, "CrossFader");
        assert_eq!(entry.deck, None);
        assert_eq!(entry.comment, "Crossfader");
    }

    #[test]
    fn test_direct_pattern() {
        let table = sample_table();
        for (note, deck) in [(0x46u8, 1u8), (0x47, 2), (0x48, 3), (0x49, 4)] {
            let entry = table
                .get(&LookupKey::new(EventKind::NoteOn, 6, note))
                .unwrap();
            assert_eq!(entry.function, "Load");
            assert_eq!(entry.deck, Some(deck));
            assert_eq!(entry.comment, format!("Load track [Deck {}]", deck));
            assert_eq!(entry.direction, MappingDirection::Input);
        }
    }

    #[test]
    fn test_output_direction_and_readonly() {
        let table = sample_table();
        let entry = table
            .get(&LookupKey::new(EventKind::ControlChange, 2, 0x02))
            .unwrap();
        assert_eq!(entry.function, "ChannelLevel");
        assert_eq!(entry.direction, MappingDirection::Output);
        assert!(entry.is_readonly);
        assert_eq!(entry.deck, Some(3));
    }

    #[test]
    fn test_output_overwrites_input_at_same_address() {
        let table = sample_table();
        let entry = table.get(&LookupKey::new(EventKind::NoteOn, 0, 0x0B)).unwrap();
        assert_eq!(entry.function, "PlayPause");
        assert_eq!(entry.direction, MappingDirection::Output);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let table = sample_table();
        assert!(table.entries().all(|(_, e)| e.function != "Broken"));
        assert!(table.entries().all(|(_, e)| e.function != "TooShort"));
        assert!(table.get(&LookupKey::new(EventKind::NoteOn, 0, 0x01)).is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let table = table(
            "DDJ-TEST",
            &[
                "First,First,Button,9010,,,,,,,,,,,first",
                "Second,Second,Button,9010,,,,,,,,,,,second",
            ],
        );
        let key = LookupKey::new(EventKind::NoteOn, 0, 0x10);
        assert_eq!(table.get(&key).unwrap().function, "Second");
        assert_eq!(table.raw_row(&Event::note_on(0, 0x10, 1)).unwrap().get("#name"), Some("Second"));
    }

    #[test]
    fn test_bad_offsets_skip_only_that_deck() {
        let table = table(
            "DDJ-TEST",
            &["Pad,Pad,Button,9E10,0,x,20,-15,,,,,,,pad"],
        );
        let pads = authored(&table);
        // deck2 not a number, deck3 channel 34, deck4 channel -1
        assert_eq!(pads.len(), 1);
        assert_eq!(pads[0].1.channel, 14);
        assert_eq!(pads[0].1.deck, Some(1));
    }

    #[test]
    fn test_bad_direct_address_skips_only_that_deck() {
        let table = table(
            "DDJ-TEST",
            &["Load,Load,Button,,9646,96ZZ,#9648,F049,,,,,,,"],
        );
        let loads = authored(&table);
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].1.comment, "Deck 1");
    }

    #[test]
    fn test_address_parse() {
        assert_eq!(
            Address::parse("B640"),
            Some(Address {
                kind: EventKind::ControlChange,
                channel: 6,
                data1: 0x40
            })
        );
        assert_eq!(Address::parse("900Bxx").map(|a| a.data1), Some(0x0B));
        assert_eq!(Address::parse("E000"), None);
        assert_eq!(Address::parse("90FF"), None);
        assert_eq!(Address::parse("900"), None);
        assert_eq!(Address::parse("9é0B"), None);
    }

    #[test]
    fn test_row_options() {
        let options = RowOptions::parse("Fast; Priority=50 ;Dual;RO;=7");
        assert!(options.contains("Fast"));
        assert!(options.contains("Dual"));
        assert!(options.is_readonly());
        assert_eq!(options.value("Priority"), Some("50"));
        assert_eq!(options.value("Fast"), None);
        assert!(!RowOptions::parse("").is_readonly());
    }

    #[test]
    fn test_skipped_rows_report_file_lines() {
        let text = crate::mapping::test_support::SAMPLE_CSV;
        let mut rest = text;
        next_line(&mut rest);
        next_line(&mut rest);

        let mut builder = TableBuilder::new(None);
        let stats = builder.read_rows(rest, 2);

        // Blank line 11 is not a record; TooShort sits on line 18
        assert_eq!(stats.skipped, vec![18]);
        assert_eq!(text.lines().nth(17).map(|l| l.starts_with("TooShort")), Some(true));
        assert_eq!(stats.controls, 12);
    }

    #[test]
    fn test_missing_header_is_an_error() {
        assert!(matches!(
            MappingTable::parse("@file,1,DDJ-X\n"),
            Err(TableError::Empty { .. })
        ));
        assert!(matches!(MappingTable::parse(""), Err(TableError::Empty { .. })));
    }

    #[test]
    fn test_without_directive_first_line_is_header() {
        let text = format!("{}\r\nPlay,Play,Button,900B,,,,,,,,,,,\r\n", HEADER);
        let table = MappingTable::parse(&text).unwrap();
        assert_eq!(table.device_name(), "Unknown");
        assert_eq!(table.headers()[0], "#name");
        assert!(table.get(&LookupKey::new(EventKind::NoteOn, 0, 0x0B)).is_some());
    }

    #[test]
    fn test_quoted_fields() {
        let table = table(
            "DDJ-TEST",
            &["Browse,Browse,Rotary,B640,,,,,,,,,,,\"Browse, rotate\""],
        );
        let entry = table
            .get(&LookupKey::new(EventKind::ControlChange, 6, 0x40))
            .unwrap();
        assert_eq!(entry.comment, "Browse, rotate");
    }

    fn offset_strategy() -> impl Strategy<Value = [Option<u8>; 4]> {
        [
            proptest::option::of(0u8..4),
            proptest::option::of(0u8..4),
            proptest::option::of(0u8..4),
            proptest::option::of(0u8..4),
        ]
    }

    proptest! {
        /// An offset row and its hand-expanded direct row map the same keys
        #[test]
        fn offset_and_direct_patterns_agree(
            nibble in prop_oneof![Just(0x8u8), Just(0x9u8), Just(0xBu8)],
            base in 0u8..12,
            data1 in 0u8..128,
            offsets in offset_strategy(),
        ) {
            prop_assume!(offsets.iter().any(Option::is_some));

            let address = format!("{:02X}{:02X}", (nibble << 4) | base, data1);
            let offset_cols: Vec<String> = offsets
                .iter()
                .map(|o| o.map(|o| o.to_string()).unwrap_or_default())
                .collect();
            let direct_cols: Vec<String> = offsets
                .iter()
                .map(|o| {
                    o.map(|o| format!("{:02X}{:02X}", (nibble << 4) | (base + o), data1))
                        .unwrap_or_default()
                })
                .collect();

            let offset_row = format!("Ctl,Fn,Rotary,{},{},,,,,,,Knob", address, offset_cols.join(","));
            let direct_row = format!("Ctl,Fn,Rotary,,{},,,,,,,Knob", direct_cols.join(","));

            let by_offset = table("DDJ-PROP", &[offset_row.as_str()]);
            let by_direct = table("DDJ-PROP", &[direct_row.as_str()]);

            let a = authored(&by_offset);
            let b = authored(&by_direct);
            prop_assert!(!a.is_empty());
            prop_assert!(a.iter().all(|(_, e)| e.comment.starts_with("Knob [Deck ")));
            prop_assert_eq!(a, b);
        }
    }
}
