//! MIDI event codec
//!
//! Decodes the 3-byte channel messages a DJ controller emits (Note On/Off and
//! Control Change) and renders them back to hex text for logs and replay.

use std::fmt;

/// Kind of a channel message, taken from the status byte's high nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    NoteOff,
    NoteOn,
    ControlChange,
}

impl EventKind {
    /// Map a status high nibble (0x8, 0x9, 0xB) to a kind
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0x8 => Some(EventKind::NoteOff),
            0x9 => Some(EventKind::NoteOn),
            0xB => Some(EventKind::ControlChange),
            _ => None,
        }
    }

    /// Status byte for this kind on channel 0
    pub fn status_base(&self) -> u8 {
        match self {
            EventKind::NoteOff => 0x80,
            EventKind::NoteOn => 0x90,
            EventKind::ControlChange => 0xB0,
        }
    }

    pub fn is_note(&self) -> bool {
        matches!(self, EventKind::NoteOn | EventKind::NoteOff)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::NoteOff => write!(f, "NOTE_OFF"),
            EventKind::NoteOn => write!(f, "NOTE_ON"),
            EventKind::ControlChange => write!(f, "CC"),
        }
    }
}

/// A decoded channel message
///
/// `data1` is the note or controller number, `data2` the velocity or value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event {
    pub kind: EventKind,
    /// MIDI channel (0-15)
    pub channel: u8,
    pub data1: u8,
    pub data2: u8,
}

impl Event {
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(EventKind::NoteOn, channel, note, velocity)
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(EventKind::NoteOff, channel, note, velocity)
    }

    pub fn control_change(channel: u8, cc: u8, value: u8) -> Self {
        Self::new(EventKind::ControlChange, channel, cc, value)
    }

    /// Build an event, masking every field into its MIDI range
    pub fn new(kind: EventKind, channel: u8, data1: u8, data2: u8) -> Self {
        Self {
            kind,
            channel: channel & 0x0F,
            data1: data1 & 0x7F,
            data2: data2 & 0x7F,
        }
    }

    /// Parse an event from raw bytes
    ///
    /// A two-byte record decodes with `data2 = 0`. Anything that is not a
    /// Note On/Off or Control Change status returns `None`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;

        // Running status (data byte first) is not tracked
        if status < 0x80 {
            return None;
        }

        let kind = EventKind::from_nibble(status >> 4)?;
        let data1 = *rest.first()?;
        let data2 = rest.get(1).copied().unwrap_or(0);

        Some(Self::new(kind, status & 0x0F, data1, data2))
    }

    /// Encode the event to MIDI bytes
    pub fn encode(&self) -> [u8; 3] {
        [
            self.kind.status_base() | (self.channel & 0x0F),
            self.data1 & 0x7F,
            self.data2 & 0x7F,
        ]
    }

    /// Status byte (kind nibble + channel)
    pub fn status(&self) -> u8 {
        self.encode()[0]
    }

    /// Hex text of the encoded bytes, e.g. `"B6 08 33"`
    pub fn to_hex(&self) -> String {
        format_hex(&self.encode())
    }

    /// Generic description used when no mapping is known
    ///
    /// Channels are displayed 1-based.
    pub fn describe(&self) -> String {
        match self.kind {
            EventKind::NoteOn | EventKind::NoteOff => format!(
                "{} Ch:{} Note:{} Vel:{}",
                self.kind,
                self.channel + 1,
                self.data1,
                self.data2
            ),
            EventKind::ControlChange => format!(
                "CC Ch:{} CC:{} Val:{}",
                self.channel + 1,
                self.data1,
                self.data2
            ),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Direction of the stream an event was observed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }

    /// Parse the `IN` / `OUT` tag used in log files
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim() {
            t if t.eq_ignore_ascii_case("in") => Some(Direction::In),
            t if t.eq_ignore_ascii_case("out") => Some(Direction::Out),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Padded so IN and OUT line up in log columns
        write!(f, "{:3}", self.as_str())
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse space-separated hex bytes (`"B6 08 33"`) into an event
pub fn parse_hex(text: &str) -> Option<Event> {
    let compact: String = text.split_whitespace().collect();
    if compact.is_empty() {
        return None;
    }
    let bytes = hex::decode(compact).ok()?;
    // Full three-byte message required for text input
    if bytes.len() < 3 {
        return None;
    }
    Event::parse(&bytes)
}
