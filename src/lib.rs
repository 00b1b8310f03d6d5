//! Rekordbox MIDI sniffer
//!
//! Decodes MIDI traffic from DJ controllers, names each message after the
//! Rekordbox function it drives (using the device's `*.midi.csv` mapping
//! file) and folds bursts of equivalent messages into single lines.

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod mapping;
pub mod midi;
pub mod render;
pub mod replay;
pub mod session_log;
pub mod simulator;
pub mod sniffer;
