//! Built-in fallback mappings
//!
//! Hardware mixer sections (master/booth level, headphones, mic) send MIDI
//! but are often missing from the device's mapping CSV. Each product family
//! reports them on its own channel.

use super::{MappingDirection, MappingEntry};

/// A console-reserved analog control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinControl {
    pub channel: u8,
    pub cc: u8,
    pub function: &'static str,
    pub comment: &'static str,
}

impl BuiltinControl {
    pub fn entry(&self) -> MappingEntry {
        MappingEntry {
            function: self.function.to_string(),
            control_type: "KnobSliderHiRes".to_string(),
            comment: self.comment.to_string(),
            direction: MappingDirection::Input,
            channel: self.channel,
            data1: self.cc,
            deck: None,
            is_readonly: false,
            is_builtin: true,
        }
    }
}

const fn control(
    channel: u8,
    cc: u8,
    function: &'static str,
    comment: &'static str,
) -> BuiltinControl {
    BuiltinControl {
        channel,
        cc,
        function,
        comment,
    }
}

/// DDJ controllers: mixer section on channel 6
const CONTROLLER_CONTROLS: &[BuiltinControl] = &[
    control(6, 5, "MicLevel", "Mic Level (built-in)"),
    control(6, 8, "MasterLevel", "Master Level (built-in)"),
    control(6, 9, "BoothLevel", "Booth Level (built-in)"),
    control(6, 12, "CueMasterMix", "Cue/Master Mix (built-in)"),
    control(6, 13, "HeadphonesLevel", "Headphones Level (built-in)"),
];

/// XDJ all-in-one units: channel 4
const ALL_IN_ONE_CONTROLS: &[BuiltinControl] = &[
    control(4, 24, "MasterLevel", "Master Level (built-in, XDJ)"),
    control(4, 25, "BoothLevel", "Booth Level (built-in, XDJ)"),
];

/// DJM mixers: channel 0
const MIXER_CONTROLS: &[BuiltinControl] = &[
    control(0, 24, "MasterLevel", "Master Level (built-in, DJM)"),
    control(0, 25, "BoothLevel", "Booth Level (built-in, DJM)"),
];

/// Product family, detected from the table's device name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleFamily {
    /// DDJ controllers (default)
    Controller,
    /// XDJ-RX / XDJ-RR / XDJ-XZ
    AllInOne,
    /// DJM mixers
    Mixer,
}

impl ConsoleFamily {
    /// Case-insensitive match on known model tokens
    pub fn detect(device_name: &str) -> Self {
        let name = device_name.to_uppercase();

        if ["XDJ-RX", "XDJ-RR", "XDJ-XZ"].iter().any(|t| name.contains(t)) {
            ConsoleFamily::AllInOne
        } else if ["DJM-", "DJM "].iter().any(|t| name.contains(t)) {
            ConsoleFamily::Mixer
        } else {
            ConsoleFamily::Controller
        }
    }

    pub fn controls(&self) -> &'static [BuiltinControl] {
        match self {
            ConsoleFamily::Controller => CONTROLLER_CONTROLS,
            ConsoleFamily::AllInOne => ALL_IN_ONE_CONTROLS,
            ConsoleFamily::Mixer => MIXER_CONTROLS,
        }
    }
}
