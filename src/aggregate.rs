//! Event aggregation
//!
//! Jog wheels, knob sweeps and repeated taps produce bursts of events that
//! mean the same thing. The [`AggregationEngine`] folds such a burst into a
//! single [`GroupRecord`] with a repeat count and, for 14-bit controls, the
//! combined MSB/LSB value.
//!
//! The engine is a plain state machine: it performs no I/O, never fails and
//! takes its notion of time from the caller (`now`, in milliseconds on any
//! monotonic clock). At most one group is open at a time.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::trace;

use crate::mapping::{is_lsb_control, normalize_control, ResolvedEvent};
use crate::midi::{Direction, EventKind};

/// Default time span during which equivalent events are merged
pub const DEFAULT_GROUP_WINDOW: Duration = Duration::from_millis(500);

/// Grouping behavior for one monitoring session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupingConfig {
    /// Measured from the first event of a group
    pub window: Duration,
    /// When false every event is emitted on its own
    pub enabled: bool,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_GROUP_WINDOW,
            enabled: true,
        }
    }
}

/// What two events must share to be summarized together
///
/// Control change values are not part of the key. Notes keep their
/// velocity so presses and releases stay apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    direction: Direction,
    function: String,
    control_type: String,
    deck: Option<u8>,
    kind: EventKind,
    channel: u8,
    /// Note number, or normalized controller number
    control: u8,
    /// Note velocity
    velocity: Option<u8>,
}

impl GroupKey {
    /// `None` for unmapped events, which never group
    pub fn of(resolved: &ResolvedEvent, direction: Direction) -> Option<Self> {
        let entry = resolved.entry.as_ref()?;
        let event = &resolved.event;

        let (control, velocity) = match event.kind {
            EventKind::NoteOn | EventKind::NoteOff => (event.data1, Some(event.data2)),
            EventKind::ControlChange => (normalize_control(event.data1), None),
        };

        Some(Self {
            direction,
            function: entry.function.clone(),
            control_type: entry.control_type.clone(),
            deck: entry.deck,
            kind: event.kind,
            channel: event.channel,
            control,
            velocity,
        })
    }
}

/// A finalized (or in-progress) run of equivalent events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub direction: Direction,
    /// Most recently admitted event
    pub last: ResolvedEvent,
    /// Match fingerprint; `None` for unmapped singletons
    pub key: Option<GroupKey>,
    pub count: u32,
    /// Caller's clock at the first event, in milliseconds
    pub started_at: u64,
    /// Set once any admitted event belongs to a 14-bit control
    hi_res: bool,
    msb: BTreeMap<u8, u8>,
    lsb: BTreeMap<u8, u8>,
}

impl GroupRecord {
    fn open(resolved: ResolvedEvent, direction: Direction, now: u64) -> Self {
        let key = GroupKey::of(&resolved, direction);
        let mut record = Self {
            direction,
            last: resolved,
            key,
            count: 1,
            started_at: now,
            hi_res: false,
            msb: BTreeMap::new(),
            lsb: BTreeMap::new(),
        };
        record.record_half();
        record
    }

    fn accepts(&self, resolved: &ResolvedEvent, direction: Direction) -> bool {
        match (&self.key, GroupKey::of(resolved, direction)) {
            (Some(open), Some(candidate)) => *open == candidate,
            _ => false,
        }
    }

    fn merge(&mut self, resolved: ResolvedEvent) {
        self.count += 1;
        self.last = resolved;
        self.record_half();
    }

    /// Store the latest control change's 7-bit half
    ///
    /// Both halves are kept from the first event on, so an MSB seen before
    /// the group turns out to be 14-bit still counts.
    fn record_half(&mut self) {
        self.hi_res |= self.last.is_hi_res();
        let event = &self.last.event;
        if event.kind != EventKind::ControlChange {
            return;
        }
        let control = normalize_control(event.data1);
        if is_lsb_control(event.data1) {
            self.lsb.insert(control, event.data2);
        } else {
            self.msb.insert(control, event.data2);
        }
    }

    /// Whether the group combines MSB and LSB halves
    ///
    /// True when the table types the control as 14-bit, or once an LSB
    /// half has been merged. It never turns back off within a group.
    pub fn is_hi_res(&self) -> bool {
        self.hi_res
    }

    pub fn is_mapped(&self) -> bool {
        self.last.is_mapped()
    }

    /// Latest MSB half seen for a normalized control
    pub fn msb(&self, control: u8) -> Option<u8> {
        self.msb.get(&control).copied()
    }

    /// Latest LSB half seen for a normalized control
    pub fn lsb(&self, control: u8) -> Option<u8> {
        self.lsb.get(&control).copied()
    }

    /// Control change value of the group
    ///
    /// 14-bit controls combine `msb * 128 + lsb`, with an unseen half
    /// counting as 0. Other controls report the last 7-bit value.
    pub fn value(&self) -> Option<u16> {
        let event = &self.last.event;
        if event.kind != EventKind::ControlChange {
            return None;
        }

        if self.is_hi_res() {
            let control = normalize_control(event.data1);
            let msb = u16::from(self.msb(control).unwrap_or(0));
            let lsb = u16::from(self.lsb(control).unwrap_or(0));
            Some(msb * 128 + lsb)
        } else {
            Some(u16::from(event.data2))
        }
    }

    /// `val=N` for control changes, empty otherwise
    pub fn value_suffix(&self) -> String {
        self.value()
            .map(|v| format!("val={}", v))
            .unwrap_or_default()
    }

    /// `(xN)` when more than one event was merged
    pub fn counter_suffix(&self) -> String {
        if self.count > 1 {
            format!("(x{})", self.count)
        } else {
            String::new()
        }
    }

    /// Value and counter, space separated
    pub fn suffix(&self) -> String {
        [self.value_suffix(), self.counter_suffix()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Per-session grouping state machine
///
/// Feed it with [`admit`](Self::admit) in arrival order and call
/// [`flush`](Self::flush) when the stream ends, or the last group is lost.
#[derive(Debug, Default)]
pub struct AggregationEngine {
    config: GroupingConfig,
    open: Option<GroupRecord>,
}

impl AggregationEngine {
    pub fn new(config: GroupingConfig) -> Self {
        Self { config, open: None }
    }

    pub fn config(&self) -> &GroupingConfig {
        &self.config
    }

    /// Group currently accumulating events
    pub fn current(&self) -> Option<&GroupRecord> {
        self.open.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.open.is_none()
    }

    /// Admit one event; returns the records finalized by it
    ///
    /// At most two records come back: an expired or displaced group, and
    /// the new event itself when it cannot open a group (unmapped, or
    /// grouping disabled).
    pub fn admit(
        &mut self,
        resolved: ResolvedEvent,
        direction: Direction,
        now: u64,
    ) -> Vec<GroupRecord> {
        let mut finalized = Vec::new();
        finalized.extend(self.poll(now));

        let joins = self
            .open
            .as_ref()
            .is_some_and(|open| self.config.enabled && open.accepts(&resolved, direction));

        if joins {
            if let Some(open) = self.open.as_mut() {
                open.merge(resolved);
                trace!("Merged into group (x{})", open.count);
            }
            return finalized;
        }

        finalized.extend(self.open.take());

        // An LSB arriving first still opens its group, seeded with only
        // that half; the matching MSB merges into it later.
        let record = GroupRecord::open(resolved, direction, now);
        if record.key.is_some() && self.config.enabled {
            self.open = Some(record);
        } else {
            finalized.push(record);
        }

        finalized
    }

    /// Finalize the open group if its window has run out
    pub fn poll(&mut self, now: u64) -> Option<GroupRecord> {
        let window = self.config.window.as_millis() as u64;
        let expired = self
            .open
            .as_ref()
            .is_some_and(|open| now.saturating_sub(open.started_at) >= window);

        if expired {
            self.open.take()
        } else {
            None
        }
    }

    /// Finalize the open group, if any
    pub fn flush(&mut self) -> Option<GroupRecord> {
        self.open.take()
    }
}
