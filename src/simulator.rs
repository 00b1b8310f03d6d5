//! Synthetic controller traffic
//!
//! Emulates a DDJ deck without hardware: button press/release pairs
//! followed by a sweep over a few knobs, repeated until the run time is up.
//! Events go through the same channel the port listener feeds.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;

use crate::midi::{Direction, Event};
use crate::sniffer::SourceEvent;

/// Play, Cue, Sync, Hot Cue 1 and Hot Cue 2 on deck 1
const BUTTON_NOTES: &[u8] = &[0x0B, 0x0C, 0x0E, 0x10, 0x11];

/// (controller, base value): gain, high/mid/low EQ, channel fader MSB and LSB
pub const CC_SWEEP: &[(u8, u8)] = &[(4, 64), (7, 100), (11, 50), (15, 75), (19, 90), (51, 45)];

const BUTTON_SPACING: Duration = Duration::from_millis(100);
const SWEEP_SPACING: Duration = Duration::from_millis(50);
const ROUND_PAUSE: Duration = Duration::from_millis(500);

/// Press and release for every test button
pub fn button_sequence() -> Vec<Event> {
    BUTTON_NOTES
        .iter()
        .flat_map(|&note| [Event::note_on(0, note, 127), Event::note_off(0, note, 0)])
        .collect()
}

/// Sweep value for a knob, drifting over a 2 s cycle
pub fn sweep_value(base: u8, elapsed: Duration) -> u8 {
    let drift = (elapsed.as_millis() / 100) % 20;
    ((u128::from(base) + drift) % 128) as u8
}

/// Send generated events for `duration`
///
/// Returns the number of events delivered. Stops early when the receiving
/// side goes away.
pub async fn run(tx: mpsc::Sender<SourceEvent>, duration: Duration) -> usize {
    let start = Instant::now();
    let mut sent = 0;

    let send = |event: Event| {
        let tx = tx.clone();
        async move {
            tx.send(SourceEvent::now(Direction::In, event.encode().to_vec()))
                .await
                .is_ok()
        }
    };

    'rounds: while start.elapsed() < duration {
        for event in button_sequence() {
            if start.elapsed() >= duration {
                break 'rounds;
            }
            if !send(event).await {
                break 'rounds;
            }
            sent += 1;
            sleep(BUTTON_SPACING).await;
        }

        for &(cc, base) in CC_SWEEP {
            if start.elapsed() >= duration {
                break 'rounds;
            }
            let event = Event::control_change(0, cc, sweep_value(base, start.elapsed()));
            if !send(event).await {
                break 'rounds;
            }
            sent += 1;
            sleep(SWEEP_SPACING).await;
        }

        sleep(ROUND_PAUSE).await;
    }

    debug!("Simulator sent {} events", sent);
    sent
}
