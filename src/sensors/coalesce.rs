use std::{collections::BTreeMap, time::Duration};

use tokio::time::Instant;

use crate::types::{SensorReading, SourceId};

struct Pending {
    reading: SensorReading,
    flush_at: Instant,
}

/// De-duplication window keyed by `source_id`.
///
/// The first reading for a source opens a window; readings for the same
/// source that arrive before it closes replace the held one when they are at
/// least as recent. One reading per window is released.
pub struct Coalescer {
    window: Duration,
    pending: BTreeMap<SourceId, Pending>,
}

impl Coalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: BTreeMap::new(),
        }
    }

    /// Returns the reading immediately when the window is zero.
    pub fn offer(&mut self, reading: SensorReading, now: Instant) -> Option<SensorReading> {
        if self.window.is_zero() {
            return Some(reading);
        }

        match self.pending.get_mut(&reading.source_id) {
            Some(held) => {
                if reading.observed_at >= held.reading.observed_at {
                    held.reading = reading;
                } else {
                    tracing::debug!(
                        target: "sensors",
                        source_id = %reading.source_id,
                        "stale_reading_coalesced_away"
                    );
                }
            }
            None => {
                self.pending.insert(
                    reading.source_id.clone(),
                    Pending {
                        reading,
                        flush_at: now + self.window,
                    },
                );
            }
        }
        None
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|held| held.flush_at).min()
    }

    pub fn drain_due(&mut self, now: Instant) -> Vec<SensorReading> {
        let due: Vec<SourceId> = self
            .pending
            .iter()
            .filter(|(_, held)| held.flush_at <= now)
            .map(|(source_id, _)| source_id.clone())
            .collect();

        let mut ready: Vec<Pending> = due
            .into_iter()
            .filter_map(|source_id| self.pending.remove(&source_id))
            .collect();
        ready.sort_by_key(|held| held.flush_at);
        ready.into_iter().map(|held| held.reading).collect()
    }

    pub fn drain_all(&mut self) -> Vec<SensorReading> {
        let mut ready: Vec<Pending> = std::mem::take(&mut self.pending).into_values().collect();
        ready.sort_by_key(|held| held.flush_at);
        ready.into_iter().map(|held| held.reading).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
