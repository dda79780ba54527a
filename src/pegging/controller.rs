use time::OffsetDateTime;
use tokio::sync::watch;

use crate::{
    bus::{EventBus, HubEvent, PegChange},
    config::PeggingConfig,
    pegging::scale::ScaleFunction,
    types::{AdjustmentResult, PegState},
};

#[derive(Debug, Clone, PartialEq)]
pub enum PegOutcome {
    Changed(PegChange),
    /// The clamped move was smaller than epsilon; nothing was written.
    Unchanged { current_value: f64, proposed_delta: f64 },
}

impl PegOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, PegOutcome::Changed(_))
    }
}

/// Sole owner of [`PegState`].
///
/// Writes go through a `watch` channel, so a recompute swaps the whole state
/// at once and readers only ever observe complete states.
pub struct PeggingController {
    state: watch::Sender<PegState>,
    min: f64,
    max: f64,
    epsilon: f64,
    scale: ScaleFunction,
    bus: EventBus,
}

impl PeggingController {
    pub fn new(config: &PeggingConfig, bus: EventBus) -> Self {
        let (min, max) = (config.min, config.max);
        let initial = PegState::initial(clamp(config.initial_value, min, max));
        let (state, _) = watch::channel(initial);
        Self {
            state,
            min,
            max,
            epsilon: config.epsilon,
            scale: config.scale.clone(),
            bus,
        }
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    pub fn on_adjustment(&self, result: &AdjustmentResult) -> PegOutcome {
        let delta = self.scale.apply(result.value);
        let mut change = None;
        let mut unchanged_at = 0.0;

        self.state.send_if_modified(|state| {
            let old_value = state.current_value;
            unchanged_at = old_value;
            let raw = old_value + delta;
            if raw.is_nan() {
                return false;
            }
            let proposed = clamp(raw, self.min, self.max);
            let moved = proposed - old_value;
            if moved == 0.0 || moved.abs() < self.epsilon {
                return false;
            }

            let changed_at = OffsetDateTime::now_utc();
            *state = PegState {
                current_value: proposed,
                last_adjustment: Some(result.clone()),
                updated_at: changed_at,
            };
            change = Some(PegChange {
                old_value,
                new_value: proposed,
                changed_at,
            });
            true
        });

        match change {
            Some(change) => {
                tracing::info!(
                    target: "pegging",
                    old_value = change.old_value,
                    new_value = change.new_value,
                    adjustment = result.value,
                    "peg_changed"
                );
                self.bus.publish(HubEvent::PegChanged(change.clone()));
                PegOutcome::Changed(change)
            }
            None => {
                tracing::debug!(
                    target: "pegging",
                    current_value = unchanged_at,
                    proposed_delta = delta,
                    "adjustment_below_epsilon"
                );
                PegOutcome::Unchanged {
                    current_value: unchanged_at,
                    proposed_delta: delta,
                }
            }
        }
    }

    pub fn snapshot(&self) -> PegState {
        self.state.borrow().clone()
    }

    pub fn current_value(&self) -> f64 {
        self.state.borrow().current_value
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PegState> {
        self.state.subscribe()
    }

    /// Replaces the state with a persisted one, clamped into bounds. Emits
    /// no event.
    pub fn restore(&self, mut restored: PegState) -> PegState {
        let clamped = if restored.current_value.is_finite() {
            clamp(restored.current_value, self.min, self.max)
        } else {
            self.current_value()
        };
        if clamped != restored.current_value {
            tracing::warn!(
                target: "pegging",
                persisted_value = restored.current_value,
                clamped_value = clamped,
                "restored_peg_clamped"
            );
        }
        restored.current_value = clamped;
        self.state.send_replace(restored.clone());
        tracing::info!(target: "pegging", current_value = clamped, "peg_restored");
        restored
    }
}

fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}
