//! Navigation pacing: velocity estimation, debounce and coalescing
//!
//! The pacer watches the rhythm of navigation input. Velocity (events/sec
//! over the last five inter-event deltas) selects the debounce delay,
//! widens the forward prefetch window at speed, and raises the
//! skip-intermediate flag so superseded decodes are cancelled instead of
//! completed. Rapid intents are coalesced: steps arriving before the
//! pending deadline are summed into one net navigation.
//!
//! The pacer is a passive state machine driven with explicit timestamps,
//! so tests never sleep.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Number of inter-event deltas in the rolling velocity window
const ROLLING_WINDOW: usize = 5;

/// Debounce for fast navigation (> 5 events/sec)
const FAST_DEBOUNCE: Duration = Duration::from_millis(5);

/// Debounce for medium navigation (2–5 events/sec)
const MEDIUM_DEBOUNCE: Duration = Duration::from_millis(10);

/// Velocity above which navigation counts as fast
const FAST_VELOCITY: f64 = 5.0;

/// Velocity above which navigation counts as medium
const MEDIUM_VELOCITY: f64 = 2.0;

/// Extra forward width added to the prefetch window at high velocity
const FAST_FORWARD_BONUS: usize = 2;

/// Result of applying a net navigation step to a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// Stay within the sequence
    Move { from: usize, to: usize },

    /// The net step overflows the sequence boundary: advance to the
    /// adjacent sequence in the given direction instead of clamping.
    AdvanceSequence { direction: i8 },
}

/// Apply a net step to a position within a sequence of `len` keys
pub fn apply_step(current: usize, step: i64, len: usize) -> NavigationOutcome {
    if len == 0 {
        return NavigationOutcome::AdvanceSequence {
            direction: if step < 0 { -1 } else { 1 },
        };
    }
    let target = current as i64 + step;
    if target < 0 {
        NavigationOutcome::AdvanceSequence { direction: -1 }
    } else if target >= len as i64 {
        NavigationOutcome::AdvanceSequence { direction: 1 }
    } else {
        NavigationOutcome::Move {
            from: current,
            to: target as usize,
        }
    }
}

/// Navigation velocity estimator and intent coalescer
pub struct NavigationPacer {
    /// Rolling window of inter-event deltas, in seconds
    deltas: VecDeque<f64>,

    last_event: Option<Instant>,

    /// Net step accumulated since the last fire
    pending_step: i64,

    /// Deadline of the pending debounce timer
    deadline: Option<Instant>,

    /// Sign of the last non-zero step
    last_direction: i8,

    /// Debounce used below the medium velocity tier
    slow_debounce: Duration,
}

impl NavigationPacer {
    /// Create a pacer with the configured slow-tier debounce
    pub fn new(slow_debounce_ms: u64) -> Self {
        Self {
            deltas: VecDeque::with_capacity(ROLLING_WINDOW),
            last_event: None,
            pending_step: 0,
            deadline: None,
            last_direction: 1,
            slow_debounce: Duration::from_millis(slow_debounce_ms),
        }
    }

    /// Estimated navigation velocity in events per second
    pub fn velocity(&self) -> f64 {
        if self.deltas.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.deltas.iter().sum();
        if sum <= 0.0 {
            return f64::INFINITY;
        }
        self.deltas.len() as f64 / sum
    }

    /// Debounce delay for the current velocity tier
    pub fn debounce_delay(&self) -> Duration {
        let v = self.velocity();
        if v > FAST_VELOCITY {
            FAST_DEBOUNCE
        } else if v >= MEDIUM_VELOCITY {
            MEDIUM_DEBOUNCE
        } else {
            self.slow_debounce
        }
    }

    /// Whether superseded indices should have their decodes cancelled
    /// rather than completed
    pub fn skip_intermediate(&self) -> bool {
        self.velocity() > FAST_VELOCITY
    }

    /// Direction bias: sign of the last navigation step
    pub fn direction_bias(&self) -> i8 {
        self.last_direction
    }

    /// Prefetch window widths for the current velocity: high speed widens
    /// the forward window and narrows the backward one.
    pub fn window_widths(&self, base_forward: usize, base_backward: usize) -> (usize, usize) {
        if self.velocity() > FAST_VELOCITY {
            (base_forward + FAST_FORWARD_BONUS, base_backward.min(1))
        } else {
            (base_forward, base_backward)
        }
    }

    /// Buffer a navigation intent, replacing any pending timer.
    ///
    /// The step is summed into the pending net step and the debounce
    /// deadline is recomputed from the current velocity. Returns the new
    /// deadline.
    pub fn record_intent(&mut self, step: i64, now: Instant) -> Instant {
        if let Some(last) = self.last_event {
            let delta = now.saturating_duration_since(last).as_secs_f64();
            if self.deltas.len() == ROLLING_WINDOW {
                self.deltas.pop_front();
            }
            self.deltas.push_back(delta);
        }
        self.last_event = Some(now);

        self.pending_step += step;
        if step != 0 {
            self.last_direction = if step < 0 { -1 } else { 1 };
        }

        let deadline = now + self.debounce_delay();
        self.deadline = Some(deadline);
        deadline
    }

    /// Deadline of the pending timer, if any
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Take the coalesced net step if the deadline has passed.
    ///
    /// Clears the pending state. A net step of zero (intents cancelled each
    /// other out) yields `None`.
    pub fn take_due(&mut self, now: Instant) -> Option<i64> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        self.deadline = None;
        let net = self.pending_step;
        self.pending_step = 0;
        (net != 0).then_some(net)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(pacer: &mut NavigationPacer, deltas_secs: &[f64]) -> Instant {
        let mut now = Instant::now();
        pacer.record_intent(1, now);
        for &d in deltas_secs {
            now += Duration::from_secs_f64(d);
            pacer.record_intent(1, now);
        }
        now
    }

    #[test]
    fn test_fast_tier_debounce() {
        // Five deltas under 0.12s: velocity > 5/s, fastest debounce (~5ms)
        let mut pacer = NavigationPacer::new(15);
        drive(&mut pacer, &[0.1, 0.1, 0.1, 0.1, 0.1]);

        assert!(pacer.velocity() > 5.0);
        assert_eq!(pacer.debounce_delay(), Duration::from_millis(5));
        assert!(pacer.skip_intermediate());
    }

    #[test]
    fn test_medium_tier_debounce() {
        let mut pacer = NavigationPacer::new(15);
        drive(&mut pacer, &[0.3, 0.3, 0.3, 0.3, 0.3]);

        let v = pacer.velocity();
        assert!(v >= 2.0 && v <= 5.0);
        assert_eq!(pacer.debounce_delay(), Duration::from_millis(10));
        assert!(!pacer.skip_intermediate());
    }

    #[test]
    fn test_slow_tier_debounce() {
        // Deltas over a second: slowest tier (configured, ~15ms)
        let mut pacer = NavigationPacer::new(15);
        drive(&mut pacer, &[1.5, 1.5, 1.5, 1.5, 1.5]);

        assert!(pacer.velocity() < 2.0);
        assert_eq!(pacer.debounce_delay(), Duration::from_millis(15));
    }

    #[test]
    fn test_slow_debounce_configurable() {
        let mut pacer = NavigationPacer::new(20);
        drive(&mut pacer, &[2.0, 2.0]);
        assert_eq!(pacer.debounce_delay(), Duration::from_millis(20));
    }

    #[test]
    fn test_no_history_is_slow() {
        let pacer = NavigationPacer::new(15);
        assert_eq!(pacer.velocity(), 0.0);
        assert_eq!(pacer.debounce_delay(), Duration::from_millis(15));
    }

    #[test]
    fn test_rolling_window_caps_at_five() {
        let mut pacer = NavigationPacer::new(15);
        // Slow history followed by five fast deltas: only the fast ones count
        drive(&mut pacer, &[2.0, 2.0, 2.0, 0.05, 0.05, 0.05, 0.05, 0.05]);
        assert!(pacer.velocity() > 5.0);
    }

    #[test]
    fn test_coalescing_nets_steps() {
        // Three "next" and one "prev" before the timer fires apply as one
        // navigation of net +2.
        let mut pacer = NavigationPacer::new(15);
        let mut now = Instant::now();

        for _ in 0..3 {
            pacer.record_intent(1, now);
            now += Duration::from_millis(2);
        }
        let deadline = pacer.record_intent(-1, now);

        // Before the deadline: nothing fires
        assert_eq!(pacer.take_due(now), None);

        // At the deadline: exactly one net step of +2
        assert_eq!(pacer.take_due(deadline), Some(2));
        // Nothing left pending
        assert_eq!(pacer.pending_deadline(), None);
        assert_eq!(pacer.take_due(deadline + Duration::from_secs(1)), None);
    }

    #[test]
    fn test_cancelled_out_steps_fire_nothing() {
        let mut pacer = NavigationPacer::new(15);
        let now = Instant::now();
        pacer.record_intent(1, now);
        let deadline = pacer.record_intent(-1, now + Duration::from_millis(1));

        assert_eq!(pacer.take_due(deadline), None);
        assert_eq!(pacer.pending_deadline(), None);
    }

    #[test]
    fn test_new_intent_replaces_deadline() {
        let mut pacer = NavigationPacer::new(15);
        let now = Instant::now();
        let first = pacer.record_intent(1, now);
        let second = pacer.record_intent(1, now + Duration::from_millis(4));
        assert!(second > first);

        // The first deadline no longer fires anything on its own; the
        // pending state fires once, at the replaced deadline.
        assert_eq!(pacer.take_due(second), Some(2));
    }

    #[test]
    fn test_window_widths_at_speed() {
        let mut pacer = NavigationPacer::new(15);
        assert_eq!(pacer.window_widths(3, 1), (3, 1));

        drive(&mut pacer, &[0.05, 0.05, 0.05, 0.05, 0.05]);
        assert_eq!(pacer.window_widths(3, 1), (5, 1));
        assert_eq!(pacer.window_widths(3, 2), (5, 1));
    }

    #[test]
    fn test_direction_bias_tracks_last_step() {
        let mut pacer = NavigationPacer::new(15);
        let now = Instant::now();
        pacer.record_intent(1, now);
        assert_eq!(pacer.direction_bias(), 1);
        pacer.record_intent(-1, now + Duration::from_millis(1));
        assert_eq!(pacer.direction_bias(), -1);
    }

    #[test]
    fn test_apply_step_within_bounds() {
        assert_eq!(
            apply_step(5, 2, 10),
            NavigationOutcome::Move { from: 5, to: 7 }
        );
        assert_eq!(
            apply_step(5, -5, 10),
            NavigationOutcome::Move { from: 5, to: 0 }
        );
    }

    #[test]
    fn test_apply_step_overflow_advances_sequence() {
        // Overflow is translated into an adjacent-sequence advance, not a clamp
        assert_eq!(
            apply_step(8, 5, 10),
            NavigationOutcome::AdvanceSequence { direction: 1 }
        );
        assert_eq!(
            apply_step(1, -3, 10),
            NavigationOutcome::AdvanceSequence { direction: -1 }
        );
        assert_eq!(
            apply_step(0, -1, 0),
            NavigationOutcome::AdvanceSequence { direction: -1 }
        );
    }
}
