/*
    Impulse chord detection.
    Pure state machine: every input carries the instant it happened at, so the
    timing rules can be checked without real clocks. The session owns the
    timers and feeds their expiry back in through `timer_fired`.
*/

use crate::engine::keys::{is_modifier, KeySet};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Listening,
    CollectingOutput,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorConfig {
    pub timeout: Duration,
    pub min_chord_size: usize,
    pub trigger: KeySet,
}

/// What a key press asks of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Ignored,
    /// Cancel any pending timer and arm one for `generation` at `deadline`.
    Schedule { generation: u64, deadline: Instant },
    TriggerToggled { paused: bool },
}

#[derive(Debug)]
pub struct Detector {
    config: DetectorConfig,
    mode: Mode,
    pressed: KeySet,
    window_start: Option<Instant>,
    last_down: Option<Instant>,
    generation: u64,
    trigger_held: KeySet,
    paused: bool,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Self {
        Detector {
            config,
            mode: Mode::Listening,
            pressed: KeySet::new(),
            window_start: None,
            last_down: None,
            generation: 0,
            trigger_held: KeySet::new(),
            paused: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn pressed(&self) -> KeySet {
        self.pressed
    }

    pub fn window_start(&self) -> Option<Instant> {
        self.window_start
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn key_down(&mut self, key: &'static str, at: Instant) -> Feed {
        if self.mode == Mode::Stopped {
            return Feed::Ignored;
        }

        // Only trigger keys are tracked, and a toggle forgets them, so the
        // whole combination has to be pressed again to toggle back.
        if self.config.trigger.contains(key) {
            self.trigger_held.insert(key);
            if self.trigger_complete() {
                self.trigger_held.clear();
                self.paused = !self.paused;
                self.reset_window();
                debug!(paused = self.paused, "trigger toggled");
                return Feed::TriggerToggled { paused: self.paused };
            }
        }

        if self.mode != Mode::Listening || self.paused || is_modifier(key) {
            return Feed::Ignored;
        }

        // The window slides: it only closes once the gap since the previous press is too long.
        let expired = self
            .last_down
            .map_or(true, |last| at.saturating_duration_since(last) > self.config.timeout);
        if expired {
            self.pressed.clear();
            self.window_start = Some(at);
        }
        self.last_down = Some(at);
        self.pressed.insert(key);
        self.generation += 1;
        Feed::Schedule {
            generation: self.generation,
            deadline: at + self.config.timeout,
        }
    }

    pub fn key_up(&mut self, key: &'static str) {
        self.trigger_held.remove(key);
    }

    /// Expiry of the timer armed for `generation`. Stale timers are no-ops.
    /// A returned candidate moves the detector to `CollectingOutput`.
    pub fn timer_fired(&mut self, generation: u64) -> Option<KeySet> {
        if generation != self.generation || self.mode != Mode::Listening || self.paused {
            return None;
        }
        let keys = self.pressed;
        self.reset_window();
        if keys.len() < self.config.min_chord_size {
            debug!(keys = %keys, "too few keys for a chord");
            return None;
        }
        self.mode = Mode::CollectingOutput;
        debug!(keys = %keys, "chord candidate");
        Some(keys)
    }

    /// Back to listening once the candidate has been dealt with, whatever the outcome.
    pub fn finish_output(&mut self) {
        if self.mode == Mode::CollectingOutput {
            self.mode = Mode::Listening;
        }
        self.trigger_held.clear();
        self.reset_window();
    }

    pub fn stop(&mut self) {
        self.mode = Mode::Stopped;
        self.reset_window();
    }

    fn trigger_complete(&self) -> bool {
        !self.config.trigger.is_empty() && self.config.trigger.is_subset(&self.trigger_held)
    }

    // Bumping the generation invalidates any timer still pending.
    fn reset_window(&mut self) {
        self.pressed.clear();
        self.window_start = None;
        self.last_down = None;
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> Detector {
        Detector::new(DetectorConfig {
            timeout: Duration::from_millis(100),
            min_chord_size: 2,
            trigger: KeySet::parse("cmd+shift+i").unwrap(),
        })
    }

    fn ms(base: Instant, n: u64) -> Instant {
        base + Duration::from_millis(n)
    }

    fn generation_of(feed: Feed) -> u64 {
        match feed {
            Feed::Schedule { generation, .. } => generation,
            other => panic!("expected a schedule, got {other:?}"),
        }
    }

    #[test]
    fn close_presses_coalesce_and_late_press_opens_new_window() {
        let mut d = detector();
        let t0 = Instant::now();
        d.key_down("a", ms(t0, 0));
        d.key_down("s", ms(t0, 40));
        d.key_down("d", ms(t0, 90));
        assert_eq!(d.pressed(), KeySet::parse("a+s+d").unwrap());
        assert_eq!(d.window_start(), Some(t0));

        d.key_down("f", ms(t0, 250));
        assert_eq!(d.pressed(), KeySet::parse("f").unwrap());
        assert_eq!(d.window_start(), Some(ms(t0, 250)));
    }

    #[test]
    fn window_slides_with_each_press() {
        let mut d = detector();
        let t0 = Instant::now();
        for (i, key) in ["a", "s", "d", "f"].into_iter().enumerate() {
            d.key_down(key, ms(t0, 90 * i as u64));
        }
        assert_eq!(d.pressed().len(), 4);
    }

    #[test]
    fn only_last_schedule_fires() {
        let mut d = detector();
        let t0 = Instant::now();
        let first = generation_of(d.key_down("a", t0));
        let feed = d.key_down("s", ms(t0, 30));
        assert_eq!(
            feed,
            Feed::Schedule {
                generation: first + 1,
                deadline: ms(t0, 130)
            }
        );

        assert_eq!(d.timer_fired(first), None);
        assert_eq!(d.timer_fired(first + 1), Some(KeySet::parse("a+s").unwrap()));
        assert_eq!(d.mode(), Mode::CollectingOutput);
        assert!(d.pressed().is_empty());
    }

    #[test]
    fn single_key_is_not_a_chord() {
        let mut d = detector();
        let g = generation_of(d.key_down("a", Instant::now()));
        assert_eq!(d.timer_fired(g), None);
        assert_eq!(d.mode(), Mode::Listening);
        assert!(d.pressed().is_empty());
    }

    #[test]
    fn modifiers_are_not_chord_members() {
        let mut d = detector();
        let t0 = Instant::now();
        assert_eq!(d.key_down("cmd", t0), Feed::Ignored);
        d.key_down("a", ms(t0, 10));
        let g = generation_of(d.key_down("s", ms(t0, 20)));
        assert_eq!(d.timer_fired(g), Some(KeySet::parse("a+s").unwrap()));
    }

    #[test]
    fn keys_are_ignored_while_collecting() {
        let mut d = detector();
        let t0 = Instant::now();
        d.key_down("a", t0);
        let g = generation_of(d.key_down("s", ms(t0, 10)));
        d.timer_fired(g);
        assert_eq!(d.key_down("x", ms(t0, 300)), Feed::Ignored);

        d.finish_output();
        assert_eq!(d.mode(), Mode::Listening);
        assert!(matches!(d.key_down("x", ms(t0, 400)), Feed::Schedule { .. }));
    }

    #[test]
    fn trigger_pauses_and_resumes() {
        let mut d = detector();
        let t0 = Instant::now();
        let g = generation_of(d.key_down("a", t0));
        d.key_down("cmd", ms(t0, 5));
        d.key_down("shift", ms(t0, 6));
        assert_eq!(d.key_down("i", ms(t0, 7)), Feed::TriggerToggled { paused: true });
        assert_eq!(d.timer_fired(g), None);
        assert_eq!(d.key_down("q", ms(t0, 8)), Feed::Ignored);

        // A repeated press of the last trigger key does not retoggle.
        assert_eq!(d.key_down("i", ms(t0, 9)), Feed::Ignored);

        for key in ["i", "shift", "cmd"] {
            d.key_up(key);
        }
        d.key_down("cmd", ms(t0, 20));
        d.key_down("shift", ms(t0, 21));
        assert_eq!(d.key_down("i", ms(t0, 22)), Feed::TriggerToggled { paused: false });
        for key in ["i", "shift", "cmd"] {
            d.key_up(key);
        }
        assert!(matches!(d.key_down("q", ms(t0, 30)), Feed::Schedule { .. }));
    }

    #[test]
    fn extra_key_while_trigger_held_toggles_once() {
        let mut d = detector();
        let t0 = Instant::now();
        let mut toggles = 0;
        for (i, key) in ["cmd", "shift", "i", "x", "y"].into_iter().enumerate() {
            if let Feed::TriggerToggled { .. } = d.key_down(key, ms(t0, i as u64)) {
                toggles += 1;
            }
        }
        assert_eq!(toggles, 1);
        assert!(d.is_paused());

        // Held modifiers plus a fresh `i` are not the whole combination any more.
        d.key_up("i");
        assert_eq!(d.key_down("i", ms(t0, 10)), Feed::Ignored);
        assert!(d.is_paused());
    }

    #[test]
    fn stop_is_terminal() {
        let mut d = detector();
        let t0 = Instant::now();
        d.key_down("a", t0);
        let g = generation_of(d.key_down("s", ms(t0, 10)));
        d.stop();
        assert_eq!(d.timer_fired(g), None);
        assert_eq!(d.key_down("d", ms(t0, 20)), Feed::Ignored);
        d.finish_output();
        assert_eq!(d.mode(), Mode::Stopped);
    }
}
