/*
    Impulse session.
    One control loop reading key events from a `KeySource`, one debounce timer
    thread per burst, and the detector shared between them behind a mutex.
    Every change to the pressed keys or the timer handle happens under that lock.
*/

use super::detector::{Detector, DetectorConfig, Feed};
use crate::engine::catalog::Catalog;
use crate::engine::keys::KeySet;
use crate::engine::output::apply::{PausedProfile, RuleSync};
use crate::engine::store::ChordStore;
use crate::engine::{Chord, Sensitivity};
use crate::error::SessionError;
use crate::machine::{KeyEvent, KeySource};
use crate::ui::Interaction;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const IMPULSE_CATEGORY: &str = "impulse";

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub timeout: Duration,
    pub min_chord_size: usize,
    pub trigger: KeySet,
    pub category: String,
    /// How long the control loop waits for a key before checking on the listener.
    pub poll: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        let mut trigger = KeySet::new();
        for key in ["cmd", "shift", "i"] {
            trigger.insert(key);
        }
        SessionOptions {
            timeout: Duration::from_millis(100),
            min_chord_size: 2,
            trigger,
            category: IMPULSE_CATEGORY.to_string(),
            poll: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub added: Vec<Chord>,
    pub already_bound: usize,
    pub discarded: usize,
}

struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

struct Shared {
    detector: Detector,
    timer: Option<TimerHandle>,
    candidate: Option<KeySet>,
}

// A panicking timer thread must not take the session down with it.
fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Session<'a, S: ChordStore, K: KeySource, U: Interaction> {
    catalog: &'a mut Catalog<S>,
    source: K,
    ui: U,
    rules: Option<&'a RuleSync>,
    sensitivity: Sensitivity,
    options: SessionOptions,
    shared: Arc<Mutex<Shared>>,
    summary: SessionSummary,
}

impl<'a, S: ChordStore, K: KeySource, U: Interaction> Session<'a, S, K, U> {
    pub fn new(catalog: &'a mut Catalog<S>, source: K, ui: U, options: SessionOptions) -> Self {
        let detector = Detector::new(DetectorConfig {
            timeout: options.timeout,
            min_chord_size: options.min_chord_size,
            trigger: options.trigger,
        });
        Session {
            catalog,
            source,
            ui,
            rules: None,
            sensitivity: Sensitivity::default(),
            options,
            shared: Arc::new(Mutex::new(Shared {
                detector,
                timer: None,
                candidate: None,
            })),
            summary: SessionSummary::default(),
        }
    }

    /// Recompile after every added chord and keep our profile paused while the session runs.
    pub fn with_rules(mut self, rules: &'a RuleSync) -> Self {
        self.sensitivity = rules.compiler.sensitivity;
        self.rules = Some(rules);
        self
    }

    pub fn run(mut self) -> Result<SessionSummary, SessionError> {
        if !self.ui.has_permission() {
            return Err(SessionError::PermissionDenied);
        }
        let paused = self.pause_profile();
        self.ui.notify(&format!(
            "Press keys together to record a chord. {} pauses detection, escape quits.",
            self.options.trigger
        ));

        let result = self.listen();
        self.teardown();
        if let Some(paused) = paused {
            if let Some(rules) = self.rules {
                if let Err(e) = rules.engine.resume(paused) {
                    warn!(error = %e, "could not resume profile");
                }
            }
        }
        match &result {
            Ok(()) => info!(added = self.summary.added.len(), "impulse session ended"),
            Err(e) => error!(error = %e, "impulse session failed"),
        }
        result.map(|()| self.summary)
    }

    fn pause_profile(&mut self) -> Option<PausedProfile> {
        let rules = self.rules?;
        match rules.engine.pause() {
            Ok(paused) => paused,
            Err(e) => {
                warn!(error = %e, "could not pause profile");
                None
            }
        }
    }

    fn listen(&mut self) -> Result<(), SessionError> {
        let mut rx = self.start_source()?;
        loop {
            match rx.recv_timeout(self.options.poll) {
                Ok(KeyEvent::Quit) => return Ok(()),
                Ok(KeyEvent::Down(key)) => self.key_down(key)?,
                Ok(KeyEvent::Up(key)) => lock(&self.shared).detector.key_up(key),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(SessionError::ListenerLost),
            }

            let candidate = lock(&self.shared).candidate.take();
            if let Some(keys) = candidate {
                rx = self.collect(keys)?;
            } else if !self.source.is_alive() {
                return Err(SessionError::ListenerLost);
            }
        }
    }

    fn start_source(&mut self) -> Result<Receiver<KeyEvent>, SessionError> {
        let (tx, rx) = mpsc::channel();
        self.source.start(tx)?;
        Ok(rx)
    }

    fn key_down(&mut self, key: &'static str) -> Result<(), SessionError> {
        let mut state = lock(&self.shared);
        let feed = state.detector.key_down(key, Instant::now());
        match feed {
            Feed::Schedule {
                generation,
                deadline,
            } => schedule(&self.shared, &mut state, generation, deadline)?,
            Feed::TriggerToggled { paused } => {
                if let Some(timer) = state.timer.take() {
                    timer.cancel();
                }
                drop(state);
                self.ui.notify(if paused {
                    "Detection paused."
                } else {
                    "Detection resumed."
                });
            }
            Feed::Ignored => {}
        }
        Ok(())
    }

    /// The listener is down for the whole exchange so typed output never
    /// reaches the detector. Events queued before the stop are dropped with
    /// the old channel.
    fn collect(&mut self, keys: KeySet) -> Result<Receiver<KeyEvent>, SessionError> {
        self.source.stop();
        let added = self.resolve(keys);
        lock(&self.shared).detector.finish_output();

        if added {
            if let Some(rules) = self.rules {
                if let Err(e) = rules.sync(&*self.catalog) {
                    warn!(error = %e, "could not recompile rules");
                    self.ui.notify(&format!("Rules were not updated: {e}"));
                }
            }
        }
        self.start_source()
    }

    fn resolve(&mut self, keys: KeySet) -> bool {
        if let Some(existing) = self.catalog.find_by_input(&keys) {
            let message = format!("{keys} is already bound to \"{}\".", existing.output_text);
            self.ui.notify(&message);
            self.summary.already_bound += 1;
            return false;
        }

        self.ui.notify(&format!(
            "Detected {keys} ({}, {}ms).",
            self.sensitivity.label(&keys),
            self.sensitivity.threshold_ms(&keys)
        ));
        let text = match self.ui.read_line("Output text (or 'skip' to cancel): ") {
            Ok(Some(text)) => text.trim().to_string(),
            Ok(None) => String::new(),
            Err(e) => {
                warn!(error = %e, "reading chord output failed");
                String::new()
            }
        };
        if text.is_empty() || text.eq_ignore_ascii_case("skip") {
            debug!(keys = %keys, "candidate discarded");
            self.summary.discarded += 1;
            self.ui.notify("Skipped.");
            return false;
        }

        match self
            .catalog
            .add(&keys.keys(), &text, Some(self.options.category.as_str()), &[])
        {
            Ok(chord) => {
                self.ui.notify(&format!("Added {keys} → {text}"));
                self.summary.added.push(chord);
                true
            }
            Err(e) => {
                warn!(error = %e, keys = %keys, "could not add impulse chord");
                self.ui.notify(&format!("Could not add chord: {e}"));
                self.summary.discarded += 1;
                false
            }
        }
    }

    fn teardown(&mut self) {
        {
            let mut state = lock(&self.shared);
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
            state.detector.stop();
            state.candidate = None;
        }
        self.source.stop();
    }
}

/// Cancel the pending timer and arm a new one, with the lock held by the caller.
fn schedule(
    shared: &Arc<Mutex<Shared>>,
    state: &mut Shared,
    generation: u64,
    deadline: Instant,
) -> Result<(), SessionError> {
    if let Some(old) = state.timer.take() {
        old.cancel();
    }
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    let shared = Arc::clone(shared);
    thread::Builder::new()
        .name("chordkit-debounce".to_string())
        .spawn(move || {
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            }
            let mut state = lock(&shared);
            if flag.load(Ordering::SeqCst) {
                return;
            }
            state.timer = None;
            if let Some(keys) = state.detector.timer_fired(generation) {
                state.candidate = Some(keys);
            }
        })?;
    state.timer = Some(TimerHandle { cancelled });
    Ok(())
}
