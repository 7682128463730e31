/*
    Key sources for impulse mode.
    A source runs its own reader thread and pushes canonical key events over
    an mpsc channel. It can be stopped and started again, which is how the
    session keeps typed output out of the chord buffer.
*/

use crate::engine::keys::canonical_key;
use crossterm::event::{
    self, Event, KeyCode, KeyEvent as TermKey, KeyEventKind, KeyModifiers,
    KeyboardEnhancementFlags, ModifierKeyCode, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::{execute, terminal};
use std::io::{self, stdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

const READ_RATE: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Down(&'static str),
    Up(&'static str),
    /// The user asked to leave (escape or ctrl-c).
    Quit,
}

pub trait KeySource {
    fn start(&mut self, tx: Sender<KeyEvent>) -> io::Result<()>;
    fn stop(&mut self);
    fn is_alive(&self) -> bool;
}

/// Reads key events from the controlling terminal in raw mode.
#[derive(Default)]
pub struct TerminalKeys {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    enhanced: bool,
}

impl TerminalKeys {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeySource for TerminalKeys {
    fn start(&mut self, tx: Sender<KeyEvent>) -> io::Result<()> {
        self.stop();
        terminal::enable_raw_mode()?;
        self.enhanced = terminal::supports_keyboard_enhancement().unwrap_or(false);
        if self.enhanced {
            execute!(
                stdout(),
                PushKeyboardEnhancementFlags(
                    KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                        | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
                        | KeyboardEnhancementFlags::REPORT_ALL_KEYS_AS_ESCAPE_CODES
                )
            )?;
        } else {
            warn!("terminal does not report key releases, modifiers are approximated");
        }

        let stop = Arc::new(AtomicBool::new(false));
        self.stop = stop.clone();
        let enhanced = self.enhanced;
        let handle = thread::Builder::new()
            .name("chordkit-keys".to_string())
            .spawn(move || read_loop(tx, stop, enhanced))?;
        self.handle = Some(handle);
        debug!(enhanced, "key listener started");
        Ok(())
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        if handle.join().is_err() {
            error!("key listener thread panicked");
        }
        if self.enhanced {
            if let Err(e) = execute!(stdout(), PopKeyboardEnhancementFlags) {
                warn!(error = %e, "could not restore keyboard reporting");
            }
        }
        if let Err(e) = terminal::disable_raw_mode() {
            warn!(error = %e, "could not leave raw mode");
        }
        debug!("key listener stopped");
    }

    fn is_alive(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }
}

impl Drop for TerminalKeys {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop(tx: Sender<KeyEvent>, stop: Arc<AtomicBool>, enhanced: bool) {
    while !stop.load(Ordering::SeqCst) {
        match event::poll(READ_RATE) {
            Ok(true) => match event::read() {
                Ok(Event::Key(key)) => {
                    for e in translate(&key, enhanced) {
                        if tx.send(e).is_err() {
                            return;
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "reading terminal events failed");
                    return;
                }
            },
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, "polling terminal events failed");
                return;
            }
        }
    }
}

/// Terminal key event to zero or more canonical key events.
/// Without release reporting each press becomes a full down/up pair wrapped
/// in the held modifiers.
pub fn translate(key: &TermKey, enhanced: bool) -> Vec<KeyEvent> {
    if key.code == KeyCode::Esc
        || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
    {
        return if key.kind == KeyEventKind::Release {
            vec![]
        } else {
            vec![KeyEvent::Quit]
        };
    }
    let Some(token) = token_for(key.code) else {
        return vec![];
    };

    if enhanced {
        return match key.kind {
            KeyEventKind::Press => vec![KeyEvent::Down(token)],
            KeyEventKind::Release => vec![KeyEvent::Up(token)],
            KeyEventKind::Repeat => vec![],
        };
    }
    if key.kind != KeyEventKind::Press {
        return vec![];
    }

    let held = held_modifiers(key.modifiers, token);
    let mut events: Vec<KeyEvent> = held.iter().map(|m| KeyEvent::Down(*m)).collect();
    events.push(KeyEvent::Down(token));
    events.push(KeyEvent::Up(token));
    events.extend(held.iter().rev().map(|m| KeyEvent::Up(*m)));
    events
}

fn held_modifiers(modifiers: KeyModifiers, token: &str) -> Vec<&'static str> {
    [
        (KeyModifiers::SUPER, "cmd"),
        (KeyModifiers::SHIFT, "shift"),
        (KeyModifiers::ALT, "option"),
        (KeyModifiers::CONTROL, "control"),
    ]
    .into_iter()
    .filter(|(flag, name)| modifiers.contains(*flag) && *name != token)
    .map(|(_, name)| name)
    .collect()
}

fn token_for(code: KeyCode) -> Option<&'static str> {
    let raw = match code {
        KeyCode::Char(' ') => "space".to_string(),
        KeyCode::Char(c) => c.to_ascii_lowercase().to_string(),
        KeyCode::Enter => "return".to_string(),
        KeyCode::Tab | KeyCode::BackTab => "tab".to_string(),
        KeyCode::Backspace => "backspace".to_string(),
        KeyCode::Delete => "delete".to_string(),
        KeyCode::Up => "up".to_string(),
        KeyCode::Down => "down".to_string(),
        KeyCode::Left => "left".to_string(),
        KeyCode::Right => "right".to_string(),
        KeyCode::Modifier(m) => match m {
            ModifierKeyCode::LeftSuper
            | ModifierKeyCode::RightSuper
            | ModifierKeyCode::LeftMeta
            | ModifierKeyCode::RightMeta => "cmd",
            ModifierKeyCode::LeftShift | ModifierKeyCode::RightShift => "shift",
            ModifierKeyCode::LeftAlt | ModifierKeyCode::RightAlt => "option",
            ModifierKeyCode::LeftControl | ModifierKeyCode::RightControl => "control",
            _ => return None,
        }
        .to_string(),
        _ => return None,
    };
    canonical_key(&raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;

    fn key(code: KeyCode, modifiers: KeyModifiers, kind: KeyEventKind) -> TermKey {
        TermKey {
            code,
            modifiers,
            kind,
            state: KeyEventState::NONE,
        }
    }

    #[test]
    fn enhanced_reports_presses_and_releases() {
        let down = key(KeyCode::Char('a'), KeyModifiers::NONE, KeyEventKind::Press);
        let up = key(KeyCode::Char('a'), KeyModifiers::NONE, KeyEventKind::Release);
        let repeat = key(KeyCode::Char('a'), KeyModifiers::NONE, KeyEventKind::Repeat);
        assert_eq!(translate(&down, true), vec![KeyEvent::Down("a")]);
        assert_eq!(translate(&up, true), vec![KeyEvent::Up("a")]);
        assert!(translate(&repeat, true).is_empty());

        let cmd = key(
            KeyCode::Modifier(ModifierKeyCode::LeftSuper),
            KeyModifiers::SUPER,
            KeyEventKind::Press,
        );
        assert_eq!(translate(&cmd, true), vec![KeyEvent::Down("cmd")]);
    }

    #[test]
    fn legacy_wraps_keys_in_modifiers() {
        let press = key(
            KeyCode::Char('I'),
            KeyModifiers::SHIFT | KeyModifiers::SUPER,
            KeyEventKind::Press,
        );
        assert_eq!(
            translate(&press, false),
            vec![
                KeyEvent::Down("cmd"),
                KeyEvent::Down("shift"),
                KeyEvent::Down("i"),
                KeyEvent::Up("i"),
                KeyEvent::Up("shift"),
                KeyEvent::Up("cmd"),
            ]
        );
    }

    #[test]
    fn named_keys_and_quit() {
        let space = key(KeyCode::Char(' '), KeyModifiers::NONE, KeyEventKind::Press);
        assert_eq!(translate(&space, true), vec![KeyEvent::Down("space")]);
        let enter = key(KeyCode::Enter, KeyModifiers::NONE, KeyEventKind::Press);
        assert_eq!(translate(&enter, true), vec![KeyEvent::Down("return")]);

        let esc = key(KeyCode::Esc, KeyModifiers::NONE, KeyEventKind::Press);
        assert_eq!(translate(&esc, false), vec![KeyEvent::Quit]);
        let ctrl_c = key(KeyCode::Char('c'), KeyModifiers::CONTROL, KeyEventKind::Press);
        assert_eq!(translate(&ctrl_c, true), vec![KeyEvent::Quit]);

        let f1 = key(KeyCode::F(1), KeyModifiers::NONE, KeyEventKind::Press);
        assert!(translate(&f1, true).is_empty());
        let punct = key(KeyCode::Char('.'), KeyModifiers::NONE, KeyEventKind::Press);
        assert!(translate(&punct, true).is_empty());
    }
}
