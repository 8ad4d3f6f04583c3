//! Keyboard and pointer state gathered between two pumps of the event loop.

use std::collections::HashSet;

use winit::event::ElementState;
use winit::keyboard::KeyCode;

/// Input observed since the previous [`crate::FrameWindow::pump`].
///
/// Keys are reported by name (see [`key_name`]) so callers can bind them from
/// configuration without depending on winit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowInput {
    /// Keys held at the end of the pump.
    pub held: HashSet<String>,
    /// Keys that went down during the pump, in order. Auto-repeat is ignored.
    pub pressed: Vec<String>,
    /// Accumulated raw pointer motion in device units, `[dx, dy]`.
    pub pointer_delta: [f64; 2],
    pub close_requested: bool,
}

/// Name used for a physical key in key maps. Only keys a player would bind
/// are named.
#[must_use]
pub fn key_name(code: KeyCode) -> Option<&'static str> {
    let name = match code {
        KeyCode::ArrowUp => "Up",
        KeyCode::ArrowDown => "Down",
        KeyCode::ArrowLeft => "Left",
        KeyCode::ArrowRight => "Right",
        KeyCode::Enter | KeyCode::NumpadEnter => "Return",
        KeyCode::Escape => "Escape",
        KeyCode::Space => "Space",
        KeyCode::Tab => "Tab",
        KeyCode::Period => "Period",
        KeyCode::Comma => "Comma",
        KeyCode::ShiftLeft => "LeftShift",
        KeyCode::ShiftRight => "RightShift",
        KeyCode::ControlLeft => "LeftControl",
        KeyCode::ControlRight => "RightControl",
        KeyCode::KeyA => "A",
        KeyCode::KeyB => "B",
        KeyCode::KeyC => "C",
        KeyCode::KeyD => "D",
        KeyCode::KeyE => "E",
        KeyCode::KeyF => "F",
        KeyCode::KeyG => "G",
        KeyCode::KeyH => "H",
        KeyCode::KeyI => "I",
        KeyCode::KeyJ => "J",
        KeyCode::KeyK => "K",
        KeyCode::KeyL => "L",
        KeyCode::KeyM => "M",
        KeyCode::KeyN => "N",
        KeyCode::KeyO => "O",
        KeyCode::KeyP => "P",
        KeyCode::KeyQ => "Q",
        KeyCode::KeyR => "R",
        KeyCode::KeyS => "S",
        KeyCode::KeyT => "T",
        KeyCode::KeyU => "U",
        KeyCode::KeyV => "V",
        KeyCode::KeyW => "W",
        KeyCode::KeyX => "X",
        KeyCode::KeyY => "Y",
        KeyCode::KeyZ => "Z",
        KeyCode::Digit0 => "0",
        KeyCode::Digit1 => "1",
        KeyCode::Digit2 => "2",
        KeyCode::Digit3 => "3",
        KeyCode::Digit4 => "4",
        KeyCode::Digit5 => "5",
        KeyCode::Digit6 => "6",
        KeyCode::Digit7 => "7",
        KeyCode::Digit8 => "8",
        KeyCode::Digit9 => "9",
        _ => return None,
    };
    Some(name)
}

/// Running input state; `held` survives pumps, the rest is drained by
/// [`InputState::take`].
#[derive(Debug, Default)]
pub(crate) struct InputState {
    held: HashSet<&'static str>,
    pressed: Vec<&'static str>,
    pointer_delta: [f64; 2],
    close_requested: bool,
}

impl InputState {
    pub(crate) fn key(&mut self, code: KeyCode, state: ElementState, repeat: bool) {
        let Some(name) = key_name(code) else { return };
        match state {
            ElementState::Pressed => {
                if self.held.insert(name) && !repeat {
                    self.pressed.push(name);
                }
            }
            ElementState::Released => {
                self.held.remove(name);
            }
        }
    }

    pub(crate) fn pointer(&mut self, dx: f64, dy: f64) {
        self.pointer_delta[0] += dx;
        self.pointer_delta[1] += dy;
    }

    /// Focus loss: release everything so keys do not stick.
    pub(crate) fn release_all(&mut self) {
        self.held.clear();
    }

    pub(crate) fn request_close(&mut self) {
        self.close_requested = true;
    }

    pub(crate) fn take(&mut self) -> WindowInput {
        WindowInput {
            held: self.held.iter().map(|k| (*k).to_string()).collect(),
            pressed: self.pressed.drain(..).map(str::to_string).collect(),
            pointer_delta: std::mem::take(&mut self.pointer_delta),
            close_requested: std::mem::take(&mut self.close_requested),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_is_reported_once_and_held_until_release() {
        let mut state = InputState::default();
        state.key(KeyCode::ArrowUp, ElementState::Pressed, false);
        state.key(KeyCode::ArrowUp, ElementState::Pressed, true);
        let first = state.take();
        assert_eq!(first.pressed, vec!["Up".to_string()]);
        assert!(first.held.contains("Up"));

        let second = state.take();
        assert!(second.pressed.is_empty());
        assert!(second.held.contains("Up"));

        state.key(KeyCode::ArrowUp, ElementState::Released, false);
        assert!(state.take().held.is_empty());
    }

    #[test]
    fn pointer_motion_accumulates_and_drains() {
        let mut state = InputState::default();
        state.pointer(1.5, -2.0);
        state.pointer(0.5, 1.0);
        assert_eq!(state.take().pointer_delta, [2.0, -1.0]);
        assert_eq!(state.take().pointer_delta, [0.0, 0.0]);
    }

    #[test]
    fn unbound_keys_are_ignored() {
        let mut state = InputState::default();
        state.key(KeyCode::F13, ElementState::Pressed, false);
        assert_eq!(state.take(), WindowInput::default());
        assert_eq!(key_name(KeyCode::Enter), Some("Return"));
    }

    #[test]
    fn focus_loss_releases_held_keys() {
        let mut state = InputState::default();
        state.key(KeyCode::KeyW, ElementState::Pressed, false);
        state.release_all();
        let input = state.take();
        assert!(input.held.is_empty());
        assert_eq!(input.pressed, vec!["W".to_string()]);
    }
}
