//! Keyboard state tracked across winit events.

use std::collections::HashSet;

pub use winit::keyboard::KeyCode;

/// Which keys are held down right now.
///
/// The event loop feeds press and release events in as they arrive;
/// the camera update polls with [`is_key_pressed`](Self::is_key_pressed)
/// once per frame.
#[derive(Debug, Default)]
pub struct InputState {
    held_keys: HashSet<KeyCode>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_key_pressed(&mut self, key: KeyCode) {
        self.held_keys.insert(key);
    }

    pub fn on_key_released(&mut self, key: KeyCode) {
        self.held_keys.remove(&key);
    }

    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.held_keys.contains(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_held_until_released() {
        let mut input = InputState::new();
        assert!(!input.is_key_pressed(KeyCode::KeyW));

        input.on_key_pressed(KeyCode::KeyW);
        assert!(input.is_key_pressed(KeyCode::KeyW));

        // OS key repeat delivers duplicate presses
        input.on_key_pressed(KeyCode::KeyW);
        assert!(input.is_key_pressed(KeyCode::KeyW));

        input.on_key_released(KeyCode::KeyW);
        assert!(!input.is_key_pressed(KeyCode::KeyW));
    }

    #[test]
    fn releasing_an_unpressed_key_is_harmless() {
        let mut input = InputState::new();
        input.on_key_released(KeyCode::Escape);
        assert!(!input.is_key_pressed(KeyCode::Escape));
    }
}
