use serde::{Deserialize, Serialize};

use crate::error::{Result, WorldError};

/// Layout of the actions an environment accepts.
///
/// Buttons cover movement, steering and discrete controls alike; each one is
/// a held / not-held flag. Environments with a pointer also take a continuous
/// 2D delta per step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSchema {
    pub buttons: Vec<String>,
    #[serde(default)]
    pub pointer: bool,
}

impl ActionSchema {
    #[must_use]
    pub fn new<S: Into<String>>(buttons: impl IntoIterator<Item = S>, pointer: bool) -> Self {
        Self {
            buttons: buttons.into_iter().map(Into::into).collect(),
            pointer,
        }
    }

    /// Steering and throttle layout of the racing environment.
    #[must_use]
    pub fn racing() -> Self {
        Self::new(["up", "down", "left", "right"], false)
    }

    #[must_use]
    pub fn num_buttons(&self) -> usize {
        self.buttons.len()
    }

    #[must_use]
    pub fn button_index(&self, name: &str) -> Option<usize> {
        self.buttons.iter().position(|b| b == name)
    }

    /// The action that presses nothing and does not move the pointer.
    #[must_use]
    pub fn noop(&self) -> Action {
        Action {
            buttons: vec![false; self.buttons.len()],
            pointer: [0.0, 0.0],
        }
    }

    /// Builds an action from the names of held buttons; unknown names are
    /// ignored.
    #[must_use]
    pub fn action_from_held<'a>(&self, held: impl IntoIterator<Item = &'a str>) -> Action {
        let mut action = self.noop();
        for name in held {
            if let Some(i) = self.button_index(name) {
                action.buttons[i] = true;
            }
        }
        action
    }

    /// # Errors
    ///
    /// [`WorldError::InvalidAction`] when the button count differs from the
    /// schema, the pointer delta is not finite, or a pointer delta is given
    /// to a schema without a pointer.
    pub fn validate(&self, action: &Action) -> Result<()> {
        if action.buttons.len() != self.buttons.len() {
            return Err(WorldError::InvalidAction(format!(
                "expected {} buttons, got {}",
                self.buttons.len(),
                action.buttons.len()
            )));
        }
        if !action.pointer.iter().all(|v| v.is_finite()) {
            return Err(WorldError::InvalidAction(format!(
                "pointer delta {:?} is not finite",
                action.pointer
            )));
        }
        if !self.pointer && action.pointer != [0.0, 0.0] {
            return Err(WorldError::InvalidAction(
                "schema has no pointer but the action moves it".to_string(),
            ));
        }
        Ok(())
    }
}

/// One step's worth of player input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub buttons: Vec<bool>,
    /// Pointer delta, already scaled by the mouse multiplier.
    #[serde(default)]
    pub pointer: [f32; 2],
}

impl Action {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.buttons.iter().any(|b| *b) && self.pointer == [0.0, 0.0]
    }

    /// Names of the held buttons, in schema order.
    pub fn held<'s>(&'s self, schema: &'s ActionSchema) -> impl Iterator<Item = &'s str> + 's {
        schema
            .buttons
            .iter()
            .zip(&self.buttons)
            .filter(|(_, held)| **held)
            .map(|(name, _)| name.as_str())
    }
}
