//! Rolling conditioning history.
//!
//! Every generated frame is fed back as context for the next one, so an
//! ordering mistake here corrupts the rest of the episode. The window is a
//! plain FIFO: pushes append at the back, eviction happens at the front, and
//! readers only ever get a borrowed [`ContextView`].

use std::collections::VecDeque;

use crate::action::Action;
use crate::error::{Result, WorldError};
use crate::observation::Observation;

/// Fixed-capacity FIFO of `(observation, action)` pairs, oldest first.
///
/// Each entry pairs a frame with the action that produced it (for spawn
/// snapshots: the action recorded alongside the frame).
#[derive(Debug, Clone)]
pub struct ConditioningWindow {
    capacity: usize,
    entries: VecDeque<(Observation, Action)>,
}

impl ConditioningWindow {
    /// # Errors
    ///
    /// A zero capacity is a configuration error.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(WorldError::Configuration(
                "conditioning window capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    /// Appends one pair, evicting the oldest when at capacity.
    pub fn push(&mut self, observation: Observation, action: Action) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((observation, action));
    }

    #[must_use]
    pub fn window(&self) -> ContextView<'_> {
        ContextView { entries: &self.entries, start: 0 }
    }

    /// Replaces the contents with a spawn snapshot. Only the last `capacity`
    /// pairs are kept.
    ///
    /// # Errors
    ///
    /// The two sequences must have the same length.
    pub fn reset(&mut self, observations: Vec<Observation>, actions: Vec<Action>) -> Result<()> {
        if observations.len() != actions.len() {
            return Err(WorldError::Configuration(format!(
                "spawn snapshot has {} observations but {} actions",
                observations.len(),
                actions.len()
            )));
        }
        self.entries.clear();
        for (observation, action) in observations.into_iter().zip(actions) {
            self.push(observation, action);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Borrowed, ordered view over (a suffix of) a [`ConditioningWindow`].
#[derive(Debug, Clone, Copy)]
pub struct ContextView<'a> {
    entries: &'a VecDeque<(Observation, Action)>,
    start: usize,
}

impl<'a> ContextView<'a> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len() - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The last `n` pairs (or all of them, if fewer are held).
    #[must_use]
    pub fn tail(&self, n: usize) -> ContextView<'a> {
        let skip = self.len().saturating_sub(n);
        ContextView {
            entries: self.entries,
            start: self.start + skip,
        }
    }

    pub fn iter(
        &self,
    ) -> impl ExactSizeIterator<Item = (&'a Observation, &'a Action)> + DoubleEndedIterator + 'a
    {
        self.entries.range(self.start..).map(|(o, a)| (o, a))
    }

    pub fn observations(
        &self,
    ) -> impl ExactSizeIterator<Item = &'a Observation> + DoubleEndedIterator + 'a {
        self.entries.range(self.start..).map(|(o, _)| o)
    }

    pub fn actions(&self) -> impl ExactSizeIterator<Item = &'a Action> + DoubleEndedIterator + 'a {
        self.entries.range(self.start..).map(|(_, a)| a)
    }

    /// The most recent pair.
    #[must_use]
    pub fn last(&self) -> Option<(&'a Observation, &'a Action)> {
        self.iter().next_back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::Resolution;

    fn obs(v: u8) -> Observation {
        Observation::filled(Resolution::new(1, 1), [v, v, v])
    }

    fn act(v: bool) -> Action {
        Action { buttons: vec![v], pointer: [0.0, 0.0] }
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(ConditioningWindow::new(0), Err(WorldError::Configuration(_))));
    }

    #[test]
    fn tail_takes_the_newest_entries() {
        let mut w = ConditioningWindow::new(4).unwrap();
        for i in 0..4 {
            w.push(obs(i), act(i % 2 == 0));
        }
        let tail: Vec<u8> = w.window().tail(2).observations().map(|o| o.pixel(0, 0)[0]).collect();
        assert_eq!(tail, vec![2, 3]);
        assert_eq!(w.window().tail(10).len(), 4);
        assert_eq!(w.window().tail(0).len(), 0);
        assert_eq!(w.window().tail(3).tail(1).last().unwrap().0.pixel(0, 0)[0], 3);
    }

    #[test]
    fn reset_keeps_the_last_capacity_pairs() {
        let mut w = ConditioningWindow::new(2).unwrap();
        w.push(obs(9), act(true));
        w.reset(vec![obs(1), obs(2), obs(3)], vec![act(false), act(true), act(false)])
            .unwrap();
        let kept: Vec<u8> = w.window().observations().map(|o| o.pixel(0, 0)[0]).collect();
        assert_eq!(kept, vec![2, 3]);
        let actions: Vec<bool> = w.window().actions().map(|a| a.buttons[0]).collect();
        assert_eq!(actions, vec![true, false]);
    }

    #[test]
    fn reset_rejects_mismatched_lengths() {
        let mut w = ConditioningWindow::new(2).unwrap();
        assert!(w.reset(vec![obs(1)], vec![]).is_err());
    }
}
