//! A front-end without a window: scripted input, frames counted not shown.

use std::collections::{HashSet, VecDeque};

use anyhow::Result;
use world::Observation;

use crate::game::{FrameDisplay, InputDevice, InputFrame};

/// Replays queued input frames, then keeps holding a fixed set of keys.
#[derive(Debug, Default)]
pub struct HeadlessFrontend {
    script: VecDeque<InputFrame>,
    held: HashSet<String>,
    presented: u64,
    last_frame: Option<Observation>,
    last_header: Option<String>,
}

impl HeadlessFrontend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys held on every tick once the script has run out.
    #[must_use]
    pub fn holding<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.held = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Queues one tick of input.
    pub fn push(&mut self, frame: InputFrame) {
        self.script.push_back(frame);
    }

    /// Queues a tick in which `key` goes down (and is held for that tick).
    pub fn press(&mut self, key: &str) {
        let mut held = self.held.clone();
        held.insert(key.to_string());
        self.push(InputFrame {
            held,
            pressed: vec![key.to_string()],
            ..InputFrame::default()
        });
    }

    /// Queues a quit request.
    pub fn quit(&mut self) {
        self.push(InputFrame { quit: true, ..InputFrame::default() });
    }

    #[must_use]
    pub fn presented(&self) -> u64 {
        self.presented
    }

    #[must_use]
    pub fn last_frame(&self) -> Option<&Observation> {
        self.last_frame.as_ref()
    }

    #[must_use]
    pub fn last_header(&self) -> Option<&str> {
        self.last_header.as_deref()
    }
}

impl InputDevice for HeadlessFrontend {
    fn poll(&mut self) -> Result<InputFrame> {
        Ok(self.script.pop_front().unwrap_or_else(|| InputFrame {
            held: self.held.clone(),
            ..InputFrame::default()
        }))
    }
}

impl FrameDisplay for HeadlessFrontend {
    fn present(&mut self, frame: &Observation, header: Option<&str>) -> Result<()> {
        self.presented += 1;
        self.last_frame = Some(frame.clone());
        self.last_header = header.map(str::to_string);
        if self.presented % 100 == 0 {
            tracing::debug!("headless: {} frames, {}", self.presented, header.unwrap_or("-"));
        }
        Ok(())
    }
}
