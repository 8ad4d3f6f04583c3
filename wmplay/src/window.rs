//! The windowed front-end.

use anyhow::Result;
use render::FrameWindow;
use world::{Observation, Resolution};

use crate::game::{FrameDisplay, InputDevice, InputFrame};

/// Smallest window edge; small frames are scaled up to at least this.
const MIN_WINDOW_EDGE: usize = 512;

pub struct WindowFrontend {
    window: FrameWindow,
}

impl WindowFrontend {
    /// Opens a window sized for frames of `resolution`.
    ///
    /// # Errors
    ///
    /// Window or GPU surface creation failures.
    pub fn open(title: &str, resolution: Resolution) -> Result<Self> {
        let scale = MIN_WINDOW_EDGE
            .div_ceil(resolution.height.min(resolution.width).max(1))
            .max(1);
        let width = u32::try_from(resolution.width * scale)?;
        let height = u32::try_from(resolution.height * scale)?;
        tracing::info!("opening a {width}x{height} window");
        Ok(Self { window: FrameWindow::new(title, width, height)? })
    }
}

impl InputDevice for WindowFrontend {
    #[allow(clippy::cast_possible_truncation)]
    fn poll(&mut self) -> Result<InputFrame> {
        let input = self.window.pump();
        Ok(InputFrame {
            held: input.held,
            pressed: input.pressed,
            pointer_delta: input.pointer_delta.map(|d| d as f32),
            quit: input.close_requested,
        })
    }
}

impl FrameDisplay for WindowFrontend {
    fn present(&mut self, frame: &Observation, header: Option<&str>) -> Result<()> {
        let resolution = frame.resolution();
        self.window.present(
            frame.as_bytes(),
            u32::try_from(resolution.width)?,
            u32::try_from(resolution.height)?,
            header,
        )
    }
}
