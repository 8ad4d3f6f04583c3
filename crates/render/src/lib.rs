//! Presentation for the world-model player: one window, one frame at a time.
//!
//! [`FrameWindow`] uploads RGB frames to a wgpu texture and draws them
//! letterboxed into a winit window. Input is collected into a
//! [`WindowInput`] each time the owner pumps the event loop.

mod frame_window;
mod input;

pub use frame_window::FrameWindow;
pub use input::{key_name, WindowInput};
