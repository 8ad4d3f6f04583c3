//! # wmplay
//!
//! Interactive player for generative world models.
//!
//! The binary parses a [`config::Cli`], layers it over a JSON
//! [`config::PlayConfig`], and [`app::run`] wires the pieces together: a
//! compute device from `compute`, an agent and a `world::WorldModelEnv`, and a
//! [`game::Game`] loop that paces input, stepping and display at the target
//! frame rate.
//!
//! With the default `render` feature frames go to a window; `--headless`
//! (or building without the feature) runs the same loop with scripted input.

pub mod app;
pub mod config;
pub mod game;
pub mod headless;
#[cfg(feature = "render")]
pub mod window;
