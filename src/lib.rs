#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
// Allow acronyms like EGL
#![allow(clippy::upper_case_acronyms)]

//! # cogl-winsys: window system backends for a GL renderer
//!
//! This crate connects a GL renderer to the native window system. It picks one backend at
//! connection time (GLX, EGL on X11, EGL on KMS or EGL on Mir), sets up a GPU config and context
//! for the display, creates onscreen surfaces and presents them, throttled to the vertical refresh
//! when asked to.
//!
//! ## Structure of the crate
//!
//! - [`backend::winsys`] contains the [`Renderer`](backend::winsys::Renderer) and the
//!   [`WinsysBackend`](backend::winsys::WinsysBackend) trait every backend implements.
//! - the other modules of [`backend`] implement the individual window systems.
//! - [`backend::x11`] additionally provides textures of X11 pixmaps, updated from the
//!   Damage extension.
//!
//! ## Event loop
//!
//! Swap completion and resize notifications are delivered from
//! [`Renderer::dispatch`](backend::winsys::Renderer::dispatch), which the [`calloop`] event source of
//! a renderer calls whenever the native connection has events.
//!
//! ### Logging
//!
//! This crate makes extensive use of [`tracing`] for its internal logging.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features,
//! for example in your binary crate `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```

pub mod backend;
pub mod utils;

pub mod reexports;

#[cfg(test)]
mod test_utils;
