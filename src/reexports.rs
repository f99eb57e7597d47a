//! Reexports of crates, that are part of the public api, for convenience

pub use calloop;
#[cfg(feature = "backend_drm")]
pub use drm;
#[cfg(feature = "backend_gbm")]
pub use gbm;
#[cfg(feature = "backend_x11")]
pub use x11rb;
