//! Direct rendering on KMS outputs
//!
//! Without a display server, frames are presented by scanning out GBM buffers on the CRTCs of
//! the connected outputs. [`KmsPlatform`] plugs this into the EGL backend: the single onscreen is a
//! GBM surface the size of the first output's mode, the CRTC modes are programmed on its first
//! swap and every later swap queues a page flip on each CRTC. A swap completes once all of them
//! flipped, and the next swap blocks until then.
//!
//! [`wait_vblank`] is also used by the GLX backend to throttle on the vertical refresh.

#[cfg(feature = "backend_gbm")]
mod device;
#[cfg(feature = "backend_gbm")]
mod platform;
mod vblank;

#[cfg(feature = "backend_gbm")]
pub use self::device::{
    builtin_panel_mode, mode_size, DrmFd, GbmKmsDevice, KmsBuffer, KmsConnector, KmsDevice, SavedCrtc,
};
#[cfg(feature = "backend_gbm")]
pub use self::platform::{KmsCrtc, KmsEnvironment, KmsPlatform};
pub use self::vblank::{wait_vblank, DrmVblank};
