//! Window system backends
//!
//! [`winsys`] holds the backend-independent part: the [`winsys::Renderer`] owning the active
//! backend, onscreen state, swap notifications and vblank throttling. Each other module implements
//! [`winsys::WinsysBackend`] for one family of window systems:
//!
//! - [`glx`]: GLX on X11, including texture-from-pixmap
//! - [`egl`]: EGL on X11 and Mir
//! - [`kms`]: EGL on KMS outputs, through GBM
//!
//! [`x11`] provides the X server connection shared by the X11 based backends, and the
//! damage-tracked pixmap textures.

pub mod winsys;

#[cfg(feature = "backend_egl")]
pub mod egl;
#[cfg(feature = "backend_glx")]
pub mod glx;
#[cfg(feature = "backend_drm")]
pub mod kms;
#[cfg(feature = "backend_x11")]
pub mod x11;
