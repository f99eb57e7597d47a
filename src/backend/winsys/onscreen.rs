use std::fmt;

use crate::utils::{ids::id_type, Size};

use super::config::FramebufferConfig;

id_type!(
    /// Identifies an onscreen surface of a renderer
    OnscreenId
);

/// Hook asked to add our event mask to a foreign window.
///
/// Receives the window and the event mask bits this crate needs. The application is expected to
/// combine them with its own mask and select the result on the window.
pub type UpdateMaskCallback = Box<dyn FnMut(u32, u32)>;

/// A window created by the application to render into
pub struct ForeignWindow {
    /// The native window id
    pub xid: u32,
    /// Called once to extend the window's event mask
    pub update_mask: UpdateMaskCallback,
}

impl fmt::Debug for ForeignWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignWindow").field("xid", &self.xid).finish_non_exhaustive()
    }
}

/// Request for a new onscreen surface
#[derive(Debug)]
pub struct OnscreenDescriptor {
    /// Requested size, ignored for foreign windows which keep their own
    pub size: Size,
    /// Framebuffer settings
    pub config: FramebufferConfig,
    /// Render into an existing window instead of creating one
    pub foreign_window: Option<ForeignWindow>,
}

impl OnscreenDescriptor {
    /// A new window of the given size with default settings
    pub fn new(size: Size) -> Self {
        OnscreenDescriptor {
            size,
            config: FramebufferConfig::default(),
            foreign_window: None,
        }
    }

    /// Render into `window`
    pub fn with_foreign_window(mut self, xid: u32, update_mask: impl FnMut(u32, u32) + 'static) -> Self {
        self.foreign_window = Some(ForeignWindow {
            xid,
            update_mask: Box::new(update_mask),
        });
        self
    }

    /// Replace the framebuffer settings
    pub fn with_config(mut self, config: FramebufferConfig) -> Self {
        self.config = config;
        self
    }
}

/// Backend independent state of an onscreen surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnscreenState {
    /// Current size
    pub size: Size,
    /// Whether swaps are throttled to the vertical refresh
    pub swap_throttled: bool,
    /// Vsync counter read before the previous throttled swap
    pub last_swap_vsync_counter: u32,
    /// Whether the surface is shown
    pub visible: bool,
    /// Whether the user may resize the surface
    pub resizable: bool,
}

impl OnscreenState {
    pub(crate) fn new(size: Size, config: &FramebufferConfig) -> Self {
        OnscreenState {
            size,
            swap_throttled: config.swap_throttled,
            last_swap_vsync_counter: 0,
            visible: false,
            resizable: false,
        }
    }
}
