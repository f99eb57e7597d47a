//! Framebuffer configuration and display setup state

use tracing::{debug, trace};

/// GL API flavor a context is created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GlDriver {
    /// Desktop OpenGL, legacy profile
    #[default]
    Gl,
    /// Desktop OpenGL 3.1 core, forward compatible
    Gl3,
    /// OpenGL ES 2
    Gles2,
}

impl GlDriver {
    /// Whether this is a desktop GL flavor
    pub fn is_desktop(&self) -> bool {
        matches!(self, GlDriver::Gl | GlDriver::Gl3)
    }
}

/// Settings of a framebuffer, used both to pick a GPU config and per onscreen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferConfig {
    /// The framebuffer needs an alpha channel that is composited with the desktop
    pub has_alpha: bool,
    /// A stencil buffer is wanted
    pub need_stencil: bool,
    /// Multisampling, 0 to disable
    pub samples_per_pixel: u32,
    /// Throttle swaps to the vertical refresh
    pub swap_throttled: bool,
}

impl Default for FramebufferConfig {
    fn default() -> Self {
        FramebufferConfig {
            has_alpha: false,
            need_stencil: true,
            samples_per_pixel: 0,
            swap_throttled: true,
        }
    }
}

/// Template the display's GPU config is chosen from
pub type OnscreenTemplate = FramebufferConfig;

/// Run `attempt` with `config`, and once more without a stencil buffer if that failed.
///
/// Failures of configs that did not request stencil are final.
pub fn negotiate_config<C, E: std::fmt::Debug>(
    config: &FramebufferConfig,
    mut attempt: impl FnMut(&FramebufferConfig) -> Result<C, E>,
) -> Result<C, E> {
    match attempt(config) {
        Ok(chosen) => Ok(chosen),
        Err(err) if config.need_stencil => {
            debug!(?err, "Display setup failed, retrying without a stencil buffer");
            let relaxed = FramebufferConfig {
                need_stencil: false,
                ..*config
            };
            attempt(&relaxed)
        }
        Err(err) => Err(err),
    }
}

/// Progress of a display through its setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum DisplayState {
    /// Nothing created
    #[default]
    Unconnected,
    /// A GPU config was chosen
    ConfigChosen,
    /// The rendering context exists
    ContextCreated,
    /// The dummy drawable is current
    DummySurfaceBound,
    /// Usable
    Ready,
}

/// Tracks [`DisplayState`] transitions
#[derive(Debug, Default)]
pub struct DisplayLifecycle {
    state: DisplayState,
}

impl DisplayLifecycle {
    /// Current state
    pub fn state(&self) -> DisplayState {
        self.state
    }

    /// Move forward to `state`.
    ///
    /// # Panics
    ///
    /// Panics when moving backwards, use [`DisplayLifecycle::reset`] to tear down.
    pub fn advance(&mut self, state: DisplayState) {
        assert!(state > self.state, "display setup must move forward ({:?} -> {:?})", self.state, state);
        trace!(from = ?self.state, to = ?state, "Display state");
        self.state = state;
    }

    /// Back to [`DisplayState::Unconnected`]
    pub fn reset(&mut self) {
        if self.state != DisplayState::Unconnected {
            trace!(from = ?self.state, "Display torn down");
        }
        self.state = DisplayState::Unconnected;
    }
}
