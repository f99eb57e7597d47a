//! X11 display-server connection
//!
//! Every X11-based window system backend (GLX and EGL on X11) talks to the server through the
//! [`XServer`] trait. The production implementation is [`X11Connection`], an Xlib display whose
//! XCB connection is driven through [x11rb](https://github.com/psychon/x11rb). Xlib is needed
//! because GLX and EGL drivers expect an Xlib `Display*`, while everything this crate requests
//! itself goes through x11rb.
//!
//! ## Error traps
//!
//! Requests that may legitimately fail (probing a foreign window, binding a pixmap the driver
//! may reject) are wrapped in an [`ErrorTrap`]. Protocol errors raised while a trap is active
//! are caught and returned as an error code by [`ErrorTrap::finish`] instead of being reported.
//!
//! ```rust,ignore
//! let trap = ErrorTrap::new(&connection);
//! let size = connection.window_size(foreign_window);
//! if trap.finish() != 0 {
//!     // the window was not valid
//! }
//! ```
//!
//! ## Pixmap textures
//!
//! [`TexturePixmapX11`] keeps a GPU texture in sync with an X pixmap using the Damage extension
//! to track changes.

use std::{fmt, os::unix::io::BorrowedFd};

use crate::utils::{Rectangle, Size};

mod connection;
mod error;
mod extension;
mod pixmap;
mod trap;
mod window;

pub use self::connection::X11Connection;
pub use self::error::{X11Error, XlibError};
pub use self::extension::{ExtensionInfo, Extensions};
pub use self::pixmap::{
    ImageData, PixmapBinding, ShmSegment, TextureId, TexturePixmapX11, TextureStorage,
};
pub use self::trap::{ErrorTrap, ErrorTrapStack, TrapToken};
pub use self::window::{SizeHints, WindowDescriptor, WINDOW_EVENT_MASK};

/// X11 events relevant to window system backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XEvent {
    /// A window changed its size
    Configure {
        /// Affected window
        window: u32,
        /// New size
        size: Size,
    },
    /// Part of a window was exposed and needs to be redrawn
    Expose {
        /// Affected window
        window: u32,
        /// Exposed area
        area: Rectangle,
    },
    /// A swap requested on a GLX drawable completed
    SwapComplete {
        /// The GLX drawable or X window that was swapped
        drawable: u32,
    },
    /// A damage object reported changes to its drawable
    DamageNotify {
        /// The damage object
        damage: u32,
        /// Bounding box of the reported damage
        area: Rectangle,
    },
}

/// Access to an X server, as required by the window system backends.
///
/// Requests are sent asynchronously. Protocol errors they cause are either caught by an active
/// error trap or logged when they arrive.
pub trait XServer: fmt::Debug {
    /// Push an error trap, see [`ErrorTrap`]
    fn trap_errors(&self) -> TrapToken;
    /// Synchronize, pop the innermost error trap and return the error code it caught
    fn untrap_errors(&self, token: TrapToken) -> u8;

    /// Create a window
    fn create_window(&self, descriptor: &WindowDescriptor) -> Result<u32, X11Error>;
    /// Destroy a window
    fn destroy_window(&self, window: u32);
    /// Query the current size of a window
    fn window_size(&self, window: u32) -> Result<Size, X11Error>;
    /// Map a window
    fn map_window(&self, window: u32);
    /// Unmap a window
    fn unmap_window(&self, window: u32);
    /// Set the window manager size hints of a window
    fn set_size_hints(&self, window: u32, hints: &SizeHints);
    /// Depth of a visual of the default screen
    fn visual_depth(&self, visual: u32) -> Option<u8>;

    /// Send all buffered requests
    fn flush(&self);
    /// Wait until the server processed all requests sent so far
    fn sync(&self);
    /// Next pending event, without blocking
    fn poll_event(&self) -> Result<Option<XEvent>, X11Error>;
    /// The connection socket, readable when events arrive
    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}

/// Geometry of a pixmap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixmapGeometry {
    /// Size of the pixmap
    pub size: Size,
    /// Depth of the pixmap
    pub depth: u8,
}

/// Channel masks of a visual
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VisualMasks {
    /// Red channel
    pub red: u32,
    /// Green channel
    pub green: u32,
    /// Blue channel
    pub blue: u32,
}

/// Memory layout of `ZPixmap` images of one depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFormat {
    /// Bits per pixel
    pub bits_per_pixel: u8,
    /// Scanline padding, in bits
    pub scanline_pad: u8,
}

impl ImageFormat {
    /// Bytes per row of an image `width` pixels wide
    pub fn stride(&self, width: i32) -> usize {
        let pad = usize::from(self.scanline_pad.max(8));
        let bits = width.max(0) as usize * usize::from(self.bits_per_pixel);
        (bits + pad - 1) / pad * pad / 8
    }

    /// Bytes per pixel
    pub fn bytes_per_pixel(&self) -> usize {
        (usize::from(self.bits_per_pixel) + 7) / 8
    }
}

/// Server-side operations needed to keep a texture in sync with a pixmap
pub trait PixmapSource: XServer {
    /// Size and depth of a pixmap
    fn pixmap_geometry(&self, pixmap: u32) -> Result<PixmapGeometry, X11Error>;
    /// Channel masks of the root visual, used to interpret fetched pixmap contents
    fn visual_masks(&self) -> VisualMasks;
    /// Image layout the server uses for `depth`
    fn image_format(&self, depth: u8) -> Option<ImageFormat>;

    /// Create a damage object reporting bounding boxes, `None` without the Damage extension
    fn create_damage(&self, drawable: u32) -> Option<u32>;
    /// Clear the damage accumulated by a damage object
    fn subtract_damage(&self, damage: u32);
    /// Destroy a damage object
    fn destroy_damage(&self, damage: u32);

    /// Whether the server supports MIT-SHM
    fn shm_available(&self) -> bool;
    /// Attach a SysV shared memory segment, `None` if the server refused it
    fn attach_shm(&self, shmid: i32) -> Option<u32>;
    /// Detach a segment attached with [`PixmapSource::attach_shm`]
    fn detach_shm(&self, segment: u32);
    /// Copy `area` of a drawable to the start of an attached segment
    fn shm_get_image(&self, drawable: u32, area: Rectangle, segment: u32) -> Result<(), X11Error>;
    /// Fetch `area` of a drawable
    fn get_image(&self, drawable: u32, area: Rectangle) -> Result<Vec<u8>, X11Error>;
}
