/**
A note for future contributors and maintainers:

When editing this file, grab the nearest copy of the ICCCM. Size hints in particular decide
whether tiling window managers are able to place our windows.

A link to the ICCCM Section 4: https://tronche.com/gui/x/icccm/sec-4.html
*/
use x11rb::{
    connection::Connection,
    properties::WmSizeHints,
    protocol::xproto::{ColormapAlloc, ConnectionExt as _, CreateWindowAux, EventMask, Screen, WindowClass},
};

use crate::utils::{Rectangle, Size};

use super::X11Error;

/// Events every window managed here needs to receive.
///
/// Foreign windows get these bits added on top of whatever mask the application selected.
pub const WINDOW_EVENT_MASK: u32 = STRUCTURE_NOTIFY | EXPOSURE;

const EXPOSURE: u32 = 1 << 15;
const STRUCTURE_NOTIFY: u32 = 1 << 17;

/// Parameters for a window created by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowDescriptor {
    /// Position and size relative to the root window
    pub geometry: Rectangle,
    /// Visual of the GPU config the window will be rendered with
    pub visual: u32,
    /// Depth of that visual
    pub depth: u8,
    /// Event mask to select on the window
    pub event_mask: u32,
    /// Bypass the window manager
    pub override_redirect: bool,
}

impl WindowDescriptor {
    /// A regular toplevel window of the given size
    pub fn toplevel(size: Size, visual: u32, depth: u8) -> Self {
        WindowDescriptor {
            geometry: Rectangle::from_size(size),
            visual,
            depth,
            event_mask: WINDOW_EVENT_MASK,
            override_redirect: false,
        }
    }

    /// The 1x1 window backing a display's dummy drawable.
    ///
    /// Placed off screen, never mapped and ignored by the window manager.
    pub fn dummy(visual: u32, depth: u8) -> Self {
        WindowDescriptor {
            geometry: Rectangle::new(-100, -100, 1, 1),
            visual,
            depth,
            event_mask: WINDOW_EVENT_MASK,
            override_redirect: true,
        }
    }
}

/// `WM_NORMAL_HINTS` size constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeHints {
    /// Minimum size
    pub min: Size,
    /// Maximum size
    pub max: Size,
}

impl SizeHints {
    /// Hints for a window that may be resized freely
    pub fn resizable() -> Self {
        SizeHints {
            min: Size::new(1, 1),
            max: Size::new(i32::MAX, i32::MAX),
        }
    }

    /// Hints pinning a window to its current size
    pub fn fixed(current: Size) -> Self {
        SizeHints {
            min: current,
            max: current,
        }
    }
}

pub(super) fn create_window<C: Connection>(
    connection: &C,
    screen: &Screen,
    descriptor: &WindowDescriptor,
) -> Result<u32, X11Error> {
    let colormap = connection.generate_id()?;
    connection.create_colormap(ColormapAlloc::NONE, colormap, screen.root, descriptor.visual)?;

    let window = connection.generate_id()?;
    // Border pixel and color map need to be set if our depth may differ from the root depth.
    let window_aux = CreateWindowAux::new()
        .event_mask(EventMask::from(descriptor.event_mask))
        .border_pixel(0)
        .colormap(colormap)
        .override_redirect(u32::from(descriptor.override_redirect));

    let geometry = descriptor.geometry;
    connection.create_window(
        descriptor.depth,
        window,
        screen.root,
        geometry.x as i16,
        geometry.y as i16,
        geometry.width.clamp(1, u16::MAX as i32) as u16,
        geometry.height.clamp(1, u16::MAX as i32) as u16,
        0,
        WindowClass::INPUT_OUTPUT,
        descriptor.visual,
        &window_aux,
    )?;
    // The window keeps the colormap alive.
    connection.free_colormap(colormap)?;

    Ok(window)
}

pub(super) fn set_size_hints<C: Connection>(connection: &C, window: u32, hints: &SizeHints) -> Result<(), X11Error> {
    let mut normal_hints = WmSizeHints::new();
    normal_hints.min_size = Some((hints.min.w, hints.min.h));
    normal_hints.max_size = Some((hints.max.w, hints.max.h));
    normal_hints.set_normal_hints(connection, window)?;
    Ok(())
}
