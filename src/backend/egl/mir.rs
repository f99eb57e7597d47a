//! EGL on a Mir connection
//!
//! The connection to the Mir server belongs to the application, which hands it over as a
//! [`MirConnection`] through [`RendererOptions::mir_connection`]. Surface events are queued by
//! the connection and picked up when the renderer dispatches.

use std::{fmt, os::unix::io::BorrowedFd};

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::{
    backend::winsys::{
        OnscreenDescriptor, OnscreenEvent, OnscreenId, RendererOptions, WinsysError, WinsysFeatures, WinsysId,
    },
    utils::Size,
};

use super::{ffi::EGLint, EglBackend, EglLibrary, EglPlatform, PlatformEvents};

/// Pixel formats a Mir server offers for surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum MirPixelFormat {
    Abgr8888,
    Xbgr8888,
    Argb8888,
    Xrgb8888,
    Bgr888,
    Rgb565,
    Other(u32),
}

impl MirPixelFormat {
    fn is_32bit(&self) -> bool {
        matches!(
            self,
            MirPixelFormat::Abgr8888 | MirPixelFormat::Xbgr8888 | MirPixelFormat::Argb8888 | MirPixelFormat::Xrgb8888
        )
    }
}

/// Window management state of a Mir surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub enum MirSurfaceState {
    #[default]
    Unknown,
    Restored,
    Minimized,
    Maximized,
    Fullscreen,
}

/// Parameters of a new Mir surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirSurfaceSpec {
    /// Title
    pub name: String,
    /// Size in pixels
    pub size: Size,
    /// Pixel format, one of the connection's
    pub format: MirPixelFormat,
}

/// A surface created by a [`MirConnection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirSurface {
    /// Identifies the surface towards the connection
    pub id: u64,
    /// Native window handed to `eglCreateWindowSurface`
    pub egl_native_window: usize,
}

/// A surface event reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirSurfaceEvent {
    /// The server resized the surface
    Resize {
        /// The surface
        surface: u64,
        /// Its new size
        size: Size,
    },
}

/// Connection to a Mir server, provided by the application
pub trait MirConnection: fmt::Debug {
    /// Native display handed to `eglGetDisplay`
    fn egl_native_display(&self) -> usize;
    /// Pixel formats usable for surfaces, in the server's order of preference
    fn available_formats(&self) -> Vec<MirPixelFormat>;
    /// Create a surface using hardware buffers
    fn create_surface(&mut self, spec: &MirSurfaceSpec) -> Result<MirSurface, String>;
    /// Release a surface created by [`MirConnection::create_surface`]
    fn release_surface(&mut self, surface: u64);
    /// Current state of a surface
    fn surface_state(&self, surface: u64) -> MirSurfaceState;
    /// Request a new state for a surface
    fn set_surface_state(&mut self, surface: u64, state: MirSurfaceState);
    /// Surface events received since the last call
    fn take_events(&mut self) -> Vec<MirSurfaceEvent>;
    /// File descriptor signalling new events
    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}

#[derive(Debug)]
struct MirWindow {
    surface: u64,
    last_state: MirSurfaceState,
}

/// Mir side of the EGL backend
#[derive(Debug)]
pub struct MirPlatform {
    connection: Box<dyn MirConnection>,
    dummy_surface: Option<u64>,
    windows: IndexMap<OnscreenId, MirWindow>,
}

impl MirPlatform {
    /// Platform on an application supplied connection
    pub fn new(connection: Box<dyn MirConnection>) -> Self {
        MirPlatform {
            connection,
            dummy_surface: None,
            windows: IndexMap::new(),
        }
    }

    /// The connection
    pub fn connection(&self) -> &dyn MirConnection {
        &*self.connection
    }

    fn valid_format(&self) -> Result<MirPixelFormat, WinsysError> {
        self.connection
            .available_formats()
            .into_iter()
            .find(MirPixelFormat::is_32bit)
            .ok_or_else(|| WinsysError::CreateOnscreen("The Mir server offers no 32 bit surface format".into()))
    }

    fn create_surface(&mut self, name: &str, size: Size) -> Result<MirSurface, String> {
        let format = self.valid_format().map_err(|err| err.to_string())?;
        let spec = MirSurfaceSpec {
            name: name.to_owned(),
            size,
            format,
        };
        let surface = self.connection.create_surface(&spec)?;
        if surface.egl_native_window == 0 {
            self.connection.release_surface(surface.id);
            return Err("The surface has no EGL native window".into());
        }
        Ok(surface)
    }
}

impl EglBackend<MirPlatform> {
    /// Use the application's Mir connection and load `libEGL`
    pub fn connect_mir(options: &mut RendererOptions) -> Result<EglBackend<MirPlatform>, WinsysError> {
        let connection = options
            .mir_connection
            .take()
            .ok_or_else(|| WinsysError::Init("No Mir connection was supplied".into()))?;
        let driver = EglLibrary::open()?;
        EglBackend::from_parts(MirPlatform::new(connection), std::rc::Rc::new(driver), options.driver)
    }
}

impl EglPlatform for MirPlatform {
    fn id(&self) -> WinsysId {
        WinsysId::EglMir
    }

    fn native_display(&self) -> usize {
        self.connection.egl_native_display()
    }

    fn features(&self) -> WinsysFeatures {
        WinsysFeatures::MULTIPLE_ONSCREEN
    }

    fn create_dummy_window(&mut self, _native_visual: EGLint, surfaceless: bool) -> Result<Option<usize>, WinsysError> {
        if surfaceless {
            return Ok(None);
        }
        let surface = self
            .create_surface("CoglDummySurface", Size::new(1, 1))
            .map_err(|err| WinsysError::CreateContext(format!("Failed to create a dummy mir surface: {err}")))?;
        self.dummy_surface = Some(surface.id);
        Ok(Some(surface.egl_native_window))
    }

    fn destroy_dummy_window(&mut self) {
        if let Some(surface) = self.dummy_surface.take() {
            self.connection.release_surface(surface);
        }
    }

    fn create_window(
        &mut self,
        id: OnscreenId,
        descriptor: OnscreenDescriptor,
        _native_visual: EGLint,
    ) -> Result<(usize, Size), WinsysError> {
        if descriptor.foreign_window.is_some() {
            warn!("Foreign X windows cannot be used on Mir, creating a surface");
        }
        let size = Size::new(descriptor.size.w.max(1), descriptor.size.h.max(1));
        let name = std::env::args().next().unwrap_or_default();
        let surface = self.create_surface(&name, size).map_err(|err| {
            WinsysError::CreateOnscreen(format!("Error while creating mir surface for the onscreen: {err}"))
        })?;

        let last_state = self.connection.surface_state(surface.id);
        debug!(surface = surface.id, ?size, "Mir surface created");
        self.windows.insert(
            id,
            MirWindow {
                surface: surface.id,
                last_state,
            },
        );
        Ok((surface.egl_native_window, size))
    }

    fn destroy_window(&mut self, id: OnscreenId) {
        if let Some(window) = self.windows.shift_remove(&id) {
            self.connection.release_surface(window.surface);
        }
    }

    fn set_visibility(&mut self, id: OnscreenId, visible: bool) {
        let Some(window) = self.windows.get_mut(&id) else {
            return;
        };
        let current = self.connection.surface_state(window.surface);
        let minimized = current == MirSurfaceState::Minimized;
        if visible != minimized {
            return;
        }

        let state = if visible {
            window.last_state
        } else {
            window.last_state = current;
            MirSurfaceState::Minimized
        };
        trace!(surface = window.surface, ?state, "Changing surface state");
        self.connection.set_surface_state(window.surface, state);
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.connection.poll_fd()
    }

    fn dispatch(&mut self) -> Result<PlatformEvents, WinsysError> {
        let mut events = PlatformEvents::default();
        for event in self.connection.take_events() {
            let MirSurfaceEvent::Resize { surface, size } = event;
            match self.windows.iter().find(|(_, window)| window.surface == surface) {
                Some((&onscreen, _)) => events.onscreen.push(OnscreenEvent::Resized { onscreen, size }),
                None => trace!(surface, "Resize of an unknown surface"),
            }
        }
        Ok(events)
    }
}
