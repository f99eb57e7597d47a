//! Window system abstraction
//!
//! A [`Renderer`] owns exactly one [`WinsysBackend`], chosen when connecting: GLX, EGL on X11,
//! EGL on KMS or EGL on Mir. The backend owns the native display connection, the GPU config and
//! context of the display, a dummy drawable keeping the context current, and the native
//! drawables of every onscreen surface.
//!
//! ```rust,ignore
//! let renderer = Renderer::connect(RendererOptions::new())?;
//! let onscreen = renderer.create_onscreen(OnscreenDescriptor::new(Size::new(800, 600)))?;
//! renderer.add_swap_complete_callback(onscreen, |onscreen| println!("{onscreen:?} presented"));
//!
//! // drive native events and notifications from calloop
//! event_loop.handle().insert_source(renderer.event_source()?, |event, _, _| {
//!     // native events that are not about onscreens, e.g. damage for pixmap textures
//! })?;
//! ```
//!
//! ## Notifications
//!
//! Swap completion, resize and dirty callbacks are only invoked from [`Renderer::dispatch`]
//! (which the [`RendererSource`] calls), never while a backend decodes native events or from
//! inside another renderer call.

use std::{
    cell::RefCell,
    env, fmt,
    ffi::c_void,
    io,
    os::unix::io::{AsFd, OwnedFd},
    path::PathBuf,
    ptr::NonNull,
    rc::Rc,
    str::FromStr,
};

use calloop::{
    ping::{make_ping, Ping, PingSource},
    EventSource, Interest, Mode, Poll, PostAction, Readiness, Token, TokenFactory,
};
use tracing::{debug, info, info_span, instrument, warn};

use crate::utils::{Rectangle, Size};

mod config;
mod features;
mod loader;
mod notify;
mod onscreen;
mod throttle;

pub use self::config::{
    negotiate_config, DisplayLifecycle, DisplayState, FramebufferConfig, GlDriver, OnscreenTemplate,
};
pub use self::features::{detect_features, ExtensionSet, FeatureDescriptor, DetectedFeatures, WinsysFeatures};
#[cfg(feature = "libloading")]
pub use self::loader::DynamicLibrary;
pub use self::loader::{LoaderError, ProcAddressLoader, SymbolLoader, SymbolTable};
pub use self::notify::{NotifyId, OnscreenEvent, PendingNotifications};
pub use self::onscreen::{ForeignWindow, OnscreenDescriptor, OnscreenId, OnscreenState, UpdateMaskCallback};
pub use self::throttle::{
    throttle_frame, FrameThrottle, SwapStrategy, VblankCaps, VblankSource, VblankWait, VblankWaitError,
};

use self::notify::{CallbackRegistry, EventKind};

#[cfg(feature = "backend_egl")]
use super::egl::EglError;
#[cfg(feature = "backend_mir")]
use super::egl::mir::MirConnection;
#[cfg(feature = "backend_x11")]
use super::x11::{PixmapBinding, X11Error, XEvent};

/// Identifies a window system backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WinsysId {
    /// GLX on X11
    Glx,
    /// EGL on X11
    EglX11,
    /// EGL on a DRM/KMS device through GBM
    EglKms,
    /// EGL on a Mir connection
    EglMir,
}

impl WinsysId {
    /// Name used by `COGL_RENDERER`
    pub fn name(&self) -> &'static str {
        match self {
            WinsysId::Glx => "glx",
            WinsysId::EglX11 => "egl_x11",
            WinsysId::EglKms => "egl_kms",
            WinsysId::EglMir => "egl_mir",
        }
    }

    /// Backends in the order they are tried when none is requested
    pub const ALL: [WinsysId; 4] = [WinsysId::Glx, WinsysId::EglX11, WinsysId::EglKms, WinsysId::EglMir];
}

impl fmt::Display for WinsysId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WinsysId {
    type Err = WinsysError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        WinsysId::ALL
            .into_iter()
            .find(|id| id.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| WinsysError::Init(format!("Unknown window system \"{name}\"")))
    }
}

/// Errors of the window system layer
#[derive(Debug, thiserror::Error)]
pub enum WinsysError {
    /// Generic initialization failure
    #[error("Initialization failed: {0}")]
    Init(String),
    /// No compiled in backend could be connected
    #[error("No window system backend could be connected")]
    NoBackend,
    /// The requested backend is not compiled in or cannot run here
    #[error("The {0} window system is not available")]
    BackendUnavailable(WinsysId),
    /// The native display could not be opened
    #[error("Failed to open the display")]
    CannotOpenDisplay,
    /// No GPU config matches the requested attributes
    #[error("No matching framebuffer config")]
    NoConfig,
    /// Alpha was requested but no config has a real alpha channel
    #[error("No framebuffer config with an alpha channel (rgba visual)")]
    NoRgbaConfig,
    /// The rendering context could not be created
    #[error("Failed to create the context: {0}")]
    CreateContext(String),
    /// The native drawable of an onscreen could not be created
    #[error("Failed to create the onscreen: {0}")]
    CreateOnscreen(String),
    /// Making a context current failed
    #[error("Failed to make the context current")]
    MakeCurrent,
    /// The onscreen id does not belong to this renderer
    #[error("Unknown onscreen")]
    UnknownOnscreen,
    /// X11 error
    #[cfg(feature = "backend_x11")]
    #[error(transparent)]
    X11(#[from] X11Error),
    /// EGL error
    #[cfg(feature = "backend_egl")]
    #[error(transparent)]
    Egl(#[from] EglError),
    /// A driver library could not be loaded
    #[error(transparent)]
    Loader(#[from] LoaderError),
    /// DRM/KMS failure
    #[error("KMS: {0}")]
    Kms(String),
    /// I/O error
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Native events a backend did not consume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum BackendEvent {
    /// An X11 event, for example damage reported for a pixmap texture
    #[cfg(feature = "backend_x11")]
    X11(XEvent),
}

/// A window system backend
///
/// The renderer calls these in the order connect, [`display_setup`](WinsysBackend::display_setup),
/// [`context_init`](WinsysBackend::context_init), any onscreen operations, then
/// [`context_deinit`](WinsysBackend::context_deinit) and
/// [`display_destroy`](WinsysBackend::display_destroy) before the backend is dropped. Dropping
/// the backend disconnects from the display.
pub trait WinsysBackend: fmt::Debug {
    /// Which backend this is
    fn id(&self) -> WinsysId;
    /// Features of the current context
    fn features(&self) -> WinsysFeatures;

    /// Choose a GPU config, create the context and the dummy drawable and bind it
    fn display_setup(&mut self, template: &OnscreenTemplate) -> Result<(), WinsysError>;
    /// Destroy everything created by [`WinsysBackend::display_setup`]
    fn display_destroy(&mut self);
    /// Setup progress of the display
    fn display_state(&self) -> DisplayState;

    /// Detect the features of the context
    fn context_init(&mut self) -> Result<(), WinsysError>;
    /// Forget the context state
    fn context_deinit(&mut self);

    /// Create the native drawable of an onscreen
    fn onscreen_init(&mut self, id: OnscreenId, descriptor: OnscreenDescriptor) -> Result<(), WinsysError>;
    /// Destroy the native drawable of an onscreen
    fn onscreen_deinit(&mut self, id: OnscreenId);
    /// Make the onscreen current
    fn onscreen_bind(&mut self, id: OnscreenId) -> Result<(), WinsysError>;
    /// Present the back buffer. `damage` may be empty
    fn onscreen_swap_buffers_with_damage(&mut self, id: OnscreenId, damage: &[Rectangle]) -> Result<(), WinsysError>;
    /// Present parts of the back buffer
    fn onscreen_swap_region(&mut self, id: OnscreenId, rectangles: &[Rectangle]) -> Result<(), WinsysError>;
    /// Show or hide
    fn onscreen_set_visibility(&mut self, id: OnscreenId, visible: bool) -> Result<(), WinsysError>;
    /// Allow or forbid user resizes
    fn onscreen_set_resizable(&mut self, id: OnscreenId, resizable: bool) -> Result<(), WinsysError>;
    /// Apply a changed swap throttle setting
    fn onscreen_update_swap_throttled(&mut self, id: OnscreenId, throttled: bool) -> Result<(), WinsysError>;
    /// Age of the back buffer, 0 if unknown
    fn onscreen_get_buffer_age(&mut self, id: OnscreenId) -> i32;
    /// State of an onscreen
    fn onscreen_state(&self, id: OnscreenId) -> Option<&OnscreenState>;
    /// X window of an onscreen
    fn onscreen_x11_get_window_xid(&self, _id: OnscreenId) -> Option<u32> {
        None
    }

    /// Address of a GL or window system entry point
    fn get_proc_address(&self, name: &str) -> Option<NonNull<c_void>>;

    /// File descriptor to poll for native events
    fn poll_fd(&self) -> Option<std::os::unix::io::BorrowedFd<'_>>;
    /// Process pending native events, queueing notifications
    fn dispatch_native(&mut self) -> Result<Vec<BackendEvent>, WinsysError>;
    /// Notifications waiting for dispatch
    fn pending(&mut self) -> &mut PendingNotifications;

    /// Zero-copy binding for a pixmap texture, if the backend supports one
    #[cfg(feature = "backend_x11")]
    fn texture_pixmap_binding(&mut self, _pixmap: u32, _depth: u8) -> Option<Box<dyn PixmapBinding>> {
        None
    }
}

/// Settings used to connect a [`Renderer`]
pub struct RendererOptions {
    pub(crate) backend: Option<WinsysId>,
    pub(crate) display_name: Option<String>,
    pub(crate) foreign_display: Option<NonNull<c_void>>,
    pub(crate) drm_device: PathBuf,
    pub(crate) foreign_drm_fd: Option<OwnedFd>,
    #[cfg(feature = "backend_mir")]
    pub(crate) mir_connection: Option<Box<dyn MirConnection>>,
    pub(crate) driver: GlDriver,
    pub(crate) template: OnscreenTemplate,
}

impl fmt::Debug for RendererOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererOptions")
            .field("backend", &self.backend)
            .field("display_name", &self.display_name)
            .field("foreign_display", &self.foreign_display)
            .field("drm_device", &self.drm_device)
            .field("foreign_drm_fd", &self.foreign_drm_fd)
            .field("driver", &self.driver)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

impl Default for RendererOptions {
    fn default() -> Self {
        RendererOptions {
            backend: None,
            display_name: None,
            foreign_display: None,
            drm_device: PathBuf::from("/dev/dri/card0"),
            foreign_drm_fd: None,
            #[cfg(feature = "backend_mir")]
            mir_connection: None,
            driver: GlDriver::default(),
            template: OnscreenTemplate::default(),
        }
    }
}

impl RendererOptions {
    /// Default options: any backend, `$DISPLAY`, desktop GL
    pub fn new() -> Self {
        Self::default()
    }

    /// Only try `backend`
    pub fn backend(mut self, backend: WinsysId) -> Self {
        self.backend = Some(backend);
        self
    }

    /// X display to connect to
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Use an Xlib display opened by the application
    ///
    /// # Safety
    ///
    /// `display` must be a valid Xlib `Display*` outliving the renderer.
    pub unsafe fn foreign_xlib_display(mut self, display: NonNull<c_void>) -> Self {
        self.foreign_display = Some(display);
        self
    }

    /// DRM device for the KMS backend
    pub fn drm_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.drm_device = path.into();
        self
    }

    /// Use an already opened DRM device for the KMS backend
    pub fn foreign_drm_fd(mut self, fd: OwnedFd) -> Self {
        self.foreign_drm_fd = Some(fd);
        self
    }

    /// Mir connection for the Mir backend
    #[cfg(feature = "backend_mir")]
    pub fn mir_connection(mut self, connection: Box<dyn MirConnection>) -> Self {
        self.mir_connection = Some(connection);
        self
    }

    /// GL flavor of the context
    pub fn driver(mut self, driver: GlDriver) -> Self {
        self.driver = driver;
        self
    }

    /// Template the GPU config is chosen from
    pub fn template(mut self, template: OnscreenTemplate) -> Self {
        self.template = template;
        self
    }

    fn candidates(&self) -> Vec<WinsysId> {
        let requested = self.backend.or_else(|| {
            let name = env::var("COGL_RENDERER").ok()?;
            match name.parse() {
                Ok(id) => Some(id),
                Err(err) => {
                    warn!(?err, "Ignoring COGL_RENDERER");
                    None
                }
            }
        });
        match requested {
            Some(id) => vec![id],
            None => WinsysId::ALL.to_vec(),
        }
    }
}

fn connect_backend(id: WinsysId, options: &mut RendererOptions) -> Result<Box<dyn WinsysBackend>, WinsysError> {
    match id {
        #[cfg(feature = "backend_glx")]
        WinsysId::Glx => Ok(Box::new(super::glx::GlxBackend::connect(options)?)),
        #[cfg(all(feature = "backend_egl", feature = "backend_x11"))]
        WinsysId::EglX11 => Ok(Box::new(super::egl::EglBackend::connect_x11(options)?)),
        #[cfg(feature = "backend_gbm")]
        WinsysId::EglKms => Ok(Box::new(super::egl::EglBackend::connect_kms(options)?)),
        #[cfg(feature = "backend_mir")]
        WinsysId::EglMir => Ok(Box::new(super::egl::EglBackend::connect_mir(options)?)),
        #[allow(unreachable_patterns)]
        id => Err(WinsysError::BackendUnavailable(id)),
    }
}

struct RendererInner {
    backend: Box<dyn WinsysBackend>,
    callbacks: CallbackRegistry,
    ping: Option<Ping>,
    span: tracing::Span,
}

impl fmt::Debug for RendererInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererInner")
            .field("backend", &self.backend)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

impl RendererInner {
    // Pending notifications are delivered by the next dispatch, wake the loop for it.
    fn wake_if_pending(&mut self) {
        if !self.backend.pending().is_empty() {
            if let Some(ping) = self.ping.as_ref() {
                ping.ping();
            }
        }
    }
}

impl Drop for RendererInner {
    fn drop(&mut self) {
        let _guard = self.span.enter();
        self.backend.context_deinit();
        self.backend.display_destroy();
        info!("Renderer disconnected");
    }
}

/// Connection to a window system, owning the active backend
#[derive(Debug, Clone)]
pub struct Renderer {
    inner: Rc<RefCell<RendererInner>>,
}

impl Renderer {
    /// Connect to the first backend that works
    #[instrument(skip_all)]
    pub fn connect(mut options: RendererOptions) -> Result<Renderer, WinsysError> {
        let candidates = options.candidates();
        let explicit = candidates.len() == 1;

        let mut last_error = None;
        for id in candidates {
            match connect_backend(id, &mut options) {
                Ok(backend) => return Self::with_backend(backend, &options.template),
                Err(err) => {
                    debug!(backend = %id, ?err, "Window system not usable");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if explicit => Err(err),
            _ => Err(WinsysError::NoBackend),
        }
    }

    /// Wrap an already connected backend, then set up its display and context
    pub fn with_backend(mut backend: Box<dyn WinsysBackend>, template: &OnscreenTemplate) -> Result<Renderer, WinsysError> {
        let span = info_span!("renderer", backend = %backend.id());
        {
            let _guard = span.enter();
            backend.display_setup(template)?;
            if let Err(err) = backend.context_init() {
                backend.display_destroy();
                return Err(err);
            }
            info!(features = ?backend.features(), "Renderer connected");
        }

        Ok(Renderer {
            inner: Rc::new(RefCell::new(RendererInner {
                backend,
                callbacks: CallbackRegistry::default(),
                ping: None,
                span,
            })),
        })
    }

    fn with<R>(&self, f: impl FnOnce(&mut dyn WinsysBackend) -> R) -> R {
        let mut inner = self.inner.borrow_mut();
        let span = inner.span.clone();
        let _guard = span.enter();
        let result = f(inner.backend.as_mut());
        inner.wake_if_pending();
        result
    }

    /// The active backend
    pub fn winsys_id(&self) -> WinsysId {
        self.inner.borrow().backend.id()
    }

    /// Features of the active backend
    pub fn features(&self) -> WinsysFeatures {
        self.inner.borrow().backend.features()
    }

    /// Whether the active backend has all of `features`
    pub fn has_feature(&self, features: WinsysFeatures) -> bool {
        self.features().contains(features)
    }

    /// Address of a GL entry point
    pub fn get_proc_address(&self, name: &str) -> Option<NonNull<c_void>> {
        self.inner.borrow().backend.get_proc_address(name)
    }

    /// Create an onscreen surface
    pub fn create_onscreen(&self, descriptor: OnscreenDescriptor) -> Result<OnscreenId, WinsysError> {
        let id = OnscreenId::next();
        self.with(|backend| backend.onscreen_init(id, descriptor))?;
        Ok(id)
    }

    /// Destroy an onscreen surface, dropping its callbacks and pending notifications
    pub fn destroy_onscreen(&self, id: OnscreenId) {
        let mut inner = self.inner.borrow_mut();
        let _guard = inner.span.clone().entered();
        inner.backend.onscreen_deinit(id);
        inner.backend.pending().forget(id);
        inner.callbacks.remove_onscreen(id);
    }

    /// Make an onscreen current
    pub fn bind_onscreen(&self, id: OnscreenId) -> Result<(), WinsysError> {
        self.with(|backend| backend.onscreen_bind(id))
    }

    /// Present an onscreen. `damage` lists the changed areas, empty for everything
    pub fn swap_buffers(&self, id: OnscreenId, damage: &[Rectangle]) -> Result<(), WinsysError> {
        self.with(|backend| backend.onscreen_swap_buffers_with_damage(id, damage))
    }

    /// Present only `rectangles` of an onscreen
    pub fn swap_region(&self, id: OnscreenId, rectangles: &[Rectangle]) -> Result<(), WinsysError> {
        self.with(|backend| backend.onscreen_swap_region(id, rectangles))
    }

    /// Show or hide an onscreen
    pub fn set_visibility(&self, id: OnscreenId, visible: bool) -> Result<(), WinsysError> {
        self.with(|backend| backend.onscreen_set_visibility(id, visible))
    }

    /// Allow or forbid resizing an onscreen
    pub fn set_resizable(&self, id: OnscreenId, resizable: bool) -> Result<(), WinsysError> {
        self.with(|backend| backend.onscreen_set_resizable(id, resizable))
    }

    /// Enable or disable swap throttling of an onscreen
    pub fn set_swap_throttled(&self, id: OnscreenId, throttled: bool) -> Result<(), WinsysError> {
        self.with(|backend| backend.onscreen_update_swap_throttled(id, throttled))
    }

    /// Age of the back buffer of an onscreen, 0 if unknown
    pub fn buffer_age(&self, id: OnscreenId) -> i32 {
        self.with(|backend| backend.onscreen_get_buffer_age(id))
    }

    /// Current size of an onscreen
    pub fn onscreen_size(&self, id: OnscreenId) -> Option<Size> {
        self.inner.borrow().backend.onscreen_state(id).map(|state| state.size)
    }

    /// Backend independent state of an onscreen
    pub fn onscreen_state(&self, id: OnscreenId) -> Option<OnscreenState> {
        self.inner.borrow().backend.onscreen_state(id).cloned()
    }

    /// X window of an onscreen on X11 based backends
    pub fn x11_window_xid(&self, id: OnscreenId) -> Option<u32> {
        self.inner.borrow().backend.onscreen_x11_get_window_xid(id)
    }

    /// Zero-copy binding for a pixmap texture, if the backend offers one
    #[cfg(feature = "backend_x11")]
    pub fn texture_pixmap_binding(&self, pixmap: u32, depth: u8) -> Option<Box<dyn PixmapBinding>> {
        self.with(|backend| backend.texture_pixmap_binding(pixmap, depth))
    }

    fn add_callback(&self, onscreen: OnscreenId, kind: EventKind, callback: impl FnMut(&OnscreenEvent) + 'static) -> NotifyId {
        self.inner.borrow_mut().callbacks.add(onscreen, kind, callback)
    }

    fn remove_callback(&self, onscreen: OnscreenId, kind: EventKind, id: NotifyId) {
        if !self.inner.borrow_mut().callbacks.remove(onscreen, kind, id) {
            warn!(?onscreen, ?id, "Removing an unknown callback");
        }
    }

    /// Call `callback` whenever a swap of `onscreen` completed
    pub fn add_swap_complete_callback(&self, onscreen: OnscreenId, mut callback: impl FnMut(OnscreenId) + 'static) -> NotifyId {
        self.add_callback(onscreen, EventKind::SwapComplete, move |event| callback(event.onscreen()))
    }

    /// Remove a callback added with [`Renderer::add_swap_complete_callback`]
    pub fn remove_swap_complete_callback(&self, onscreen: OnscreenId, id: NotifyId) {
        self.remove_callback(onscreen, EventKind::SwapComplete, id)
    }

    /// Call `callback` whenever `onscreen` is resized
    pub fn add_resize_callback(&self, onscreen: OnscreenId, mut callback: impl FnMut(OnscreenId, Size) + 'static) -> NotifyId {
        self.add_callback(onscreen, EventKind::Resized, move |event| {
            if let OnscreenEvent::Resized { onscreen, size } = *event {
                callback(onscreen, size)
            }
        })
    }

    /// Remove a callback added with [`Renderer::add_resize_callback`]
    pub fn remove_resize_callback(&self, onscreen: OnscreenId, id: NotifyId) {
        self.remove_callback(onscreen, EventKind::Resized, id)
    }

    /// Call `callback` whenever part of `onscreen` has to be redrawn
    pub fn add_dirty_callback(&self, onscreen: OnscreenId, mut callback: impl FnMut(OnscreenId, Rectangle) + 'static) -> NotifyId {
        self.add_callback(onscreen, EventKind::Dirty, move |event| {
            if let OnscreenEvent::Dirty { onscreen, area } = *event {
                callback(onscreen, area)
            }
        })
    }

    /// Remove a callback added with [`Renderer::add_dirty_callback`]
    pub fn remove_dirty_callback(&self, onscreen: OnscreenId, id: NotifyId) {
        self.remove_callback(onscreen, EventKind::Dirty, id)
    }

    /// Process native events and deliver queued notifications.
    ///
    /// Returns the native events no backend consumed.
    #[profiling::function]
    pub fn dispatch(&self) -> Result<Vec<BackendEvent>, WinsysError> {
        let (unhandled, events) = {
            let mut inner = self.inner.borrow_mut();
            let span = inner.span.clone();
            let _guard = span.enter();
            let unhandled = inner.backend.dispatch_native()?;
            (unhandled, inner.backend.pending().take())
        };

        for event in events {
            let callbacks = self.inner.borrow().callbacks.matching(&event);
            for (id, callback) in callbacks {
                // an earlier callback may have removed this one
                if !self.inner.borrow().callbacks.contains(id) {
                    continue;
                }
                match callback.try_borrow_mut() {
                    Ok(mut callback) => (*callback)(&event),
                    Err(_) => warn!(?id, "Callback dispatched from within itself, skipping"),
                }
            }
        }

        Ok(unhandled)
    }

    /// A calloop event source driving [`Renderer::dispatch`]
    pub fn event_source(&self) -> Result<RendererSource, WinsysError> {
        let fd = {
            let inner = self.inner.borrow();
            match inner.backend.poll_fd() {
                Some(fd) => Some(rustix::io::fcntl_dupfd_cloexec(fd, 0).map_err(io::Error::from)?),
                None => None,
            }
        };
        let (ping, ping_source) = make_ping()?;

        let mut inner = self.inner.borrow_mut();
        if !inner.backend.pending().is_empty() {
            ping.ping();
        }
        inner.ping = Some(ping);

        Ok(RendererSource {
            renderer: self.clone(),
            fd,
            token: None,
            ping: ping_source,
        })
    }
}

/// calloop source of a [`Renderer`]
///
/// Becomes ready when the native connection is readable or a notification was queued outside
/// of dispatch. Emits the [`BackendEvent`]s the renderer did not consume.
#[derive(Debug)]
pub struct RendererSource {
    renderer: Renderer,
    fd: Option<OwnedFd>,
    token: Option<Token>,
    ping: PingSource,
}

impl EventSource for RendererSource {
    type Event = BackendEvent;
    type Metadata = ();
    type Ret = ();
    type Error = WinsysError;

    #[profiling::function]
    fn process_events<F>(&mut self, readiness: Readiness, token: Token, mut callback: F) -> Result<PostAction, Self::Error>
    where
        F: FnMut(Self::Event, &mut ()) -> Self::Ret,
    {
        self.ping
            .process_events(readiness, token, |_, _| {})
            .map_err(|err| WinsysError::Io(io::Error::new(io::ErrorKind::Other, err)))?;

        for event in self.renderer.dispatch()? {
            callback(event, &mut ());
        }
        Ok(PostAction::Continue)
    }

    fn register(&mut self, poll: &mut Poll, factory: &mut TokenFactory) -> calloop::Result<()> {
        if let Some(fd) = self.fd.as_ref() {
            let token = factory.token();
            self.token = Some(token);
            // Safety: the fd is owned by this source and unregistered before it is closed
            unsafe { poll.register(fd.as_fd(), Interest::READ, Mode::Level, token)? };
        }
        self.ping.register(poll, factory)
    }

    fn reregister(&mut self, poll: &mut Poll, factory: &mut TokenFactory) -> calloop::Result<()> {
        if let Some(fd) = self.fd.as_ref() {
            let token = factory.token();
            self.token = Some(token);
            poll.reregister(fd.as_fd(), Interest::READ, Mode::Level, token)?;
        }
        self.ping.reregister(poll, factory)
    }

    fn unregister(&mut self, poll: &mut Poll) -> calloop::Result<()> {
        if let Some(fd) = self.fd.as_ref() {
            self.token = None;
            poll.unregister(fd.as_fd())?;
        }
        self.ping.unregister(poll)
    }
}
