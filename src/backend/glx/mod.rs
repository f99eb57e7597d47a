//! GLX window system backend
//!
//! Renders through `libGL` on an X11 connection. The display owns one GLX context, created on
//! the config chosen from the renderer's template, and a hidden dummy window so the context can
//! stay current while no onscreen exists. Each onscreen is an X window (created here, or supplied
//! by the application) plus, from GLX 1.3 on, a GLX window wrapping it.
//!
//! Optional extensions are detected at connect, for choosing the config and context, and again by
//! every [`WinsysBackend::context_init`]. Which vblank primitives are usable depends on the
//! context (the video sync counter only works on direct contexts), so the derived features are
//! settled there as well.

use std::{
    collections::HashMap,
    ffi::c_void,
    fmt,
    os::unix::io::BorrowedFd,
    path::PathBuf,
    ptr::NonNull,
    rc::Rc,
};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, info, info_span, instrument, trace, warn};

use crate::{
    backend::{
        winsys::{
            negotiate_config, detect_features, throttle_frame, BackendEvent, DisplayLifecycle, DisplayState,
            ExtensionSet, FeatureDescriptor, FramebufferConfig, GlDriver, OnscreenDescriptor, OnscreenEvent,
            OnscreenId, OnscreenState, OnscreenTemplate, PendingNotifications, RendererOptions, SwapStrategy,
            VblankCaps, VblankSource, VblankWait, VblankWaitError, WinsysBackend, WinsysError, WinsysFeatures,
            WinsysId,
        },
        x11::{
            ErrorTrap, PixmapBinding, SizeHints, WindowDescriptor, X11Connection, X11Error, XEvent, XServer,
            XlibError, WINDOW_EVENT_MASK,
        },
    },
    utils::{NativeHandle, Rectangle, Size},
};

#[cfg(feature = "backend_drm")]
use super::kms::DrmVblank;

mod config;
mod driver;
pub(crate) mod ffi;
mod pixmap;

pub use self::config::{
    create_context, fb_config_attributes, find_fb_config, find_pixmap_config, ChosenConfig, PixmapConfig,
};
pub use self::driver::{FbConfig, GlxContext, GlxDriver, GlxLibrary, VisualInfo};
pub use self::pixmap::GlxPixmapBinding;

const GLX_FEATURES: &[FeatureDescriptor] = &[
    FeatureDescriptor {
        min_version: None,
        namespaces: &["EXT"],
        extension_names: &["texture_from_pixmap"],
        functions: &["glXBindTexImage", "glXReleaseTexImage"],
        features: WinsysFeatures::TEXTURE_FROM_PIXMAP,
    },
    FeatureDescriptor {
        min_version: None,
        namespaces: &["SGI"],
        extension_names: &["video_sync"],
        functions: &["glXGetVideoSync", "glXWaitVideoSync"],
        features: WinsysFeatures::VBLANK_COUNTER,
    },
    FeatureDescriptor {
        min_version: None,
        namespaces: &["SGI", "MESA"],
        extension_names: &["swap_control"],
        functions: &["glXSwapInterval"],
        features: WinsysFeatures::SWAP_CONTROL,
    },
    FeatureDescriptor {
        min_version: None,
        namespaces: &["OML"],
        extension_names: &["sync_control"],
        functions: &["glXWaitForMsc"],
        features: WinsysFeatures::SYNC_CONTROL,
    },
    FeatureDescriptor {
        min_version: None,
        namespaces: &["MESA"],
        extension_names: &["copy_sub_buffer"],
        functions: &["glXCopySubBuffer"],
        features: WinsysFeatures::COPY_SUB_BUFFER,
    },
    FeatureDescriptor {
        min_version: None,
        namespaces: &["INTEL"],
        extension_names: &["swap_event"],
        functions: &[],
        features: WinsysFeatures::SWAP_BUFFERS_EVENT,
    },
    FeatureDescriptor {
        min_version: None,
        namespaces: &["ARB"],
        extension_names: &["create_context"],
        functions: &["glXCreateContextAttribs"],
        features: WinsysFeatures::CREATE_CONTEXT,
    },
    FeatureDescriptor {
        min_version: None,
        namespaces: &["EXT"],
        extension_names: &["buffer_age"],
        functions: &[],
        features: WinsysFeatures::BUFFER_AGE,
    },
];

const NO_VBLANK: VblankCaps = VblankCaps {
    swap_interval: false,
    counter: false,
    wait: VblankWait::None,
};

#[derive(Debug)]
struct GlxDisplay {
    config: ChosenConfig,
    context: GlxContext,
    direct: bool,
    dummy_window: u32,
    dummy_glx_window: Option<u32>,
    current_drawable: Option<u32>,
}

impl GlxDisplay {
    fn dummy_drawable(&self) -> u32 {
        self.dummy_glx_window.unwrap_or(self.dummy_window)
    }
}

#[derive(Debug)]
struct GlxOnscreen {
    window: NativeHandle<u32>,
    glx_window: Option<u32>,
    state: OnscreenState,
}

impl GlxOnscreen {
    fn drawable(&self) -> u32 {
        self.glx_window.unwrap_or_else(|| self.window.get())
    }
}

struct GlxVblank<'a, D: GlxDriver + ?Sized> {
    driver: &'a D,
    drawable: u32,
    caps: VblankCaps,
    #[cfg(feature = "backend_drm")]
    drm: Option<&'a DrmVblank>,
}

impl<'a, D: GlxDriver + ?Sized> VblankSource for GlxVblank<'a, D> {
    fn finish(&mut self) {
        self.driver.finish();
    }

    fn vsync_counter(&mut self) -> Option<u32> {
        if self.caps.counter {
            self.driver.get_video_sync()
        } else {
            None
        }
    }

    fn wait_for_vblank(&mut self) -> Result<(), VblankWaitError> {
        let waited = match self.caps.wait {
            VblankWait::Msc => self.driver.wait_for_msc(self.drawable),
            VblankWait::VideoSync => self.driver.wait_video_sync(),
            #[cfg(feature = "backend_drm")]
            VblankWait::DrmIoctl => {
                let drm = self
                    .drm
                    .ok_or_else(|| VblankWaitError("No DRI device is open".into()))?;
                return drm.wait().map_err(|err| VblankWaitError(err.to_string()));
            }
            _ => false,
        };
        if waited {
            Ok(())
        } else {
            Err(VblankWaitError(format!("{:?} wait failed", self.caps.wait)))
        }
    }
}

/// The GLX backend
pub struct GlxBackend<X: XServer = X11Connection, D: GlxDriver = GlxLibrary> {
    driver: Rc<D>,
    server: Rc<X>,
    version: (u32, u32),
    flavor: GlDriver,
    base_features: WinsysFeatures,
    features: WinsysFeatures,
    caps: VblankCaps,
    swap_strategy: SwapStrategy,
    region_strategy: SwapStrategy,
    display: Option<GlxDisplay>,
    lifecycle: DisplayLifecycle,
    onscreens: IndexMap<OnscreenId, GlxOnscreen>,
    pixmap_configs: HashMap<u8, Option<PixmapConfig>>,
    pending: PendingNotifications,
    drm_device: Option<PathBuf>,
    #[cfg(feature = "backend_drm")]
    drm: Option<DrmVblank>,
    span: tracing::Span,
}

impl<X: XServer, D: GlxDriver> fmt::Debug for GlxBackend<X, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlxBackend")
            .field("driver", &self.driver)
            .field("server", &self.server)
            .field("version", &self.version)
            .field("features", &self.features)
            .field("caps", &self.caps)
            .field("display", &self.display)
            .field("onscreens", &self.onscreens)
            .finish_non_exhaustive()
    }
}

impl GlxBackend {
    /// Connect to the X server and load `libGL`
    pub fn connect(options: &mut RendererOptions) -> Result<GlxBackend, WinsysError> {
        if !options.driver.is_desktop() {
            return Err(WinsysError::Init("GLX only provides desktop GL".into()));
        }

        let server = match options.foreign_display {
            // SAFETY: the caller of `RendererOptions::foreign_xlib_display` vouched for the display
            Some(display) => unsafe { X11Connection::from_foreign_display(display.as_ptr()) },
            None => X11Connection::connect(options.display_name.as_deref()),
        }
        .map_err(|err| match err {
            X11Error::Xlib(XlibError::NoConnection) => WinsysError::CannotOpenDisplay,
            err => err.into(),
        })?;

        // SAFETY: the display lives as long as `server`, which the backend keeps alive
        let driver = unsafe { GlxLibrary::open(server.xlib_display(), server.screen_number())? };
        let mut backend = Self::from_parts(Rc::new(server), Rc::new(driver), options.driver)?;
        backend.drm_device = Some(options.drm_device.clone());
        Ok(backend)
    }
}

impl<X: XServer, D: GlxDriver> GlxBackend<X, D> {
    /// Build the backend on an existing connection and driver, probing GLX extensions
    pub fn from_parts(server: Rc<X>, driver: Rc<D>, flavor: GlDriver) -> Result<Self, WinsysError> {
        let span = info_span!("backend_glx");
        let _guard = span.enter();

        let version = driver
            .query_version()
            .ok_or_else(|| WinsysError::Init("The X server does not support GLX".into()))?;
        if version < (1, 2) {
            return Err(WinsysError::Init(format!(
                "GLX 1.2 or later is required, the server has {}.{}",
                version.0, version.1
            )));
        }

        drop(_guard);

        let mut backend = GlxBackend {
            driver,
            server,
            version,
            flavor,
            base_features: WinsysFeatures::empty(),
            features: WinsysFeatures::empty(),
            caps: NO_VBLANK,
            swap_strategy: SwapStrategy::NoThrottle,
            region_strategy: SwapStrategy::NoThrottle,
            display: None,
            lifecycle: DisplayLifecycle::default(),
            onscreens: IndexMap::new(),
            pixmap_configs: HashMap::new(),
            pending: PendingNotifications::default(),
            drm_device: None,
            #[cfg(feature = "backend_drm")]
            drm: None,
            span,
        };
        backend.detect_extensions();
        info!(
            parent: &backend.span,
            major = version.0,
            minor = version.1,
            features = ?backend.base_features,
            "GLX initialized"
        );
        Ok(backend)
    }

    fn detect_extensions(&mut self) {
        let extensions = ExtensionSet::parse(&self.driver.extensions());
        let detected = detect_features("GLX", GLX_FEATURES, self.version, &extensions, self.driver.loader());
        self.driver.set_extension_symbols(detected.symbols);
        self.base_features = detected.features;
    }

    /// The X server connection
    pub fn server(&self) -> &Rc<X> {
        &self.server
    }

    /// GLX version of the server
    pub fn version(&self) -> (u32, u32) {
        self.version
    }

    fn create_display(&mut self, config: &FramebufferConfig) -> Result<GlxDisplay, WinsysError> {
        self.lifecycle.reset();
        let driver = self.driver.clone();
        let server = self.server.clone();

        let chosen = find_fb_config(&*driver, config, self.version)?;
        self.lifecycle.advance(DisplayState::ConfigChosen);

        let trap = ErrorTrap::new(&*server);
        let context = create_context(
            &*driver,
            chosen.config,
            self.flavor,
            self.base_features.contains(WinsysFeatures::CREATE_CONTEXT),
        );
        let code = trap.finish();
        let context = match context {
            Ok(context) if code == 0 => context,
            Ok(context) => {
                driver.destroy_context(context);
                return Err(WinsysError::CreateContext(format!(
                    "X error {code} while creating the context"
                )));
            }
            Err(err) => return Err(err),
        };
        let context = scopeguard::guard(context, |context| driver.destroy_context(context));
        self.lifecycle.advance(DisplayState::ContextCreated);

        let direct = driver.is_direct(*context);
        debug!(direct, "Created GLX context");

        // GLX cannot make a context current without a drawable
        let dummy_window = server.create_window(&WindowDescriptor::dummy(chosen.visual.visual, chosen.visual.depth))?;
        let dummy_window = scopeguard::guard(dummy_window, |window| server.destroy_window(window));
        let dummy_glx_window = if self.version >= (1, 3) {
            let glx_window = driver
                .create_window(chosen.config, *dummy_window)
                .ok_or_else(|| WinsysError::CreateContext("Unable to create the dummy GLX window".into()))?;
            Some(glx_window)
        } else {
            None
        };
        let dummy_glx_window = scopeguard::guard(dummy_glx_window, |glx_window| {
            if let Some(glx_window) = glx_window {
                driver.destroy_window(glx_window);
            }
        });
        let drawable = dummy_glx_window.unwrap_or(*dummy_window);

        let trap = ErrorTrap::new(&*server);
        let current = driver.make_current(drawable, Some(*context));
        if trap.finish() != 0 || !current {
            return Err(WinsysError::MakeCurrent);
        }
        self.lifecycle.advance(DisplayState::DummySurfaceBound);

        Ok(GlxDisplay {
            config: chosen,
            direct,
            dummy_glx_window: scopeguard::ScopeGuard::into_inner(dummy_glx_window),
            dummy_window: scopeguard::ScopeGuard::into_inner(dummy_window),
            context: scopeguard::ScopeGuard::into_inner(context),
            current_drawable: Some(drawable),
        })
    }

    fn onscreen(&self, id: OnscreenId) -> Result<&GlxOnscreen, WinsysError> {
        self.onscreens.get(&id).ok_or(WinsysError::UnknownOnscreen)
    }

    fn onscreen_mut(&mut self, id: OnscreenId) -> Result<&mut GlxOnscreen, WinsysError> {
        self.onscreens.get_mut(&id).ok_or(WinsysError::UnknownOnscreen)
    }

    fn vblank(&self, drawable: u32) -> GlxVblank<'_, D> {
        GlxVblank {
            driver: &*self.driver,
            drawable,
            caps: self.caps,
            #[cfg(feature = "backend_drm")]
            drm: self.drm.as_ref(),
        }
    }

    #[cfg(feature = "backend_drm")]
    fn open_drm(&mut self) -> bool {
        let Some(path) = self.drm_device.as_ref() else {
            return false;
        };
        match DrmVblank::open(path) {
            Ok(drm) => {
                self.drm = Some(drm);
                true
            }
            Err(err) => {
                debug!(parent: &self.span, ?err, ?path, "No DRI device to wait for vblank on");
                false
            }
        }
    }

    #[cfg(not(feature = "backend_drm"))]
    fn open_drm(&mut self) -> bool {
        false
    }

    fn create_onscreen_window(
        &self,
        display: &GlxDisplay,
        descriptor: OnscreenDescriptor,
    ) -> Result<(NativeHandle<u32>, Size), WinsysError> {
        match descriptor.foreign_window {
            Some(mut foreign) => {
                let trap = ErrorTrap::new(&*self.server);
                let size = self.server.window_size(foreign.xid);
                let code = trap.finish();
                match size {
                    Ok(size) if code == 0 => {
                        (foreign.update_mask)(foreign.xid, WINDOW_EVENT_MASK);
                        Ok((NativeHandle::Foreign(foreign.xid), size))
                    }
                    _ => Err(WinsysError::CreateOnscreen(format!(
                        "Unable to query geometry of foreign xid {:#010x} (X error {code})",
                        foreign.xid
                    ))),
                }
            }
            None => {
                let size = Size::new(descriptor.size.w.max(1), descriptor.size.h.max(1));
                let visual = display.config.visual;
                let trap = ErrorTrap::new(&*self.server);
                let window = self
                    .server
                    .create_window(&WindowDescriptor::toplevel(size, visual.visual, visual.depth));
                let code = trap.finish();
                match window {
                    Ok(window) if code == 0 => Ok((NativeHandle::Owned(window), size)),
                    Ok(window) => {
                        self.server.destroy_window(window);
                        Err(WinsysError::CreateOnscreen(format!(
                            "X error {code} while creating the window"
                        )))
                    }
                    Err(err) => Err(WinsysError::CreateOnscreen(err.to_string())),
                }
            }
        }
    }

    fn bind_drawable(&mut self, drawable: u32, throttled: bool) {
        let span = self.span.clone();
        let Some(display) = self.display.as_mut() else {
            return;
        };
        if display.current_drawable == Some(drawable) {
            return;
        }

        let trap = ErrorTrap::new(&*self.server);
        let current = self.driver.make_current(drawable, Some(display.context));
        if self.features.contains(WinsysFeatures::SWAP_CONTROL) {
            // the driver paces throttled swaps itself
            self.driver.swap_interval(i32::from(throttled));
        }
        let code = trap.finish();

        if code != 0 || !current {
            warn!(parent: &span, drawable, code, "X error while making drawable current");
            display.current_drawable = None;
        } else {
            display.current_drawable = Some(drawable);
        }
    }
}

impl<X: XServer + 'static, D: GlxDriver + 'static> WinsysBackend for GlxBackend<X, D> {
    fn id(&self) -> WinsysId {
        WinsysId::Glx
    }

    fn features(&self) -> WinsysFeatures {
        self.features
    }

    #[instrument(parent = &self.span, skip(self))]
    fn display_setup(&mut self, template: &OnscreenTemplate) -> Result<(), WinsysError> {
        match negotiate_config(template, |config| self.create_display(config)) {
            Ok(display) => {
                self.display = Some(display);
                self.lifecycle.advance(DisplayState::Ready);
                Ok(())
            }
            Err(err) => {
                self.lifecycle.reset();
                Err(err)
            }
        }
    }

    fn display_destroy(&mut self) {
        let ids: Vec<_> = self.onscreens.keys().copied().collect();
        for id in ids {
            self.onscreen_deinit(id);
        }
        self.pixmap_configs.clear();

        if let Some(display) = self.display.take() {
            let trap = ErrorTrap::new(&*self.server);
            self.driver.make_current(0, None);
            if let Some(glx_window) = display.dummy_glx_window {
                self.driver.destroy_window(glx_window);
            }
            self.server.destroy_window(display.dummy_window);
            self.driver.destroy_context(display.context);
            if trap.finish() != 0 {
                warn!(parent: &self.span, "X error while destroying the display");
            }
            debug!(parent: &self.span, "Display destroyed");
        }
        self.lifecycle.reset();
    }

    fn display_state(&self) -> DisplayState {
        self.lifecycle.state()
    }

    fn context_init(&mut self) -> Result<(), WinsysError> {
        let direct = self
            .display
            .as_ref()
            .map(|display| display.direct)
            .ok_or_else(|| WinsysError::Init("The display is not set up".into()))?;
        self.context_deinit();
        self.detect_extensions();
        let base = self.base_features;

        let counter = direct && base.contains(WinsysFeatures::VBLANK_COUNTER);
        let wait = if base.contains(WinsysFeatures::SYNC_CONTROL) {
            VblankWait::Msc
        } else if counter {
            VblankWait::VideoSync
        } else if self.open_drm() {
            VblankWait::DrmIoctl
        } else {
            VblankWait::None
        };
        self.caps = VblankCaps {
            swap_interval: base.contains(WinsysFeatures::SWAP_CONTROL),
            counter,
            wait,
        };

        let mut features = base - WinsysFeatures::VBLANK_COUNTER;
        features |= WinsysFeatures::MULTIPLE_ONSCREEN;
        features.set(WinsysFeatures::VBLANK_COUNTER, counter);
        features.set(WinsysFeatures::VBLANK_WAIT, wait != VblankWait::None);
        features.set(
            WinsysFeatures::SWAP_THROTTLE,
            self.caps.swap_interval || wait != VblankWait::None,
        );
        let swap_region = base.contains(WinsysFeatures::COPY_SUB_BUFFER) || self.driver.has_blit_framebuffer();
        features.set(WinsysFeatures::SWAP_REGION, swap_region);
        features.set(
            WinsysFeatures::SWAP_REGION_THROTTLE,
            swap_region && (counter || wait != VblankWait::None),
        );

        self.features = features;
        self.swap_strategy = SwapStrategy::for_swap(&self.caps);
        self.region_strategy = SwapStrategy::for_region(&self.caps);
        debug!(
            parent: &self.span,
            ?features,
            caps = ?self.caps,
            swap = ?self.swap_strategy,
            region = ?self.region_strategy,
            "GLX context features"
        );
        Ok(())
    }

    fn context_deinit(&mut self) {
        self.features = WinsysFeatures::empty();
        self.caps = NO_VBLANK;
        self.swap_strategy = SwapStrategy::NoThrottle;
        self.region_strategy = SwapStrategy::NoThrottle;
        #[cfg(feature = "backend_drm")]
        {
            self.drm = None;
        }
    }

    #[instrument(parent = &self.span, skip(self, descriptor))]
    fn onscreen_init(&mut self, id: OnscreenId, descriptor: OnscreenDescriptor) -> Result<(), WinsysError> {
        let display = self
            .display
            .as_ref()
            .ok_or_else(|| WinsysError::CreateOnscreen("The display is not set up".into()))?;
        let config = descriptor.config;
        let (window, size) = self.create_onscreen_window(display, descriptor)?;

        let glx_window = if self.version >= (1, 3) {
            let trap = ErrorTrap::new(&*self.server);
            let glx_window = self.driver.create_window(display.config.config, window.get());
            let code = trap.finish();
            match glx_window {
                Some(glx_window) if code == 0 => Some(glx_window),
                _ => {
                    if let Some(window) = window.owned() {
                        self.server.destroy_window(window);
                    }
                    return Err(WinsysError::CreateOnscreen("Unable to create the GLX window".into()));
                }
            }
        } else {
            None
        };

        let onscreen = GlxOnscreen {
            window,
            glx_window,
            state: OnscreenState::new(size, &config),
        };
        if self.features.contains(WinsysFeatures::SWAP_BUFFERS_EVENT) {
            self.driver
                .select_event(onscreen.drawable(), ffi::GLX_BUFFER_SWAP_COMPLETE_INTEL_MASK);
        }
        debug!(window = window.get(), ?glx_window, ?size, "Onscreen created");
        self.onscreens.insert(id, onscreen);
        Ok(())
    }

    fn onscreen_deinit(&mut self, id: OnscreenId) {
        let Some(onscreen) = self.onscreens.shift_remove(&id) else {
            return;
        };

        let trap = ErrorTrap::new(&*self.server);
        if let Some(display) = self.display.as_mut() {
            if display.current_drawable == Some(onscreen.drawable()) {
                let dummy = display.dummy_drawable();
                self.driver.make_current(dummy, Some(display.context));
                display.current_drawable = Some(dummy);
            }
        }
        if let Some(glx_window) = onscreen.glx_window {
            self.driver.destroy_window(glx_window);
        }
        if let Some(window) = onscreen.window.owned() {
            self.server.destroy_window(window);
        }
        if trap.finish() != 0 {
            warn!(parent: &self.span, ?id, "X error while destroying the onscreen");
        }
    }

    fn onscreen_bind(&mut self, id: OnscreenId) -> Result<(), WinsysError> {
        let onscreen = self.onscreen(id)?;
        let (drawable, throttled) = (onscreen.drawable(), onscreen.state.swap_throttled);
        self.bind_drawable(drawable, throttled);
        Ok(())
    }

    #[profiling::function]
    fn onscreen_swap_buffers_with_damage(&mut self, id: OnscreenId, damage: &[Rectangle]) -> Result<(), WinsysError> {
        self.onscreen_bind(id)?;
        if !damage.is_empty() {
            trace!(parent: &self.span, rects = damage.len(), "GLX has no damage hint, swapping everything");
        }

        let onscreen = self.onscreen(id)?;
        let drawable = onscreen.drawable();
        let strategy = self.swap_strategy.effective(onscreen.state.swap_throttled);
        let last_counter = onscreen.state.last_swap_vsync_counter;

        let frame = throttle_frame(strategy, last_counter, &mut self.vblank(drawable));
        self.driver.swap_buffers(drawable);

        if let Some(counter) = frame.counter {
            self.onscreen_mut(id)?.state.last_swap_vsync_counter = counter;
        }
        if !self.features.contains(WinsysFeatures::SWAP_BUFFERS_EVENT) {
            self.pending.push(OnscreenEvent::SwapComplete { onscreen: id });
        }
        Ok(())
    }

    #[profiling::function]
    fn onscreen_swap_region(&mut self, id: OnscreenId, rectangles: &[Rectangle]) -> Result<(), WinsysError> {
        if !self.features.contains(WinsysFeatures::SWAP_REGION) {
            return self.onscreen_swap_buffers_with_damage(id, &[]);
        }
        self.onscreen_bind(id)?;

        let onscreen = self.onscreen(id)?;
        let drawable = onscreen.drawable();
        let height = onscreen.state.size.h;
        let strategy = self.region_strategy.effective(onscreen.state.swap_throttled);
        let last_counter = onscreen.state.last_swap_vsync_counter;
        let flipped: SmallVec<[Rectangle; 8]> = rectangles.iter().map(|rect| rect.flipped_y(height)).collect();

        let frame = throttle_frame(strategy, last_counter, &mut self.vblank(drawable));
        if self.base_features.contains(WinsysFeatures::COPY_SUB_BUFFER) {
            for rect in &flipped {
                self.driver.copy_sub_buffer(drawable, *rect);
            }
        } else {
            self.driver.blit_to_front(&flipped);
        }
        // copies are not tied to the swap chain, push them out now
        self.driver.flush();

        if let Some(counter) = frame.counter {
            self.onscreen_mut(id)?.state.last_swap_vsync_counter = counter;
        }
        self.pending.push(OnscreenEvent::SwapComplete { onscreen: id });
        Ok(())
    }

    fn onscreen_set_visibility(&mut self, id: OnscreenId, visible: bool) -> Result<(), WinsysError> {
        let onscreen = self.onscreen_mut(id)?;
        onscreen.state.visible = visible;
        let window = onscreen.window.get();
        if visible {
            self.server.map_window(window);
        } else {
            self.server.unmap_window(window);
        }
        self.server.flush();
        Ok(())
    }

    fn onscreen_set_resizable(&mut self, id: OnscreenId, resizable: bool) -> Result<(), WinsysError> {
        let onscreen = self.onscreen_mut(id)?;
        onscreen.state.resizable = resizable;
        let hints = if resizable {
            SizeHints::resizable()
        } else {
            SizeHints::fixed(onscreen.state.size)
        };
        let window = onscreen.window.get();
        self.server.set_size_hints(window, &hints);
        Ok(())
    }

    fn onscreen_update_swap_throttled(&mut self, id: OnscreenId, throttled: bool) -> Result<(), WinsysError> {
        let onscreen = self.onscreen_mut(id)?;
        onscreen.state.swap_throttled = throttled;
        let drawable = onscreen.drawable();

        // the swap interval is applied when binding, rebind if this onscreen is current
        if let Some(display) = self.display.as_mut() {
            if display.current_drawable == Some(drawable) {
                display.current_drawable = None;
                self.bind_drawable(drawable, throttled);
            }
        }
        Ok(())
    }

    fn onscreen_get_buffer_age(&mut self, id: OnscreenId) -> i32 {
        if !self.features.contains(WinsysFeatures::BUFFER_AGE) {
            return 0;
        }
        let Ok(onscreen) = self.onscreen(id) else {
            return 0;
        };
        let drawable = onscreen.drawable();

        let trap = ErrorTrap::new(&*self.server);
        let age = self.driver.query_drawable(drawable, ffi::GLX_BACK_BUFFER_AGE_EXT);
        match (trap.finish(), age) {
            (0, Some(age)) => age as i32,
            (code, _) => {
                warn!(parent: &self.span, code, "Failed to query the buffer age");
                0
            }
        }
    }

    fn onscreen_state(&self, id: OnscreenId) -> Option<&OnscreenState> {
        self.onscreens.get(&id).map(|onscreen| &onscreen.state)
    }

    fn onscreen_x11_get_window_xid(&self, id: OnscreenId) -> Option<u32> {
        self.onscreens.get(&id).map(|onscreen| onscreen.window.get())
    }

    fn get_proc_address(&self, name: &str) -> Option<NonNull<c_void>> {
        self.driver.get_proc_address(name)
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.server.poll_fd()
    }

    fn dispatch_native(&mut self) -> Result<Vec<BackendEvent>, WinsysError> {
        let mut unhandled = Vec::new();
        while let Some(event) = self.server.poll_event()? {
            match event {
                XEvent::Configure { window, size } => {
                    match self.onscreens.iter_mut().find(|(_, onscreen)| onscreen.window.get() == window) {
                        Some((&onscreen, glx_onscreen)) => {
                            if glx_onscreen.state.size != size {
                                glx_onscreen.state.size = size;
                                self.pending.push(OnscreenEvent::Resized { onscreen, size });
                            }
                        }
                        None => unhandled.push(BackendEvent::X11(event)),
                    }
                }
                XEvent::Expose { window, area } => {
                    match self.onscreens.iter().find(|(_, onscreen)| onscreen.window.get() == window) {
                        Some((&onscreen, _)) => self.pending.push(OnscreenEvent::Dirty { onscreen, area }),
                        None => unhandled.push(BackendEvent::X11(event)),
                    }
                }
                XEvent::SwapComplete { drawable } => {
                    match self.onscreens.iter().find(|(_, onscreen)| onscreen.drawable() == drawable) {
                        Some((&onscreen, _)) => self.pending.push(OnscreenEvent::SwapComplete { onscreen }),
                        None => trace!(parent: &self.span, drawable, "Swap event for an unknown drawable"),
                    }
                }
                event => unhandled.push(BackendEvent::X11(event)),
            }
        }
        Ok(unhandled)
    }

    fn pending(&mut self) -> &mut PendingNotifications {
        &mut self.pending
    }

    fn texture_pixmap_binding(&mut self, pixmap: u32, depth: u8) -> Option<Box<dyn PixmapBinding>> {
        if !self.features.contains(WinsysFeatures::TEXTURE_FROM_PIXMAP) {
            return None;
        }
        let driver = &*self.driver;
        let config = (*self
            .pixmap_configs
            .entry(depth)
            .or_insert_with(|| find_pixmap_config(driver, depth)))?;

        GlxPixmapBinding::new(self.server.clone(), self.driver.clone(), pixmap, config, &self.span)
            .map(|binding| Box::new(binding) as Box<dyn PixmapBinding>)
    }
}

impl<X: XServer, D: GlxDriver> Drop for GlxBackend<X, D> {
    fn drop(&mut self) {
        if let Some(display) = self.display.take() {
            let trap = ErrorTrap::new(&*self.server);
            for (_, onscreen) in self.onscreens.drain(..) {
                if let Some(glx_window) = onscreen.glx_window {
                    self.driver.destroy_window(glx_window);
                }
                if let Some(window) = onscreen.window.owned() {
                    self.server.destroy_window(window);
                }
            }
            self.driver.make_current(0, None);
            if let Some(glx_window) = display.dummy_glx_window {
                self.driver.destroy_window(glx_window);
            }
            self.server.destroy_window(display.dummy_window);
            self.driver.destroy_context(display.context);
            let code = trap.finish();
            if code != 0 {
                debug!(parent: &self.span, code, "X error while tearing down the backend");
            }
        }
    }
}
