//! EGL window system backend
//!
//! One backend drives every EGL based window system. What differs between X11, KMS and Mir
//! (the native display, the native windows surfaces are created on and how a swap is presented)
//! sits behind the [`EglPlatform`] trait, everything else is shared:
//!
//! - the display's config is chosen from the renderer's template plus the platform's attributes
//! - one context is created on it and kept current on a dummy surface while no onscreen is bound
//!   (or on no surface at all when the driver supports surfaceless contexts and the platform
//!   does not need a dummy)
//! - each onscreen is a native window of the platform wrapped in an `EGLSurface`
//!
//! Throttling is always left to the driver through `eglSwapInterval`, applied whenever an
//! onscreen is bound.

use std::{ffi::c_void, fmt, os::unix::io::BorrowedFd, ptr::NonNull, rc::Rc};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, info, info_span, instrument, trace, warn};

use crate::{
    backend::winsys::{
        negotiate_config, detect_features, BackendEvent, DisplayLifecycle, DisplayState, ExtensionSet,
        FeatureDescriptor, FramebufferConfig, GlDriver, OnscreenDescriptor, OnscreenEvent, OnscreenId,
        OnscreenState, OnscreenTemplate, PendingNotifications, WinsysBackend, WinsysError, WinsysFeatures, WinsysId,
    },
    utils::{Rectangle, Size},
};

mod driver;
mod error;
pub(crate) mod ffi;
#[cfg(feature = "backend_mir")]
pub mod mir;
#[cfg(feature = "backend_x11")]
mod x11;

pub use self::driver::{EglConfig, EglContext, EglDriver, EglLibrary, EglSurface};
pub use self::error::{EglError, EglErrorCode};
#[cfg(feature = "backend_x11")]
pub use self::x11::X11Platform;

use self::ffi::EGLint;

const EGL_FEATURES: &[FeatureDescriptor] = &[
    FeatureDescriptor {
        min_version: None,
        namespaces: &["NOK"],
        extension_names: &["swap_region"],
        functions: &["eglSwapBuffersRegion"],
        features: WinsysFeatures::SWAP_REGION.union(WinsysFeatures::SWAP_REGION_THROTTLE),
    },
    FeatureDescriptor {
        min_version: None,
        namespaces: &["EXT"],
        extension_names: &["buffer_age"],
        functions: &[],
        features: WinsysFeatures::BUFFER_AGE,
    },
    FeatureDescriptor {
        min_version: None,
        namespaces: &["EXT", "KHR"],
        extension_names: &["swap_buffers_with_damage"],
        functions: &["eglSwapBuffersWithDamage"],
        features: WinsysFeatures::SWAP_BUFFERS_WITH_DAMAGE,
    },
    FeatureDescriptor {
        min_version: None,
        namespaces: &["KHR"],
        extension_names: &["create_context"],
        functions: &[],
        features: WinsysFeatures::CREATE_CONTEXT,
    },
    FeatureDescriptor {
        min_version: Some((1, 5)),
        namespaces: &["KHR"],
        extension_names: &["image_base"],
        functions: &["eglCreateImage", "eglDestroyImage"],
        features: WinsysFeatures::EGL_IMAGE,
    },
    FeatureDescriptor {
        min_version: Some((1, 5)),
        namespaces: &["KHR"],
        extension_names: &["fence_sync"],
        functions: &["eglCreateSync", "eglDestroySync", "eglClientWaitSync"],
        features: WinsysFeatures::FENCE_SYNC,
    },
    FeatureDescriptor {
        min_version: None,
        namespaces: &["KHR"],
        extension_names: &["surfaceless_context"],
        functions: &[],
        features: WinsysFeatures::SURFACELESS_CONTEXT,
    },
];

/// Native side of an EGL based window system
pub trait EglPlatform: fmt::Debug {
    /// Which backend the platform makes of EGL
    fn id(&self) -> WinsysId;
    /// Native display handed to `eglGetDisplay`
    fn native_display(&self) -> usize;
    /// Features the platform adds to the ones of EGL
    fn features(&self) -> WinsysFeatures {
        WinsysFeatures::empty()
    }
    /// Most onscreens the platform can show at once
    fn max_onscreens(&self) -> Option<usize> {
        None
    }
    /// Extra config attributes, prepended to the ones derived from the template
    fn config_attributes(&self, _attributes: &mut Vec<EGLint>) {}

    /// Prepare the native display, before a config is chosen
    fn display_setup(&mut self) -> Result<(), WinsysError> {
        Ok(())
    }
    /// Undo [`EglPlatform::display_setup`]
    fn display_destroy(&mut self) {}

    /// Native window of the dummy surface, `None` to bind the context without a surface
    fn create_dummy_window(&mut self, native_visual: EGLint, surfaceless: bool) -> Result<Option<usize>, WinsysError>;
    /// Destroy the window returned by [`EglPlatform::create_dummy_window`]
    fn destroy_dummy_window(&mut self);

    /// Create the native window of an onscreen, returning it and its size
    fn create_window(
        &mut self,
        id: OnscreenId,
        descriptor: OnscreenDescriptor,
        native_visual: EGLint,
    ) -> Result<(usize, Size), WinsysError>;
    /// Destroy the native window of an onscreen
    fn destroy_window(&mut self, id: OnscreenId);
    /// Show or hide the native window
    fn set_visibility(&mut self, _id: OnscreenId, _visible: bool) {}
    /// Allow or forbid resizes of the native window
    fn set_resizable(&mut self, _id: OnscreenId, _resizable: bool, _size: Size) {}
    /// X window of an onscreen
    fn window_xid(&self, _id: OnscreenId) -> Option<u32> {
        None
    }

    /// Called before the surface of `id` is swapped
    fn before_swap(&mut self, _id: OnscreenId) -> Result<Vec<OnscreenEvent>, WinsysError> {
        Ok(Vec::new())
    }
    /// Present the swapped buffer, returning the notifications to queue
    fn after_swap(&mut self, id: OnscreenId) -> Result<Vec<OnscreenEvent>, WinsysError> {
        Ok(vec![OnscreenEvent::SwapComplete { onscreen: id }])
    }

    /// File descriptor to poll for native events
    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
    /// Process pending native events
    fn dispatch(&mut self) -> Result<PlatformEvents, WinsysError> {
        Ok(PlatformEvents::default())
    }
}

/// Events decoded by [`EglPlatform::dispatch`]
#[derive(Debug, Default)]
pub struct PlatformEvents {
    /// Notifications about onscreens
    pub onscreen: Vec<OnscreenEvent>,
    /// Native events not about onscreens
    pub unhandled: Vec<BackendEvent>,
}

#[derive(Debug)]
struct EglDisplay {
    config: EglConfig,
    native_visual: EGLint,
    context: EglContext,
    dummy_surface: Option<EglSurface>,
    current_surface: Option<EglSurface>,
}

#[derive(Debug)]
struct EglOnscreen {
    surface: EglSurface,
    state: OnscreenState,
}

/// `eglChooseConfig` attributes for `config`
pub fn egl_config_attributes(config: &FramebufferConfig, flavor: GlDriver, platform: &[EGLint]) -> Vec<EGLint> {
    let mut attributes = platform.to_vec();
    attributes.extend_from_slice(&[
        ffi::EGL_STENCIL_SIZE,
        if config.need_stencil { 2 } else { ffi::EGL_DONT_CARE },
        ffi::EGL_RED_SIZE,
        1,
        ffi::EGL_GREEN_SIZE,
        1,
        ffi::EGL_BLUE_SIZE,
        1,
        ffi::EGL_ALPHA_SIZE,
        if config.has_alpha { 1 } else { ffi::EGL_DONT_CARE },
        ffi::EGL_DEPTH_SIZE,
        1,
        ffi::EGL_BUFFER_SIZE,
        ffi::EGL_DONT_CARE,
        ffi::EGL_RENDERABLE_TYPE,
        if flavor.is_desktop() {
            ffi::EGL_OPENGL_BIT
        } else {
            ffi::EGL_OPENGL_ES2_BIT
        },
        ffi::EGL_SURFACE_TYPE,
        ffi::EGL_WINDOW_BIT,
    ]);

    if config.samples_per_pixel > 0 {
        attributes.extend_from_slice(&[
            ffi::EGL_SAMPLE_BUFFERS,
            1,
            ffi::EGL_SAMPLES,
            config.samples_per_pixel as EGLint,
        ]);
    }
    attributes
}

/// `eglCreateContext` attributes for `flavor`
fn context_attributes(flavor: GlDriver, can_create_context: bool) -> Result<Vec<EGLint>, WinsysError> {
    match flavor {
        GlDriver::Gl3 if !can_create_context => Err(WinsysError::CreateContext(
            "EGL_KHR_create_context is required for GL 3 core profile contexts".into(),
        )),
        GlDriver::Gl3 => Ok(vec![
            ffi::EGL_CONTEXT_MAJOR_VERSION_KHR,
            3,
            ffi::EGL_CONTEXT_MINOR_VERSION_KHR,
            1,
            ffi::EGL_CONTEXT_FLAGS_KHR,
            ffi::EGL_CONTEXT_OPENGL_FORWARD_COMPATIBLE_BIT_KHR,
            ffi::EGL_CONTEXT_OPENGL_PROFILE_MASK_KHR,
            ffi::EGL_CONTEXT_OPENGL_CORE_PROFILE_BIT_KHR,
        ]),
        GlDriver::Gles2 => Ok(vec![ffi::EGL_CONTEXT_CLIENT_VERSION, 2]),
        GlDriver::Gl => Ok(Vec::new()),
    }
}

/// Rectangles with a top-left origin as EGL quadruples with a bottom-left origin
fn egl_rects(rectangles: &[Rectangle], height: i32) -> SmallVec<[EGLint; 16]> {
    rectangles
        .iter()
        .map(|rect| rect.flipped_y(height))
        .flat_map(|rect| [rect.x, rect.y, rect.width, rect.height])
        .collect()
}

/// The EGL backend on one platform
pub struct EglBackend<P: EglPlatform, D: EglDriver = EglLibrary> {
    driver: Rc<D>,
    platform: P,
    version: (u32, u32),
    flavor: GlDriver,
    base_features: WinsysFeatures,
    features: WinsysFeatures,
    display: Option<EglDisplay>,
    lifecycle: DisplayLifecycle,
    onscreens: IndexMap<OnscreenId, EglOnscreen>,
    pending: PendingNotifications,
    span: tracing::Span,
}

impl<P: EglPlatform, D: EglDriver> fmt::Debug for EglBackend<P, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EglBackend")
            .field("driver", &self.driver)
            .field("platform", &self.platform)
            .field("version", &self.version)
            .field("features", &self.features)
            .field("display", &self.display)
            .field("onscreens", &self.onscreens)
            .finish_non_exhaustive()
    }
}

impl<P: EglPlatform, D: EglDriver> EglBackend<P, D> {
    /// Initialize EGL on the platform's display and detect its extensions
    pub fn from_parts(platform: P, driver: Rc<D>, flavor: GlDriver) -> Result<Self, WinsysError> {
        let span = info_span!("backend_egl", platform = %platform.id());
        let version = span.in_scope(|| driver.initialize(platform.native_display()))?;

        let mut backend = EglBackend {
            driver,
            platform,
            version,
            flavor,
            base_features: WinsysFeatures::empty(),
            features: WinsysFeatures::empty(),
            display: None,
            lifecycle: DisplayLifecycle::default(),
            onscreens: IndexMap::new(),
            pending: PendingNotifications::default(),
            span,
        };
        backend.detect_extensions();
        info!(
            parent: &backend.span,
            major = version.0,
            minor = version.1,
            features = ?backend.base_features,
            "EGL initialized"
        );
        Ok(backend)
    }

    fn detect_extensions(&mut self) {
        let extensions = ExtensionSet::parse(&self.driver.extensions());
        let detected = detect_features("EGL", EGL_FEATURES, self.version, &extensions, self.driver.loader());
        self.driver.set_extension_symbols(detected.symbols);
        self.base_features = detected.features;
    }

    /// EGL version of the display
    pub fn version(&self) -> (u32, u32) {
        self.version
    }

    /// The native side
    pub fn platform(&self) -> &P {
        &self.platform
    }

    fn create_display(&mut self, config: &FramebufferConfig) -> Result<EglDisplay, WinsysError> {
        self.lifecycle.reset();
        let driver = self.driver.clone();

        let mut platform_attributes = Vec::new();
        self.platform.config_attributes(&mut platform_attributes);
        let attributes = egl_config_attributes(config, self.flavor, &platform_attributes);
        let egl_config = match driver.choose_config(&attributes) {
            Some(egl_config) => egl_config,
            None if config.has_alpha => {
                let opaque = FramebufferConfig {
                    has_alpha: false,
                    ..*config
                };
                let opaque = egl_config_attributes(&opaque, self.flavor, &platform_attributes);
                return Err(match driver.choose_config(&opaque) {
                    Some(_) => WinsysError::NoRgbaConfig,
                    None => EglError::NoConfig.into(),
                });
            }
            None => return Err(EglError::NoConfig.into()),
        };
        let native_visual = driver
            .config_attrib(egl_config, ffi::EGL_NATIVE_VISUAL_ID)
            .unwrap_or(0);
        self.lifecycle.advance(DisplayState::ConfigChosen);

        if self.flavor.is_desktop() {
            driver.bind_api(ffi::EGL_OPENGL_API)?;
        } else {
            driver.bind_api(ffi::EGL_OPENGL_ES_API)?;
        }
        let context_attributes = context_attributes(
            self.flavor,
            self.base_features.contains(WinsysFeatures::CREATE_CONTEXT),
        )?;
        let context = driver.create_context(egl_config, &context_attributes)?;
        let context = scopeguard::guard(context, |context| driver.destroy_context(context));
        self.lifecycle.advance(DisplayState::ContextCreated);

        let surfaceless = self.base_features.contains(WinsysFeatures::SURFACELESS_CONTEXT);
        let dummy_window = self.platform.create_dummy_window(native_visual, surfaceless)?;
        let dummy_surface = match dummy_window {
            Some(window) => match driver.create_window_surface(egl_config, window) {
                Ok(surface) => Some(surface),
                Err(err) => {
                    self.platform.destroy_dummy_window();
                    return Err(err.into());
                }
            },
            None => None,
        };

        if let Err(err) = driver.make_current(dummy_surface, Some(*context)) {
            warn!(parent: &self.span, ?err, "Unable to eglMakeCurrent with dummy surface");
            if let Some(surface) = dummy_surface {
                driver.destroy_surface(surface);
            }
            self.platform.destroy_dummy_window();
            return Err(WinsysError::MakeCurrent);
        }
        self.lifecycle.advance(DisplayState::DummySurfaceBound);

        Ok(EglDisplay {
            config: egl_config,
            native_visual,
            context: scopeguard::ScopeGuard::into_inner(context),
            dummy_surface,
            current_surface: dummy_surface,
        })
    }

    fn teardown_display(&mut self, display: EglDisplay) {
        if let Err(err) = self.driver.make_current(None, None) {
            warn!(parent: &self.span, ?err, "Failed to release the context");
        }
        if let Some(surface) = display.dummy_surface {
            self.driver.destroy_surface(surface);
        }
        self.platform.destroy_dummy_window();
        self.driver.destroy_context(display.context);
    }

    fn onscreen(&self, id: OnscreenId) -> Result<&EglOnscreen, WinsysError> {
        self.onscreens.get(&id).ok_or(WinsysError::UnknownOnscreen)
    }

    fn onscreen_mut(&mut self, id: OnscreenId) -> Result<&mut EglOnscreen, WinsysError> {
        self.onscreens.get_mut(&id).ok_or(WinsysError::UnknownOnscreen)
    }

    fn bind_surface(&mut self, surface: EglSurface, throttled: bool) -> Result<(), WinsysError> {
        let span = self.span.clone();
        let Some(display) = self.display.as_mut() else {
            return Err(WinsysError::MakeCurrent);
        };
        if display.current_surface == Some(surface) {
            return Ok(());
        }

        if let Err(err) = self.driver.make_current(Some(surface), Some(display.context)) {
            warn!(parent: &span, ?err, "Failed to make the surface current");
            display.current_surface = None;
            return Err(WinsysError::MakeCurrent);
        }
        display.current_surface = Some(surface);
        if !self.driver.swap_interval(EGLint::from(throttled)) {
            debug!(parent: &span, throttled, "eglSwapInterval failed");
        }
        Ok(())
    }

    fn queue(&mut self, events: Vec<OnscreenEvent>) {
        for event in events {
            if let OnscreenEvent::Resized { onscreen, size } = event {
                match self.onscreens.get_mut(&onscreen) {
                    Some(egl_onscreen) if egl_onscreen.state.size != size => egl_onscreen.state.size = size,
                    _ => continue,
                }
            }
            self.pending.push(event);
        }
    }
}

impl<P: EglPlatform + 'static, D: EglDriver + 'static> WinsysBackend for EglBackend<P, D> {
    fn id(&self) -> WinsysId {
        self.platform.id()
    }

    fn features(&self) -> WinsysFeatures {
        self.features
    }

    #[instrument(parent = &self.span, skip(self))]
    fn display_setup(&mut self, template: &OnscreenTemplate) -> Result<(), WinsysError> {
        self.platform.display_setup()?;
        match negotiate_config(template, |config| self.create_display(config)) {
            Ok(display) => {
                self.display = Some(display);
                self.lifecycle.advance(DisplayState::Ready);
                Ok(())
            }
            Err(err) => {
                self.lifecycle.reset();
                self.platform.display_destroy();
                Err(err)
            }
        }
    }

    fn display_destroy(&mut self) {
        let ids: Vec<_> = self.onscreens.keys().copied().collect();
        for id in ids {
            self.onscreen_deinit(id);
        }
        if let Some(display) = self.display.take() {
            self.teardown_display(display);
            debug!(parent: &self.span, "Display destroyed");
        }
        self.platform.display_destroy();
        self.lifecycle.reset();
    }

    fn display_state(&self) -> DisplayState {
        self.lifecycle.state()
    }

    fn context_init(&mut self) -> Result<(), WinsysError> {
        if self.display.is_none() {
            return Err(WinsysError::Init("The display is not set up".into()));
        }
        // the extensions may differ between displays
        self.features = WinsysFeatures::empty();
        self.detect_extensions();
        let mut features = self.base_features | self.platform.features();
        // eglSwapInterval is core
        features |= WinsysFeatures::SWAP_THROTTLE;
        self.features = features;
        debug!(parent: &self.span, ?features, "EGL context features");
        Ok(())
    }

    fn context_deinit(&mut self) {
        self.features = WinsysFeatures::empty();
    }

    #[instrument(parent = &self.span, skip(self, descriptor))]
    fn onscreen_init(&mut self, id: OnscreenId, descriptor: OnscreenDescriptor) -> Result<(), WinsysError> {
        let (config, native_visual) = self
            .display
            .as_ref()
            .map(|display| (display.config, display.native_visual))
            .ok_or_else(|| WinsysError::CreateOnscreen("The display is not set up".into()))?;
        if let Some(max) = self.platform.max_onscreens() {
            if self.onscreens.len() >= max {
                return Err(WinsysError::CreateOnscreen(format!(
                    "Cannot have multiple onscreens in the {} platform",
                    self.platform.id()
                )));
            }
        }

        let framebuffer = descriptor.config;
        let (window, size) = self.platform.create_window(id, descriptor, native_visual)?;
        let surface = match self.driver.create_window_surface(config, window) {
            Ok(surface) => surface,
            Err(err) => {
                self.platform.destroy_window(id);
                return Err(WinsysError::CreateOnscreen(err.to_string()));
            }
        };

        debug!(window, ?surface, ?size, "Onscreen created");
        self.onscreens.insert(
            id,
            EglOnscreen {
                surface,
                state: OnscreenState::new(size, &framebuffer),
            },
        );
        Ok(())
    }

    fn onscreen_deinit(&mut self, id: OnscreenId) {
        let Some(onscreen) = self.onscreens.shift_remove(&id) else {
            return;
        };

        let span = self.span.clone();
        if let Some(display) = self.display.as_mut() {
            if display.current_surface == Some(onscreen.surface) {
                if let Err(err) = self.driver.make_current(display.dummy_surface, Some(display.context)) {
                    warn!(parent: &span, ?err, "Failed to rebind the dummy surface");
                }
                display.current_surface = display.dummy_surface;
            }
        }
        self.driver.destroy_surface(onscreen.surface);
        self.platform.destroy_window(id);
    }

    fn onscreen_bind(&mut self, id: OnscreenId) -> Result<(), WinsysError> {
        let onscreen = self.onscreen(id)?;
        let (surface, throttled) = (onscreen.surface, onscreen.state.swap_throttled);
        self.bind_surface(surface, throttled)
    }

    #[profiling::function]
    fn onscreen_swap_buffers_with_damage(&mut self, id: OnscreenId, damage: &[Rectangle]) -> Result<(), WinsysError> {
        self.onscreen(id)?;
        let events = self.platform.before_swap(id)?;
        self.queue(events);

        let onscreen = self.onscreen(id)?;
        let (surface, throttled, height) = (
            onscreen.surface,
            onscreen.state.swap_throttled,
            onscreen.state.size.h,
        );
        if self.bind_surface(surface, throttled).is_err() {
            warn!(parent: &self.span, onscreen = ?id, "Dropping the frame of an unbindable onscreen");
            return Ok(());
        }

        let swapped = if !damage.is_empty() && self.features.contains(WinsysFeatures::SWAP_BUFFERS_WITH_DAMAGE) {
            self.driver
                .swap_buffers_with_damage(surface, &egl_rects(damage, height))
        } else {
            self.driver.swap_buffers(surface)
        };
        if let Err(err) = swapped {
            warn!(parent: &self.span, ?err, onscreen = ?id, "Failed to swap buffers");
            return Ok(());
        }

        let events = self.platform.after_swap(id)?;
        self.queue(events);
        Ok(())
    }

    #[profiling::function]
    fn onscreen_swap_region(&mut self, id: OnscreenId, rectangles: &[Rectangle]) -> Result<(), WinsysError> {
        if !self.features.contains(WinsysFeatures::SWAP_REGION) {
            return self.onscreen_swap_buffers_with_damage(id, &[]);
        }
        let onscreen = self.onscreen(id)?;
        let (surface, throttled, height) = (
            onscreen.surface,
            onscreen.state.swap_throttled,
            onscreen.state.size.h,
        );
        if self.bind_surface(surface, throttled).is_err() {
            warn!(parent: &self.span, onscreen = ?id, "Dropping the region of an unbindable onscreen");
            return Ok(());
        }

        if let Err(err) = self
            .driver
            .swap_buffers_region(surface, &egl_rects(rectangles, height))
        {
            warn!(parent: &self.span, ?err, onscreen = ?id, "Failed to swap the region");
            return Ok(());
        }
        self.pending.push(OnscreenEvent::SwapComplete { onscreen: id });
        Ok(())
    }

    fn onscreen_set_visibility(&mut self, id: OnscreenId, visible: bool) -> Result<(), WinsysError> {
        self.onscreen_mut(id)?.state.visible = visible;
        self.platform.set_visibility(id, visible);
        Ok(())
    }

    fn onscreen_set_resizable(&mut self, id: OnscreenId, resizable: bool) -> Result<(), WinsysError> {
        let onscreen = self.onscreen_mut(id)?;
        onscreen.state.resizable = resizable;
        let size = onscreen.state.size;
        self.platform.set_resizable(id, resizable, size);
        Ok(())
    }

    fn onscreen_update_swap_throttled(&mut self, id: OnscreenId, throttled: bool) -> Result<(), WinsysError> {
        let onscreen = self.onscreen_mut(id)?;
        onscreen.state.swap_throttled = throttled;
        let surface = onscreen.surface;

        // the swap interval is applied when binding, rebind if this onscreen is current
        if let Some(display) = self.display.as_mut() {
            if display.current_surface == Some(surface) {
                display.current_surface = None;
                if self.bind_surface(surface, throttled).is_err() {
                    debug!(parent: &self.span, "The swap interval is applied at the next bind");
                }
            }
        }
        Ok(())
    }

    fn onscreen_get_buffer_age(&mut self, id: OnscreenId) -> i32 {
        if !self.features.contains(WinsysFeatures::BUFFER_AGE) {
            return 0;
        }
        if self.onscreen_bind(id).is_err() {
            return 0;
        }
        let Ok(onscreen) = self.onscreen(id) else {
            return 0;
        };
        match self.driver.query_surface(onscreen.surface, ffi::EGL_BUFFER_AGE_EXT) {
            Some(age) => age,
            None => {
                warn!(parent: &self.span, "Failed to query the buffer age");
                0
            }
        }
    }

    fn onscreen_state(&self, id: OnscreenId) -> Option<&OnscreenState> {
        self.onscreens.get(&id).map(|onscreen| &onscreen.state)
    }

    fn onscreen_x11_get_window_xid(&self, id: OnscreenId) -> Option<u32> {
        self.platform.window_xid(id)
    }

    fn get_proc_address(&self, name: &str) -> Option<NonNull<c_void>> {
        self.driver.get_proc_address(name)
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.platform.poll_fd()
    }

    fn dispatch_native(&mut self) -> Result<Vec<BackendEvent>, WinsysError> {
        let events = self.platform.dispatch()?;
        trace!(parent: &self.span, onscreen = events.onscreen.len(), "Platform events");
        self.queue(events.onscreen);
        Ok(events.unhandled)
    }

    fn pending(&mut self) -> &mut PendingNotifications {
        &mut self.pending
    }
}

impl<P: EglPlatform, D: EglDriver> Drop for EglBackend<P, D> {
    fn drop(&mut self) {
        for (id, onscreen) in std::mem::take(&mut self.onscreens) {
            self.driver.destroy_surface(onscreen.surface);
            self.platform.destroy_window(id);
        }
        if let Some(display) = self.display.take() {
            self.teardown_display(display);
            self.platform.display_destroy();
        }
        self.driver.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockEgl, MockPlatform};

    type TestBackend = EglBackend<MockPlatform, MockEgl>;

    fn connect_with(extensions: &str, flavor: GlDriver) -> (TestBackend, Rc<MockEgl>) {
        crate::utils::test_log::init();
        let driver = Rc::new(MockEgl::new());
        driver.set_extensions(extensions);
        let mut backend = EglBackend::from_parts(MockPlatform::default(), driver.clone(), flavor).unwrap();
        backend.display_setup(&OnscreenTemplate::default()).unwrap();
        backend.context_init().unwrap();
        (backend, driver)
    }

    fn connect(extensions: &str) -> (TestBackend, Rc<MockEgl>) {
        connect_with(extensions, GlDriver::Gl)
    }

    fn window(backend: &mut TestBackend, size: Size) -> OnscreenId {
        let id = OnscreenId::next();
        backend.onscreen_init(id, OnscreenDescriptor::new(size)).unwrap();
        id
    }

    fn attribute(attributes: &[EGLint], name: EGLint) -> Option<EGLint> {
        attributes.chunks(2).find(|pair| pair[0] == name).map(|pair| pair[1])
    }

    #[test]
    fn config_attributes_follow_the_template() {
        let attributes = egl_config_attributes(&FramebufferConfig::default(), GlDriver::Gles2, &[]);
        assert_eq!(attribute(&attributes, ffi::EGL_STENCIL_SIZE), Some(2));
        assert_eq!(attribute(&attributes, ffi::EGL_ALPHA_SIZE), Some(ffi::EGL_DONT_CARE));
        assert_eq!(
            attribute(&attributes, ffi::EGL_RENDERABLE_TYPE),
            Some(ffi::EGL_OPENGL_ES2_BIT)
        );
        assert_eq!(attribute(&attributes, ffi::EGL_SAMPLES), None);

        let config = FramebufferConfig {
            has_alpha: true,
            need_stencil: false,
            samples_per_pixel: 4,
            ..Default::default()
        };
        let attributes = egl_config_attributes(&config, GlDriver::Gl, &[0x1234, 5]);
        assert_eq!(&attributes[..2], &[0x1234, 5]);
        assert_eq!(attribute(&attributes, ffi::EGL_ALPHA_SIZE), Some(1));
        assert_eq!(attribute(&attributes, ffi::EGL_STENCIL_SIZE), Some(ffi::EGL_DONT_CARE));
        assert_eq!(attribute(&attributes, ffi::EGL_RENDERABLE_TYPE), Some(ffi::EGL_OPENGL_BIT));
        assert_eq!(attribute(&attributes, ffi::EGL_SAMPLES), Some(4));
    }

    #[test]
    fn display_binds_a_dummy_surface() {
        let (mut backend, driver) = connect("");
        assert_eq!(backend.display_state(), DisplayState::Ready);
        assert_eq!(driver.count("bind_api opengl"), 1);
        assert_eq!(driver.count("create_window_surface"), 1);
        assert_eq!(driver.count("make_current surface"), 1);
        assert_eq!(backend.platform().dummy_windows(), 1);

        backend.context_deinit();
        backend.display_destroy();
        assert_eq!(backend.display_state(), DisplayState::Unconnected);
        assert_eq!(driver.count("make_current none"), 1);
        assert_eq!(driver.count("destroy_surface"), 1);
        assert_eq!(driver.count("destroy_context"), 1);
        assert_eq!(backend.platform().dummy_windows(), 0);
    }

    #[test]
    fn surfaceless_contexts_skip_the_dummy_on_request() {
        crate::utils::test_log::init();
        let driver = Rc::new(MockEgl::new());
        driver.set_extensions("EGL_KHR_surfaceless_context");
        let platform = MockPlatform {
            skip_dummy_when_surfaceless: true,
            ..Default::default()
        };
        let mut backend = EglBackend::from_parts(platform, driver.clone(), GlDriver::Gles2).unwrap();
        backend.display_setup(&OnscreenTemplate::default()).unwrap();

        assert_eq!(driver.count("create_window_surface"), 0);
        assert_eq!(driver.count("make_current context"), 1);
        assert_eq!(driver.count("bind_api opengl_es"), 1);
    }

    #[test]
    fn missing_configs_retry_without_stencil() {
        crate::utils::test_log::init();
        let driver = Rc::new(MockEgl::new());
        driver.set_max_stencil(0);
        let mut backend = TestBackend::from_parts(MockPlatform::default(), driver.clone(), GlDriver::Gl).unwrap();
        backend.display_setup(&OnscreenTemplate::default()).unwrap();
        assert_eq!(driver.count("choose_config"), 2);

        driver.set_no_configs(true);
        backend.display_destroy();
        let err = backend.display_setup(&OnscreenTemplate::default()).unwrap_err();
        assert_eq!(err.to_string(), "No EGL config matches the requested attributes");
        assert_eq!(backend.display_state(), DisplayState::Unconnected);
    }

    #[test]
    fn core_profile_needs_create_context() {
        crate::utils::test_log::init();
        let driver = Rc::new(MockEgl::new());
        let mut backend = TestBackend::from_parts(MockPlatform::default(), driver.clone(), GlDriver::Gl3).unwrap();
        assert!(matches!(
            backend.display_setup(&OnscreenTemplate::default()),
            Err(WinsysError::CreateContext(_))
        ));
        assert_eq!(driver.count("create_context"), 0);

        let (_backend, driver) = connect_with("EGL_KHR_create_context", GlDriver::Gl3);
        assert_eq!(driver.count("create_context major 3"), 1);
    }

    #[test]
    fn failed_make_current_cleans_up() {
        crate::utils::test_log::init();
        let driver = Rc::new(MockEgl::new());
        driver.fail_make_current(true);
        let mut backend = TestBackend::from_parts(MockPlatform::default(), driver.clone(), GlDriver::Gl).unwrap();
        assert!(matches!(
            backend.display_setup(&OnscreenTemplate::default()),
            Err(WinsysError::MakeCurrent)
        ));
        assert_eq!(backend.platform().dummy_windows(), 0);
        // once per attempt, with and without stencil
        assert_eq!(driver.count("destroy_context"), 2);
        assert_eq!(driver.count("destroy_surface"), 2);
    }

    #[test]
    fn features_follow_extensions() {
        let (backend, _) = connect("");
        assert_eq!(backend.features(), WinsysFeatures::SWAP_THROTTLE);

        let (backend, _) = connect("EGL_NOK_swap_region EGL_EXT_buffer_age EGL_KHR_swap_buffers_with_damage");
        assert!(backend.features().contains(
            WinsysFeatures::SWAP_REGION
                | WinsysFeatures::SWAP_REGION_THROTTLE
                | WinsysFeatures::BUFFER_AGE
                | WinsysFeatures::SWAP_BUFFERS_WITH_DAMAGE
        ));
    }

    #[test]
    fn binding_applies_the_swap_interval_once() {
        let (mut backend, driver) = connect("");
        let id = window(&mut backend, Size::new(64, 64));

        backend.onscreen_bind(id).unwrap();
        backend.onscreen_bind(id).unwrap();
        assert_eq!(driver.count("swap_interval 1"), 1);

        backend.onscreen_update_swap_throttled(id, false).unwrap();
        assert_eq!(driver.count("swap_interval 0"), 1);
        assert!(!backend.onscreen_state(id).unwrap().swap_throttled);
    }

    #[test]
    fn damage_is_flipped_when_supported() {
        let (mut backend, driver) = connect("");
        let id = window(&mut backend, Size::new(100, 80));
        backend
            .onscreen_swap_buffers_with_damage(id, &[Rectangle::new(10, 5, 20, 10)])
            .unwrap();
        assert_eq!(driver.count("swap_buffers "), 1);

        let (mut backend, driver) = connect("EGL_EXT_swap_buffers_with_damage");
        let id = window(&mut backend, Size::new(100, 80));
        backend
            .onscreen_swap_buffers_with_damage(id, &[Rectangle::new(10, 5, 20, 10)])
            .unwrap();
        assert_eq!(driver.count("swap_buffers_with_damage [10, 65, 20, 10]"), 1);

        // no damage swaps everything
        backend.onscreen_swap_buffers_with_damage(id, &[]).unwrap();
        assert_eq!(driver.count("swap_buffers "), 1);
        assert_eq!(backend.pending().take().len(), 2);
    }

    #[test]
    fn swap_region_needs_the_extension() {
        let (mut backend, driver) = connect("");
        let id = window(&mut backend, Size::new(100, 80));
        backend
            .onscreen_swap_region(id, &[Rectangle::new(0, 0, 10, 10)])
            .unwrap();
        assert_eq!(driver.count("swap_buffers "), 1);

        let (mut backend, driver) = connect("EGL_NOK_swap_region");
        let id = window(&mut backend, Size::new(100, 80));
        backend
            .onscreen_swap_region(id, &[Rectangle::new(0, 0, 10, 10)])
            .unwrap();
        assert_eq!(driver.count("swap_buffers_region [0, 70, 10, 10]"), 1);
        assert_eq!(
            backend.pending().take(),
            vec![OnscreenEvent::SwapComplete { onscreen: id }]
        );
    }

    #[test]
    fn destroying_the_current_onscreen_rebinds_the_dummy() {
        let (mut backend, driver) = connect("");
        let id = window(&mut backend, Size::new(64, 64));
        backend.onscreen_bind(id).unwrap();
        assert_eq!(driver.count("make_current surface"), 2);

        backend.onscreen_deinit(id);
        assert_eq!(driver.count("make_current surface"), 3);
        assert_eq!(backend.platform().windows(), 0);
        assert!(matches!(backend.onscreen_bind(id), Err(WinsysError::UnknownOnscreen)));
    }

    #[test]
    fn failed_surfaces_release_the_window() {
        let (mut backend, driver) = connect("");
        driver.fail_surfaces(true);
        let err = backend
            .onscreen_init(OnscreenId::next(), OnscreenDescriptor::new(Size::new(8, 8)))
            .unwrap_err();
        assert!(matches!(err, WinsysError::CreateOnscreen(_)));
        assert_eq!(backend.platform().windows(), 0);
    }

    #[test]
    fn platform_limits_onscreens() {
        crate::utils::test_log::init();
        let driver = Rc::new(MockEgl::new());
        let platform = MockPlatform {
            max_onscreens: Some(1),
            ..Default::default()
        };
        let mut backend = EglBackend::from_parts(platform, driver, GlDriver::Gl).unwrap();
        backend.display_setup(&OnscreenTemplate::default()).unwrap();
        backend.context_init().unwrap();

        window(&mut backend, Size::new(8, 8));
        let err = backend
            .onscreen_init(OnscreenId::next(), OnscreenDescriptor::new(Size::new(8, 8)))
            .unwrap_err();
        assert!(err.to_string().contains("Cannot have multiple onscreens"));
    }

    #[test]
    fn buffer_age_needs_the_extension() {
        let (mut backend, driver) = connect("");
        driver.set_buffer_age(3);
        let id = window(&mut backend, Size::new(8, 8));
        assert_eq!(backend.onscreen_get_buffer_age(id), 0);

        let (mut backend, driver) = connect("EGL_EXT_buffer_age");
        driver.set_buffer_age(3);
        let id = window(&mut backend, Size::new(8, 8));
        assert_eq!(backend.onscreen_get_buffer_age(id), 3);
    }

    #[test]
    fn failed_bind_drops_the_frame() {
        let (mut backend, driver) = connect("EGL_NOK_swap_region");
        let id = window(&mut backend, Size::new(64, 64));
        driver.fail_make_current(true);

        backend
            .onscreen_swap_buffers_with_damage(id, &[Rectangle::new(0, 0, 8, 8)])
            .unwrap();
        backend
            .onscreen_swap_region(id, &[Rectangle::new(0, 0, 8, 8)])
            .unwrap();
        assert_eq!(driver.count("swap_buffers"), 0);
        assert!(backend.pending().take().is_empty());
    }

    #[test]
    fn failed_swaps_are_not_fatal() {
        let (mut backend, driver) = connect("EGL_NOK_swap_region EGL_EXT_swap_buffers_with_damage");
        let id = window(&mut backend, Size::new(64, 64));
        driver.fail_swaps(true);

        backend.onscreen_swap_buffers_with_damage(id, &[]).unwrap();
        backend
            .onscreen_swap_buffers_with_damage(id, &[Rectangle::new(0, 0, 8, 8)])
            .unwrap();
        backend
            .onscreen_swap_region(id, &[Rectangle::new(0, 0, 8, 8)])
            .unwrap();
        assert!(backend.pending().take().is_empty());

        driver.fail_swaps(false);
        backend.onscreen_swap_buffers_with_damage(id, &[]).unwrap();
        assert_eq!(
            backend.pending().take(),
            vec![OnscreenEvent::SwapComplete { onscreen: id }]
        );
    }

    #[test]
    fn context_init_redetects_extensions() {
        let (mut backend, driver) = connect("");
        assert!(!backend.features().contains(WinsysFeatures::BUFFER_AGE));

        driver.set_extensions("EGL_EXT_buffer_age");
        backend.context_deinit();
        backend.context_init().unwrap();
        assert!(backend.features().contains(WinsysFeatures::BUFFER_AGE));

        driver.set_extensions("");
        backend.context_deinit();
        backend.context_init().unwrap();
        assert_eq!(backend.features(), WinsysFeatures::SWAP_THROTTLE);
    }

    #[test]
    fn missing_rgba_config_leaves_the_display_unconnected() {
        crate::utils::test_log::init();
        let driver = Rc::new(MockEgl::new());
        driver.set_no_alpha(true);
        let mut backend = TestBackend::from_parts(MockPlatform::default(), driver.clone(), GlDriver::Gl).unwrap();

        let template = OnscreenTemplate {
            has_alpha: true,
            ..Default::default()
        };
        let err = backend.display_setup(&template).unwrap_err();
        assert!(matches!(err, WinsysError::NoRgbaConfig));
        assert_eq!(backend.display_state(), DisplayState::Unconnected);
        assert_eq!(driver.count("create_context"), 0);
        assert_eq!(driver.count("create_window_surface"), 0);
        assert_eq!(backend.platform().dummy_windows(), 0);
        assert_eq!(backend.platform().windows(), 0);

        // opaque displays still come up
        backend.display_setup(&OnscreenTemplate::default()).unwrap();
        assert_eq!(backend.display_state(), DisplayState::Ready);
    }

    #[test]
    fn platform_resizes_update_the_state() {
        let (mut backend, _) = connect("");
        let id = window(&mut backend, Size::new(64, 64));
        backend.platform.queue_resize(id, Size::new(64, 64));
        backend.platform.queue_resize(id, Size::new(128, 96));

        backend.dispatch_native().unwrap();
        assert_eq!(
            backend.pending().take(),
            vec![OnscreenEvent::Resized {
                onscreen: id,
                size: Size::new(128, 96)
            }]
        );
        assert_eq!(backend.onscreen_state(id).unwrap().size, Size::new(128, 96));
    }

    #[test]
    fn dropping_terminates_the_display() {
        let (mut backend, driver) = connect("");
        window(&mut backend, Size::new(8, 8));
        drop(backend);
        assert_eq!(driver.count("destroy_surface"), 2);
        assert_eq!(driver.count("terminate"), 1);
    }
}
