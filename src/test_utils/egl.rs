//! Fake EGL driver, platform and Mir connection

use std::{
    cell::{Cell, RefCell},
    ffi::c_void,
    ptr::NonNull,
};

use indexmap::IndexMap;

use crate::{
    backend::{
        egl::{
            ffi::{self, EGLenum, EGLint},
            EglConfig, EglContext, EglDriver, EglError, EglErrorCode, EglPlatform, EglSurface, PlatformEvents,
        },
        winsys::{OnscreenDescriptor, OnscreenEvent, OnscreenId, SymbolLoader, SymbolTable, WinsysError, WinsysId},
    },
    utils::Size,
};

/// An EGL implementation without a GPU, recording every call like [`super::MockGlx`]
#[derive(Debug)]
pub struct MockEgl {
    calls: RefCell<Vec<String>>,
    version: Cell<(u32, u32)>,
    extensions: RefCell<String>,
    symbols: RefCell<SymbolTable>,
    native_visual: Cell<EGLint>,
    max_stencil: Cell<EGLint>,
    no_configs: Cell<bool>,
    fail_make_current: Cell<bool>,
    fail_surfaces: Cell<bool>,
    fail_swaps: Cell<bool>,
    no_alpha: Cell<bool>,
    buffer_age: Cell<EGLint>,
    next_id: Cell<usize>,
}

impl Default for MockEgl {
    fn default() -> Self {
        MockEgl {
            calls: RefCell::default(),
            version: Cell::new((1, 4)),
            extensions: RefCell::default(),
            symbols: RefCell::default(),
            native_visual: Cell::new(0x21),
            max_stencil: Cell::new(8),
            no_configs: Cell::new(false),
            fail_make_current: Cell::new(false),
            fail_surfaces: Cell::new(false),
            fail_swaps: Cell::new(false),
            no_alpha: Cell::new(false),
            buffer_age: Cell::new(0),
            next_id: Cell::new(0x1000),
        }
    }
}

impl MockEgl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_extensions(&self, extensions: &str) {
        *self.extensions.borrow_mut() = extensions.to_owned();
    }

    pub fn set_native_visual(&self, visual: EGLint) {
        self.native_visual.set(visual);
    }

    /// Configs offer at most `stencil` bits
    pub fn set_max_stencil(&self, stencil: EGLint) {
        self.max_stencil.set(stencil);
    }

    pub fn set_no_configs(&self, none: bool) {
        self.no_configs.set(none);
    }

    pub fn fail_make_current(&self, fail: bool) {
        self.fail_make_current.set(fail);
    }

    pub fn fail_surfaces(&self, fail: bool) {
        self.fail_surfaces.set(fail);
    }

    /// Swaps report `EGL_BAD_SURFACE`
    pub fn fail_swaps(&self, fail: bool) {
        self.fail_swaps.set(fail);
    }

    /// Only configs without an alpha channel exist
    pub fn set_no_alpha(&self, no_alpha: bool) {
        self.no_alpha.set(no_alpha);
    }

    pub fn set_buffer_age(&self, age: EGLint) {
        self.buffer_age.set(age);
    }

    /// Number of recorded calls starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls.borrow().iter().filter(|call| call.starts_with(prefix)).count()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.borrow_mut().push(call.into());
    }

    fn id(&self) -> usize {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn swap_result(&self, call: &'static str) -> Result<(), EglError> {
        if self.fail_swaps.get() {
            return Err(EglError::Call {
                call,
                code: EglErrorCode::BadSurface,
            });
        }
        Ok(())
    }

    fn has_symbol(&self, name: &str) -> bool {
        self.symbols.borrow().contains(name)
    }
}

fn attribute(attributes: &[EGLint], name: EGLint) -> Option<EGLint> {
    attributes.chunks(2).find(|pair| pair[0] == name).and_then(|pair| pair.get(1).copied())
}

impl SymbolLoader for MockEgl {
    fn resolve(&self, _name: &str) -> Option<NonNull<c_void>> {
        Some(NonNull::dangling())
    }
}

impl EglDriver for MockEgl {
    fn initialize(&self, native_display: usize) -> Result<(u32, u32), EglError> {
        self.record(format!("initialize {native_display:#x}"));
        Ok(self.version.get())
    }

    fn terminate(&self) {
        self.record("terminate");
    }

    fn extensions(&self) -> String {
        self.extensions.borrow().clone()
    }

    fn loader(&self) -> &dyn SymbolLoader {
        self
    }

    fn set_extension_symbols(&self, symbols: SymbolTable) {
        *self.symbols.borrow_mut() = symbols;
    }

    fn get_proc_address(&self, name: &str) -> Option<NonNull<c_void>> {
        self.resolve(name)
    }

    fn bind_api(&self, api: EGLenum) -> Result<(), EglError> {
        match api {
            ffi::EGL_OPENGL_API => self.record("bind_api opengl"),
            _ => self.record("bind_api opengl_es"),
        }
        Ok(())
    }

    fn choose_config(&self, attributes: &[EGLint]) -> Option<EglConfig> {
        self.record("choose_config");
        if self.no_configs.get() {
            return None;
        }
        let wants = |name| matches!(attribute(attributes, name), Some(size) if size != ffi::EGL_DONT_CARE && size > 0);
        if self.no_alpha.get() && wants(ffi::EGL_ALPHA_SIZE) {
            return None;
        }
        match attribute(attributes, ffi::EGL_STENCIL_SIZE) {
            Some(stencil) if stencil != ffi::EGL_DONT_CARE && stencil > self.max_stencil.get() => None,
            _ => Some(EglConfig(1)),
        }
    }

    fn config_attrib(&self, _config: EglConfig, attribute: EGLint) -> Option<EGLint> {
        (attribute == ffi::EGL_NATIVE_VISUAL_ID).then(|| self.native_visual.get())
    }

    fn create_context(&self, _config: EglConfig, attributes: &[EGLint]) -> Result<EglContext, EglError> {
        match attribute(attributes, ffi::EGL_CONTEXT_MAJOR_VERSION_KHR) {
            Some(major) => self.record(format!("create_context major {major}")),
            None => self.record("create_context"),
        }
        Ok(EglContext(self.id()))
    }

    fn destroy_context(&self, context: EglContext) {
        self.record(format!("destroy_context {:#x}", context.0));
    }

    fn create_window_surface(&self, _config: EglConfig, native_window: usize) -> Result<EglSurface, EglError> {
        if self.fail_surfaces.get() {
            return Err(EglError::CreateSurface(EglErrorCode::BadNativeWindow));
        }
        self.record(format!("create_window_surface {native_window:#x}"));
        Ok(EglSurface(self.id()))
    }

    fn destroy_surface(&self, surface: EglSurface) {
        self.record(format!("destroy_surface {:#x}", surface.0));
    }

    fn make_current(&self, surface: Option<EglSurface>, context: Option<EglContext>) -> Result<(), EglError> {
        match (surface, context) {
            (Some(surface), Some(_)) => self.record(format!("make_current surface {:#x}", surface.0)),
            (None, Some(_)) => self.record("make_current context"),
            _ => self.record("make_current none"),
        }
        if self.fail_make_current.get() && context.is_some() {
            return Err(EglError::MakeCurrent(EglErrorCode::BadMatch));
        }
        Ok(())
    }

    fn swap_buffers(&self, surface: EglSurface) -> Result<(), EglError> {
        self.record(format!("swap_buffers {:#x}", surface.0));
        self.swap_result("eglSwapBuffers")
    }

    fn swap_buffers_with_damage(&self, _surface: EglSurface, rects: &[EGLint]) -> Result<(), EglError> {
        if !self.has_symbol("eglSwapBuffersWithDamage") {
            return Err(EglError::MissingEntryPoint("eglSwapBuffersWithDamage"));
        }
        self.swap_result("eglSwapBuffersWithDamage")?;
        self.record(format!("swap_buffers_with_damage {rects:?}"));
        Ok(())
    }

    fn swap_buffers_region(&self, _surface: EglSurface, rects: &[EGLint]) -> Result<(), EglError> {
        if !self.has_symbol("eglSwapBuffersRegion") {
            return Err(EglError::MissingEntryPoint("eglSwapBuffersRegion"));
        }
        self.swap_result("eglSwapBuffersRegion")?;
        self.record(format!("swap_buffers_region {rects:?}"));
        Ok(())
    }

    fn swap_interval(&self, interval: EGLint) -> bool {
        self.record(format!("swap_interval {interval}"));
        true
    }

    fn query_surface(&self, _surface: EglSurface, attribute: EGLint) -> Option<EGLint> {
        (attribute == ffi::EGL_BUFFER_AGE_EXT).then(|| self.buffer_age.get())
    }

    fn finish(&self) {
        self.record("finish");
    }

    fn get_error(&self) -> EGLint {
        ffi::EGL_SUCCESS
    }
}

/// A platform handing out made up native windows
#[derive(Debug, Default)]
pub struct MockPlatform {
    pub max_onscreens: Option<usize>,
    /// Bind the context without a dummy surface when the driver allows it
    pub skip_dummy_when_surfaceless: bool,
    pub(crate) dummy_windows: usize,
    pub(crate) windows: IndexMap<OnscreenId, usize>,
    pub(crate) next_window: usize,
    pub(crate) resizes: Vec<(OnscreenId, Size)>,
}

impl MockPlatform {
    /// Live dummy windows
    pub fn dummy_windows(&self) -> usize {
        self.dummy_windows
    }

    /// Live onscreen windows
    pub fn windows(&self) -> usize {
        self.windows.len()
    }

    /// Report a resize at the next dispatch
    pub fn queue_resize(&mut self, id: OnscreenId, size: Size) {
        self.resizes.push((id, size));
    }

    fn window(&mut self) -> usize {
        self.next_window += 1;
        0x4000_0000 + self.next_window
    }
}

impl EglPlatform for MockPlatform {
    fn id(&self) -> WinsysId {
        WinsysId::EglX11
    }

    fn native_display(&self) -> usize {
        0x1
    }

    fn max_onscreens(&self) -> Option<usize> {
        self.max_onscreens
    }

    fn create_dummy_window(&mut self, _native_visual: EGLint, surfaceless: bool) -> Result<Option<usize>, WinsysError> {
        if surfaceless && self.skip_dummy_when_surfaceless {
            return Ok(None);
        }
        self.dummy_windows += 1;
        Ok(Some(self.window()))
    }

    fn destroy_dummy_window(&mut self) {
        self.dummy_windows = self.dummy_windows.saturating_sub(1);
    }

    fn create_window(
        &mut self,
        id: OnscreenId,
        descriptor: OnscreenDescriptor,
        _native_visual: EGLint,
    ) -> Result<(usize, Size), WinsysError> {
        let window = self.window();
        self.windows.insert(id, window);
        Ok((window, descriptor.size))
    }

    fn destroy_window(&mut self, id: OnscreenId) {
        self.windows.shift_remove(&id);
    }

    fn dispatch(&mut self) -> Result<PlatformEvents, WinsysError> {
        let onscreen = self
            .resizes
            .drain(..)
            .map(|(onscreen, size)| OnscreenEvent::Resized { onscreen, size })
            .collect();
        Ok(PlatformEvents {
            onscreen,
            unhandled: Vec::new(),
        })
    }
}

#[cfg(feature = "backend_mir")]
pub use self::mir::*;

#[cfg(feature = "backend_mir")]
mod mir {
    use std::{cell::RefCell, rc::Rc};

    use indexmap::IndexMap;

    use crate::backend::egl::mir::{
        MirConnection, MirPixelFormat, MirSurface, MirSurfaceEvent, MirSurfaceSpec, MirSurfaceState,
    };

    #[derive(Debug)]
    struct MirState {
        formats: Vec<MirPixelFormat>,
        created: Vec<MirSurfaceSpec>,
        live: IndexMap<u64, MirSurfaceState>,
        events: Vec<MirSurfaceEvent>,
        state_requests: usize,
        next_id: u64,
    }

    /// A Mir server in memory. Clones share the server
    #[derive(Debug, Clone)]
    pub struct MockMir {
        state: Rc<RefCell<MirState>>,
    }

    impl Default for MockMir {
        fn default() -> Self {
            MockMir {
                state: Rc::new(RefCell::new(MirState {
                    formats: vec![MirPixelFormat::Argb8888],
                    created: Vec::new(),
                    live: IndexMap::new(),
                    events: Vec::new(),
                    state_requests: 0,
                    next_id: 1,
                })),
            }
        }
    }

    impl MockMir {
        pub fn set_formats(&self, formats: Vec<MirPixelFormat>) {
            self.state.borrow_mut().formats = formats;
        }

        /// Every surface ever requested
        pub fn surfaces(&self) -> Vec<MirSurfaceSpec> {
            self.state.borrow().created.clone()
        }

        pub fn surface_ids(&self) -> Vec<u64> {
            self.state.borrow().live.keys().copied().collect()
        }

        pub fn live_surfaces(&self) -> usize {
            self.state.borrow().live.len()
        }

        pub fn state(&self, surface: u64) -> MirSurfaceState {
            self.state.borrow().live.get(&surface).copied().unwrap_or_default()
        }

        /// Change a surface's state as the window manager would
        pub fn force_state(&self, surface: u64, state: MirSurfaceState) {
            self.state.borrow_mut().live.insert(surface, state);
        }

        pub fn state_requests(&self) -> usize {
            self.state.borrow().state_requests
        }

        pub fn push_event(&self, event: MirSurfaceEvent) {
            self.state.borrow_mut().events.push(event);
        }
    }

    impl MirConnection for MockMir {
        fn egl_native_display(&self) -> usize {
            0xd15
        }

        fn available_formats(&self) -> Vec<MirPixelFormat> {
            self.state.borrow().formats.clone()
        }

        fn create_surface(&mut self, spec: &MirSurfaceSpec) -> Result<MirSurface, String> {
            let mut state = self.state.borrow_mut();
            let id = state.next_id;
            state.next_id += 1;
            state.created.push(spec.clone());
            state.live.insert(id, MirSurfaceState::Restored);
            Ok(MirSurface {
                id,
                egl_native_window: 0x5000 + id as usize,
            })
        }

        fn release_surface(&mut self, surface: u64) {
            self.state.borrow_mut().live.shift_remove(&surface);
        }

        fn surface_state(&self, surface: u64) -> MirSurfaceState {
            self.state(surface)
        }

        fn set_surface_state(&mut self, surface: u64, state: MirSurfaceState) {
            let mut inner = self.state.borrow_mut();
            inner.state_requests += 1;
            inner.live.insert(surface, state);
        }

        fn take_events(&mut self) -> Vec<MirSurfaceEvent> {
            std::mem::take(&mut self.state.borrow_mut().events)
        }
    }
}
