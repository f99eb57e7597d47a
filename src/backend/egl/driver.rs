//! Access to the EGL implementation
//!
//! [`EglDriver`] is the seam between the EGL backend and the driver, [`EglLibrary`] implements it
//! on top of `libEGL`. The driver owns the one `EGLDisplay` of the backend once
//! [`EglDriver::initialize`] succeeded.

use std::{
    cell::{Cell, RefCell},
    ffi::{c_void, CStr, CString},
    fmt,
    ptr::{self, NonNull},
};

use tracing::trace;

use crate::backend::winsys::{DynamicLibrary, LoaderError, SymbolLoader, SymbolTable};

use super::{
    error::{wrap_egl_call, EglError, EglErrorCode},
    ffi::{self, EGLenum, EGLint},
};

/// An `EGLConfig` handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EglConfig(pub usize);

/// An `EGLContext` handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EglContext(pub usize);

/// An `EGLSurface` handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EglSurface(pub usize);

/// EGL and GL calls used by the backend
#[allow(missing_docs)]
pub trait EglDriver: fmt::Debug {
    /// Get and initialize the EGL display of `native_display`, returning its version
    fn initialize(&self, native_display: usize) -> Result<(u32, u32), EglError>;
    fn terminate(&self);
    /// Extension string of the display
    fn extensions(&self) -> String;
    /// Resolves extension and GL entry points
    fn loader(&self) -> &dyn SymbolLoader;
    /// Make the detected extension entry points callable
    fn set_extension_symbols(&self, symbols: SymbolTable);
    fn get_proc_address(&self, name: &str) -> Option<NonNull<c_void>>;
    fn bind_api(&self, api: EGLenum) -> Result<(), EglError>;

    /// Best config matching `attributes`
    fn choose_config(&self, attributes: &[EGLint]) -> Option<EglConfig>;
    fn config_attrib(&self, config: EglConfig, attribute: EGLint) -> Option<EGLint>;

    fn create_context(&self, config: EglConfig, attributes: &[EGLint]) -> Result<EglContext, EglError>;
    fn destroy_context(&self, context: EglContext);
    fn create_window_surface(&self, config: EglConfig, native_window: usize) -> Result<EglSurface, EglError>;
    fn destroy_surface(&self, surface: EglSurface);
    /// Bind `context` to `surface` for drawing and reading. `None` for both releases the context
    fn make_current(&self, surface: Option<EglSurface>, context: Option<EglContext>) -> Result<(), EglError>;

    fn swap_buffers(&self, surface: EglSurface) -> Result<(), EglError>;
    /// `rects` holds x, y, width, height quadruples with a bottom-left origin
    fn swap_buffers_with_damage(&self, surface: EglSurface, rects: &[EGLint]) -> Result<(), EglError>;
    /// `rects` holds x, y, width, height quadruples with a bottom-left origin
    fn swap_buffers_region(&self, surface: EglSurface, rects: &[EGLint]) -> Result<(), EglError>;
    fn swap_interval(&self, interval: EGLint) -> bool;
    fn query_surface(&self, surface: EglSurface, attribute: EGLint) -> Option<EGLint>;

    fn finish(&self);
    /// Error of the last call, `EGL_SUCCESS` if it succeeded
    fn get_error(&self) -> EGLint;
}

const EGL_REQUIRED: &[&str] = &[
    "eglGetDisplay",
    "eglInitialize",
    "eglTerminate",
    "eglQueryString",
    "eglBindAPI",
    "eglChooseConfig",
    "eglGetConfigAttrib",
    "eglCreateContext",
    "eglDestroyContext",
    "eglCreateWindowSurface",
    "eglDestroySurface",
    "eglMakeCurrent",
    "eglSwapBuffers",
    "eglSwapInterval",
    "eglQuerySurface",
    "eglGetError",
    "eglGetProcAddress",
];

/// `libEGL`, loaded at runtime
pub struct EglLibrary {
    library: DynamicLibrary,
    egl: SymbolTable,
    display: Cell<ffi::EGLDisplay>,
    extensions: RefCell<SymbolTable>,
}

impl fmt::Debug for EglLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EglLibrary")
            .field("library", &self.library)
            .field("display", &self.display.get())
            .field("extensions", &self.extensions.borrow().len())
            .finish_non_exhaustive()
    }
}

impl EglLibrary {
    /// Load `libEGL` and its core entry points
    pub fn open() -> Result<EglLibrary, LoaderError> {
        let library = DynamicLibrary::open_first(&["libEGL.so.1", "libEGL.so"])?;
        let mut egl = SymbolTable::new();
        egl.load_required(&library, EGL_REQUIRED)?;
        Ok(EglLibrary {
            library,
            egl,
            display: Cell::new(ptr::null_mut()),
            extensions: RefCell::new(SymbolTable::new()),
        })
    }

    fn egl<F: Copy>(&self, name: &str) -> Option<F> {
        // SAFETY: every caller names `F` after the ffi alias of `name`
        unsafe { self.egl.get::<F>(name) }
    }

    fn ext<F: Copy>(&self, name: &str) -> Option<F> {
        // SAFETY: every caller names `F` after the ffi alias of `name`
        unsafe { self.extensions.borrow().get::<F>(name) }
    }

    fn call<F: Copy>(&self, name: &'static str) -> Result<F, EglError> {
        self.egl(name)
            .ok_or_else(|| EglError::Call {
                call: name,
                code: EglErrorCode::NotInitialized,
            })
    }

    fn dpy(&self) -> ffi::EGLDisplay {
        self.display.get()
    }

    fn check(&self, call: &'static str, status: ffi::EGLBoolean) -> Result<(), EglError> {
        if status == ffi::EGL_TRUE {
            return Ok(());
        }
        Err(EglError::Call {
            call,
            code: EglErrorCode::from(self.get_error()),
        })
    }

    fn terminated(attributes: &[EGLint]) -> Vec<EGLint> {
        let mut terminated = attributes.to_vec();
        terminated.push(ffi::EGL_NONE);
        terminated
    }
}

impl SymbolLoader for EglLibrary {
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>> {
        let get_proc_address = self.egl::<ffi::eglGetProcAddress>("eglGetProcAddress")?;
        let symbol = CString::new(name).ok()?;
        NonNull::new(unsafe { get_proc_address(symbol.as_ptr()) }).or_else(|| self.library.resolve(name))
    }
}

impl EglDriver for EglLibrary {
    fn initialize(&self, native_display: usize) -> Result<(u32, u32), EglError> {
        let get_display = self.call::<ffi::eglGetDisplay>("eglGetDisplay")?;
        let initialize = self.call::<ffi::eglInitialize>("eglInitialize")?;

        let display = unsafe { get_display(native_display as ffi::EGLNativeDisplayType) };
        if display.is_null() {
            return Err(EglError::DisplayNotSupported);
        }
        let (mut major, mut minor) = (0, 0);
        let status = wrap_egl_call(self, || unsafe { initialize(display, &mut major, &mut minor) })
            .map_err(EglError::InitFailed)?;
        if status != ffi::EGL_TRUE {
            return Err(EglError::InitFailed(EglErrorCode::NotInitialized));
        }
        self.display.set(display);
        Ok((major.max(0) as u32, minor.max(0) as u32))
    }

    fn terminate(&self) {
        let display = self.display.replace(ptr::null_mut());
        if display.is_null() {
            return;
        }
        if let Some(terminate) = self.egl::<ffi::eglTerminate>("eglTerminate") {
            unsafe { terminate(display) };
        }
    }

    fn extensions(&self) -> String {
        let Some(query) = self.egl::<ffi::eglQueryString>("eglQueryString") else {
            return String::new();
        };
        let extensions = unsafe { query(self.dpy(), ffi::EGL_EXTENSIONS) };
        if extensions.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(extensions) }.to_string_lossy().into_owned()
    }

    fn loader(&self) -> &dyn SymbolLoader {
        self
    }

    fn set_extension_symbols(&self, symbols: SymbolTable) {
        trace!(count = symbols.len(), "EGL extension entry points resolved");
        *self.extensions.borrow_mut() = symbols;
    }

    fn get_proc_address(&self, name: &str) -> Option<NonNull<c_void>> {
        self.resolve(name)
    }

    fn bind_api(&self, api: EGLenum) -> Result<(), EglError> {
        let bind = self.call::<ffi::eglBindAPI>("eglBindAPI")?;
        if unsafe { bind(api) } == ffi::EGL_TRUE {
            Ok(())
        } else {
            Err(EglError::BindApi(EglErrorCode::from(self.get_error())))
        }
    }

    fn choose_config(&self, attributes: &[EGLint]) -> Option<EglConfig> {
        let choose = self.egl::<ffi::eglChooseConfig>("eglChooseConfig")?;
        let attributes = Self::terminated(attributes);
        let mut config = ptr::null_mut();
        let mut count = 0;
        let status = unsafe { choose(self.dpy(), attributes.as_ptr(), &mut config, 1, &mut count) };
        (status == ffi::EGL_TRUE && count > 0 && !config.is_null()).then(|| EglConfig(config as usize))
    }

    fn config_attrib(&self, config: EglConfig, attribute: EGLint) -> Option<EGLint> {
        let get = self.egl::<ffi::eglGetConfigAttrib>("eglGetConfigAttrib")?;
        let mut value = 0;
        let status = unsafe { get(self.dpy(), config.0 as ffi::EGLConfig, attribute, &mut value) };
        (status == ffi::EGL_TRUE).then_some(value)
    }

    fn create_context(&self, config: EglConfig, attributes: &[EGLint]) -> Result<EglContext, EglError> {
        let create = self.call::<ffi::eglCreateContext>("eglCreateContext")?;
        let attributes = Self::terminated(attributes);
        let context = unsafe {
            create(
                self.dpy(),
                config.0 as ffi::EGLConfig,
                ptr::null_mut(),
                attributes.as_ptr(),
            )
        };
        if context.is_null() {
            return Err(EglError::CreateContext(EglErrorCode::from(self.get_error())));
        }
        Ok(EglContext(context as usize))
    }

    fn destroy_context(&self, context: EglContext) {
        if let Some(destroy) = self.egl::<ffi::eglDestroyContext>("eglDestroyContext") {
            unsafe { destroy(self.dpy(), context.0 as ffi::EGLContext) };
        }
    }

    fn create_window_surface(&self, config: EglConfig, native_window: usize) -> Result<EglSurface, EglError> {
        let create = self.call::<ffi::eglCreateWindowSurface>("eglCreateWindowSurface")?;
        let surface = unsafe {
            create(
                self.dpy(),
                config.0 as ffi::EGLConfig,
                native_window as ffi::EGLNativeWindowType,
                ptr::null(),
            )
        };
        if surface.is_null() {
            return Err(EglError::CreateSurface(EglErrorCode::from(self.get_error())));
        }
        Ok(EglSurface(surface as usize))
    }

    fn destroy_surface(&self, surface: EglSurface) {
        if let Some(destroy) = self.egl::<ffi::eglDestroySurface>("eglDestroySurface") {
            unsafe { destroy(self.dpy(), surface.0 as ffi::EGLSurface) };
        }
    }

    fn make_current(&self, surface: Option<EglSurface>, context: Option<EglContext>) -> Result<(), EglError> {
        let make_current = self.call::<ffi::eglMakeCurrent>("eglMakeCurrent")?;
        let surface = surface.map_or(ptr::null_mut(), |surface| surface.0 as ffi::EGLSurface);
        let context = context.map_or(ptr::null_mut(), |context| context.0 as ffi::EGLContext);
        let status = unsafe { make_current(self.dpy(), surface, surface, context) };
        if status == ffi::EGL_TRUE {
            Ok(())
        } else {
            Err(EglError::MakeCurrent(EglErrorCode::from(self.get_error())))
        }
    }

    fn swap_buffers(&self, surface: EglSurface) -> Result<(), EglError> {
        let swap = self.call::<ffi::eglSwapBuffers>("eglSwapBuffers")?;
        let status = unsafe { swap(self.dpy(), surface.0 as ffi::EGLSurface) };
        self.check("eglSwapBuffers", status)
    }

    fn swap_buffers_with_damage(&self, surface: EglSurface, rects: &[EGLint]) -> Result<(), EglError> {
        let swap = self
            .ext::<ffi::eglSwapBuffersWithDamage>("eglSwapBuffersWithDamage")
            .ok_or(EglError::MissingEntryPoint("eglSwapBuffersWithDamage"))?;
        let status = unsafe {
            swap(
                self.dpy(),
                surface.0 as ffi::EGLSurface,
                rects.as_ptr(),
                (rects.len() / 4) as EGLint,
            )
        };
        self.check("eglSwapBuffersWithDamage", status)
    }

    fn swap_buffers_region(&self, surface: EglSurface, rects: &[EGLint]) -> Result<(), EglError> {
        let swap = self
            .ext::<ffi::eglSwapBuffersRegion>("eglSwapBuffersRegion")
            .ok_or(EglError::MissingEntryPoint("eglSwapBuffersRegion"))?;
        let status = unsafe {
            swap(
                self.dpy(),
                surface.0 as ffi::EGLSurface,
                (rects.len() / 4) as EGLint,
                rects.as_ptr(),
            )
        };
        self.check("eglSwapBuffersRegion", status)
    }

    fn swap_interval(&self, interval: EGLint) -> bool {
        match self.egl::<ffi::eglSwapInterval>("eglSwapInterval") {
            Some(swap_interval) => unsafe { swap_interval(self.dpy(), interval) == ffi::EGL_TRUE },
            None => false,
        }
    }

    fn query_surface(&self, surface: EglSurface, attribute: EGLint) -> Option<EGLint> {
        let query = self.egl::<ffi::eglQuerySurface>("eglQuerySurface")?;
        let mut value = 0;
        let status = unsafe { query(self.dpy(), surface.0 as ffi::EGLSurface, attribute, &mut value) };
        (status == ffi::EGL_TRUE).then_some(value)
    }

    fn finish(&self) {
        let Some(address) = self.resolve("glFinish") else {
            return;
        };
        // SAFETY: glFinish takes no arguments and returns nothing
        let finish = unsafe { std::mem::transmute::<*mut c_void, ffi::glFinish>(address.as_ptr()) };
        unsafe { finish() };
    }

    fn get_error(&self) -> EGLint {
        match self.egl::<ffi::eglGetError>("eglGetError") {
            Some(get_error) => unsafe { get_error() },
            None => ffi::EGL_NOT_INITIALIZED,
        }
    }
}

impl Drop for EglLibrary {
    fn drop(&mut self) {
        self.terminate();
    }
}
