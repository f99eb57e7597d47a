use super::{driver::EglDriver, ffi};

/// EGL errors
#[derive(thiserror::Error, Debug)]
pub enum EglError {
    /// No EGL display could be obtained for the native display
    #[error("No EGL display for the native display")]
    DisplayNotSupported,
    /// `eglInitialize` returned an error
    #[error("eglInitialize failed: {0}")]
    InitFailed(#[source] EglErrorCode),
    /// `eglBindAPI` returned an error
    #[error("eglBindAPI failed: {0}")]
    BindApi(#[source] EglErrorCode),
    /// No config matched the attributes
    #[error("No EGL config matches the requested attributes")]
    NoConfig,
    /// `eglCreateContext` returned an error
    #[error("eglCreateContext failed: {0}")]
    CreateContext(#[source] EglErrorCode),
    /// `eglCreateWindowSurface` returned an error
    #[error("eglCreateWindowSurface failed: {0}")]
    CreateSurface(#[source] EglErrorCode),
    /// `eglMakeCurrent` returned an error
    #[error("eglMakeCurrent failed: {0}")]
    MakeCurrent(#[source] EglErrorCode),
    /// An extension entry point was called without being resolved
    #[error("{0} is not available")]
    MissingEntryPoint(&'static str),
    /// Any other failed call
    #[error("{call} failed: {code}")]
    Call {
        /// Entry point that failed
        call: &'static str,
        /// Reported error
        #[source]
        code: EglErrorCode,
    },
}

/// Error code reported by `eglGetError`
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EglErrorCode {
    /// `EGL_NOT_INITIALIZED`
    #[error("the display is not initialized")]
    NotInitialized,
    /// `EGL_BAD_ACCESS`
    #[error("a requested resource is in use, e.g. a context current in another thread")]
    BadAccess,
    /// `EGL_BAD_ALLOC`
    #[error("out of resources")]
    BadAlloc,
    /// `EGL_BAD_ATTRIBUTE`
    #[error("unknown attribute or attribute value")]
    BadAttribute,
    /// `EGL_BAD_CONTEXT`
    #[error("invalid context")]
    BadContext,
    /// `EGL_BAD_CONFIG`
    #[error("invalid config")]
    BadConfig,
    /// `EGL_BAD_CURRENT_SURFACE`
    #[error("the current surface is no longer valid")]
    BadCurrentSurface,
    /// `EGL_BAD_DISPLAY`
    #[error("invalid display")]
    BadDisplay,
    /// `EGL_BAD_SURFACE`
    #[error("invalid surface")]
    BadSurface,
    /// `EGL_BAD_MATCH`
    #[error("inconsistent arguments, e.g. a surface not matching the context's config")]
    BadMatch,
    /// `EGL_BAD_PARAMETER`
    #[error("invalid argument")]
    BadParameter,
    /// `EGL_BAD_NATIVE_PIXMAP`
    #[error("invalid native pixmap")]
    BadNativePixmap,
    /// `EGL_BAD_NATIVE_WINDOW`
    #[error("invalid native window")]
    BadNativeWindow,
    /// `EGL_CONTEXT_LOST`, every context has to be recreated
    #[error("the context was lost after a power management event")]
    ContextLost,
    /// Any other code
    #[error("unknown error {0:#x}")]
    Unknown(i32),
}

impl From<i32> for EglErrorCode {
    fn from(value: i32) -> Self {
        match value {
            ffi::EGL_NOT_INITIALIZED => EglErrorCode::NotInitialized,
            ffi::EGL_BAD_ACCESS => EglErrorCode::BadAccess,
            ffi::EGL_BAD_ALLOC => EglErrorCode::BadAlloc,
            ffi::EGL_BAD_ATTRIBUTE => EglErrorCode::BadAttribute,
            ffi::EGL_BAD_CONTEXT => EglErrorCode::BadContext,
            ffi::EGL_BAD_CONFIG => EglErrorCode::BadConfig,
            ffi::EGL_BAD_CURRENT_SURFACE => EglErrorCode::BadCurrentSurface,
            ffi::EGL_BAD_DISPLAY => EglErrorCode::BadDisplay,
            ffi::EGL_BAD_SURFACE => EglErrorCode::BadSurface,
            ffi::EGL_BAD_MATCH => EglErrorCode::BadMatch,
            ffi::EGL_BAD_PARAMETER => EglErrorCode::BadParameter,
            ffi::EGL_BAD_NATIVE_PIXMAP => EglErrorCode::BadNativePixmap,
            ffi::EGL_BAD_NATIVE_WINDOW => EglErrorCode::BadNativeWindow,
            ffi::EGL_CONTEXT_LOST => EglErrorCode::ContextLost,
            x => EglErrorCode::Unknown(x),
        }
    }
}

impl EglErrorCode {
    fn from_last_call<D: EglDriver + ?Sized>(driver: &D) -> Result<(), EglErrorCode> {
        match driver.get_error() {
            ffi::EGL_SUCCESS => Ok(()),
            x => Err(EglErrorCode::from(x)),
        }
    }
}

/// Run `call`, then report the error EGL recorded for it, if any
pub(crate) fn wrap_egl_call<D: EglDriver + ?Sized, R, F: FnOnce() -> R>(driver: &D, call: F) -> Result<R, EglErrorCode> {
    let res = call();
    EglErrorCode::from_last_call(driver).map(|()| res)
}
