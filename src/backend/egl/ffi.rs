//! Raw EGL types, constants and entry points

#![allow(non_camel_case_types, non_upper_case_globals, dead_code)]

use std::ffi::{c_char, c_uint, c_void};

pub type EGLint = i32;
pub type EGLBoolean = c_uint;
pub type EGLenum = c_uint;
pub type EGLDisplay = *mut c_void;
pub type EGLConfig = *mut c_void;
pub type EGLContext = *mut c_void;
pub type EGLSurface = *mut c_void;
pub type EGLNativeDisplayType = *mut c_void;
pub type EGLNativeWindowType = *mut c_void;

pub const EGL_FALSE: EGLBoolean = 0;
pub const EGL_TRUE: EGLBoolean = 1;

pub const EGL_SUCCESS: EGLint = 0x3000;
pub const EGL_NOT_INITIALIZED: EGLint = 0x3001;
pub const EGL_BAD_ACCESS: EGLint = 0x3002;
pub const EGL_BAD_ALLOC: EGLint = 0x3003;
pub const EGL_BAD_ATTRIBUTE: EGLint = 0x3004;
pub const EGL_BAD_CONFIG: EGLint = 0x3005;
pub const EGL_BAD_CONTEXT: EGLint = 0x3006;
pub const EGL_BAD_CURRENT_SURFACE: EGLint = 0x3007;
pub const EGL_BAD_DISPLAY: EGLint = 0x3008;
pub const EGL_BAD_MATCH: EGLint = 0x3009;
pub const EGL_BAD_NATIVE_PIXMAP: EGLint = 0x300A;
pub const EGL_BAD_NATIVE_WINDOW: EGLint = 0x300B;
pub const EGL_BAD_PARAMETER: EGLint = 0x300C;
pub const EGL_BAD_SURFACE: EGLint = 0x300D;
pub const EGL_CONTEXT_LOST: EGLint = 0x300E;

pub const EGL_BUFFER_SIZE: EGLint = 0x3020;
pub const EGL_ALPHA_SIZE: EGLint = 0x3021;
pub const EGL_BLUE_SIZE: EGLint = 0x3022;
pub const EGL_GREEN_SIZE: EGLint = 0x3023;
pub const EGL_RED_SIZE: EGLint = 0x3024;
pub const EGL_DEPTH_SIZE: EGLint = 0x3025;
pub const EGL_STENCIL_SIZE: EGLint = 0x3026;
pub const EGL_NATIVE_VISUAL_ID: EGLint = 0x302E;
pub const EGL_SAMPLES: EGLint = 0x3031;
pub const EGL_SAMPLE_BUFFERS: EGLint = 0x3032;
pub const EGL_SURFACE_TYPE: EGLint = 0x3033;
pub const EGL_NONE: EGLint = 0x3038;
pub const EGL_RENDERABLE_TYPE: EGLint = 0x3040;
pub const EGL_DONT_CARE: EGLint = -1;

pub const EGL_WINDOW_BIT: EGLint = 0x0004;
pub const EGL_OPENGL_ES2_BIT: EGLint = 0x0004;
pub const EGL_OPENGL_BIT: EGLint = 0x0008;

pub const EGL_VERSION: EGLint = 0x3054;
pub const EGL_EXTENSIONS: EGLint = 0x3055;
pub const EGL_CONTEXT_CLIENT_VERSION: EGLint = 0x3098;
pub const EGL_OPENGL_ES_API: EGLenum = 0x30A0;
pub const EGL_OPENGL_API: EGLenum = 0x30A2;

// EGL_KHR_create_context
pub const EGL_CONTEXT_MAJOR_VERSION_KHR: EGLint = 0x3098;
pub const EGL_CONTEXT_MINOR_VERSION_KHR: EGLint = 0x30FB;
pub const EGL_CONTEXT_FLAGS_KHR: EGLint = 0x30FC;
pub const EGL_CONTEXT_OPENGL_PROFILE_MASK_KHR: EGLint = 0x30FD;
pub const EGL_CONTEXT_OPENGL_CORE_PROFILE_BIT_KHR: EGLint = 0x0001;
pub const EGL_CONTEXT_OPENGL_FORWARD_COMPATIBLE_BIT_KHR: EGLint = 0x0002;

// EGL_EXT_buffer_age
pub const EGL_BUFFER_AGE_EXT: EGLint = 0x313D;

pub type eglGetDisplay = unsafe extern "C" fn(display: EGLNativeDisplayType) -> EGLDisplay;
pub type eglInitialize = unsafe extern "C" fn(dpy: EGLDisplay, major: *mut EGLint, minor: *mut EGLint) -> EGLBoolean;
pub type eglTerminate = unsafe extern "C" fn(dpy: EGLDisplay) -> EGLBoolean;
pub type eglQueryString = unsafe extern "C" fn(dpy: EGLDisplay, name: EGLint) -> *const c_char;
pub type eglBindAPI = unsafe extern "C" fn(api: EGLenum) -> EGLBoolean;
pub type eglChooseConfig = unsafe extern "C" fn(
    dpy: EGLDisplay,
    attrib_list: *const EGLint,
    configs: *mut EGLConfig,
    config_size: EGLint,
    num_config: *mut EGLint,
) -> EGLBoolean;
pub type eglGetConfigAttrib =
    unsafe extern "C" fn(dpy: EGLDisplay, config: EGLConfig, attribute: EGLint, value: *mut EGLint) -> EGLBoolean;
pub type eglCreateContext = unsafe extern "C" fn(
    dpy: EGLDisplay,
    config: EGLConfig,
    share_context: EGLContext,
    attrib_list: *const EGLint,
) -> EGLContext;
pub type eglDestroyContext = unsafe extern "C" fn(dpy: EGLDisplay, ctx: EGLContext) -> EGLBoolean;
pub type eglCreateWindowSurface = unsafe extern "C" fn(
    dpy: EGLDisplay,
    config: EGLConfig,
    win: EGLNativeWindowType,
    attrib_list: *const EGLint,
) -> EGLSurface;
pub type eglDestroySurface = unsafe extern "C" fn(dpy: EGLDisplay, surface: EGLSurface) -> EGLBoolean;
pub type eglMakeCurrent =
    unsafe extern "C" fn(dpy: EGLDisplay, draw: EGLSurface, read: EGLSurface, ctx: EGLContext) -> EGLBoolean;
pub type eglSwapBuffers = unsafe extern "C" fn(dpy: EGLDisplay, surface: EGLSurface) -> EGLBoolean;
pub type eglSwapInterval = unsafe extern "C" fn(dpy: EGLDisplay, interval: EGLint) -> EGLBoolean;
pub type eglQuerySurface =
    unsafe extern "C" fn(dpy: EGLDisplay, surface: EGLSurface, attribute: EGLint, value: *mut EGLint) -> EGLBoolean;
pub type eglGetError = unsafe extern "C" fn() -> EGLint;
pub type eglGetProcAddress = unsafe extern "C" fn(procname: *const c_char) -> *mut c_void;

// EGL_NOK_swap_region
pub type eglSwapBuffersRegion =
    unsafe extern "C" fn(dpy: EGLDisplay, surface: EGLSurface, num_rects: EGLint, rects: *const EGLint) -> EGLBoolean;
// EGL_EXT_swap_buffers_with_damage and EGL_KHR_swap_buffers_with_damage
pub type eglSwapBuffersWithDamage =
    unsafe extern "C" fn(dpy: EGLDisplay, surface: EGLSurface, rects: *const EGLint, n_rects: EGLint) -> EGLBoolean;

pub type glFinish = unsafe extern "C" fn();
