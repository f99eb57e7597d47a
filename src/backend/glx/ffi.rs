//! Raw GLX extension and GL entry points not covered by `x11_dl::glx`

#![allow(non_camel_case_types, non_upper_case_globals, dead_code)]

use std::ffi::{c_int, c_uint, c_ulong};

use x11_dl::{
    glx::{GLXContext, GLXFBConfig},
    xlib::{Bool, Display},
};

pub type GLenum = c_uint;
pub type GLuint = c_uint;
pub type GLint = c_int;
pub type GLsizei = c_int;
pub type GLbitfield = c_uint;

pub const GLX_DONT_CARE: c_int = -1;
pub const GLX_SAMPLE_BUFFERS: c_int = 100_000;
pub const GLX_SAMPLES: c_int = 100_001;

// GLX_ARB_create_context and GLX_ARB_create_context_profile
pub const GLX_CONTEXT_MAJOR_VERSION_ARB: c_int = 0x2091;
pub const GLX_CONTEXT_MINOR_VERSION_ARB: c_int = 0x2092;
pub const GLX_CONTEXT_FLAGS_ARB: c_int = 0x2094;
pub const GLX_CONTEXT_PROFILE_MASK_ARB: c_int = 0x9126;
pub const GLX_CONTEXT_CORE_PROFILE_BIT_ARB: c_int = 0x0001;
pub const GLX_CONTEXT_FORWARD_COMPATIBLE_BIT_ARB: c_int = 0x0002;

// GLX_EXT_buffer_age
pub const GLX_BACK_BUFFER_AGE_EXT: c_int = 0x20F4;

// GLX_INTEL_swap_event
pub const GLX_BUFFER_SWAP_COMPLETE_INTEL_MASK: c_ulong = 0x0400_0000;

// GLX_EXT_texture_from_pixmap
pub const GLX_BIND_TO_TEXTURE_RGB_EXT: c_int = 0x20D0;
pub const GLX_BIND_TO_TEXTURE_RGBA_EXT: c_int = 0x20D1;
pub const GLX_BIND_TO_MIPMAP_TEXTURE_EXT: c_int = 0x20D2;
pub const GLX_TEXTURE_FORMAT_EXT: c_int = 0x20D5;
pub const GLX_TEXTURE_TARGET_EXT: c_int = 0x20D6;
pub const GLX_MIPMAP_TEXTURE_EXT: c_int = 0x20D7;
pub const GLX_TEXTURE_FORMAT_RGB_EXT: c_int = 0x20D9;
pub const GLX_TEXTURE_FORMAT_RGBA_EXT: c_int = 0x20DA;
pub const GLX_TEXTURE_2D_EXT: c_int = 0x20DC;
pub const GLX_FRONT_LEFT_EXT: c_int = 0x20DE;

pub const GL_TEXTURE_2D: GLenum = 0x0DE1;
pub const GL_FRONT: GLenum = 0x0404;
pub const GL_BACK: GLenum = 0x0405;
pub const GL_COLOR_BUFFER_BIT: GLbitfield = 0x0000_4000;
pub const GL_NEAREST: GLenum = 0x2600;

pub type glXSwapInterval = unsafe extern "C" fn(interval: c_int) -> c_int;
pub type glXGetVideoSync = unsafe extern "C" fn(count: *mut c_uint) -> c_int;
pub type glXWaitVideoSync = unsafe extern "C" fn(divisor: c_int, remainder: c_int, count: *mut c_uint) -> c_int;
pub type glXWaitForMsc = unsafe extern "C" fn(
    display: *mut Display,
    drawable: c_ulong,
    target_msc: i64,
    divisor: i64,
    remainder: i64,
    ust: *mut i64,
    msc: *mut i64,
    sbc: *mut i64,
) -> Bool;
pub type glXCopySubBuffer =
    unsafe extern "C" fn(display: *mut Display, drawable: c_ulong, x: c_int, y: c_int, width: c_int, height: c_int);
pub type glXBindTexImage =
    unsafe extern "C" fn(display: *mut Display, drawable: c_ulong, buffer: c_int, attributes: *const c_int);
pub type glXReleaseTexImage = unsafe extern "C" fn(display: *mut Display, drawable: c_ulong, buffer: c_int);
pub type glXCreateContextAttribs = unsafe extern "C" fn(
    display: *mut Display,
    config: GLXFBConfig,
    share: GLXContext,
    direct: Bool,
    attributes: *const c_int,
) -> GLXContext;

pub type glFinish = unsafe extern "C" fn();
pub type glFlush = unsafe extern "C" fn();
pub type glGenTextures = unsafe extern "C" fn(n: GLsizei, textures: *mut GLuint);
pub type glBindTexture = unsafe extern "C" fn(target: GLenum, texture: GLuint);
pub type glDeleteTextures = unsafe extern "C" fn(n: GLsizei, textures: *const GLuint);
pub type glDrawBuffer = unsafe extern "C" fn(mode: GLenum);
pub type glReadBuffer = unsafe extern "C" fn(mode: GLenum);
pub type glBlitFramebuffer = unsafe extern "C" fn(
    src_x0: GLint,
    src_y0: GLint,
    src_x1: GLint,
    src_y1: GLint,
    dst_x0: GLint,
    dst_y0: GLint,
    dst_x1: GLint,
    dst_y1: GLint,
    mask: GLbitfield,
    filter: GLenum,
);
