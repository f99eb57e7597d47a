//! Access to the GLX implementation
//!
//! [`GlxDriver`] is the seam between the GLX backend and the driver. [`GlxLibrary`] implements it
//! on top of `libGL` for an Xlib display. Entry points of optional extensions are only callable
//! once the backend handed the resolved symbols over with [`GlxDriver::set_extension_symbols`];
//! until then they report failure.

use std::{
    cell::RefCell,
    ffi::{c_int, c_uint, c_ulong, c_void, CStr, CString},
    fmt,
    ptr::{self, NonNull},
};

use tracing::trace;
use x11_dl::{
    glx::{self, Glx, GLXContext, GLXFBConfig},
    xlib::{self, Xlib},
};

use crate::{
    backend::{
        winsys::{LoaderError, SymbolLoader, SymbolTable},
        x11::VisualMasks,
    },
    utils::Rectangle,
};

use super::ffi;

/// A `GLXFBConfig` handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FbConfig(pub usize);

/// A `GLXContext` handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlxContext(pub usize);

/// The X visual of a config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisualInfo {
    /// Visual id
    pub visual: u32,
    /// Depth of the visual
    pub depth: u8,
    /// Channel masks
    pub masks: VisualMasks,
}

/// GLX and GL calls used by the backend
#[allow(missing_docs)]
pub trait GlxDriver: fmt::Debug {
    /// GLX version, `None` if the server lacks the extension
    fn query_version(&self) -> Option<(u32, u32)>;
    /// Client and server extension string of the screen
    fn extensions(&self) -> String;
    /// Resolves extension and GL entry points
    fn loader(&self) -> &dyn SymbolLoader;
    /// Make the detected extension entry points callable
    fn set_extension_symbols(&self, symbols: SymbolTable);
    fn get_proc_address(&self, name: &str) -> Option<NonNull<c_void>>;

    /// Configs matching `attributes`, best first
    fn choose_fb_configs(&self, attributes: &[c_int]) -> Vec<FbConfig>;
    /// Every config of the screen
    fn fb_configs(&self) -> Vec<FbConfig>;
    fn fb_config_attrib(&self, config: FbConfig, attribute: c_int) -> Option<c_int>;
    fn visual_info(&self, config: FbConfig) -> Option<VisualInfo>;

    fn create_new_context(&self, config: FbConfig) -> Option<GlxContext>;
    /// `glXCreateContextAttribs`, requires the create context extension
    fn create_context_attribs(&self, config: FbConfig, attributes: &[c_int]) -> Option<GlxContext>;
    fn is_direct(&self, context: GlxContext) -> bool;
    fn destroy_context(&self, context: GlxContext);
    /// Bind `context` to `drawable`, or release the current context
    fn make_current(&self, drawable: u32, context: Option<GlxContext>) -> bool;

    fn create_window(&self, config: FbConfig, window: u32) -> Option<u32>;
    fn destroy_window(&self, drawable: u32);
    fn swap_buffers(&self, drawable: u32);
    /// Value of a drawable attribute.
    ///
    /// A bad drawable is reported through the X error handler, so callers trap errors around
    /// the query and discard the value when one was caught.
    fn query_drawable(&self, drawable: u32, attribute: c_int) -> Option<u32>;
    fn select_event(&self, drawable: u32, mask: c_ulong);

    fn swap_interval(&self, interval: c_int) -> bool;
    fn get_video_sync(&self) -> Option<u32>;
    /// Block until the video sync counter moves
    fn wait_video_sync(&self) -> bool;
    /// Block until the next media stream counter increment of `drawable`
    fn wait_for_msc(&self, drawable: u32) -> bool;
    fn copy_sub_buffer(&self, drawable: u32, area: Rectangle) -> bool;
    fn create_pixmap(&self, config: FbConfig, pixmap: u32, attributes: &[c_int]) -> Option<u32>;
    fn destroy_pixmap(&self, glx_pixmap: u32);
    fn bind_tex_image(&self, glx_pixmap: u32);
    fn release_tex_image(&self, glx_pixmap: u32);

    fn finish(&self);
    fn flush(&self);
    fn has_blit_framebuffer(&self) -> bool;
    /// Copy `areas` of the back buffer to the front buffer
    fn blit_to_front(&self, areas: &[Rectangle]);
    fn gen_texture(&self) -> Option<u32>;
    fn bind_texture(&self, texture: u32);
    fn delete_texture(&self, texture: u32);
}

const GL_REQUIRED: &[&str] = &["glFinish", "glFlush", "glGenTextures", "glBindTexture", "glDeleteTextures"];
const GL_OPTIONAL: &[&str] = &["glBlitFramebuffer", "glDrawBuffer", "glReadBuffer"];

/// `libGL` bound to an Xlib display
pub struct GlxLibrary {
    xlib: Xlib,
    glx: Glx,
    display: *mut xlib::Display,
    screen: c_int,
    gl: SymbolTable,
    extensions: RefCell<SymbolTable>,
}

impl fmt::Debug for GlxLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlxLibrary")
            .field("display", &self.display)
            .field("screen", &self.screen)
            .field("extensions", &self.extensions.borrow().len())
            .finish_non_exhaustive()
    }
}

impl GlxLibrary {
    /// Load `libGL` for `display`
    ///
    /// # Safety
    ///
    /// `display` must be a valid Xlib `Display*` outliving the library.
    pub unsafe fn open(display: *mut c_void, screen: usize) -> Result<GlxLibrary, LoaderError> {
        let xlib = Xlib::open().map_err(|err| LoaderError::Open {
            name: "libX11.so.6",
            reason: err.to_string(),
        })?;
        let glx = Glx::open().map_err(|err| LoaderError::Open {
            name: "libGL.so.1",
            reason: err.to_string(),
        })?;

        let mut library = GlxLibrary {
            xlib,
            glx,
            display: display as *mut xlib::Display,
            screen: screen as c_int,
            gl: SymbolTable::new(),
            extensions: RefCell::new(SymbolTable::new()),
        };

        let mut gl = SymbolTable::new();
        gl.load_required(&library, GL_REQUIRED)?;
        for &name in GL_OPTIONAL {
            if let Some(address) = library.resolve(name) {
                gl.insert(name, address);
            }
        }
        library.gl = gl;
        Ok(library)
    }

    fn gl<F: Copy>(&self, name: &str) -> Option<F> {
        // SAFETY: every caller names `F` after the ffi alias of `name`
        unsafe { self.gl.get::<F>(name) }
    }

    fn ext<F: Copy>(&self, name: &str) -> Option<F> {
        // SAFETY: every caller names `F` after the ffi alias of `name`
        unsafe { self.extensions.borrow().get::<F>(name) }
    }

    fn config(config: FbConfig) -> GLXFBConfig {
        config.0 as GLXFBConfig
    }

    fn context(context: GlxContext) -> GLXContext {
        context.0 as GLXContext
    }

    fn collect_configs(&self, list: *mut GLXFBConfig, count: c_int) -> Vec<FbConfig> {
        if list.is_null() {
            return Vec::new();
        }
        // SAFETY: GLX returned `count` configs at `list`, freed below
        let configs = unsafe { std::slice::from_raw_parts(list, count.max(0) as usize) }
            .iter()
            .map(|config| FbConfig(*config as usize))
            .collect();
        unsafe { (self.xlib.XFree)(list as *mut c_void) };
        configs
    }
}

impl SymbolLoader for GlxLibrary {
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>> {
        let symbol = CString::new(name).ok()?;
        let address = unsafe { (self.glx.glXGetProcAddress)(symbol.as_ptr() as *const u8) }?;
        NonNull::new(address as *mut c_void)
    }
}

impl GlxDriver for GlxLibrary {
    fn query_version(&self) -> Option<(u32, u32)> {
        let (mut error_base, mut event_base) = (0, 0);
        let (mut major, mut minor) = (0, 0);
        unsafe {
            if (self.glx.glXQueryExtension)(self.display, &mut error_base, &mut event_base) == 0 {
                return None;
            }
            if (self.glx.glXQueryVersion)(self.display, &mut major, &mut minor) == 0 {
                return None;
            }
        }
        Some((major as u32, minor as u32))
    }

    fn extensions(&self) -> String {
        let extensions = unsafe { (self.glx.glXQueryExtensionsString)(self.display, self.screen) };
        if extensions.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(extensions) }.to_string_lossy().into_owned()
    }

    fn loader(&self) -> &dyn SymbolLoader {
        self
    }

    fn set_extension_symbols(&self, symbols: SymbolTable) {
        trace!(count = symbols.len(), "GLX extension entry points resolved");
        *self.extensions.borrow_mut() = symbols;
    }

    fn get_proc_address(&self, name: &str) -> Option<NonNull<c_void>> {
        self.resolve(name)
    }

    fn choose_fb_configs(&self, attributes: &[c_int]) -> Vec<FbConfig> {
        let mut terminated = attributes.to_vec();
        terminated.push(0);
        let mut count = 0;
        let list =
            unsafe { (self.glx.glXChooseFBConfig)(self.display, self.screen, terminated.as_ptr(), &mut count) };
        self.collect_configs(list, count)
    }

    fn fb_configs(&self) -> Vec<FbConfig> {
        let mut count = 0;
        let list = unsafe { (self.glx.glXGetFBConfigs)(self.display, self.screen, &mut count) };
        self.collect_configs(list, count)
    }

    fn fb_config_attrib(&self, config: FbConfig, attribute: c_int) -> Option<c_int> {
        let mut value = 0;
        let status =
            unsafe { (self.glx.glXGetFBConfigAttrib)(self.display, Self::config(config), attribute, &mut value) };
        (status == 0).then_some(value)
    }

    fn visual_info(&self, config: FbConfig) -> Option<VisualInfo> {
        let info = unsafe { (self.glx.glXGetVisualFromFBConfig)(self.display, Self::config(config)) };
        if info.is_null() {
            return None;
        }
        // SAFETY: non-null results point to one XVisualInfo, freed below
        let visual = unsafe {
            let visual = &*info;
            VisualInfo {
                visual: visual.visualid as u32,
                depth: visual.depth as u8,
                masks: VisualMasks {
                    red: visual.red_mask as u32,
                    green: visual.green_mask as u32,
                    blue: visual.blue_mask as u32,
                },
            }
        };
        unsafe { (self.xlib.XFree)(info as *mut c_void) };
        Some(visual)
    }

    fn create_new_context(&self, config: FbConfig) -> Option<GlxContext> {
        let context = unsafe {
            (self.glx.glXCreateNewContext)(
                self.display,
                Self::config(config),
                glx::GLX_RGBA_TYPE,
                ptr::null_mut(),
                xlib::True,
            )
        };
        (!context.is_null()).then(|| GlxContext(context as usize))
    }

    fn create_context_attribs(&self, config: FbConfig, attributes: &[c_int]) -> Option<GlxContext> {
        let create = self.ext::<ffi::glXCreateContextAttribs>("glXCreateContextAttribs")?;
        let mut terminated = attributes.to_vec();
        terminated.push(0);
        let context = unsafe {
            create(
                self.display,
                Self::config(config),
                ptr::null_mut(),
                xlib::True,
                terminated.as_ptr(),
            )
        };
        (!context.is_null()).then(|| GlxContext(context as usize))
    }

    fn is_direct(&self, context: GlxContext) -> bool {
        unsafe { (self.glx.glXIsDirect)(self.display, Self::context(context)) != 0 }
    }

    fn destroy_context(&self, context: GlxContext) {
        unsafe { (self.glx.glXDestroyContext)(self.display, Self::context(context)) };
    }

    fn make_current(&self, drawable: u32, context: Option<GlxContext>) -> bool {
        let context = context.map_or(ptr::null_mut(), Self::context);
        unsafe { (self.glx.glXMakeCurrent)(self.display, c_ulong::from(drawable), context) != 0 }
    }

    fn create_window(&self, config: FbConfig, window: u32) -> Option<u32> {
        let drawable = unsafe {
            (self.glx.glXCreateWindow)(self.display, Self::config(config), c_ulong::from(window), ptr::null())
        };
        (drawable != 0).then_some(drawable as u32)
    }

    fn destroy_window(&self, drawable: u32) {
        unsafe { (self.glx.glXDestroyWindow)(self.display, c_ulong::from(drawable)) };
    }

    fn swap_buffers(&self, drawable: u32) {
        unsafe { (self.glx.glXSwapBuffers)(self.display, c_ulong::from(drawable)) };
    }

    fn query_drawable(&self, drawable: u32, attribute: c_int) -> Option<u32> {
        let mut value: c_uint = 0;
        unsafe { (self.glx.glXQueryDrawable)(self.display, c_ulong::from(drawable), attribute, &mut value) };
        Some(value)
    }

    fn select_event(&self, drawable: u32, mask: c_ulong) {
        unsafe { (self.glx.glXSelectEvent)(self.display, c_ulong::from(drawable), mask) };
    }

    fn swap_interval(&self, interval: c_int) -> bool {
        match self.ext::<ffi::glXSwapInterval>("glXSwapInterval") {
            Some(swap_interval) => unsafe { swap_interval(interval) == 0 },
            None => false,
        }
    }

    fn get_video_sync(&self) -> Option<u32> {
        let get = self.ext::<ffi::glXGetVideoSync>("glXGetVideoSync")?;
        let mut count = 0;
        (unsafe { get(&mut count) } == 0).then_some(count)
    }

    fn wait_video_sync(&self) -> bool {
        let Some(wait) = self.ext::<ffi::glXWaitVideoSync>("glXWaitVideoSync") else {
            return false;
        };
        let Some(mut count) = self.get_video_sync() else {
            return false;
        };
        unsafe { wait(2, ((count + 1) % 2) as c_int, &mut count) == 0 }
    }

    fn wait_for_msc(&self, drawable: u32) -> bool {
        let Some(wait) = self.ext::<ffi::glXWaitForMsc>("glXWaitForMsc") else {
            return false;
        };
        let (mut ust, mut msc, mut sbc) = (0, 0, 0);
        unsafe { wait(self.display, c_ulong::from(drawable), 0, 1, 0, &mut ust, &mut msc, &mut sbc) != 0 }
    }

    fn copy_sub_buffer(&self, drawable: u32, area: Rectangle) -> bool {
        let Some(copy) = self.ext::<ffi::glXCopySubBuffer>("glXCopySubBuffer") else {
            return false;
        };
        unsafe {
            copy(
                self.display,
                c_ulong::from(drawable),
                area.x,
                area.y,
                area.width,
                area.height,
            )
        };
        true
    }

    fn create_pixmap(&self, config: FbConfig, pixmap: u32, attributes: &[c_int]) -> Option<u32> {
        let mut terminated = attributes.to_vec();
        terminated.push(0);
        let drawable = unsafe {
            (self.glx.glXCreatePixmap)(
                self.display,
                Self::config(config),
                c_ulong::from(pixmap),
                terminated.as_ptr(),
            )
        };
        (drawable != 0).then_some(drawable as u32)
    }

    fn destroy_pixmap(&self, glx_pixmap: u32) {
        unsafe { (self.glx.glXDestroyPixmap)(self.display, c_ulong::from(glx_pixmap)) };
    }

    fn bind_tex_image(&self, glx_pixmap: u32) {
        if let Some(bind) = self.ext::<ffi::glXBindTexImage>("glXBindTexImage") {
            unsafe {
                bind(
                    self.display,
                    c_ulong::from(glx_pixmap),
                    ffi::GLX_FRONT_LEFT_EXT,
                    ptr::null(),
                )
            };
        }
    }

    fn release_tex_image(&self, glx_pixmap: u32) {
        if let Some(release) = self.ext::<ffi::glXReleaseTexImage>("glXReleaseTexImage") {
            unsafe { release(self.display, c_ulong::from(glx_pixmap), ffi::GLX_FRONT_LEFT_EXT) };
        }
    }

    fn finish(&self) {
        if let Some(finish) = self.gl::<ffi::glFinish>("glFinish") {
            unsafe { finish() };
        }
    }

    fn flush(&self) {
        if let Some(flush) = self.gl::<ffi::glFlush>("glFlush") {
            unsafe { flush() };
        }
    }

    fn has_blit_framebuffer(&self) -> bool {
        ["glBlitFramebuffer", "glDrawBuffer", "glReadBuffer"]
            .iter()
            .all(|name| self.gl.contains(name))
    }

    fn blit_to_front(&self, areas: &[Rectangle]) {
        let (Some(blit), Some(draw_buffer), Some(read_buffer)) = (
            self.gl::<ffi::glBlitFramebuffer>("glBlitFramebuffer"),
            self.gl::<ffi::glDrawBuffer>("glDrawBuffer"),
            self.gl::<ffi::glReadBuffer>("glReadBuffer"),
        ) else {
            return;
        };
        unsafe {
            draw_buffer(ffi::GL_FRONT);
            read_buffer(ffi::GL_BACK);
            for area in areas {
                let (x1, y1) = (area.x + area.width, area.y + area.height);
                blit(
                    area.x,
                    area.y,
                    x1,
                    y1,
                    area.x,
                    area.y,
                    x1,
                    y1,
                    ffi::GL_COLOR_BUFFER_BIT,
                    ffi::GL_NEAREST,
                );
            }
            draw_buffer(ffi::GL_BACK);
        }
    }

    fn gen_texture(&self) -> Option<u32> {
        let gen = self.gl::<ffi::glGenTextures>("glGenTextures")?;
        let mut texture = 0;
        unsafe { gen(1, &mut texture) };
        (texture != 0).then_some(texture)
    }

    fn bind_texture(&self, texture: u32) {
        if let Some(bind) = self.gl::<ffi::glBindTexture>("glBindTexture") {
            unsafe { bind(ffi::GL_TEXTURE_2D, texture) };
        }
    }

    fn delete_texture(&self, texture: u32) {
        if let Some(delete) = self.gl::<ffi::glDeleteTextures>("glDeleteTextures") {
            unsafe { delete(1, &texture) };
        }
    }
}
