//! Fake GLX driver recording every call

use std::{
    cell::{Cell, RefCell},
    ffi::{c_int, c_ulong, c_void},
    ptr::NonNull,
    rc::Rc,
};

use x11_dl::glx;

use crate::{
    backend::{
        glx::{ffi, FbConfig, GlxContext, GlxDriver, VisualInfo},
        winsys::{SymbolLoader, SymbolTable},
        x11::VisualMasks,
    },
    utils::Rectangle,
};

use super::{MockServer, ARGB_VISUAL, RGB_VISUAL};

/// One framebuffer config of a [`MockGlx`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockGlxConfig {
    pub visual: u32,
    pub depth: u8,
    /// The color masks of the visual cover every bit, leaving nothing for alpha
    pub masks_cover_everything: bool,
    pub alpha: c_int,
    pub buffer_size: c_int,
    pub stencil: c_int,
    pub doublebuffer: bool,
    pub bind_rgb: bool,
    pub bind_rgba: bool,
    pub mipmap: bool,
}

impl MockGlxConfig {
    pub fn rgb() -> Self {
        MockGlxConfig {
            visual: RGB_VISUAL,
            depth: 24,
            masks_cover_everything: false,
            alpha: 0,
            buffer_size: 24,
            stencil: 8,
            doublebuffer: true,
            bind_rgb: true,
            bind_rgba: false,
            mipmap: false,
        }
    }

    pub fn argb() -> Self {
        MockGlxConfig {
            visual: ARGB_VISUAL,
            depth: 32,
            alpha: 8,
            buffer_size: 32,
            bind_rgba: true,
            ..Self::rgb()
        }
    }

    fn attrib(&self, attribute: c_int) -> Option<c_int> {
        let value = match attribute {
            glx::GLX_ALPHA_SIZE => self.alpha,
            glx::GLX_BUFFER_SIZE => self.buffer_size,
            glx::GLX_STENCIL_SIZE => self.stencil,
            glx::GLX_DOUBLEBUFFER => c_int::from(self.doublebuffer),
            glx::GLX_STEREO | ffi::GLX_SAMPLES => 0,
            ffi::GLX_BIND_TO_TEXTURE_RGB_EXT => c_int::from(self.bind_rgb),
            ffi::GLX_BIND_TO_TEXTURE_RGBA_EXT => c_int::from(self.bind_rgba),
            ffi::GLX_BIND_TO_MIPMAP_TEXTURE_EXT => c_int::from(self.mipmap),
            _ => return None,
        };
        Some(value)
    }
}

/// A GLX implementation without a GPU.
///
/// Calls are recorded as short strings, see [`MockGlx::count`]. The video sync counter advances
/// by one on every wait.
#[derive(Debug)]
pub struct MockGlx {
    calls: RefCell<Vec<String>>,
    version: Cell<(u32, u32)>,
    extensions: RefCell<String>,
    direct: Cell<bool>,
    blit: Cell<bool>,
    buffer_age: Cell<u32>,
    fail_pixmaps: Cell<bool>,
    query_error: RefCell<Option<(Rc<MockServer>, u8)>>,
    configs: RefCell<Vec<MockGlxConfig>>,
    symbols: RefCell<SymbolTable>,
    counter: Cell<u32>,
    next_id: Cell<u32>,
}

impl Default for MockGlx {
    fn default() -> Self {
        MockGlx {
            calls: RefCell::default(),
            version: Cell::new((1, 4)),
            extensions: RefCell::default(),
            direct: Cell::new(true),
            blit: Cell::new(false),
            buffer_age: Cell::new(0),
            fail_pixmaps: Cell::new(false),
            query_error: RefCell::new(None),
            configs: RefCell::new(vec![MockGlxConfig::rgb()]),
            symbols: RefCell::default(),
            counter: Cell::new(0),
            next_id: Cell::new(0x0080_0001),
        }
    }
}

impl MockGlx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_version(&self, version: (u32, u32)) {
        self.version.set(version);
    }

    pub fn set_extensions(&self, extensions: &str) {
        *self.extensions.borrow_mut() = extensions.to_owned();
    }

    pub fn set_direct(&self, direct: bool) {
        self.direct.set(direct);
    }

    pub fn set_configs(&self, configs: Vec<MockGlxConfig>) {
        *self.configs.borrow_mut() = configs;
    }

    pub fn set_blit(&self, blit: bool) {
        self.blit.set(blit);
    }

    pub fn set_buffer_age(&self, age: u32) {
        self.buffer_age.set(age);
    }

    pub fn fail_pixmaps(&self, fail: bool) {
        self.fail_pixmaps.set(fail);
    }

    /// `glXQueryDrawable` raises X error `code` on `server`
    pub fn fail_queries(&self, server: Rc<MockServer>, code: u8) {
        *self.query_error.borrow_mut() = Some((server, code));
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

    fn id(&self) -> u32 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn has_symbol(&self, name: &str) -> bool {
        self.symbols.borrow().contains(name)
    }

    fn config(&self, config: FbConfig) -> Option<MockGlxConfig> {
        config
            .0
            .checked_sub(1)
            .and_then(|index| self.configs.borrow().get(index).copied())
    }
}

impl SymbolLoader for MockGlx {
    fn resolve(&self, _name: &str) -> Option<NonNull<c_void>> {
        Some(NonNull::dangling())
    }
}

impl GlxDriver for MockGlx {
    fn query_version(&self) -> Option<(u32, u32)> {
        Some(self.version.get())
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

    fn choose_fb_configs(&self, attributes: &[c_int]) -> Vec<FbConfig> {
        self.record("choose_fb_configs");
        let required = |attribute: c_int| {
            attributes
                .chunks(2)
                .any(|pair| pair[0] == attribute && pair.get(1) == Some(&1))
        };
        let (need_stencil, need_alpha) = (required(glx::GLX_STENCIL_SIZE), required(glx::GLX_ALPHA_SIZE));

        self.configs
            .borrow()
            .iter()
            .enumerate()
            .filter(|(_, config)| !need_stencil || config.stencil > 0)
            .filter(|(_, config)| !need_alpha || config.alpha > 0)
            .map(|(index, _)| FbConfig(index + 1))
            .collect()
    }

    fn fb_configs(&self) -> Vec<FbConfig> {
        self.record("fb_configs");
        (1..=self.configs.borrow().len()).map(FbConfig).collect()
    }

    fn fb_config_attrib(&self, config: FbConfig, attribute: c_int) -> Option<c_int> {
        self.config(config)?.attrib(attribute)
    }

    fn visual_info(&self, config: FbConfig) -> Option<VisualInfo> {
        let config = self.config(config)?;
        let masks = if config.masks_cover_everything {
            VisualMasks {
                red: 0xffff_0000,
                green: 0x0000_ff00,
                blue: 0x0000_00ff,
            }
        } else {
            VisualMasks {
                red: 0x00ff_0000,
                green: 0x0000_ff00,
                blue: 0x0000_00ff,
            }
        };
        Some(VisualInfo {
            visual: config.visual,
            depth: config.depth,
            masks,
        })
    }

    fn create_new_context(&self, _config: FbConfig) -> Option<GlxContext> {
        self.record("create_new_context");
        Some(GlxContext(self.id() as usize))
    }

    fn create_context_attribs(&self, _config: FbConfig, _attributes: &[c_int]) -> Option<GlxContext> {
        self.record("create_context_attribs");
        Some(GlxContext(self.id() as usize))
    }

    fn is_direct(&self, _context: GlxContext) -> bool {
        self.direct.get()
    }

    fn destroy_context(&self, context: GlxContext) {
        self.record(format!("destroy_context {:#x}", context.0));
    }

    fn make_current(&self, drawable: u32, context: Option<GlxContext>) -> bool {
        match context {
            Some(_) => self.record(format!("make_current {drawable:#x}")),
            None => self.record("make_current none"),
        }
        true
    }

    fn create_window(&self, _config: FbConfig, window: u32) -> Option<u32> {
        self.record(format!("create_window {window:#x}"));
        Some(self.id())
    }

    fn destroy_window(&self, drawable: u32) {
        self.record(format!("destroy_window {drawable:#x}"));
    }

    fn swap_buffers(&self, drawable: u32) {
        self.record(format!("swap_buffers {drawable:#x}"));
    }

    fn query_drawable(&self, _drawable: u32, attribute: c_int) -> Option<u32> {
        if let Some((server, code)) = self.query_error.borrow().as_ref() {
            server.raise(*code);
        }
        (attribute == ffi::GLX_BACK_BUFFER_AGE_EXT).then(|| self.buffer_age.get())
    }

    fn select_event(&self, drawable: u32, mask: c_ulong) {
        self.record(format!("select_event {drawable:#x} {mask:#x}"));
    }

    fn swap_interval(&self, interval: c_int) -> bool {
        self.record(format!("swap_interval {interval}"));
        self.has_symbol("glXSwapInterval")
    }

    fn get_video_sync(&self) -> Option<u32> {
        self.has_symbol("glXGetVideoSync").then(|| self.counter.get())
    }

    fn wait_video_sync(&self) -> bool {
        self.record("wait_video_sync");
        self.counter.set(self.counter.get() + 1);
        true
    }

    fn wait_for_msc(&self, drawable: u32) -> bool {
        self.record(format!("wait_for_msc {drawable:#x}"));
        self.counter.set(self.counter.get() + 1);
        true
    }

    fn copy_sub_buffer(&self, _drawable: u32, area: Rectangle) -> bool {
        if !self.has_symbol("glXCopySubBuffer") {
            return false;
        }
        self.record(format!(
            "copy_sub_buffer {},{} {}x{}",
            area.x, area.y, area.width, area.height
        ));
        true
    }

    fn create_pixmap(&self, _config: FbConfig, _pixmap: u32, attributes: &[c_int]) -> Option<u32> {
        if self.fail_pixmaps.get() {
            return None;
        }
        let mipmap = attributes
            .chunks(2)
            .any(|pair| pair[0] == ffi::GLX_MIPMAP_TEXTURE_EXT && pair.get(1) == Some(&1));
        self.record(if mipmap { "create_pixmap mipmap" } else { "create_pixmap" });
        Some(self.id())
    }

    fn destroy_pixmap(&self, glx_pixmap: u32) {
        self.record(format!("destroy_pixmap {glx_pixmap:#x}"));
    }

    fn bind_tex_image(&self, glx_pixmap: u32) {
        self.record(format!("bind_tex_image {glx_pixmap:#x}"));
    }

    fn release_tex_image(&self, glx_pixmap: u32) {
        self.record(format!("release_tex_image {glx_pixmap:#x}"));
    }

    fn finish(&self) {
        self.record("finish");
    }

    fn flush(&self) {
        self.record("flush");
    }

    fn has_blit_framebuffer(&self) -> bool {
        self.blit.get()
    }

    fn blit_to_front(&self, areas: &[Rectangle]) {
        for area in areas {
            self.record(format!("blit {},{} {}x{}", area.x, area.y, area.width, area.height));
        }
    }

    fn gen_texture(&self) -> Option<u32> {
        self.record("gen_texture");
        Some(self.id())
    }

    fn bind_texture(&self, texture: u32) {
        self.record(format!("bind_texture {texture:#x}"));
    }

    fn delete_texture(&self, texture: u32) {
        self.record(format!("delete_texture {texture:#x}"));
    }
}
