//! Fake X server recording every request

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet, VecDeque},
};

use crate::{
    backend::x11::{
        ErrorTrapStack, ImageFormat, PixmapGeometry, PixmapSource, SizeHints, TrapToken, VisualMasks,
        WindowDescriptor, X11Error, XEvent, XServer,
    },
    utils::{Rectangle, Size},
};

const BAD_WINDOW: u8 = 3;
const BAD_DRAWABLE: u8 = 9;

/// Visual ids the mock screen offers, with their depths
pub const RGB_VISUAL: u32 = 0x21;
pub const ARGB_VISUAL: u32 = 0x22;

#[derive(Debug, Clone, Copy)]
struct MockWindow {
    size: Size,
    mapped: bool,
}

/// A fake X server recording every request as a short string
#[derive(Debug)]
pub struct MockServer {
    requests: RefCell<Vec<String>>,
    next_xid: Cell<u32>,
    pixmaps: RefCell<HashMap<u32, PixmapGeometry>>,
    windows: RefCell<HashMap<u32, MockWindow>>,
    hints: RefCell<HashMap<u32, SizeHints>>,
    damages: RefCell<HashSet<u32>>,
    last_damage: Cell<Option<u32>>,
    shm_supported: Cell<bool>,
    traps: RefCell<ErrorTrapStack>,
    unhandled_errors: Cell<usize>,
    events: RefCell<VecDeque<XEvent>>,
}

impl Default for MockServer {
    fn default() -> Self {
        MockServer {
            requests: RefCell::default(),
            next_xid: Cell::new(0x0040_0001),
            pixmaps: RefCell::default(),
            windows: RefCell::default(),
            hints: RefCell::default(),
            damages: RefCell::default(),
            last_damage: Cell::new(None),
            shm_supported: Cell::new(false),
            traps: RefCell::default(),
            unhandled_errors: Cell::new(0),
            events: RefCell::default(),
        }
    }
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_shm_supported(&self, supported: bool) {
        self.shm_supported.set(supported);
    }

    fn xid(&self) -> u32 {
        let xid = self.next_xid.get();
        self.next_xid.set(xid + 1);
        xid
    }

    fn record(&self, request: String) {
        self.requests.borrow_mut().push(request);
    }

    /// Report X error `code`, as if the last request failed
    pub fn raise(&self, code: u8) {
        self.error(code);
    }

    fn error(&self, code: u8) {
        if !self.traps.borrow_mut().record(code) {
            self.unhandled_errors.set(self.unhandled_errors.get() + 1);
        }
    }

    pub fn add_pixmap(&self, size: Size, depth: u8) -> u32 {
        let xid = self.xid();
        self.pixmaps.borrow_mut().insert(xid, PixmapGeometry { size, depth });
        xid
    }

    /// A window created by someone else
    pub fn add_window(&self, size: Size) -> u32 {
        let xid = self.xid();
        self.windows.borrow_mut().insert(xid, MockWindow { size, mapped: false });
        xid
    }

    pub fn push_event(&self, event: XEvent) {
        self.events.borrow_mut().push_back(event);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    /// Number of recorded requests starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|request| request.starts_with(prefix))
            .count()
    }

    pub fn last_damage(&self) -> Option<u32> {
        self.last_damage.get()
    }

    pub fn window_exists(&self, window: u32) -> bool {
        self.windows.borrow().contains_key(&window)
    }

    pub fn is_mapped(&self, window: u32) -> bool {
        self.windows.borrow().get(&window).map_or(false, |window| window.mapped)
    }

    pub fn size_hints(&self, window: u32) -> Option<SizeHints> {
        self.hints.borrow().get(&window).copied()
    }

    pub fn trap_depth(&self) -> usize {
        self.traps.borrow().depth()
    }

    pub fn unhandled_errors(&self) -> usize {
        self.unhandled_errors.get()
    }
}

impl XServer for MockServer {
    fn trap_errors(&self) -> TrapToken {
        self.traps.borrow_mut().push()
    }

    fn untrap_errors(&self, token: TrapToken) -> u8 {
        self.traps.borrow_mut().pop(token)
    }

    fn create_window(&self, descriptor: &WindowDescriptor) -> Result<u32, X11Error> {
        let xid = self.xid();
        let size = descriptor.geometry.size();
        self.record(format!(
            "create_window {}x{} visual {:#x}",
            size.w, size.h, descriptor.visual
        ));
        self.windows.borrow_mut().insert(xid, MockWindow { size, mapped: false });
        Ok(xid)
    }

    fn destroy_window(&self, window: u32) {
        self.record(format!("destroy_window {window:#x}"));
        if self.windows.borrow_mut().remove(&window).is_none() {
            self.error(BAD_WINDOW);
        }
    }

    fn window_size(&self, window: u32) -> Result<Size, X11Error> {
        match self.windows.borrow().get(&window) {
            Some(window) => Ok(window.size),
            None => {
                self.error(BAD_DRAWABLE);
                Err(X11Error::Trapped {
                    request: "GetGeometry",
                    code: BAD_DRAWABLE,
                })
            }
        }
    }

    fn map_window(&self, window: u32) {
        self.record(format!("map_window {window:#x}"));
        match self.windows.borrow_mut().get_mut(&window) {
            Some(window) => window.mapped = true,
            None => self.error(BAD_WINDOW),
        }
    }

    fn unmap_window(&self, window: u32) {
        self.record(format!("unmap_window {window:#x}"));
        match self.windows.borrow_mut().get_mut(&window) {
            Some(window) => window.mapped = false,
            None => self.error(BAD_WINDOW),
        }
    }

    fn set_size_hints(&self, window: u32, hints: &SizeHints) {
        self.record(format!("size_hints {window:#x}"));
        self.hints.borrow_mut().insert(window, *hints);
    }

    fn visual_depth(&self, visual: u32) -> Option<u8> {
        match visual {
            RGB_VISUAL => Some(24),
            ARGB_VISUAL => Some(32),
            _ => None,
        }
    }

    fn flush(&self) {}

    fn sync(&self) {}

    fn poll_event(&self) -> Result<Option<XEvent>, X11Error> {
        Ok(self.events.borrow_mut().pop_front())
    }
}

impl PixmapSource for MockServer {
    fn pixmap_geometry(&self, pixmap: u32) -> Result<PixmapGeometry, X11Error> {
        self.pixmaps.borrow().get(&pixmap).copied().ok_or(X11Error::Trapped {
            request: "GetGeometry",
            code: BAD_DRAWABLE,
        })
    }

    fn visual_masks(&self) -> VisualMasks {
        VisualMasks {
            red: 0xff0000,
            green: 0x00ff00,
            blue: 0x0000ff,
        }
    }

    fn image_format(&self, depth: u8) -> Option<ImageFormat> {
        match depth {
            24 | 32 => Some(ImageFormat {
                bits_per_pixel: 32,
                scanline_pad: 32,
            }),
            16 => Some(ImageFormat {
                bits_per_pixel: 16,
                scanline_pad: 32,
            }),
            _ => None,
        }
    }

    fn create_damage(&self, drawable: u32) -> Option<u32> {
        let damage = self.xid();
        self.record(format!("damage_create {drawable:#x}"));
        self.damages.borrow_mut().insert(damage);
        self.last_damage.set(Some(damage));
        Some(damage)
    }

    fn subtract_damage(&self, damage: u32) {
        self.record(format!("damage_subtract {damage:#x}"));
    }

    fn destroy_damage(&self, damage: u32) {
        self.record(format!("damage_destroy {damage:#x}"));
        self.damages.borrow_mut().remove(&damage);
    }

    fn shm_available(&self) -> bool {
        self.shm_supported.get()
    }

    fn attach_shm(&self, _shmid: i32) -> Option<u32> {
        if !self.shm_supported.get() {
            return None;
        }
        self.record("shm_attach".into());
        Some(self.xid())
    }

    fn detach_shm(&self, _segment: u32) {
        self.record("shm_detach".into());
    }

    fn shm_get_image(&self, _drawable: u32, area: Rectangle, _segment: u32) -> Result<(), X11Error> {
        self.record(format!(
            "shm_get_image {},{} {}x{}",
            area.x, area.y, area.width, area.height
        ));
        Ok(())
    }

    fn get_image(&self, _drawable: u32, area: Rectangle) -> Result<Vec<u8>, X11Error> {
        self.record(format!(
            "get_image {},{} {}x{}",
            area.x, area.y, area.width, area.height
        ));
        Ok(vec![0x80; area.width.max(0) as usize * area.height.max(0) as usize * 4])
    }
}
