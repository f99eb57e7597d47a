//! Fake modesetting device

use std::{
    cell::RefCell,
    ffi::c_char,
    io, mem,
    os::unix::io::{AsFd, BorrowedFd, OwnedFd},
    rc::Rc,
};

use drm::control::Mode;
use indexmap::IndexMap;

use crate::{
    backend::kms::{KmsBuffer, KmsConnector, KmsDevice, SavedCrtc},
    utils::Size,
};

/// A mode named `name` with a `w`x`h` visible area
pub fn test_mode(name: &str, w: u16, h: u16) -> Mode {
    // SAFETY: the mode info only holds integers
    let mut raw: drm_ffi::drm_mode_modeinfo = unsafe { mem::zeroed() };
    raw.hdisplay = w;
    raw.vdisplay = h;
    raw.vrefresh = 60;
    for (dst, src) in raw.name.iter_mut().zip(name.bytes()) {
        *dst = src as c_char;
    }
    Mode::from(raw)
}

#[derive(Debug)]
struct KmsState {
    connectors: IndexMap<u32, KmsConnector>,
    saved_crtcs: IndexMap<u32, SavedCrtc>,
    calls: Vec<String>,
    surfaces: Vec<(usize, Size, bool)>,
    buffers: IndexMap<KmsBuffer, usize>,
    framebuffers: Vec<u32>,
    queued_flips: Vec<u32>,
    fail_flips: bool,
    fail_locks: bool,
    next_id: u64,
}

/// A DRM device in memory. Clones share the device
///
/// Page flips complete as soon as events are read.
#[derive(Debug, Clone)]
pub struct MockKms {
    fd: Rc<OwnedFd>,
    state: Rc<RefCell<KmsState>>,
}

impl MockKms {
    pub fn new() -> MockKms {
        let fd = rustix::fs::open("/dev/null", rustix::fs::OFlags::RDONLY, rustix::fs::Mode::empty())
            .expect("/dev/null");
        MockKms {
            fd: Rc::new(fd),
            state: Rc::new(RefCell::new(KmsState {
                connectors: IndexMap::new(),
                saved_crtcs: IndexMap::new(),
                calls: Vec::new(),
                surfaces: Vec::new(),
                buffers: IndexMap::new(),
                framebuffers: Vec::new(),
                queued_flips: Vec::new(),
                fail_flips: false,
                fail_locks: false,
                next_id: 1,
            })),
        }
    }

    /// Attach a connector driven by `crtc`
    pub fn add_connector(&self, id: u32, crtc: u32, modes: Vec<Mode>) {
        self.state.borrow_mut().connectors.insert(
            id,
            KmsConnector {
                id,
                connected: !modes.is_empty(),
                panel: false,
                modes,
                crtc: Some(crtc),
            },
        );
    }

    pub fn set_panel(&self, id: u32) {
        if let Some(connector) = self.state.borrow_mut().connectors.get_mut(&id) {
            connector.panel = true;
        }
    }

    /// State `crtc` had before the platform took over
    pub fn save_crtc(&self, crtc: u32, framebuffer: u32, mode: Mode) {
        self.state.borrow_mut().saved_crtcs.insert(
            crtc,
            SavedCrtc {
                id: crtc,
                framebuffer: Some(framebuffer),
                position: (0, 0),
                mode: Some(mode),
            },
        );
    }

    pub fn fail_flips(&self, fail: bool) {
        self.state.borrow_mut().fail_flips = fail;
    }

    pub fn fail_locks(&self, fail: bool) {
        self.state.borrow_mut().fail_locks = fail;
    }

    /// Number of recorded calls starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    /// Live surfaces with their size and whether they can be scanned out
    pub fn surfaces(&self) -> Vec<(Size, bool)> {
        self.state
            .borrow()
            .surfaces
            .iter()
            .map(|&(_, size, scanout)| (size, scanout))
            .collect()
    }

    /// Locked buffers not yet released
    pub fn locked_buffers(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    /// Framebuffers not yet removed
    pub fn framebuffers(&self) -> usize {
        self.state.borrow().framebuffers.len()
    }

    /// Flips queued and not yet read
    pub fn queued_flips(&self) -> usize {
        self.state.borrow().queued_flips.len()
    }

    fn record(&self, call: String) {
        self.state.borrow_mut().calls.push(call);
    }

    fn next_id(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        id
    }
}

impl KmsDevice for MockKms {
    fn native_display(&self) -> usize {
        0x6b6d73
    }

    fn poll_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    fn connectors(&self) -> io::Result<Vec<u32>> {
        Ok(self.state.borrow().connectors.keys().copied().collect())
    }

    fn connector(&self, id: u32) -> Option<KmsConnector> {
        self.state.borrow().connectors.get(&id).cloned()
    }

    fn saved_crtc(&self, id: u32) -> Option<SavedCrtc> {
        self.state.borrow().saved_crtcs.get(&id).copied()
    }

    fn set_crtc(
        &self,
        crtc: u32,
        framebuffer: Option<u32>,
        _position: (u32, u32),
        connectors: &[u32],
        mode: Option<Mode>,
    ) -> io::Result<()> {
        let mode = mode.map(|mode| mode.name().to_string_lossy().into_owned());
        self.record(format!("set_crtc {crtc} fb {framebuffer:?} {connectors:?} {mode:?}"));
        Ok(())
    }

    fn create_surface(&mut self, size: Size, scanout: bool) -> io::Result<usize> {
        let window = 0x7000 + self.next_id() as usize;
        self.record(format!("create_surface {}x{}", size.w, size.h));
        self.state.borrow_mut().surfaces.push((window, size, scanout));
        Ok(window)
    }

    fn destroy_surface(&mut self, surface: usize) {
        self.record(format!("destroy_surface {surface:#x}"));
        self.state.borrow_mut().surfaces.retain(|&(window, _, _)| window != surface);
    }

    fn lock_front_buffer(&mut self, surface: usize) -> io::Result<KmsBuffer> {
        if self.state.borrow().fail_locks {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        let buffer = KmsBuffer(self.next_id());
        self.state.borrow_mut().buffers.insert(buffer, surface);
        Ok(buffer)
    }

    fn release_buffer(&mut self, buffer: KmsBuffer) {
        self.record(format!("release_buffer {}", buffer.0));
        self.state.borrow_mut().buffers.shift_remove(&buffer);
    }

    fn add_framebuffer(&mut self, _buffer: KmsBuffer) -> io::Result<u32> {
        let framebuffer = self.next_id() as u32;
        self.state.borrow_mut().framebuffers.push(framebuffer);
        Ok(framebuffer)
    }

    fn remove_framebuffer(&mut self, framebuffer: u32) {
        self.state.borrow_mut().framebuffers.retain(|&fb| fb != framebuffer);
    }

    fn page_flip(&self, crtc: u32, framebuffer: u32) -> io::Result<()> {
        if self.state.borrow().fail_flips {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        self.record(format!("page_flip {crtc} fb {framebuffer}"));
        self.state.borrow_mut().queued_flips.push(crtc);
        Ok(())
    }

    fn receive_flips(&self, wait: bool) -> io::Result<Vec<u32>> {
        self.record(format!("receive_flips wait {wait}"));
        Ok(std::mem::take(&mut self.state.borrow_mut().queued_flips))
    }
}
