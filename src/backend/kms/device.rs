//! Modesetting device access for the KMS platform

use std::{
    ffi::c_char,
    fmt, io, mem,
    os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd},
};

use drm::control::{
    connector, crtc, framebuffer, Device as ControlDevice, Event, Mode, PageFlipFlags, ResourceHandle,
};
use gbm::{AsRaw, BufferObject, BufferObjectFlags, Format, Surface};
use indexmap::IndexMap;
use rustix::event::{PollFd, PollFlags};
use tracing::{trace, warn};

use crate::utils::Size;

const DRM_MODE_FLAG_NHSYNC: u32 = 1 << 1;
const DRM_MODE_FLAG_PVSYNC: u32 = 1 << 2;

/// 1024x768 at 60Hz, offered on panels in addition to the modes they report
pub fn builtin_panel_mode() -> Mode {
    // SAFETY: the mode info only holds integers
    let mut raw: drm_ffi::drm_mode_modeinfo = unsafe { mem::zeroed() };
    raw.clock = 63500;
    raw.hdisplay = 1024;
    raw.hsync_start = 1072;
    raw.hsync_end = 1176;
    raw.htotal = 1328;
    raw.vdisplay = 768;
    raw.vsync_start = 771;
    raw.vsync_end = 775;
    raw.vtotal = 798;
    raw.vrefresh = 60;
    raw.flags = DRM_MODE_FLAG_NHSYNC | DRM_MODE_FLAG_PVSYNC;
    for (dst, src) in raw.name.iter_mut().zip(b"1024x768") {
        *dst = *src as c_char;
    }
    Mode::from(raw)
}

/// Size of a mode's visible area
pub fn mode_size(mode: &Mode) -> Size {
    let (w, h) = mode.size();
    Size::new(i32::from(w), i32::from(h))
}

/// A connector as seen by the platform
#[derive(Debug, Clone)]
pub struct KmsConnector {
    /// Connector id
    pub id: u32,
    /// Whether a display is attached
    pub connected: bool,
    /// Built-in panel (LVDS or eDP)
    pub panel: bool,
    /// Modes reported by the display
    pub modes: Vec<Mode>,
    /// CRTC of the connector's first encoder
    pub crtc: Option<u32>,
}

/// State of a CRTC, saved to be restored on shutdown
#[derive(Debug, Clone, Copy)]
pub struct SavedCrtc {
    /// CRTC id
    pub id: u32,
    /// Scanned out framebuffer
    pub framebuffer: Option<u32>,
    /// Position of the scanout in the framebuffer
    pub position: (u32, u32),
    /// Active mode
    pub mode: Option<Mode>,
}

/// A locked front buffer of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KmsBuffer(pub u64);

/// DRM and GBM calls made by the KMS platform
pub trait KmsDevice: fmt::Debug {
    /// GBM device handed to `eglGetDisplay`
    fn native_display(&self) -> usize;
    /// The DRM file descriptor, readable when page flips complete
    fn poll_fd(&self) -> BorrowedFd<'_>;

    /// Ids of every connector of the device
    fn connectors(&self) -> io::Result<Vec<u32>>;
    /// Current state of a connector
    fn connector(&self, id: u32) -> Option<KmsConnector>;
    /// Current state of a CRTC
    fn saved_crtc(&self, id: u32) -> Option<SavedCrtc>;
    /// Program a CRTC, `None` as framebuffer and mode disables it
    fn set_crtc(
        &self,
        crtc: u32,
        framebuffer: Option<u32>,
        position: (u32, u32),
        connectors: &[u32],
        mode: Option<Mode>,
    ) -> io::Result<()>;

    /// Create a XRGB8888 GBM surface, returning the native window
    fn create_surface(&mut self, size: Size, scanout: bool) -> io::Result<usize>;
    /// Destroy a surface of [`KmsDevice::create_surface`]
    fn destroy_surface(&mut self, surface: usize);
    /// Lock the buffer last rendered to on `surface`
    fn lock_front_buffer(&mut self, surface: usize) -> io::Result<KmsBuffer>;
    /// Hand a locked buffer back to its surface
    fn release_buffer(&mut self, buffer: KmsBuffer);

    /// Framebuffer scanning out `buffer`
    fn add_framebuffer(&mut self, buffer: KmsBuffer) -> io::Result<u32>;
    /// Remove a framebuffer of [`KmsDevice::add_framebuffer`]
    fn remove_framebuffer(&mut self, framebuffer: u32);
    /// Queue a flip to `framebuffer` on the next vblank, with a completion event
    fn page_flip(&self, crtc: u32, framebuffer: u32) -> io::Result<()>;
    /// CRTCs whose flip completed. Blocks for at least one event when `wait` is set
    fn receive_flips(&self, wait: bool) -> io::Result<Vec<u32>>;
}

/// An open DRM device
#[derive(Debug)]
pub struct DrmFd(OwnedFd);

impl AsFd for DrmFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl drm::Device for DrmFd {}
impl ControlDevice for DrmFd {}

/// [`KmsDevice`] on a DRM device through libgbm
pub struct GbmKmsDevice {
    gbm: gbm::Device<DrmFd>,
    surfaces: IndexMap<usize, Surface<()>>,
    buffers: IndexMap<KmsBuffer, BufferObject<()>>,
    next_buffer: u64,
}

impl fmt::Debug for GbmKmsDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GbmKmsDevice")
            .field("fd", &self.gbm.as_fd().as_raw_fd())
            .field("surfaces", &self.surfaces.len())
            .field("buffers", &self.buffers.len())
            .finish()
    }
}

fn handle<H: ResourceHandle>(id: u32) -> io::Result<H> {
    drm::control::from_u32(id).ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))
}

impl GbmKmsDevice {
    /// Create a GBM device on the DRM device `fd`
    pub fn new(fd: OwnedFd) -> io::Result<GbmKmsDevice> {
        let gbm = gbm::Device::new(DrmFd(fd))?;
        trace!(backend = gbm.backend_name(), "GBM device created");
        Ok(GbmKmsDevice {
            gbm,
            surfaces: IndexMap::new(),
            buffers: IndexMap::new(),
            next_buffer: 1,
        })
    }
}

impl KmsDevice for GbmKmsDevice {
    fn native_display(&self) -> usize {
        self.gbm.as_raw() as usize
    }

    fn poll_fd(&self) -> BorrowedFd<'_> {
        self.gbm.as_fd()
    }

    fn connectors(&self) -> io::Result<Vec<u32>> {
        let resources = self.gbm.resource_handles()?;
        Ok(resources.connectors().iter().map(|&conn| u32::from(conn)).collect())
    }

    fn connector(&self, id: u32) -> Option<KmsConnector> {
        let info = self.gbm.get_connector(handle(id).ok()?, false).ok()?;
        let crtc = info
            .encoders()
            .first()
            .and_then(|&encoder| self.gbm.get_encoder(encoder).ok())
            .and_then(|encoder| encoder.crtc())
            .map(u32::from);
        Some(KmsConnector {
            id,
            connected: info.state() == connector::State::Connected,
            panel: matches!(
                info.interface(),
                connector::Interface::LVDS | connector::Interface::EmbeddedDisplayPort
            ),
            modes: info.modes().to_vec(),
            crtc,
        })
    }

    fn saved_crtc(&self, id: u32) -> Option<SavedCrtc> {
        let info = self.gbm.get_crtc(handle::<crtc::Handle>(id).ok()?).ok()?;
        Some(SavedCrtc {
            id,
            framebuffer: info.framebuffer().map(u32::from),
            position: info.position(),
            mode: info.mode(),
        })
    }

    fn set_crtc(
        &self,
        crtc: u32,
        framebuffer: Option<u32>,
        position: (u32, u32),
        connectors: &[u32],
        mode: Option<Mode>,
    ) -> io::Result<()> {
        let framebuffer = framebuffer.map(handle::<framebuffer::Handle>).transpose()?;
        let connectors = connectors
            .iter()
            .map(|&conn| handle::<connector::Handle>(conn))
            .collect::<io::Result<Vec<_>>>()?;
        self.gbm
            .set_crtc(handle(crtc)?, framebuffer, position, &connectors, mode)
    }

    fn create_surface(&mut self, size: Size, scanout: bool) -> io::Result<usize> {
        let mut usage = BufferObjectFlags::RENDERING;
        if scanout {
            usage |= BufferObjectFlags::SCANOUT;
        }
        let surface =
            self.gbm
                .create_surface::<()>(size.w as u32, size.h as u32, Format::Xrgb8888, usage)?;
        let window = surface.as_raw() as usize;
        self.surfaces.insert(window, surface);
        Ok(window)
    }

    fn destroy_surface(&mut self, surface: usize) {
        self.surfaces.shift_remove(&surface);
    }

    fn lock_front_buffer(&mut self, surface: usize) -> io::Result<KmsBuffer> {
        let surface = self
            .surfaces
            .get(&surface)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        // SAFETY: the platform only locks after eglSwapBuffers on the surface
        let bo = unsafe { surface.lock_front_buffer() }
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let buffer = KmsBuffer(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(buffer, bo);
        Ok(buffer)
    }

    fn release_buffer(&mut self, buffer: KmsBuffer) {
        // dropping the buffer object returns it to its surface
        self.buffers.shift_remove(&buffer);
    }

    fn add_framebuffer(&mut self, buffer: KmsBuffer) -> io::Result<u32> {
        let bo = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        let fb = self.gbm.add_framebuffer(bo, 24, 32)?;
        Ok(u32::from(fb))
    }

    fn remove_framebuffer(&mut self, framebuffer: u32) {
        let result = handle::<framebuffer::Handle>(framebuffer).and_then(|fb| self.gbm.destroy_framebuffer(fb));
        if let Err(err) = result {
            warn!(framebuffer, ?err, "Failed to remove the framebuffer");
        }
    }

    fn page_flip(&self, crtc: u32, framebuffer: u32) -> io::Result<()> {
        self.gbm
            .page_flip(handle(crtc)?, handle(framebuffer)?, PageFlipFlags::EVENT, None)
    }

    fn receive_flips(&self, wait: bool) -> io::Result<Vec<u32>> {
        if !wait {
            let mut fds = [PollFd::new(&self.gbm, PollFlags::IN)];
            if rustix::event::poll(&mut fds, 0)? == 0 {
                return Ok(Vec::new());
            }
        }
        let flips = self
            .gbm
            .receive_events()?
            .filter_map(|event| match event {
                Event::PageFlip(flip) => Some(u32::from(flip.crtc)),
                _ => None,
            })
            .collect();
        Ok(flips)
    }
}
