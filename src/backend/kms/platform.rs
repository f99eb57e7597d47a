//! EGL platform scanning out GBM surfaces through KMS
//!
//! The platform owns one fullscreen onscreen. Every swap locks the new front buffer, wraps it
//! in a framebuffer and page flips each enabled CRTC to it. The previous buffer is released once
//! all flips completed. Saved CRTC modes are restored when the display is destroyed.

use std::{env, os::unix::io::BorrowedFd, rc::Rc};

use drm::control::Mode;
use rustix::fs::{Mode as FileMode, OFlags};
use tracing::{debug, info, trace, warn};

use crate::{
    backend::{
        egl::{ffi::EGLint, EglBackend, EglLibrary, EglPlatform, PlatformEvents},
        winsys::{OnscreenDescriptor, OnscreenEvent, OnscreenId, RendererOptions, WinsysError, WinsysFeatures, WinsysId},
    },
    utils::Size,
};

use super::device::{builtin_panel_mode, mode_size, GbmKmsDevice, KmsBuffer, KmsConnector, KmsDevice, SavedCrtc};

/// Output selection read from the environment
///
/// `COGL_KMS_CONNECTOR<n>` picks the connector of output `n` by id and `COGL_KMS_CONNECTOR<n>_MODE`
/// its mode by name. `COGL_KMS_MIRROR` shows the same framebuffer on a second output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KmsEnvironment {
    /// Forced connector per output
    pub connectors: [Option<u32>; 2],
    /// Forced mode name per output
    pub modes: [Option<String>; 2],
    /// Mirror the first output on a second one
    pub mirror: bool,
}

impl KmsEnvironment {
    /// Read the selection from the process environment
    pub fn from_env() -> KmsEnvironment {
        let connector = |index: usize| {
            env::var(format!("COGL_KMS_CONNECTOR{index}"))
                .ok()
                .and_then(|id| id.trim().parse().ok())
        };
        let mode = |index: usize| env::var(format!("COGL_KMS_CONNECTOR{index}_MODE")).ok();
        KmsEnvironment {
            connectors: [connector(0), connector(1)],
            modes: [mode(0), mode(1)],
            mirror: env::var_os("COGL_KMS_MIRROR").is_some(),
        }
    }
}

/// A CRTC driven by the platform
#[derive(Debug, Clone, PartialEq)]
pub struct KmsCrtc {
    /// CRTC id
    pub id: u32,
    /// Scanout position in the framebuffer
    pub position: (u32, u32),
    /// Mode to program
    pub mode: Mode,
    /// Connectors shown by the CRTC, none leaves it disabled
    pub connectors: Vec<u32>,
}

#[derive(Debug)]
struct KmsOutput {
    connector: u32,
    crtc: u32,
    saved_crtc: Option<SavedCrtc>,
    modes: Vec<Mode>,
    mode: Option<Mode>,
}

#[derive(Debug, Clone, Copy)]
struct ScanoutBuffer {
    buffer: KmsBuffer,
    framebuffer: u32,
}

#[derive(Debug)]
struct KmsOnscreen {
    id: OnscreenId,
    surface: usize,
    current: Option<ScanoutBuffer>,
    next: Option<ScanoutBuffer>,
    pending_flips: usize,
}

/// KMS side of the EGL backend: one GBM surface scanned out by page flips
#[derive(Debug)]
pub struct KmsPlatform<K: KmsDevice = GbmKmsDevice> {
    device: K,
    environment: KmsEnvironment,
    outputs: Vec<KmsOutput>,
    crtcs: Vec<KmsCrtc>,
    size: Size,
    pending_set_crtc: bool,
    dummy_surface: Option<usize>,
    onscreen: Option<KmsOnscreen>,
}

impl<K: KmsDevice> KmsPlatform<K> {
    /// Platform on `device`, choosing outputs according to `environment`
    pub fn new(device: K, environment: KmsEnvironment) -> Self {
        KmsPlatform {
            device,
            environment,
            outputs: Vec::new(),
            crtcs: Vec::new(),
            size: Size::new(0, 0),
            pending_set_crtc: false,
            dummy_surface: None,
            onscreen: None,
        }
    }

    /// The device
    pub fn device(&self) -> &K {
        &self.device
    }

    /// The DRM file descriptor
    pub fn kms_fd(&self) -> BorrowedFd<'_> {
        self.device.poll_fd()
    }

    /// CRTCs programmed on the next swap
    pub fn crtcs(&self) -> &[KmsCrtc] {
        &self.crtcs
    }

    /// Size of the onscreen, the mode of the first output
    pub fn size(&self) -> Size {
        self.size
    }

    /// Program the CRTC modes again on the next swap, after another client changed them
    pub fn queue_modes_reset(&mut self) {
        self.pending_set_crtc = true;
    }

    fn find_connector(&self, excluded: Option<u32>) -> Result<KmsConnector, WinsysError> {
        let ids = self
            .device
            .connectors()
            .map_err(|err| WinsysError::Init(format!("Failed to list the connectors: {err}")))?;
        ids.into_iter()
            .filter(|&id| Some(id) != excluded)
            .filter_map(|id| self.device.connector(id))
            .find(|connector| connector.connected && !connector.modes.is_empty())
            .ok_or_else(|| WinsysError::Init("No currently active connector found".into()))
    }

    fn find_output(&self, index: usize, excluded: Option<u32>) -> Result<KmsOutput, WinsysError> {
        let connector = match self.environment.connectors[index].and_then(|id| self.device.connector(id)) {
            Some(connector) => connector,
            None => self.find_connector(excluded)?,
        };
        let crtc = connector
            .crtc
            .ok_or_else(|| WinsysError::Init(format!("Connector {} has no CRTC", connector.id)))?;

        let mut modes = connector.modes;
        if connector.panel {
            modes.push(builtin_panel_mode());
        }
        if let Some(name) = &self.environment.modes[index] {
            let mode = modes
                .iter()
                .find(|mode| mode.name().to_bytes() == name.as_bytes())
                .copied()
                .ok_or_else(|| {
                    WinsysError::Init(format!("COGL_KMS_CONNECTOR{index}_MODE of {name} could not be found"))
                })?;
            modes = vec![mode];
        }

        debug!(connector = connector.id, crtc, modes = modes.len(), "Found output");
        Ok(KmsOutput {
            connector: connector.id,
            crtc,
            saved_crtc: self.device.saved_crtc(crtc),
            modes,
            mode: None,
        })
    }

    fn restore_outputs(&mut self) {
        for output in self.outputs.drain(..) {
            let Some(saved) = output.saved_crtc else {
                continue;
            };
            if let Err(err) =
                self.device
                    .set_crtc(saved.id, saved.framebuffer, saved.position, &[output.connector], saved.mode)
            {
                warn!(crtc = saved.id, ?err, "Error restoring saved CRTC");
            }
        }
    }

    fn free_buffer(&mut self, scanout: ScanoutBuffer) {
        self.device.remove_framebuffer(scanout.framebuffer);
        self.device.release_buffer(scanout.buffer);
    }

    fn handle_flips(&mut self, flips: Vec<u32>) -> Vec<OnscreenEvent> {
        let mut events = Vec::new();
        for crtc in flips {
            trace!(crtc, "Page flip completed");
            let Some(onscreen) = self.onscreen.as_mut() else {
                continue;
            };
            if onscreen.pending_flips == 0 {
                continue;
            }
            onscreen.pending_flips -= 1;
            // every CRTC has to flip before the swap completes
            if onscreen.pending_flips > 0 {
                continue;
            }
            let id = onscreen.id;
            let previous = onscreen.current.take();
            onscreen.current = onscreen.next.take();
            if let Some(previous) = previous {
                self.free_buffer(previous);
            }
            events.push(OnscreenEvent::SwapComplete { onscreen: id });
        }
        events
    }
}

impl EglBackend<KmsPlatform> {
    /// Open the DRM device and load `libEGL`
    pub fn connect_kms(options: &mut RendererOptions) -> Result<EglBackend<KmsPlatform>, WinsysError> {
        let fd = match options.foreign_drm_fd.take() {
            Some(fd) => fd,
            None => rustix::fs::open(options.drm_device.as_path(), OFlags::RDWR | OFlags::CLOEXEC, FileMode::empty())
                .map_err(|err| WinsysError::Kms(format!("Couldn't open {}: {err}", options.drm_device.display())))?,
        };
        let device = GbmKmsDevice::new(fd).map_err(|err| WinsysError::Kms(format!("Couldn't create gbm device: {err}")))?;
        info!(?device, "Opened KMS device");

        let driver = EglLibrary::open()?;
        EglBackend::from_parts(
            KmsPlatform::new(device, KmsEnvironment::from_env()),
            Rc::new(driver),
            options.driver,
        )
    }
}

impl<K: KmsDevice> EglPlatform for KmsPlatform<K> {
    fn id(&self) -> WinsysId {
        WinsysId::EglKms
    }

    fn native_display(&self) -> usize {
        self.device.native_display()
    }

    fn features(&self) -> WinsysFeatures {
        WinsysFeatures::SWAP_BUFFERS_EVENT
    }

    fn max_onscreens(&self) -> Option<usize> {
        Some(1)
    }

    fn display_setup(&mut self) -> Result<(), WinsysError> {
        self.restore_outputs();

        let mut first = self.find_output(0, None)?;
        let mut second = None;
        if self.environment.mirror {
            let mut output = self.find_output(1, Some(first.connector))?;
            let (mode0, mode1) = first
                .modes
                .iter()
                .find_map(|mode0| {
                    output
                        .modes
                        .iter()
                        .find(|mode1| mode1.size() == mode0.size())
                        .map(|mode1| (*mode0, *mode1))
                })
                .ok_or_else(|| WinsysError::Init("Failed to find matching modes for mirroring".into()))?;
            first.mode = Some(mode0);
            output.mode = Some(mode1);
            second = Some(output);
        } else {
            first.mode = first.modes.first().copied();
        }

        let mut crtcs = Vec::new();
        let mut outputs = Vec::new();
        for output in std::iter::once(first).chain(second) {
            let Some(mode) = output.mode else {
                return Err(WinsysError::Init("No currently active connector found".into()));
            };
            crtcs.push(KmsCrtc {
                id: output.crtc,
                position: (0, 0),
                mode,
                connectors: vec![output.connector],
            });
            outputs.push(output);
        }

        self.size = mode_size(&crtcs[0].mode);
        self.outputs = outputs;
        self.crtcs = crtcs;
        // modes are set on the first swap of the onscreen
        self.pending_set_crtc = true;
        info!(size = ?self.size, crtcs = self.crtcs.len(), "KMS display set up");
        Ok(())
    }

    fn display_destroy(&mut self) {
        self.restore_outputs();
        self.crtcs.clear();
    }

    fn create_dummy_window(&mut self, _native_visual: EGLint, _surfaceless: bool) -> Result<Option<usize>, WinsysError> {
        let surface = self
            .device
            .create_surface(Size::new(16, 16), false)
            .map_err(|err| WinsysError::CreateContext(format!("Failed to create dummy GBM surface: {err}")))?;
        self.dummy_surface = Some(surface);
        Ok(Some(surface))
    }

    fn destroy_dummy_window(&mut self) {
        if let Some(surface) = self.dummy_surface.take() {
            self.device.destroy_surface(surface);
        }
    }

    fn create_window(
        &mut self,
        id: OnscreenId,
        _descriptor: OnscreenDescriptor,
        _native_visual: EGLint,
    ) -> Result<(usize, Size), WinsysError> {
        let surface = self
            .device
            .create_surface(self.size, true)
            .map_err(|err| WinsysError::CreateOnscreen(format!("Failed to allocate surface: {err}")))?;
        self.onscreen = Some(KmsOnscreen {
            id,
            surface,
            current: None,
            next: None,
            pending_flips: 0,
        });
        Ok((surface, self.size))
    }

    fn destroy_window(&mut self, id: OnscreenId) {
        let onscreen = match self.onscreen.take() {
            Some(onscreen) if onscreen.id == id => onscreen,
            other => {
                self.onscreen = other;
                return;
            }
        };
        if onscreen.next.is_some() {
            warn!("Destroying an onscreen with a pending page flip");
        }
        for scanout in onscreen.current.into_iter().chain(onscreen.next) {
            self.free_buffer(scanout);
        }
        self.device.destroy_surface(onscreen.surface);
    }

    fn before_swap(&mut self, id: OnscreenId) -> Result<Vec<OnscreenEvent>, WinsysError> {
        let mut events = Vec::new();
        // block until the previous frame is on screen
        while self
            .onscreen
            .as_ref()
            .is_some_and(|onscreen| onscreen.id == id && onscreen.next.is_some())
        {
            let flips = self.device.receive_flips(true)?;
            events.extend(self.handle_flips(flips));
        }
        Ok(events)
    }

    fn after_swap(&mut self, id: OnscreenId) -> Result<Vec<OnscreenEvent>, WinsysError> {
        let surface = match self.onscreen.as_ref() {
            Some(onscreen) if onscreen.id == id => onscreen.surface,
            _ => return Err(WinsysError::UnknownOnscreen),
        };

        let buffer = match self.device.lock_front_buffer(surface) {
            Ok(buffer) => buffer,
            Err(err) => {
                warn!(?err, "Failed to lock the front buffer");
                return Ok(Vec::new());
            }
        };
        let framebuffer = match self.device.add_framebuffer(buffer) {
            Ok(framebuffer) => framebuffer,
            Err(err) => {
                warn!(?err, "Failed to create new back buffer handle");
                self.device.release_buffer(buffer);
                return Ok(Vec::new());
            }
        };

        if self.pending_set_crtc {
            for crtc in &self.crtcs {
                let mode = (!crtc.connectors.is_empty()).then_some(crtc.mode);
                if let Err(err) =
                    self.device
                        .set_crtc(crtc.id, Some(framebuffer), crtc.position, &crtc.connectors, mode)
                {
                    warn!(crtc = crtc.id, ?err, "Failed to set crtc mode {:?}", crtc.mode.name());
                }
            }
            self.pending_set_crtc = false;
        }

        let mut flips = 0;
        for crtc in self.crtcs.iter().filter(|crtc| !crtc.connectors.is_empty()) {
            match self.device.page_flip(crtc.id, framebuffer) {
                Ok(()) => flips += 1,
                Err(err) => warn!(crtc = crtc.id, ?err, "Failed to flip"),
            }
        }

        let scanout = ScanoutBuffer { buffer, framebuffer };
        if flips == 0 {
            self.free_buffer(scanout);
            return Ok(vec![OnscreenEvent::SwapComplete { onscreen: id }]);
        }
        if let Some(onscreen) = self.onscreen.as_mut() {
            onscreen.next = Some(scanout);
            onscreen.pending_flips = flips;
        }
        Ok(Vec::new())
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.device.poll_fd())
    }

    fn dispatch(&mut self) -> Result<PlatformEvents, WinsysError> {
        let flips = self.device.receive_flips(false)?;
        Ok(PlatformEvents {
            onscreen: self.handle_flips(flips),
            unhandled: Vec::new(),
        })
    }
}
