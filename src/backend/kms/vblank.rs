//! Blocking vblank waits on a DRI device

use std::{
    fmt, io,
    os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd},
    path::Path,
};

use drm::{VblankWaitFlags, VblankWaitTarget};
use rustix::fs::{Mode, OFlags};
use tracing::trace;

/// A DRI device used only to wait for the vertical refresh
pub struct DrmVblank {
    fd: OwnedFd,
}

impl fmt::Debug for DrmVblank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrmVblank").field("fd", &self.fd.as_raw_fd()).finish()
    }
}

impl AsFd for DrmVblank {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl drm::Device for DrmVblank {}

impl DrmVblank {
    /// Open the device at `path`
    pub fn open(path: &Path) -> io::Result<DrmVblank> {
        let fd = rustix::fs::open(path, OFlags::RDWR | OFlags::CLOEXEC, Mode::empty())?;
        trace!(?path, "Opened DRI device for vblank waits");
        Ok(DrmVblank { fd })
    }

    /// Use an already opened device
    pub fn from_fd(fd: OwnedFd) -> DrmVblank {
        DrmVblank { fd }
    }

    /// Block until the next vertical refresh
    pub fn wait(&self) -> io::Result<()> {
        wait_next(self)
    }
}

struct BorrowedDevice<'a>(BorrowedFd<'a>);

impl AsFd for BorrowedDevice<'_> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0
    }
}

impl drm::Device for BorrowedDevice<'_> {}

/// Block until the next vertical refresh of the first CRTC of `fd`, retrying on `EINTR`
pub fn wait_vblank(fd: BorrowedFd<'_>) -> io::Result<()> {
    wait_next(&BorrowedDevice(fd))
}

fn wait_next(device: &impl drm::Device) -> io::Result<()> {
    loop {
        match device.wait_vblank(VblankWaitTarget::Relative(1), VblankWaitFlags::empty(), 0, 0) {
            Ok(reply) => {
                trace!(frame = reply.frame(), "Vblank");
                return Ok(());
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}
