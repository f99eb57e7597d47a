//! Swap pacing
//!
//! Without a driver-side swap interval the CPU can queue frames faster than the display shows
//! them, which builds up latency. Throttled swaps therefore drain the GPU and, unless a vertical
//! refresh already happened since the previous swap, block until the next one.

use tracing::{trace, warn};

/// How the driver lets us wait for a vertical refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VblankWait {
    /// No way to wait
    None,
    /// `glXWaitForMsc` style media stream counter wait
    Msc,
    /// `glXWaitVideoSync` style counter wait
    VideoSync,
    /// `DRM_IOCTL_WAIT_VBLANK` on the DRI device
    DrmIoctl,
}

/// Vblank related capabilities of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VblankCaps {
    /// The driver paces swaps itself through a swap interval
    pub swap_interval: bool,
    /// A vsync counter can be read
    pub counter: bool,
    /// Best available wait primitive
    pub wait: VblankWait,
}

/// Pacing applied to a throttled swap, chosen once per context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStrategy {
    /// Swap immediately
    NoThrottle,
    /// The driver blocks in the swap itself
    DriverInterval,
    /// Drain the GPU, then wait for a vblank unless the counter moved since the last swap
    HardwareCounterWait,
    /// Drain the GPU, then always wait for the next vblank
    SoftwareFinishWait,
    /// Drain the GPU, then always wait through the DRM ioctl
    DrmIoctlWait,
}

impl SwapStrategy {
    /// Strategy for full swaps
    pub fn for_swap(caps: &VblankCaps) -> SwapStrategy {
        if caps.swap_interval {
            SwapStrategy::DriverInterval
        } else {
            Self::manual(caps)
        }
    }

    /// Strategy for partial swaps, which are never paced by the swap interval
    pub fn for_region(caps: &VblankCaps) -> SwapStrategy {
        Self::manual(caps)
    }

    fn manual(caps: &VblankCaps) -> SwapStrategy {
        match caps.wait {
            VblankWait::None => SwapStrategy::NoThrottle,
            _ if caps.counter => SwapStrategy::HardwareCounterWait,
            VblankWait::DrmIoctl => SwapStrategy::DrmIoctlWait,
            VblankWait::Msc | VblankWait::VideoSync => SwapStrategy::SoftwareFinishWait,
        }
    }

    /// The strategy for a surface, given its throttle setting
    pub fn effective(self, throttled: bool) -> SwapStrategy {
        if throttled {
            self
        } else {
            SwapStrategy::NoThrottle
        }
    }
}

/// Error of a single vblank wait
#[derive(Debug, thiserror::Error)]
#[error("Waiting for the vertical refresh failed: {0}")]
pub struct VblankWaitError(pub String);

/// The GPU and display primitives used to pace a swap
pub trait VblankSource {
    /// Block until the GPU executed every queued command
    fn finish(&mut self);
    /// Current vsync counter, if one can be read
    fn vsync_counter(&mut self) -> Option<u32>;
    /// Block until the next vertical refresh
    fn wait_for_vblank(&mut self) -> Result<(), VblankWaitError>;
}

/// Outcome of pacing one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameThrottle {
    /// Counter read before pacing, to be recorded as the surface's last swap counter
    pub counter: Option<u32>,
    /// Whether a vblank wait was performed
    pub waited: bool,
}

/// Pace one swap according to `strategy`.
///
/// `last_counter` is the counter recorded after the surface's previous swap. The returned
/// counter is the one read *before* waiting, so whichever swap method is used next, the "did a
/// vblank happen since the last swap" test stays consistent.
#[profiling::function]
pub fn throttle_frame<V: VblankSource + ?Sized>(
    strategy: SwapStrategy,
    last_counter: u32,
    source: &mut V,
) -> FrameThrottle {
    match strategy {
        SwapStrategy::NoThrottle => FrameThrottle::default(),
        SwapStrategy::DriverInterval => FrameThrottle {
            counter: source.vsync_counter(),
            waited: false,
        },
        SwapStrategy::HardwareCounterWait => {
            let counter = source.vsync_counter();
            source.finish();
            let waited = match counter {
                Some(counter) if counter != last_counter => {
                    trace!(counter, last_counter, "Vblank passed since the last swap");
                    false
                }
                _ => wait(source),
            };
            FrameThrottle { counter, waited }
        }
        SwapStrategy::SoftwareFinishWait | SwapStrategy::DrmIoctlWait => {
            let counter = source.vsync_counter();
            source.finish();
            let waited = wait(source);
            FrameThrottle { counter, waited }
        }
    }
}

fn wait<V: VblankSource + ?Sized>(source: &mut V) -> bool {
    match source.wait_for_vblank() {
        Ok(()) => true,
        Err(err) => {
            warn!(?err, "Not throttling this frame");
            false
        }
    }
}
