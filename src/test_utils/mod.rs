//! In-memory stand-ins for the display server, drivers and window system backends

use std::{
    cell::RefCell,
    ffi::c_void,
    os::unix::io::BorrowedFd,
    ptr::NonNull,
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{
    backend::winsys::{
        BackendEvent, DisplayLifecycle, DisplayState, OnscreenDescriptor, OnscreenEvent, OnscreenId, OnscreenState,
        OnscreenTemplate, PendingNotifications, WinsysBackend, WinsysError, WinsysFeatures, WinsysId,
    },
    utils::{Rectangle, Size},
};

#[cfg(feature = "backend_egl")]
mod egl;
#[cfg(feature = "backend_glx")]
mod glx;
#[cfg(feature = "backend_gbm")]
mod kms;
#[cfg(feature = "backend_x11")]
mod x11;

#[cfg(feature = "backend_egl")]
pub use self::egl::*;
#[cfg(feature = "backend_glx")]
pub use self::glx::*;
#[cfg(feature = "backend_gbm")]
pub use self::kms::*;
#[cfg(feature = "backend_x11")]
pub use self::x11::*;

/// What a [`MockBackend`] was asked to do, shared with the test after the backend is boxed
#[derive(Debug, Default)]
pub struct MockBackendLog {
    /// Resizes reported by the "native" side on the next dispatch
    pub native_resizes: Vec<(OnscreenId, Size)>,
    pub deinit: Vec<OnscreenId>,
    pub teardown: Vec<&'static str>,
    pub swaps: usize,
}

/// A backend without any native resources, completing swaps synchronously
#[derive(Debug, Default)]
pub struct MockBackend {
    pub log: Rc<RefCell<MockBackendLog>>,
    lifecycle: DisplayLifecycle,
    onscreens: IndexMap<OnscreenId, OnscreenState>,
    pending: PendingNotifications,
}

impl MockBackend {
    fn onscreen(&mut self, id: OnscreenId) -> Result<&mut OnscreenState, WinsysError> {
        self.onscreens.get_mut(&id).ok_or(WinsysError::UnknownOnscreen)
    }
}

impl WinsysBackend for MockBackend {
    fn id(&self) -> WinsysId {
        WinsysId::EglX11
    }

    fn features(&self) -> WinsysFeatures {
        WinsysFeatures::MULTIPLE_ONSCREEN | WinsysFeatures::SWAP_BUFFERS_EVENT
    }

    fn display_setup(&mut self, _template: &OnscreenTemplate) -> Result<(), WinsysError> {
        self.lifecycle.advance(DisplayState::Ready);
        Ok(())
    }

    fn display_destroy(&mut self) {
        self.log.borrow_mut().teardown.push("display_destroy");
        self.lifecycle.reset();
    }

    fn display_state(&self) -> DisplayState {
        self.lifecycle.state()
    }

    fn context_init(&mut self) -> Result<(), WinsysError> {
        Ok(())
    }

    fn context_deinit(&mut self) {
        self.log.borrow_mut().teardown.push("context_deinit");
    }

    fn onscreen_init(&mut self, id: OnscreenId, descriptor: OnscreenDescriptor) -> Result<(), WinsysError> {
        self.onscreens
            .insert(id, OnscreenState::new(descriptor.size, &descriptor.config));
        Ok(())
    }

    fn onscreen_deinit(&mut self, id: OnscreenId) {
        self.onscreens.shift_remove(&id);
        self.log.borrow_mut().deinit.push(id);
    }

    fn onscreen_bind(&mut self, id: OnscreenId) -> Result<(), WinsysError> {
        self.onscreen(id).map(|_| ())
    }

    fn onscreen_swap_buffers_with_damage(&mut self, id: OnscreenId, _damage: &[Rectangle]) -> Result<(), WinsysError> {
        self.onscreen(id)?;
        self.log.borrow_mut().swaps += 1;
        self.pending.push(OnscreenEvent::SwapComplete { onscreen: id });
        Ok(())
    }

    fn onscreen_swap_region(&mut self, id: OnscreenId, rectangles: &[Rectangle]) -> Result<(), WinsysError> {
        self.onscreen_swap_buffers_with_damage(id, rectangles)
    }

    fn onscreen_set_visibility(&mut self, id: OnscreenId, visible: bool) -> Result<(), WinsysError> {
        self.onscreen(id)?.visible = visible;
        Ok(())
    }

    fn onscreen_set_resizable(&mut self, id: OnscreenId, resizable: bool) -> Result<(), WinsysError> {
        self.onscreen(id)?.resizable = resizable;
        Ok(())
    }

    fn onscreen_update_swap_throttled(&mut self, id: OnscreenId, throttled: bool) -> Result<(), WinsysError> {
        self.onscreen(id)?.swap_throttled = throttled;
        Ok(())
    }

    fn onscreen_get_buffer_age(&mut self, _id: OnscreenId) -> i32 {
        0
    }

    fn onscreen_state(&self, id: OnscreenId) -> Option<&OnscreenState> {
        self.onscreens.get(&id)
    }

    fn get_proc_address(&self, _name: &str) -> Option<NonNull<c_void>> {
        None
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }

    fn dispatch_native(&mut self) -> Result<Vec<BackendEvent>, WinsysError> {
        let resizes = std::mem::take(&mut self.log.borrow_mut().native_resizes);
        for (onscreen, size) in resizes {
            if let Some(state) = self.onscreens.get_mut(&onscreen) {
                state.size = size;
                self.pending.push(OnscreenEvent::Resized { onscreen, size });
            }
        }
        Ok(Vec::new())
    }

    fn pending(&mut self) -> &mut PendingNotifications {
        &mut self.pending
    }
}
