//! EGL on an X11 connection

use std::{os::unix::io::BorrowedFd, rc::Rc};

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::{
    backend::{
        winsys::{
            BackendEvent, OnscreenDescriptor, OnscreenEvent, OnscreenId, RendererOptions, WinsysError,
            WinsysFeatures, WinsysId,
        },
        x11::{ErrorTrap, SizeHints, WindowDescriptor, X11Connection, X11Error, XEvent, XServer, XlibError, WINDOW_EVENT_MASK},
    },
    utils::{NativeHandle, Size},
};

use super::{ffi::EGLint, EglBackend, EglLibrary, EglPlatform, PlatformEvents};

/// X11 side of the EGL backend: X windows wrapped in EGL surfaces
#[derive(Debug)]
pub struct X11Platform<X: XServer = X11Connection> {
    server: Rc<X>,
    native_display: usize,
    dummy_window: Option<u32>,
    windows: IndexMap<OnscreenId, NativeHandle<u32>>,
}

impl<X: XServer> X11Platform<X> {
    /// Platform on `server`, whose Xlib display is `native_display`
    pub fn new(server: Rc<X>, native_display: usize) -> Self {
        X11Platform {
            server,
            native_display,
            dummy_window: None,
            windows: IndexMap::new(),
        }
    }

    /// The X server connection
    pub fn server(&self) -> &Rc<X> {
        &self.server
    }

    fn depth(&self, native_visual: EGLint) -> Result<u8, WinsysError> {
        self.server
            .visual_depth(native_visual as u32)
            .ok_or_else(|| WinsysError::CreateOnscreen(format!("Unable to retrieve the visual {native_visual:#x}")))
    }

    fn window_of(&self, window: u32) -> Option<OnscreenId> {
        self.windows
            .iter()
            .find(|(_, handle)| handle.get() == window)
            .map(|(&id, _)| id)
    }
}

impl EglBackend<X11Platform> {
    /// Connect to the X server and load `libEGL`
    pub fn connect_x11(options: &mut RendererOptions) -> Result<EglBackend<X11Platform>, WinsysError> {
        let server = match options.foreign_display {
            // SAFETY: the caller of `RendererOptions::foreign_xlib_display` vouched for the display
            Some(display) => unsafe { X11Connection::from_foreign_display(display.as_ptr()) },
            None => X11Connection::connect(options.display_name.as_deref()),
        }
        .map_err(|err| match err {
            X11Error::Xlib(XlibError::NoConnection) => WinsysError::CannotOpenDisplay,
            err => err.into(),
        })?;

        let native_display = server.xlib_display() as usize;
        let driver = EglLibrary::open()?;
        EglBackend::from_parts(
            X11Platform::new(Rc::new(server), native_display),
            Rc::new(driver),
            options.driver,
        )
    }
}

impl<X: XServer> EglPlatform for X11Platform<X> {
    fn id(&self) -> WinsysId {
        WinsysId::EglX11
    }

    fn native_display(&self) -> usize {
        self.native_display
    }

    fn features(&self) -> WinsysFeatures {
        WinsysFeatures::MULTIPLE_ONSCREEN
    }

    fn create_dummy_window(&mut self, native_visual: EGLint, _surfaceless: bool) -> Result<Option<usize>, WinsysError> {
        let depth = self.depth(native_visual)?;
        let window = self
            .server
            .create_window(&WindowDescriptor::dummy(native_visual as u32, depth))?;
        self.dummy_window = Some(window);
        Ok(Some(window as usize))
    }

    fn destroy_dummy_window(&mut self) {
        if let Some(window) = self.dummy_window.take() {
            self.server.destroy_window(window);
        }
    }

    fn create_window(
        &mut self,
        id: OnscreenId,
        descriptor: OnscreenDescriptor,
        native_visual: EGLint,
    ) -> Result<(usize, Size), WinsysError> {
        let (window, size) = match descriptor.foreign_window {
            Some(mut foreign) => {
                let trap = ErrorTrap::new(&*self.server);
                let size = self.server.window_size(foreign.xid);
                let code = trap.finish();
                match size {
                    Ok(size) if code == 0 => {
                        (foreign.update_mask)(foreign.xid, WINDOW_EVENT_MASK);
                        (NativeHandle::Foreign(foreign.xid), size)
                    }
                    _ => {
                        return Err(WinsysError::CreateOnscreen(format!(
                            "Unable to query geometry of foreign xid {:#010x} (X error {code})",
                            foreign.xid
                        )))
                    }
                }
            }
            None => {
                let size = Size::new(descriptor.size.w.max(1), descriptor.size.h.max(1));
                let depth = self.depth(native_visual)?;
                let trap = ErrorTrap::new(&*self.server);
                let window = self
                    .server
                    .create_window(&WindowDescriptor::toplevel(size, native_visual as u32, depth));
                let code = trap.finish();
                match window {
                    Ok(window) if code == 0 => (NativeHandle::Owned(window), size),
                    Ok(window) => {
                        self.server.destroy_window(window);
                        return Err(WinsysError::CreateOnscreen(format!(
                            "X error {code} while creating the window"
                        )));
                    }
                    Err(err) => return Err(WinsysError::CreateOnscreen(err.to_string())),
                }
            }
        };
        debug!(window = window.get(), foreign = window.is_foreign(), "X window ready");
        self.windows.insert(id, window);
        Ok((window.get() as usize, size))
    }

    fn destroy_window(&mut self, id: OnscreenId) {
        let Some(window) = self.windows.shift_remove(&id) else {
            return;
        };
        if let Some(window) = window.owned() {
            let trap = ErrorTrap::new(&*self.server);
            self.server.destroy_window(window);
            if trap.finish() != 0 {
                warn!(window, "X error while destroying the window");
            }
        }
    }

    fn set_visibility(&mut self, id: OnscreenId, visible: bool) {
        let Some(window) = self.windows.get(&id).map(|window| window.get()) else {
            return;
        };
        if visible {
            self.server.map_window(window);
        } else {
            self.server.unmap_window(window);
        }
        self.server.flush();
    }

    fn set_resizable(&mut self, id: OnscreenId, resizable: bool, size: Size) {
        let Some(window) = self.windows.get(&id).map(|window| window.get()) else {
            return;
        };
        let hints = if resizable {
            SizeHints::resizable()
        } else {
            SizeHints::fixed(size)
        };
        self.server.set_size_hints(window, &hints);
    }

    fn window_xid(&self, id: OnscreenId) -> Option<u32> {
        self.windows.get(&id).map(|window| window.get())
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.server.poll_fd()
    }

    fn dispatch(&mut self) -> Result<PlatformEvents, WinsysError> {
        let mut events = PlatformEvents::default();
        while let Some(event) = self.server.poll_event()? {
            match event {
                XEvent::Configure { window, size } => match self.window_of(window) {
                    Some(onscreen) => events.onscreen.push(OnscreenEvent::Resized { onscreen, size }),
                    None => events.unhandled.push(BackendEvent::X11(event)),
                },
                XEvent::Expose { window, area } => match self.window_of(window) {
                    Some(onscreen) => events.onscreen.push(OnscreenEvent::Dirty { onscreen, area }),
                    None => events.unhandled.push(BackendEvent::X11(event)),
                },
                XEvent::SwapComplete { drawable } => {
                    trace!(drawable, "Ignoring a GLX swap event");
                }
                event => events.unhandled.push(BackendEvent::X11(event)),
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::{
        backend::winsys::{GlDriver, OnscreenTemplate, WinsysBackend},
        test_utils::{MockEgl, MockServer, RGB_VISUAL},
        utils::Rectangle,
    };

    type TestBackend = EglBackend<X11Platform<MockServer>, MockEgl>;

    fn connect() -> (TestBackend, Rc<MockServer>, Rc<MockEgl>) {
        crate::utils::test_log::init();
        let server = Rc::new(MockServer::new());
        let driver = Rc::new(MockEgl::new());
        driver.set_native_visual(RGB_VISUAL as EGLint);
        let mut backend = EglBackend::from_parts(X11Platform::new(server.clone(), 0x1), driver.clone(), GlDriver::Gl).unwrap();
        backend.display_setup(&OnscreenTemplate::default()).unwrap();
        backend.context_init().unwrap();
        (backend, server, driver)
    }

    #[test]
    fn dummy_window_uses_the_config_visual() {
        let (mut backend, server, _) = connect();
        assert_eq!(server.count(&format!("create_window 1x1 visual {RGB_VISUAL:#x}")), 1);
        assert!(backend.features().contains(WinsysFeatures::MULTIPLE_ONSCREEN));

        backend.display_destroy();
        assert_eq!(server.count("destroy_window"), 1);
    }

    #[test]
    fn unknown_visuals_fail_the_display() {
        crate::utils::test_log::init();
        let server = Rc::new(MockServer::new());
        let driver = Rc::new(MockEgl::new());
        driver.set_native_visual(0x99);
        let mut backend = TestBackend::from_parts(X11Platform::new(server.clone(), 0x1), driver, GlDriver::Gl).unwrap();
        assert!(backend.display_setup(&OnscreenTemplate::default()).is_err());
        assert_eq!(server.count("create_window"), 0);
    }

    #[test]
    fn onscreens_are_x_windows() {
        let (mut backend, server, _) = connect();
        let id = OnscreenId::next();
        backend
            .onscreen_init(id, OnscreenDescriptor::new(Size::new(320, 240)))
            .unwrap();
        let xid = backend.onscreen_x11_get_window_xid(id).unwrap();
        assert!(server.window_exists(xid));

        backend.onscreen_set_visibility(id, true).unwrap();
        assert!(server.is_mapped(xid));
        backend.onscreen_set_resizable(id, false).unwrap();
        assert_eq!(server.size_hints(xid), Some(SizeHints::fixed(Size::new(320, 240))));

        backend.onscreen_deinit(id);
        assert!(!server.window_exists(xid));
    }

    #[test]
    fn foreign_windows_are_kept() {
        let (mut backend, server, _) = connect();
        let xid = server.add_window(Size::new(300, 200));
        let masks = Rc::new(RefCell::new(Vec::new()));
        let seen = masks.clone();
        let descriptor = OnscreenDescriptor::new(Size::new(10, 10))
            .with_foreign_window(xid, move |window, mask| seen.borrow_mut().push((window, mask)));

        let id = OnscreenId::next();
        backend.onscreen_init(id, descriptor).unwrap();
        assert_eq!(*masks.borrow(), vec![(xid, WINDOW_EVENT_MASK)]);
        assert_eq!(backend.onscreen_state(id).unwrap().size, Size::new(300, 200));

        backend.onscreen_deinit(id);
        assert!(server.window_exists(xid));

        let descriptor = OnscreenDescriptor::new(Size::new(10, 10)).with_foreign_window(0xdead, |_, _| {});
        let err = backend.onscreen_init(OnscreenId::next(), descriptor).unwrap_err();
        assert!(err.to_string().contains("Unable to query geometry of foreign xid"));
        assert_eq!(server.trap_depth(), 0);
    }

    #[test]
    fn configure_and_expose_become_notifications() {
        let (mut backend, server, _) = connect();
        let id = OnscreenId::next();
        backend
            .onscreen_init(id, OnscreenDescriptor::new(Size::new(64, 64)))
            .unwrap();
        let xid = backend.onscreen_x11_get_window_xid(id).unwrap();

        server.push_event(XEvent::Configure {
            window: xid,
            size: Size::new(640, 480),
        });
        server.push_event(XEvent::Expose {
            window: xid,
            area: Rectangle::new(0, 0, 5, 5),
        });
        let foreign = XEvent::Expose {
            window: 0x4242,
            area: Rectangle::new(0, 0, 1, 1),
        };
        server.push_event(foreign);

        let unhandled = backend.dispatch_native().unwrap();
        assert_eq!(unhandled, vec![BackendEvent::X11(foreign)]);
        assert_eq!(
            backend.pending().take(),
            vec![
                OnscreenEvent::Resized {
                    onscreen: id,
                    size: Size::new(640, 480)
                },
                OnscreenEvent::Dirty {
                    onscreen: id,
                    area: Rectangle::new(0, 0, 5, 5)
                },
            ]
        );
    }
}
