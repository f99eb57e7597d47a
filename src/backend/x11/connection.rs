//! Utilities to open a connection to an X server using [x11rb](https://github.com/psychon/x11rb).

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    ffi::{c_int, c_void, CString},
    fmt,
    os::unix::io::{AsFd, AsRawFd, BorrowedFd},
    ptr::{self, NonNull},
};

use once_cell::sync::Lazy;
use tracing::{debug, info, info_span, trace, warn};
use x11_dl::{
    xlib::{self, Xlib},
    xlib_xcb::{XEventQueueOwner, Xlib_xcb},
};
use x11rb::{
    connection::{Connection, RequestConnection as _},
    protocol::{
        damage::{self, ConnectionExt as _},
        shm::ConnectionExt as _,
        xproto::{ConnectionExt as _, ImageFormat as XImageFormat, Screen},
        Event,
    },
    rust_connection::ConnectionError,
    xcb_ffi::XCBConnection,
};

use crate::utils::{NativeHandle, Rectangle, Size};

use super::{
    extension::Extensions, window, ErrorTrap, ErrorTrapStack, ImageFormat, PixmapGeometry, PixmapSource,
    SizeHints, TrapToken, VisualMasks, WindowDescriptor, X11Error, XEvent, XServer, XlibError,
};

struct X11Libraries {
    xlib: Xlib,
    xlib_xcb: Xlib_xcb,
}

static LIBRARIES: Lazy<Result<X11Libraries, String>> = Lazy::new(|| {
    let xlib = Xlib::open().map_err(|err| err.to_string())?;
    let xlib_xcb = Xlib_xcb::open().map_err(|err| err.to_string())?;
    Ok(X11Libraries { xlib, xlib_xcb })
});

fn libraries() -> Result<&'static X11Libraries, XlibError> {
    LIBRARIES
        .as_ref()
        .map_err(|err| XlibError::LibrariesNotLoaded(err.clone()))
}

type XlibErrorHandler = Option<unsafe extern "C" fn(*mut xlib::Display, *mut xlib::XErrorEvent) -> c_int>;

thread_local! {
    // Last error reported to Xlib's error handler while a trap was active.
    static XLIB_ERROR: Cell<u8> = Cell::new(0);
}

unsafe extern "C" fn trap_xlib_error(_display: *mut xlib::Display, event: *mut xlib::XErrorEvent) -> c_int {
    if let Some(event) = event.as_ref() {
        XLIB_ERROR.with(|code| code.set(event.error_code));
    }
    0
}

fn take_xlib_error() -> u8 {
    XLIB_ERROR.with(|code| code.replace(0))
}

/// A connection to the X server.
///
/// This contains a way to access both the xcb connection used for every request issued by this
/// crate and the xlib Display handed to GLX and EGL drivers.
pub struct X11Connection {
    display: NativeHandle<NonNull<xlib::Display>>,
    screen: usize,
    xcb: XCBConnection,
    extensions: Extensions,
    traps: RefCell<ErrorTrapStack>,
    previous_handler: Cell<XlibErrorHandler>,
    queued: RefCell<VecDeque<Event>>,
    span: tracing::Span,
}

impl fmt::Debug for X11Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("X11Connection")
            .field("display", &self.display)
            .field("screen", &self.screen)
            .field("extensions", &self.extensions)
            .field("traps", &self.traps)
            .finish_non_exhaustive()
    }
}

impl X11Connection {
    /// Open a connection to the X server named `display_name`, or `$DISPLAY` if `None`.
    pub fn connect(display_name: Option<&str>) -> Result<X11Connection, X11Error> {
        let span = info_span!("x11_connection", display = display_name.unwrap_or_default());
        let _guard = span.enter();

        let libraries = libraries()?;
        let name = display_name
            .map(CString::new)
            .transpose()
            .map_err(|_| XlibError::NoConnection)?;

        let display = unsafe { (libraries.xlib.XOpenDisplay)(name.as_ref().map_or(ptr::null(), |name| name.as_ptr())) };
        let display = NonNull::new(display).ok_or(XlibError::NoConnection)?;

        // Transfer ownership of the event queue to XCB since we use x11rb to read events.
        unsafe {
            (libraries.xlib_xcb.XSetEventQueueOwner)(display.as_ptr(), XEventQueueOwner::XCBOwnsEventQueue);
        }

        Self::wrap(NativeHandle::Owned(display), span.clone()).map_err(|err| {
            unsafe { (libraries.xlib.XCloseDisplay)(display.as_ptr()) };
            err
        })
    }

    /// Use a display opened by the application.
    ///
    /// The display is never closed by this crate. The application must have handed the event
    /// queue to XCB, as events are read through the XCB connection.
    ///
    /// # Safety
    ///
    /// `display` must be a valid Xlib `Display*` that outlives the returned connection.
    pub unsafe fn from_foreign_display(display: *mut c_void) -> Result<X11Connection, X11Error> {
        let span = info_span!("x11_connection", display = "foreign");
        let display = NonNull::new(display as *mut xlib::Display).ok_or(XlibError::NoConnection)?;
        let _guard = span.enter();
        Self::wrap(NativeHandle::Foreign(display), span.clone())
    }

    fn wrap(display: NativeHandle<NonNull<xlib::Display>>, span: tracing::Span) -> Result<X11Connection, X11Error> {
        let libraries = libraries()?;
        let raw = display.get().as_ptr();

        let screen = unsafe { (libraries.xlib.XDefaultScreen)(raw) } as usize;
        let xcb_connection_t = unsafe { (libraries.xlib_xcb.XGetXCBConnection)(raw) };
        if xcb_connection_t.is_null() {
            return Err(XlibError::NoXlibXcb.into());
        }

        // Do not drop the connection upon closure since Xlib created the xcb_connection_t.
        let xcb = unsafe { XCBConnection::from_raw_xcb_connection(xcb_connection_t as *mut c_void, false)? };
        let extensions = Extensions::check_extensions(&xcb)?;
        // GLX swap events are only decoded once the extension's event base is known.
        xcb.extension_information(x11rb::protocol::glx::X11_EXTENSION_NAME)?;
        let foreign = display.is_foreign();
        info!(screen, foreign, "Connected to the X server");

        Ok(X11Connection {
            display,
            screen,
            xcb,
            extensions,
            traps: RefCell::new(ErrorTrapStack::new()),
            previous_handler: Cell::new(None),
            queued: RefCell::new(VecDeque::new()),
            span,
        })
    }

    /// The Xlib `Display*` of this connection
    pub fn xlib_display(&self) -> *mut c_void {
        self.display.get().as_ptr() as *mut c_void
    }

    /// Whether the display was supplied by the application
    pub fn is_foreign(&self) -> bool {
        self.display.is_foreign()
    }

    /// Number of the default screen
    pub fn screen_number(&self) -> usize {
        self.screen
    }

    /// Optional extensions found on the server
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// The underlying x11rb connection
    pub fn xcb_connection(&self) -> &XCBConnection {
        &self.xcb
    }

    fn screen(&self) -> &Screen {
        &self.xcb.setup().roots[self.screen]
    }

    fn send<T>(&self, request: &'static str, result: Result<T, ConnectionError>) {
        if let Err(err) = result {
            warn!(parent: &self.span, ?err, request, "Failed to send X11 request");
        }
    }

    fn report_error(&self, error: x11rb::x11_utils::X11Error) {
        if !self.traps.borrow_mut().record(error.error_code) {
            warn!(parent: &self.span, ?error, "Unhandled X11 protocol error");
        } else {
            trace!(parent: &self.span, code = error.error_code, "X11 protocol error trapped");
        }
    }

    // Read everything the server sent so far, absorbing errors into the active trap.
    fn pump(&self) -> Result<(), X11Error> {
        while let Some(event) = self.xcb.poll_for_event()? {
            match event {
                Event::Error(error) => self.report_error(error),
                event => self.queued.borrow_mut().push_back(event),
            }
        }
        Ok(())
    }

    fn convert(event: Event) -> Option<XEvent> {
        match event {
            Event::ConfigureNotify(event) => Some(XEvent::Configure {
                window: event.window,
                size: Size::new(event.width.into(), event.height.into()),
            }),
            Event::Expose(event) => Some(XEvent::Expose {
                window: event.window,
                area: Rectangle::new(
                    event.x.into(),
                    event.y.into(),
                    event.width.into(),
                    event.height.into(),
                ),
            }),
            Event::GlxBufferSwapComplete(event) => Some(XEvent::SwapComplete {
                drawable: event.drawable,
            }),
            Event::DamageNotify(event) => Some(XEvent::DamageNotify {
                damage: event.damage,
                area: Rectangle::new(
                    event.area.x.into(),
                    event.area.y.into(),
                    event.area.width.into(),
                    event.area.height.into(),
                ),
            }),
            _ => None,
        }
    }
}

impl XServer for X11Connection {
    fn trap_errors(&self) -> TrapToken {
        let mut traps = self.traps.borrow_mut();
        if traps.is_active() {
            // errors reported so far belong to the enclosing trap
            let code = take_xlib_error();
            if code != 0 {
                traps.record(code);
            }
        } else if let Ok(libraries) = libraries() {
            take_xlib_error();
            let previous = unsafe { (libraries.xlib.XSetErrorHandler)(Some(trap_xlib_error)) };
            self.previous_handler.set(previous);
        }
        traps.push()
    }

    fn untrap_errors(&self, token: TrapToken) -> u8 {
        self.sync();

        let mut traps = self.traps.borrow_mut();
        let code = take_xlib_error();
        if code != 0 {
            traps.record(code);
        }
        let code = traps.pop(token);
        if !traps.is_active() {
            if let Ok(libraries) = libraries() {
                unsafe { (libraries.xlib.XSetErrorHandler)(self.previous_handler.take()) };
            }
        }
        code
    }

    fn create_window(&self, descriptor: &WindowDescriptor) -> Result<u32, X11Error> {
        let window = window::create_window(&self.xcb, self.screen(), descriptor)?;
        debug!(parent: &self.span, window, ?descriptor, "Created window");
        Ok(window)
    }

    fn destroy_window(&self, window: u32) {
        self.send("DestroyWindow", self.xcb.destroy_window(window));
    }

    fn window_size(&self, window: u32) -> Result<Size, X11Error> {
        let geometry = self.xcb.get_geometry(window)?.reply()?;
        Ok(Size::new(geometry.width.into(), geometry.height.into()))
    }

    fn map_window(&self, window: u32) {
        self.send("MapWindow", self.xcb.map_window(window));
    }

    fn unmap_window(&self, window: u32) {
        self.send("UnmapWindow", self.xcb.unmap_window(window));
    }

    fn set_size_hints(&self, window: u32, hints: &SizeHints) {
        if let Err(err) = window::set_size_hints(&self.xcb, window, hints) {
            warn!(parent: &self.span, ?err, window, "Failed to set size hints");
        }
    }

    fn visual_depth(&self, visual: u32) -> Option<u8> {
        self.screen()
            .allowed_depths
            .iter()
            .find(|depth| depth.visuals.iter().any(|candidate| candidate.visual_id == visual))
            .map(|depth| depth.depth)
    }

    fn flush(&self) {
        self.send("flush", self.xcb.flush());
    }

    fn sync(&self) {
        if let Ok(libraries) = libraries() {
            unsafe { (libraries.xlib.XSync)(self.display.get().as_ptr(), xlib::False) };
        }
        let round_trip = self
            .xcb
            .get_input_focus()
            .map_err(X11Error::from)
            .and_then(|cookie| cookie.reply().map_err(X11Error::from));
        if let Err(err) = round_trip.and_then(|_| self.pump()) {
            warn!(parent: &self.span, ?err, "Failed to synchronize with the X server");
        }
    }

    fn poll_event(&self) -> Result<Option<XEvent>, X11Error> {
        loop {
            let queued = self.queued.borrow_mut().pop_front();
            let event = match queued {
                Some(event) => event,
                None => match self.xcb.poll_for_event()? {
                    Some(Event::Error(error)) => {
                        self.report_error(error);
                        continue;
                    }
                    Some(event) => event,
                    None => return Ok(None),
                },
            };

            if let Some(event) = Self::convert(event) {
                return Ok(Some(event));
            }
        }
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.as_fd())
    }
}

impl PixmapSource for X11Connection {
    fn pixmap_geometry(&self, pixmap: u32) -> Result<PixmapGeometry, X11Error> {
        let geometry = self.xcb.get_geometry(pixmap)?.reply()?;
        Ok(PixmapGeometry {
            size: Size::new(geometry.width.into(), geometry.height.into()),
            depth: geometry.depth,
        })
    }

    fn visual_masks(&self) -> VisualMasks {
        let screen = self.screen();
        screen
            .allowed_depths
            .iter()
            .flat_map(|depth| depth.visuals.iter())
            .find(|visual| visual.visual_id == screen.root_visual)
            .map(|visual| VisualMasks {
                red: visual.red_mask,
                green: visual.green_mask,
                blue: visual.blue_mask,
            })
            .unwrap_or_default()
    }

    fn image_format(&self, depth: u8) -> Option<ImageFormat> {
        self.xcb
            .setup()
            .pixmap_formats
            .iter()
            .find(|format| format.depth == depth)
            .map(|format| ImageFormat {
                bits_per_pixel: format.bits_per_pixel,
                scanline_pad: format.scanline_pad,
            })
    }

    fn create_damage(&self, drawable: u32) -> Option<u32> {
        self.extensions.damage?;
        let damage = self.xcb.generate_id().ok()?;
        self.send(
            "DamageCreate",
            self.xcb
                .damage_create(damage, drawable, damage::ReportLevel::BOUNDING_BOX),
        );
        Some(damage)
    }

    fn subtract_damage(&self, damage: u32) {
        self.send(
            "DamageSubtract",
            self.xcb.damage_subtract(damage, x11rb::NONE, x11rb::NONE),
        );
    }

    fn destroy_damage(&self, damage: u32) {
        self.send("DamageDestroy", self.xcb.damage_destroy(damage));
    }

    fn shm_available(&self) -> bool {
        self.extensions.shm.is_some()
    }

    fn attach_shm(&self, shmid: i32) -> Option<u32> {
        self.extensions.shm?;
        let segment = self.xcb.generate_id().ok()?;

        let trap = ErrorTrap::new(self);
        self.send("ShmAttach", self.xcb.shm_attach(segment, shmid as u32, false));
        match trap.finish() {
            0 => Some(segment),
            code => {
                warn!(parent: &self.span, code, "XShmAttach failed");
                None
            }
        }
    }

    fn detach_shm(&self, segment: u32) {
        self.send("ShmDetach", self.xcb.shm_detach(segment));
    }

    fn shm_get_image(&self, drawable: u32, area: Rectangle, segment: u32) -> Result<(), X11Error> {
        self.xcb
            .shm_get_image(
                drawable,
                area.x as i16,
                area.y as i16,
                area.width as u16,
                area.height as u16,
                !0,
                XImageFormat::Z_PIXMAP.into(),
                segment,
                0,
            )?
            .reply()?;
        Ok(())
    }

    fn get_image(&self, drawable: u32, area: Rectangle) -> Result<Vec<u8>, X11Error> {
        let reply = self
            .xcb
            .get_image(
                XImageFormat::Z_PIXMAP,
                drawable,
                area.x as i16,
                area.y as i16,
                area.width as u16,
                area.height as u16,
                !0,
            )?
            .reply()?;
        Ok(reply.data)
    }
}

impl AsFd for X11Connection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the socket stays open as long as the connection, which outlives the borrow
        unsafe { BorrowedFd::borrow_raw(self.xcb.as_raw_fd()) }
    }
}

impl Drop for X11Connection {
    fn drop(&mut self) {
        if let (Some(display), Ok(libraries)) = (self.display.owned(), libraries()) {
            debug!(parent: &self.span, "Closing X display");
            unsafe { (libraries.xlib.XCloseDisplay)(display.as_ptr()) };
        }
    }
}
