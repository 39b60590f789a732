//! X11 window server over x11rb
//!
//! Sets up compositing (Composite redirection, the overlay window made
//! input-transparent with XFixes, Damage tracking per window) and
//! translates core and extension events into [`ServerEvent`]s.

use std::collections::VecDeque;
use std::ffi::{c_void, CString};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, trace, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::ReplyError;
use x11rb::protocol::composite::{self, ConnectionExt as _, Redirect};
use x11rb::protocol::damage::{self, ConnectionExt as _, ReportLevel};
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::shape::SK;
use x11rb::protocol::xfixes::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{
    Allow, ButtonIndex, ChangeWindowAttributesAux, ClientMessageEvent, ConfigureWindowAux,
    ConnectionExt as _, CreateWindowAux, EventMask, GrabMode, ImageFormat, InputFocus, MapState,
    ModMask, StackMode, WindowClass,
};
use x11rb::protocol::{ErrorKind, Event};
use x11rb::x11_utils::X11Error;
use x11rb::xcb_ffi::XCBConnection;
use x11rb::{CURRENT_TIME, NONE};

use crate::geometry::PixelRect;
use crate::server::{Attributes, Handle, PixelBuffer, Pointer, ServerEvent, WindowServer};

x11rb::atom_manager! {
    pub Atoms: AtomsCookie {
        WM_PROTOCOLS,
        WM_DELETE_WINDOW,
    }
}

/// Lock modifiers a key grab has to be repeated for (CapsLock, NumLock)
const LOCK_MASKS: [u16; 4] = [0, 0x02, 0x10, 0x12];

pub struct X11Server {
    conn: XCBConnection,
    screen_num: usize,
    root: Handle,
    size: (u32, u32),
    atoms: Atoms,
    overlay: Handle,
    output: Handle,
    randr: bool,
    queue: VecDeque<ServerEvent>,
}

impl X11Server {
    /// Connect, take over compositing of the root window and grab `keys`
    /// (modifier mask, keycode) on it
    pub fn connect(display: Option<&str>, coexist: bool, keys: &[(u16, u8)]) -> Result<Self> {
        let name = display
            .map(CString::new)
            .transpose()
            .context("display name contains a NUL byte")?;
        let (conn, screen_num) =
            XCBConnection::connect(name.as_deref()).context("failed to connect to X display")?;

        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        let size = (screen.width_in_pixels as u32, screen.height_in_pixels as u32);
        let (root_depth, root_visual) = (screen.root_depth, screen.root_visual);
        info!("connected to X screen {screen_num}: {}x{}", size.0, size.1);

        require(&conn, composite::X11_EXTENSION_NAME)?;
        let version = conn.composite_query_version(0, 4)?.reply()?;
        info!(
            "Composite {}.{}",
            version.major_version, version.minor_version
        );
        require(&conn, xfixes::X11_EXTENSION_NAME)?;
        let version = conn.xfixes_query_version(5, 0)?.reply()?;
        info!("XFixes {}.{}", version.major_version, version.minor_version);
        require(&conn, damage::X11_EXTENSION_NAME)?;
        let version = conn.damage_query_version(1, 1)?.reply()?;
        info!("Damage {}.{}", version.major_version, version.minor_version);

        let randr = match conn.extension_information(randr::X11_EXTENSION_NAME)? {
            Some(_) => {
                let version = conn.randr_query_version(1, 5)?.reply()?;
                (version.major_version, version.minor_version) >= (1, 5)
            }
            None => false,
        };
        if !randr {
            warn!("RandR 1.5 not available, treating the screen as one monitor");
        }

        select_root_events(&conn, root, coexist)?;

        for &(modifiers, keycode) in keys {
            for lock in LOCK_MASKS {
                conn.grab_key(
                    false,
                    root,
                    ModMask::from(modifiers | lock),
                    keycode,
                    GrabMode::ASYNC,
                    GrabMode::ASYNC,
                )?;
            }
        }

        conn.composite_redirect_subwindows(root, Redirect::MANUAL)?
            .check()
            .context("failed to redirect windows, is another compositor running?")?;

        let overlay = conn.composite_get_overlay_window(root)?.reply()?.overlay_win;

        let output = conn.generate_id()?;
        conn.create_window(
            root_depth,
            output,
            overlay,
            0,
            0,
            size.0 as u16,
            size.1 as u16,
            0,
            WindowClass::INPUT_OUTPUT,
            root_visual,
            &CreateWindowAux::new(),
        )?;

        // clicks go through the overlay to the windows underneath
        let region = conn.generate_id()?;
        conn.xfixes_create_region(region, &[])?;
        conn.xfixes_set_window_shape_region(overlay, SK::INPUT, 0, 0, region)?;
        conn.xfixes_set_window_shape_region(output, SK::INPUT, 0, 0, region)?;
        conn.xfixes_destroy_region(region)?;

        conn.map_window(output)?;

        let atoms = Atoms::new(&conn)?.reply()?;
        conn.flush()?;

        let mut server = Self {
            conn,
            screen_num,
            root,
            size,
            atoms,
            overlay,
            output,
            randr,
            queue: VecDeque::new(),
        };
        server.scan_existing()?;

        Ok(server)
    }

    pub fn screen_num(&self) -> usize {
        self.screen_num
    }

    pub fn output_window(&self) -> Handle {
        self.output
    }

    /// Raw xcb connection the GPU surface is created against
    pub fn raw_connection(&self) -> *mut c_void {
        self.conn.get_raw_xcb_connection()
    }

    /// Report windows that existed before we started as if they were just
    /// created, so later notifications about them are not lookup misses
    fn scan_existing(&mut self) -> Result<()> {
        let tree = self.conn.query_tree(self.root)?.reply()?;

        for child in tree.children {
            if child == self.overlay || child == self.output {
                continue;
            }
            let Some(attributes) = tolerate(self.conn.get_window_attributes(child)?.reply())?
            else {
                continue;
            };

            self.queue.push_back(ServerEvent::Created(child));
            if attributes.map_state == MapState::VIEWABLE {
                self.queue.push_back(ServerEvent::Mapped(child));
            }
        }

        debug!("found {} existing windows", self.queue.len());
        Ok(())
    }

    fn translate(&mut self, event: Event) -> Result<Option<ServerEvent>> {
        let event = match event {
            Event::CreateNotify(e) if e.parent == self.root => ServerEvent::Created(e.window),
            Event::ConfigureNotify(e) if e.window != self.root => {
                ServerEvent::Reconfigured(e.window)
            }
            Event::MapNotify(e) => ServerEvent::Mapped(e.window),
            Event::UnmapNotify(e) => ServerEvent::Unmapped(e.window),
            Event::DestroyNotify(e) => ServerEvent::Destroyed(e.window),

            Event::DamageNotify(e) => {
                self.conn.damage_subtract(e.damage, NONE, NONE)?;
                ServerEvent::Damaged(e.drawable)
            }

            Event::KeyPress(e) | Event::KeyRelease(e) => ServerEvent::Key {
                window: e.event,
                press: e.response_type & 0x7f == x11rb::protocol::xproto::KEY_PRESS_EVENT,
                modifiers: u16::from(e.state),
                keycode: e.detail,
            },

            Event::ButtonPress(e) | Event::ButtonRelease(e) => ServerEvent::Button {
                window: e.event,
                press: e.response_type & 0x7f == x11rb::protocol::xproto::BUTTON_PRESS_EVENT,
                modifiers: u16::from(e.state),
                button: e.detail,
                root_x: e.root_x as i32,
                root_y: e.root_y as i32,
            },

            Event::MotionNotify(e) => ServerEvent::Motion {
                subwindow: e.child,
                modifiers: u16::from(e.state),
                root_x: e.root_x as i32,
                root_y: e.root_y as i32,
            },

            Event::Error(e) => {
                match e.error_kind {
                    ErrorKind::Window
                    | ErrorKind::Drawable
                    | ErrorKind::Match
                    | ErrorKind::Pixmap
                    | ErrorKind::DamageBadDamage => {
                        trace!("X11 error for a vanished window: {:?}", e);
                    }
                    _ => warn!("X11 error: {:?}", e),
                }
                return Ok(None);
            }

            other => {
                trace!("unhandled event: {:?}", other);
                return Ok(None);
            }
        };

        Ok(Some(event))
    }
}

impl WindowServer for X11Server {
    fn pending(&mut self) -> Result<usize> {
        self.conn.flush()?;
        while let Some(event) = self.conn.poll_for_event()? {
            if let Some(event) = self.translate(event)? {
                self.queue.push_back(event);
            }
        }
        Ok(self.queue.len())
    }

    fn next_event(&mut self) -> Option<ServerEvent> {
        self.queue.pop_front()
    }

    fn attributes(&mut self, window: Handle) -> Result<Option<Attributes>> {
        let Some(attributes) = tolerate(self.conn.get_window_attributes(window)?.reply())? else {
            return Ok(None);
        };
        let Some(geometry) = tolerate(self.conn.get_geometry(window)?.reply())? else {
            return Ok(None);
        };

        Ok(Some(Attributes {
            visible: attributes.map_state == MapState::VIEWABLE,
            rect: PixelRect::new(
                geometry.x as i32,
                geometry.y as i32,
                geometry.width as u32,
                geometry.height as u32,
            ),
            depth: geometry.depth,
        }))
    }

    fn pointer(&mut self) -> Result<Pointer> {
        let reply = self.conn.query_pointer(self.root)?.reply()?;
        Ok(Pointer {
            x: reply.root_x as i32,
            y: reply.root_y as i32,
        })
    }

    fn monitors(&mut self) -> Result<Vec<PixelRect>> {
        let screen = PixelRect::new(0, 0, self.size.0, self.size.1);
        if !self.randr {
            return Ok(vec![screen]);
        }

        let reply = self.conn.randr_get_monitors(self.root, true)?.reply()?;
        let monitors: Vec<PixelRect> = reply
            .monitors
            .iter()
            .map(|m| PixelRect::new(m.x as i32, m.y as i32, m.width as u32, m.height as u32))
            .collect();

        if monitors.is_empty() {
            return Ok(vec![screen]);
        }
        Ok(monitors)
    }

    fn screen_size(&self) -> (u32, u32) {
        self.size
    }

    fn root(&self) -> Handle {
        self.root
    }

    fn own_windows(&self) -> Vec<Handle> {
        vec![self.overlay, self.output]
    }

    fn configure(&mut self, window: Handle, rect: PixelRect) -> Result<()> {
        let aux = ConfigureWindowAux::new()
            .x(rect.x)
            .y(rect.y)
            .width(rect.width)
            .height(rect.height);
        self.conn.configure_window(window, &aux)?;
        Ok(())
    }

    fn move_to(&mut self, window: Handle, x: i32, y: i32) -> Result<()> {
        self.conn
            .configure_window(window, &ConfigureWindowAux::new().x(x).y(y))?;
        Ok(())
    }

    fn focus(&mut self, window: Handle) -> Result<()> {
        self.conn
            .set_input_focus(InputFocus::PARENT, window, CURRENT_TIME)?;
        self.conn.map_window(window)?;
        self.conn.configure_window(
            window,
            &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
        )?;
        Ok(())
    }

    fn close(&mut self, window: Handle) -> Result<()> {
        let event = ClientMessageEvent::new(
            32,
            window,
            self.atoms.WM_PROTOCOLS,
            [self.atoms.WM_DELETE_WINDOW, CURRENT_TIME, 0, 0, 0],
        );
        self.conn
            .send_event(false, window, EventMask::NO_EVENT, event)?;
        Ok(())
    }

    fn kill(&mut self, window: Handle) -> Result<()> {
        self.conn.destroy_window(window)?;
        Ok(())
    }

    fn allow_events(&mut self, replay: bool) -> Result<()> {
        let mode = if replay {
            Allow::REPLAY_POINTER
        } else {
            Allow::SYNC_POINTER
        };
        self.conn.allow_events(mode, CURRENT_TIME)?;
        Ok(())
    }

    fn manage(&mut self, window: Handle) -> Result<()> {
        self.conn.change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::FOCUS_CHANGE),
        )?;

        // every click goes through us first, see allow_events
        self.conn.grab_button(
            true,
            window,
            EventMask::BUTTON_PRESS | EventMask::BUTTON_RELEASE | EventMask::BUTTON_MOTION,
            GrabMode::SYNC,
            GrabMode::SYNC,
            NONE,
            NONE,
            ButtonIndex::ANY,
            ModMask::ANY,
        )?;

        let damage = self.conn.generate_id()?;
        self.conn
            .damage_create(damage, window, ReportLevel::NON_EMPTY)?;
        Ok(())
    }

    fn export_pixels(&mut self, window: Handle) -> Result<Option<PixelBuffer>> {
        let pixmap = self.conn.generate_id()?;
        let named = self
            .conn
            .composite_name_window_pixmap(window, pixmap)?
            .check();
        Ok(tolerate(named)?.map(|()| PixelBuffer(pixmap)))
    }

    fn read_pixels(&mut self, buffer: PixelBuffer, width: u32, height: u32) -> Result<Option<Vec<u8>>> {
        let reply = self.conn.get_image(
            ImageFormat::Z_PIXMAP,
            buffer.0,
            0,
            0,
            width as u16,
            height as u16,
            !0,
        )?;
        let Some(image) = tolerate(reply.reply())? else {
            return Ok(None);
        };

        let expected = (width * height * 4) as usize;
        if image.data.len() != expected {
            warn!(
                "pixmap {:#x} returned {} bytes, expected {expected}",
                buffer.0,
                image.data.len()
            );
            return Ok(None);
        }
        Ok(Some(image.data))
    }

    fn release_pixels(&mut self, buffer: PixelBuffer) {
        if let Err(e) = self.conn.free_pixmap(buffer.0) {
            warn!("failed to free pixmap {:#x}: {e}", buffer.0);
        }
    }

    fn grab(&mut self) -> Result<()> {
        self.conn.grab_server()?;
        Ok(())
    }

    fn ungrab(&mut self) -> Result<()> {
        self.conn.ungrab_server()?;
        Ok(())
    }
}

fn require(conn: &XCBConnection, name: &'static str) -> Result<()> {
    if conn.extension_information(name)?.is_none() {
        bail!("X server lacks the {name} extension");
    }
    Ok(())
}

/// Select structure and pointer events on the root window. Only one client
/// may select button presses there; when coexisting with another window
/// manager we fall back to structure notifications alone.
fn select_root_events(conn: &XCBConnection, root: Handle, coexist: bool) -> Result<()> {
    let full = EventMask::SUBSTRUCTURE_NOTIFY
        | EventMask::POINTER_MOTION
        | EventMask::BUTTON_MOTION
        | EventMask::BUTTON_PRESS
        | EventMask::BUTTON_RELEASE;

    let selected = conn
        .change_window_attributes(root, &ChangeWindowAttributesAux::new().event_mask(full))?
        .check();

    match selected {
        Ok(()) => Ok(()),
        Err(e) if coexist => {
            warn!("root window input is taken ({e}), watching notifications only");
            conn.change_window_attributes(
                root,
                &ChangeWindowAttributesAux::new().event_mask(EventMask::SUBSTRUCTURE_NOTIFY),
            )?
            .check()
            .context("failed to select root window notifications")?;
            Ok(())
        }
        Err(e) => Err(e).context("failed to select root window events, is another window manager running?"),
    }
}

fn vanished(error: &X11Error) -> bool {
    matches!(
        error.error_kind,
        ErrorKind::Window | ErrorKind::Drawable | ErrorKind::Match | ErrorKind::Pixmap
    )
}

/// Errors for windows that disappeared between a notification and our
/// follow-up request become `None`, everything else stays an error
fn tolerate<T>(result: Result<T, ReplyError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ReplyError::X11Error(e)) if vanished(&e) => {
            trace!("request for vanished window failed: {:?}", e.error_kind);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
