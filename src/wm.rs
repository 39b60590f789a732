//! Event synchronization between the window server and the compositor
//!
//! `WindowManager` is the only consumer of the server's event stream. It
//! keeps the client table in step with server notifications, re-queries
//! the server for authoritative attributes, and forwards each notification
//! to the [`Shell`] as exactly one callback.

use anyhow::Result;
use tracing::{debug, trace};

use crate::clients::{ClientTable, WindowId};
use crate::geometry::{Mapper, PixelRect, Rect};
use crate::server::{Handle, ServerEvent, WindowServer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInput {
    pub window: Option<WindowId>,
    pub press: bool,
    pub modifiers: u16,
    pub keycode: u8,
}

/// Button press or release, pointer position in device coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ButtonInput {
    pub window: Option<WindowId>,
    pub press: bool,
    pub modifiers: u16,
    pub button: u8,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerMotion {
    pub window: Option<WindowId>,
    pub modifiers: u16,
    pub x: f32,
    pub y: f32,
}

/// Receiver of window and input notifications
pub trait Shell<S: WindowServer> {
    fn create(&mut self, wm: &mut WindowManager<S>, id: WindowId) -> Result<()>;

    /// Geometry or visibility changed, `rect` in device coordinates
    fn modify(&mut self, wm: &mut WindowManager<S>, id: WindowId, visible: bool, rect: Rect) -> Result<()>;

    fn destroy(&mut self, wm: &mut WindowManager<S>, id: WindowId) -> Result<()>;

    fn damage(&mut self, _wm: &mut WindowManager<S>, _id: WindowId) -> Result<()> {
        Ok(())
    }

    fn keyboard(&mut self, wm: &mut WindowManager<S>, input: KeyInput) -> Result<()>;

    /// Returns whether the click is passed on to the client underneath
    fn click(&mut self, wm: &mut WindowManager<S>, input: ButtonInput) -> Result<bool>;

    fn motion(&mut self, wm: &mut WindowManager<S>, input: PointerMotion) -> Result<()>;
}

pub struct WindowManager<S> {
    server: S,
    clients: ClientTable,
    mapper: Mapper,
    coexist: bool,
    blacklist: Vec<Handle>,
}

impl<S: WindowServer> WindowManager<S> {
    pub fn new(server: S, coexist: bool) -> Self {
        let (width, height) = server.screen_size();
        let blacklist = server.own_windows();

        Self {
            server,
            clients: ClientTable::new(),
            mapper: Mapper::new(width, height),
            coexist,
            blacklist,
        }
    }

    #[cfg(test)]
    pub fn server(&self) -> &S {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut S {
        &mut self.server
    }

    pub fn mapper(&self) -> Mapper {
        self.mapper
    }

    pub fn handle(&self, id: WindowId) -> Option<Handle> {
        self.clients.get(id).map(|c| c.handle)
    }

    /// Handle at most one pending event. Returns how many were pending
    /// before it, zero once the queue is drained.
    pub fn pump<H: Shell<S>>(&mut self, shell: &mut H) -> Result<usize> {
        let pending = self.server.pending()?;
        if pending == 0 {
            return Ok(0);
        }

        if let Some(event) = self.server.next_event() {
            self.dispatch(shell, event)?;
        }
        Ok(pending)
    }

    fn dispatch<H: Shell<S>>(&mut self, shell: &mut H, event: ServerEvent) -> Result<()> {
        match event {
            ServerEvent::Created(handle) => {
                if self.is_blacklisted(handle) {
                    return Ok(());
                }
                if self.clients.find_by_handle(handle).is_some() {
                    // reported both by the startup scan and by the server
                    trace!("window {handle:#x} already known");
                    return Ok(());
                }

                let id = self.clients.create(handle);
                debug!("created window {handle:#x} as {}", id.0);
                self.server.manage(handle)?;
                shell.create(self, id)?;
            }

            ServerEvent::Reconfigured(handle)
            | ServerEvent::Mapped(handle)
            | ServerEvent::Unmapped(handle) => {
                if self.is_blacklisted(handle) {
                    return Ok(());
                }
                let Some(id) = self.lookup(handle)? else {
                    return Ok(());
                };
                self.sync(shell, id, handle)?;
            }

            ServerEvent::Destroyed(handle) => {
                if self.is_blacklisted(handle) {
                    return Ok(());
                }
                let Some(id) = self.lookup(handle)? else {
                    return Ok(());
                };

                debug!("destroyed window {handle:#x} ({})", id.0);
                shell.destroy(self, id)?;
                self.clients.destroy(id);
            }

            ServerEvent::Damaged(handle) => {
                // damage can trail a destroy, never treat it as a protocol error
                if let Some(id) = self.clients.find_by_handle(handle) {
                    shell.damage(self, id)?;
                }
            }

            ServerEvent::Key {
                window,
                press,
                modifiers,
                keycode,
            } => {
                let input = KeyInput {
                    window: self.resolve(window),
                    press,
                    modifiers,
                    keycode,
                };
                shell.keyboard(self, input)?;
            }

            ServerEvent::Button {
                window,
                press,
                modifiers,
                button,
                root_x,
                root_y,
            } => {
                let input = ButtonInput {
                    window: self.resolve(window),
                    press,
                    modifiers,
                    button,
                    x: self.mapper.x_to_ndc(root_x as f32),
                    y: self.mapper.y_to_ndc(root_y as f32),
                };

                // the pointer stays frozen until the grab is released one way or the other
                let replay = shell.click(self, input)?;
                self.server.allow_events(replay)?;
            }

            ServerEvent::Motion {
                subwindow,
                modifiers,
                root_x,
                root_y,
            } => {
                let input = PointerMotion {
                    window: self.resolve(subwindow),
                    modifiers,
                    x: self.mapper.x_to_ndc(root_x as f32),
                    y: self.mapper.y_to_ndc(root_y as f32),
                };
                shell.motion(self, input)?;
            }
        }

        Ok(())
    }

    /// Bring the client in step with the server, then report it
    fn sync<H: Shell<S>>(&mut self, shell: &mut H, id: WindowId, handle: Handle) -> Result<()> {
        let Some(attributes) = self.server.attributes(handle)? else {
            trace!("window {handle:#x} vanished before sync");
            return Ok(());
        };

        let Some(client) = self.clients.get_mut(id) else {
            return Ok(());
        };
        let was_visible = client.visible;
        client.visible = attributes.visible;
        client.rect = attributes.rect;

        // no placement of its own, put it under the pointer
        if client.visible && !was_visible && client.rect.x == 0 && client.rect.y == 0 {
            let pointer = self.server.pointer()?;
            client.rect.x = pointer.x - (client.rect.width / 2) as i32;
            client.rect.y = pointer.y - (client.rect.height / 2) as i32;

            let (x, y) = (client.rect.x, client.rect.y);
            self.server.move_to(handle, x, y)?;
        }

        let (visible, rect) = (client.visible, client.rect);
        if visible != was_visible {
            debug!(
                "window {handle:#x} ({}) {}",
                id.0,
                if visible { "mapped" } else { "unmapped" }
            );
        }

        let rect = self.mapper.to_ndc(rect);
        shell.modify(self, id, visible, rect)
    }

    fn lookup(&self, handle: Handle) -> Result<Option<WindowId>> {
        Ok(self.clients.lookup(handle, self.coexist)?)
    }

    /// Managed window an input event refers to, if any
    fn resolve(&self, window: Handle) -> Option<WindowId> {
        if window == 0 || window == self.server.root() || self.is_blacklisted(window) {
            return None;
        }
        self.clients.find_by_handle(window)
    }

    fn is_blacklisted(&self, window: Handle) -> bool {
        self.blacklist.contains(&window)
    }

    /// Move and resize a window, `rect` in device coordinates
    pub fn move_window(&mut self, id: WindowId, rect: Rect) -> Result<()> {
        let Some(handle) = self.handle(id) else {
            return Ok(());
        };
        self.server.configure(handle, self.mapper.to_pixels(rect))
    }

    pub fn focus_window(&mut self, id: WindowId) -> Result<()> {
        match self.handle(id) {
            Some(handle) => self.server.focus(handle),
            None => Ok(()),
        }
    }

    pub fn close_window(&mut self, id: WindowId) -> Result<()> {
        match self.handle(id) {
            Some(handle) => self.server.close(handle),
            None => Ok(()),
        }
    }

    pub fn kill_window(&mut self, id: WindowId) -> Result<()> {
        match self.handle(id) {
            Some(handle) => self.server.kill(handle),
            None => Ok(()),
        }
    }

    /// Monitor rectangles in device coordinates
    pub fn monitors(&mut self) -> Result<Vec<Rect>> {
        let monitors: Vec<PixelRect> = self.server.monitors()?;
        Ok(monitors.into_iter().map(|m| self.mapper.to_ndc(m)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::modifiers;
    use crate::testing::{FakeServer, OUTPUT, OVERLAY, ROOT};

    /// Records every callback it receives
    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        modified: Vec<(WindowId, bool, Rect)>,
        clicks: Vec<ButtonInput>,
        keys: Vec<KeyInput>,
        motions: Vec<PointerMotion>,
        replay: bool,
    }

    impl<S: WindowServer> Shell<S> for Recorder {
        fn create(&mut self, _wm: &mut WindowManager<S>, id: WindowId) -> Result<()> {
            self.calls.push(format!("create {}", id.0));
            Ok(())
        }

        fn modify(&mut self, _wm: &mut WindowManager<S>, id: WindowId, visible: bool, rect: Rect) -> Result<()> {
            self.calls.push(format!("modify {}", id.0));
            self.modified.push((id, visible, rect));
            Ok(())
        }

        fn destroy(&mut self, wm: &mut WindowManager<S>, id: WindowId) -> Result<()> {
            // still resolvable while the callback runs
            assert!(wm.handle(id).is_some());
            self.calls.push(format!("destroy {}", id.0));
            Ok(())
        }

        fn damage(&mut self, _wm: &mut WindowManager<S>, id: WindowId) -> Result<()> {
            self.calls.push(format!("damage {}", id.0));
            Ok(())
        }

        fn keyboard(&mut self, _wm: &mut WindowManager<S>, input: KeyInput) -> Result<()> {
            self.keys.push(input);
            Ok(())
        }

        fn click(&mut self, _wm: &mut WindowManager<S>, input: ButtonInput) -> Result<bool> {
            self.clicks.push(input);
            Ok(self.replay)
        }

        fn motion(&mut self, _wm: &mut WindowManager<S>, input: PointerMotion) -> Result<()> {
            self.motions.push(input);
            Ok(())
        }
    }

    fn drain(wm: &mut WindowManager<FakeServer>, shell: &mut Recorder) {
        while wm.pump(shell).unwrap() > 0 {}
    }

    #[test]
    fn test_lifecycle_callbacks() {
        let mut wm = WindowManager::new(FakeServer::new(800, 600), false);
        let mut shell = Recorder::default();

        wm.server_mut().add_window(0x10, PixelRect::new(100, 100, 200, 100), 24);
        wm.server_mut().map(0x10);
        drain(&mut wm, &mut shell);
        wm.server_mut().unmap(0x10);
        drain(&mut wm, &mut shell);
        wm.server_mut().destroy(0x10);
        drain(&mut wm, &mut shell);

        assert_eq!(shell.calls, vec!["create 0", "modify 0", "modify 0", "destroy 0"]);
        assert_eq!(wm.server().managed, vec![0x10]);
        assert_eq!(wm.handle(WindowId(0)), None);

        let (_, visible, rect) = shell.modified[0];
        assert!(visible);
        assert_eq!(wm.mapper().to_pixels(rect), PixelRect::new(100, 100, 200, 100));
        assert!(!shell.modified[1].1);
    }

    #[test]
    fn test_unplaced_window_centred_on_pointer() {
        let mut server = FakeServer::new(800, 600);
        server.pointer = crate::server::Pointer { x: 400, y: 300 };
        server.add_window(0x10, PixelRect::new(0, 0, 200, 100), 24);
        server.map(0x10);

        let mut wm = WindowManager::new(server, false);
        let mut shell = Recorder::default();
        drain(&mut wm, &mut shell);

        let expected = PixelRect::new(300, 250, 200, 100);
        assert_eq!(wm.server().rect(0x10), Some(expected));
        assert_eq!(wm.mapper().to_pixels(shell.modified[0].2), expected);
        // the echoed configure comes back as a second modify
        assert_eq!(shell.modified.len(), 2);
    }

    #[test]
    fn test_own_windows_are_ignored() {
        let mut server = FakeServer::new(800, 600);
        server.add_window(OVERLAY, PixelRect::new(0, 0, 800, 600), 24);
        server.add_window(OUTPUT, PixelRect::new(0, 0, 800, 600), 24);
        server.map(OUTPUT);
        server.destroy(OUTPUT);

        let mut wm = WindowManager::new(server, false);
        let mut shell = Recorder::default();
        drain(&mut wm, &mut shell);

        assert!(shell.calls.is_empty());
        assert!(wm.server().managed.is_empty());
    }

    #[test]
    fn test_unknown_window_is_fatal_unless_coexisting() {
        let mut server = FakeServer::new(800, 600);
        server.push(ServerEvent::Mapped(0x99));
        let mut wm = WindowManager::new(server, false);
        let mut shell = Recorder::default();

        let err = wm.pump(&mut shell).unwrap_err();
        assert_eq!(
            err.downcast_ref::<crate::clients::Error>(),
            Some(&crate::clients::Error::UnknownWindow(0x99))
        );

        let mut server = FakeServer::new(800, 600);
        server.push(ServerEvent::Mapped(0x99));
        server.push(ServerEvent::Destroyed(0x99));
        let mut wm = WindowManager::new(server, true);
        drain(&mut wm, &mut shell);
        assert!(shell.calls.is_empty());
    }

    #[test]
    fn test_click_replay_follows_callback() {
        let mut server = FakeServer::new(800, 600);
        server.add_window(0x10, PixelRect::new(0, 0, 10, 10), 24);
        server.push(ServerEvent::Button {
            window: 0x10,
            press: true,
            modifiers: modifiers::SUPER,
            button: 1,
            root_x: 400,
            root_y: 0,
        });
        server.push(ServerEvent::Button {
            window: ROOT,
            press: false,
            modifiers: 0,
            button: 1,
            root_x: 0,
            root_y: 600,
        });

        let mut wm = WindowManager::new(server, false);
        let mut shell = Recorder {
            replay: true,
            ..Recorder::default()
        };
        drain(&mut wm, &mut shell);

        assert_eq!(wm.server().replays, vec![true, true]);
        assert_eq!(shell.clicks[0].window, Some(WindowId(0)));
        assert_eq!((shell.clicks[0].x, shell.clicks[0].y), (0.0, 1.0));
        assert_eq!(shell.clicks[1].window, None);
        assert_eq!((shell.clicks[1].x, shell.clicks[1].y), (-1.0, -1.0));

        shell.replay = false;
        wm.server_mut().push(ServerEvent::Button {
            window: 0x10,
            press: true,
            modifiers: 0,
            button: 3,
            root_x: 1,
            root_y: 1,
        });
        drain(&mut wm, &mut shell);
        assert_eq!(wm.server().replays, vec![true, true, false]);
    }

    #[test]
    fn test_input_on_unmanaged_windows_resolves_to_none() {
        let mut server = FakeServer::new(800, 600);
        server.push(ServerEvent::Key {
            window: ROOT,
            press: true,
            modifiers: modifiers::SUPER,
            keycode: 24,
        });
        server.push(ServerEvent::Motion {
            subwindow: 0,
            modifiers: 0,
            root_x: 200,
            root_y: 150,
        });

        let mut wm = WindowManager::new(server, false);
        let mut shell = Recorder::default();
        drain(&mut wm, &mut shell);

        assert_eq!(shell.keys[0].window, None);
        assert_eq!(shell.keys[0].keycode, 24);
        assert_eq!(shell.motions[0].window, None);
        assert_eq!((shell.motions[0].x, shell.motions[0].y), (-0.5, 0.5));
    }

    #[test]
    fn test_damage_for_unknown_window_is_dropped() {
        let mut server = FakeServer::new(800, 600);
        server.add_window(0x10, PixelRect::new(0, 0, 10, 10), 24);
        server.damage(0x10);
        server.damage(0x11);

        let mut wm = WindowManager::new(server, false);
        let mut shell = Recorder::default();
        drain(&mut wm, &mut shell);

        assert_eq!(shell.calls, vec!["create 0", "damage 0"]);
    }

    #[test]
    fn test_window_actions_and_monitors() {
        let mut server = FakeServer::new(800, 600);
        server.monitors = vec![PixelRect::new(0, 0, 400, 600), PixelRect::new(400, 0, 400, 600)];
        server.add_window(0x10, PixelRect::new(0, 0, 10, 10), 24);

        let mut wm = WindowManager::new(server, false);
        let mut shell = Recorder::default();
        drain(&mut wm, &mut shell);

        let id = WindowId(0);
        wm.move_window(id, Rect::SCREEN).unwrap();
        wm.focus_window(id).unwrap();
        wm.close_window(id).unwrap();
        assert_eq!(wm.server().rect(0x10), Some(PixelRect::new(0, 0, 800, 600)));
        assert_eq!(wm.server().focused, vec![0x10]);
        assert_eq!(wm.server().closed, vec![0x10]);

        let monitors = wm.monitors().unwrap();
        assert_eq!(monitors[0], Rect::new(-0.5, 0.0, 1.0, 2.0));
        assert_eq!(monitors[1], Rect::new(0.5, 0.0, 1.0, 2.0));

        wm.kill_window(id).unwrap();
        drain(&mut wm, &mut shell);
        assert_eq!(wm.server().killed, vec![0x10]);
        assert_eq!(shell.calls.last().map(String::as_str), Some("destroy 0"));
    }
}
