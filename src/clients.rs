//! Server-side client table
//!
//! Maps server window handles to stable internal ids. Slots are never
//! compacted, destroyed clients are tombstoned and their slot is handed to
//! the next created window, so an id stays valid for as long as the window
//! exists.

use crate::geometry::PixelRect;
use crate::server::Handle;

/// Stable internal window id (slot in the client table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub usize);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("notification for unknown window {0:#x}")]
    UnknownWindow(Handle),
}

#[derive(Debug, Clone, Default)]
pub struct Client {
    pub exists: bool,
    pub handle: Handle,
    pub visible: bool,
    pub rect: PixelRect,
}

#[derive(Debug, Default)]
pub struct ClientTable {
    clients: Vec<Client>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, handle: Handle) -> WindowId {
        let client = Client {
            exists: true,
            handle,
            ..Client::default()
        };

        match self.clients.iter().position(|c| !c.exists) {
            Some(slot) => {
                self.clients[slot] = client;
                WindowId(slot)
            }
            None => {
                self.clients.push(client);
                WindowId(self.clients.len() - 1)
            }
        }
    }

    /// Handles of tombstoned slots are stale and never match
    pub fn find_by_handle(&self, handle: Handle) -> Option<WindowId> {
        self.clients
            .iter()
            .position(|c| c.exists && c.handle == handle)
            .map(WindowId)
    }

    /// Lookup under the miss policy: fatal normally, "no match" when
    /// coexisting with another window manager
    pub fn lookup(&self, handle: Handle, coexist: bool) -> Result<Option<WindowId>, Error> {
        match self.find_by_handle(handle) {
            Some(id) => Ok(Some(id)),
            None if coexist => Ok(None),
            None => Err(Error::UnknownWindow(handle)),
        }
    }

    pub fn get(&self, id: WindowId) -> Option<&Client> {
        self.clients.get(id.0).filter(|c| c.exists)
    }

    pub fn get_mut(&mut self, id: WindowId) -> Option<&mut Client> {
        self.clients.get_mut(id.0).filter(|c| c.exists)
    }

    pub fn destroy(&mut self, id: WindowId) {
        if let Some(client) = self.clients.get_mut(id.0) {
            client.exists = false;
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destroyed_slot_is_reused() {
        let mut table = ClientTable::new();
        let ids: Vec<_> = (0..5).map(|h| table.create(0x100 + h)).collect();
        assert_eq!(ids[3], WindowId(3));

        table.destroy(ids[2]);
        let reused = table.create(0x200);
        assert_eq!(reused, WindowId(2));
        assert_eq!(table.len(), 5);

        let grown = table.create(0x201);
        assert_eq!(grown, WindowId(5));
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn test_reused_handle_does_not_match_tombstone() {
        let mut table = ClientTable::new();
        let first = table.create(0x42);
        table.create(0x43);
        table.destroy(first);

        assert_eq!(table.find_by_handle(0x42), None);
        assert!(table.get(first).is_none());

        // the server hands the same handle to a new window
        let again = table.create(0x42);
        assert_eq!(table.find_by_handle(0x42), Some(again));
    }

    #[test]
    fn test_lookup_miss_policy() {
        let mut table = ClientTable::new();
        let id = table.create(7);

        assert_eq!(table.lookup(7, false), Ok(Some(id)));
        assert_eq!(table.lookup(8, false), Err(Error::UnknownWindow(8)));
        assert_eq!(table.lookup(8, true), Ok(None));
    }
}
