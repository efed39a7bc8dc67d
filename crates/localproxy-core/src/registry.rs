//! Descriptor → socket lookup for readiness dispatch.
//!
//! Every descriptor a proxy socket currently owns is registered here together
//! with its role. Entries hold only a `Weak` reference, and each socket
//! removes its entries before it closes the descriptor, so an event for a
//! descriptor number the OS has since handed to someone else finds nothing.

use std::collections::HashMap;
use std::fmt;
use std::os::fd::RawFd;
use std::rc::Weak;

use tracing::warn;

/// Identity of a proxy socket within one `ProxyContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proxy-socket#{}", self.0)
    }
}

/// What a registered descriptor is to its socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Reads data produced by the proxy command (its stdout)
    DataIn,
    /// Writes data to the proxy command (its stdin)
    DataOut,
    /// Reads the proxy command's stderr
    Stderr,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DataIn => "data-in",
            Self::DataOut => "data-out",
            Self::Stderr => "stderr",
        })
    }
}

pub struct Registration<T> {
    pub id: SocketId,
    pub role: Role,
    pub socket: Weak<T>,
}

impl<T> Clone for Registration<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            role: self.role,
            socket: Weak::clone(&self.socket),
        }
    }
}

impl<T> fmt::Debug for Registration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("alive", &(self.socket.strong_count() > 0))
            .finish()
    }
}

/// Owned map from raw descriptor to the socket that owns it.
pub struct FdRegistry<T> {
    entries: HashMap<RawFd, Registration<T>>,
}

impl<T> Default for FdRegistry<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> fmt::Debug for FdRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl<T> FdRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `fd`, returning any entry it displaced.
    ///
    /// A displaced entry means some socket closed a descriptor without
    /// unregistering it first.
    pub fn insert(
        &mut self,
        fd: RawFd,
        id: SocketId,
        role: Role,
        socket: Weak<T>,
    ) -> Option<Registration<T>> {
        let previous = self.entries.insert(fd, Registration { id, role, socket });
        if let Some(stale) = &previous {
            warn!(
                fd,
                socket = %id,
                stale_socket = %stale.id,
                stale_role = %stale.role,
                "descriptor was still registered to another socket"
            );
        }
        previous
    }

    /// Remove `fd` if it is registered to `id`.
    pub fn remove(&mut self, fd: RawFd, id: SocketId) -> bool {
        match self.entries.get(&fd) {
            Some(entry) if entry.id == id => {
                self.entries.remove(&fd);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, fd: RawFd) -> Option<&Registration<T>> {
        self.entries.get(&fd)
    }

    /// Descriptors currently registered to `id`, sorted by descriptor.
    pub fn roles_for(&self, id: SocketId) -> Vec<(RawFd, Role)> {
        let mut roles: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.id == id)
            .map(|(&fd, entry)| (fd, entry.role))
            .collect();
        roles.sort_unstable_by_key(|(fd, _)| *fd);
        roles
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn insert_and_lookup() {
        let owner = Rc::new(());
        let mut registry = FdRegistry::new();
        assert!(
            registry
                .insert(7, SocketId::new(1), Role::DataIn, Rc::downgrade(&owner))
                .is_none()
        );

        let entry = registry.lookup(7).unwrap();
        assert_eq!(entry.id, SocketId::new(1));
        assert_eq!(entry.role, Role::DataIn);
        assert!(entry.socket.upgrade().is_some());
        assert!(registry.lookup(8).is_none());
    }

    #[test]
    fn remove_requires_matching_owner() {
        let owner = Rc::new(());
        let mut registry = FdRegistry::new();
        registry.insert(5, SocketId::new(1), Role::DataOut, Rc::downgrade(&owner));

        assert!(!registry.remove(5, SocketId::new(2)));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(5, SocketId::new(1)));
        assert!(registry.is_empty());
        assert!(!registry.remove(5, SocketId::new(1)));
    }

    #[test]
    fn insert_replaces_stale_entry() {
        let old = Rc::new(());
        let new = Rc::new(());
        let mut registry = FdRegistry::new();
        registry.insert(9, SocketId::new(1), Role::Stderr, Rc::downgrade(&old));
        let displaced = registry
            .insert(9, SocketId::new(2), Role::DataIn, Rc::downgrade(&new))
            .unwrap();
        assert_eq!(displaced.id, SocketId::new(1));
        assert_eq!(registry.lookup(9).unwrap().id, SocketId::new(2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dead_owner_does_not_upgrade() {
        let mut registry = FdRegistry::new();
        {
            let owner = Rc::new(());
            registry.insert(3, SocketId::new(4), Role::DataIn, Rc::downgrade(&owner));
        }
        assert!(registry.lookup(3).unwrap().socket.upgrade().is_none());
    }

    #[test]
    fn roles_for_lists_only_that_socket() {
        let a = Rc::new(());
        let b = Rc::new(());
        let mut registry = FdRegistry::new();
        registry.insert(12, SocketId::new(1), Role::Stderr, Rc::downgrade(&a));
        registry.insert(10, SocketId::new(1), Role::DataOut, Rc::downgrade(&a));
        registry.insert(11, SocketId::new(2), Role::DataIn, Rc::downgrade(&b));

        assert_eq!(
            registry.roles_for(SocketId::new(1)),
            vec![(10, Role::DataOut), (12, Role::Stderr)]
        );
        assert!(registry.roles_for(SocketId::new(3)).is_empty());
    }

    #[test]
    fn socket_id_display() {
        assert_eq!(SocketId::new(17).to_string(), "proxy-socket#17");
        assert_eq!(Role::DataOut.to_string(), "data-out");
    }
}
