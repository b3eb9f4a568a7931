//! Shared ownership of physical ports.
//!
//! Every device on a daisy chain talks through the same port, so the registry
//! keeps exactly one open link per port name and hands out handles to it.
//! The link is closed when the last handle detaches.

use log::debug;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::port::{NativeDriver, PortDriver, PortError, PortSettings, SerialLink};

const READ_CHUNK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

type SharedLink = Arc<Mutex<Option<Box<dyn SerialLink>>>>;

struct Entry {
    settings: PortSettings,
    link: SharedLink,
    sessions: HashSet<SessionId>,
}

struct Inner {
    driver: Box<dyn PortDriver>,
    entries: Mutex<HashMap<String, Entry>>,
}

/// Table of open ports. Cloning yields another reference to the same table.
#[derive(Clone)]
pub struct PortRegistry {
    inner: Arc<Inner>,
}

impl PortRegistry {
    pub fn new(driver: impl PortDriver + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                driver: Box::new(driver),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn native() -> Self {
        Self::new(NativeDriver::default())
    }

    pub fn driver(&self) -> &dyn PortDriver {
        self.inner.driver.as_ref()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens `port_name` on first use, or joins the already open link if
    /// `settings` match the ones it was opened with.
    pub fn attach(
        &self,
        port_name: &str,
        settings: PortSettings,
        session: SessionId,
    ) -> Result<RegistryHandle> {
        let mut entries = self.entries();

        let link = match entries.get_mut(port_name) {
            Some(entry) => {
                if entry.settings != settings {
                    return Err(Error::Conflict {
                        port_name: port_name.to_string(),
                        existing: entry.settings,
                        requested: settings,
                    });
                }
                entry.sessions.insert(session);
                debug!(
                    "{} attached to {} ({} sessions)",
                    session,
                    port_name,
                    entry.sessions.len()
                );
                entry.link.clone()
            }
            None => {
                let link = self
                    .inner
                    .driver
                    .open(port_name, &settings)
                    .map_err(|err| match err {
                        PortError::Busy { port_name } => Error::ResourceBusy { port_name },
                        other => Error::Open {
                            port_name: port_name.to_string(),
                            reason: other.to_string(),
                        },
                    })?;
                debug!("{} opened {} ({})", session, port_name, settings);

                let link: SharedLink = Arc::new(Mutex::new(Some(link)));
                entries.insert(
                    port_name.to_string(),
                    Entry {
                        settings,
                        link: link.clone(),
                        sessions: HashSet::from([session]),
                    },
                );
                link
            }
        };

        Ok(RegistryHandle {
            registry: self.clone(),
            port_name: port_name.to_string(),
            session,
            settings,
            link,
        })
    }

    /// Detaching twice, or after the port was closed, does nothing.
    pub fn detach(&self, handle: &RegistryHandle) {
        self.release(&handle.port_name, handle.session);
    }

    fn release(&self, port_name: &str, session: SessionId) {
        let mut entries = self.entries();

        let empty = match entries.get_mut(port_name) {
            Some(entry) => {
                if !entry.sessions.remove(&session) {
                    return;
                }
                entry.sessions.is_empty()
            }
            None => return,
        };
        debug!("{} detached from {}", session, port_name);

        if empty {
            if let Some(entry) = entries.remove(port_name) {
                entry
                    .link
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                debug!("closed {}", port_name);
            }
        }
    }

    pub fn write(&self, handle: &RegistryHandle, bytes: &[u8]) -> Result<(), PortError> {
        handle.lock().write(bytes)
    }

    pub fn read_until_idle(&self, handle: &RegistryHandle) -> Result<Vec<u8>, PortError> {
        handle.lock().read_until_idle()
    }

    pub fn is_open(&self, port_name: &str) -> bool {
        self.entries().contains_key(port_name)
    }

    pub fn attached(&self, port_name: &str) -> usize {
        self.entries()
            .get(port_name)
            .map_or(0, |entry| entry.sessions.len())
    }

    pub fn settings(&self, port_name: &str) -> Option<PortSettings> {
        self.entries().get(port_name).map(|entry| entry.settings)
    }
}

/// One session's claim on a shared port. Dropping it detaches.
pub struct RegistryHandle {
    registry: PortRegistry,
    port_name: String,
    session: SessionId,
    settings: PortSettings,
    link: SharedLink,
}

impl RegistryHandle {
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn settings(&self) -> PortSettings {
        self.settings
    }

    /// Exclusive access to the link for one write/read exchange.
    pub fn lock(&self) -> PortGuard<'_> {
        PortGuard {
            link: self.link.lock().unwrap_or_else(PoisonError::into_inner),
            port_name: &self.port_name,
        }
    }

    pub fn detach(self) {
        self.registry.detach(&self);
    }
}

impl Drop for RegistryHandle {
    fn drop(&mut self) {
        self.registry.release(&self.port_name, self.session);
    }
}

impl fmt::Debug for RegistryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryHandle")
            .field("port_name", &self.port_name)
            .field("session", &self.session)
            .field("settings", &self.settings)
            .finish()
    }
}

pub struct PortGuard<'a> {
    link: MutexGuard<'a, Option<Box<dyn SerialLink>>>,
    port_name: &'a str,
}

impl PortGuard<'_> {
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), PortError> {
        let link = self.link.as_deref_mut().ok_or(PortError::Closed)?;
        debug!("{} send {:02X?}", self.port_name, bytes);
        link.write_all(bytes)
    }

    /// Reads until the link stays silent for one read timeout. An empty
    /// result means nothing arrived.
    pub fn read_until_idle(&mut self) -> Result<Vec<u8>, PortError> {
        let link = self.link.as_deref_mut().ok_or(PortError::Closed)?;
        let mut data = Vec::new();
        let mut buf = [0u8; READ_CHUNK];

        loop {
            let n = link.read_available(&mut buf)?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
        }

        debug!("{} recv {:02X?}", self.port_name, data);
        Ok(data)
    }
}
