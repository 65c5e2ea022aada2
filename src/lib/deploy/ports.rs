use std::collections::BTreeSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::types::{DeployError, DeployResult};

/// Hands out host ports, one owner for the whole process.
///
/// A port is handed out only if it is neither reserved here nor bound on the
/// host. Reservations last until [`PortAllocator::release`].
#[derive(Debug)]
pub struct PortAllocator {
    reserved: Arc<Mutex<BTreeSet<u16>>>,
    search_limit: u16,
}

pub fn port_in_use(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_err()
}

fn lock(reserved: &Mutex<BTreeSet<u16>>) -> MutexGuard<'_, BTreeSet<u16>> {
    reserved.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Walks `start..=end` holding the table, so two searches never pick the
/// same port.
fn search(reserved: &Mutex<BTreeSet<u16>>, start: u16, end: u16) -> DeployResult<u16> {
    let mut reserved = lock(reserved);
    for candidate in start..=end {
        if candidate == 0 || reserved.contains(&candidate) {
            continue;
        }
        if port_in_use(candidate) {
            debug!(port = candidate, "port in use");
            continue;
        }
        reserved.insert(candidate);
        debug!(port = candidate, "port reserved");
        return Ok(candidate);
    }
    Err(DeployError::PortExhaustion { start, end })
}

impl PortAllocator {
    pub fn new(search_limit: u16) -> Self {
        PortAllocator {
            reserved: Arc::new(Mutex::new(BTreeSet::new())),
            search_limit: search_limit.max(1),
        }
    }

    /// Bind checks are blocking syscalls and run on the blocking pool.
    pub async fn allocate(&self, start: u16) -> DeployResult<u16> {
        let end = start.saturating_add(self.search_limit - 1);
        let reserved = self.reserved.clone();
        tokio::task::spawn_blocking(move || search(&reserved, start, end))
            .await
            .map_err(|e| DeployError::Io(std::io::Error::other(e)))?
    }

    /// Marks a port as taken by something this process already owns, such
    /// as a reused container.
    pub fn reserve(&self, port: u16) {
        lock(&self.reserved).insert(port);
    }

    pub fn release(&self, port: u16) {
        if lock(&self.reserved).remove(&port) {
            debug!(port, "port released");
        }
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        lock(&self.reserved).contains(&port)
    }
}
