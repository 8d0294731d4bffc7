//! Port allocation.

use std::collections::HashSet;
use std::net::TcpListener;

/// Whether `port` can currently be bound on `host`.
#[must_use]
pub fn is_port_free(host: &str, port: u16) -> bool {
    TcpListener::bind((host, port)).is_ok()
}

/// Pick the port a server binds.
///
/// Ports in `reserved` are handed to other servers of this node and count as
/// taken even before their process binds them. A pinned template gets exactly
/// `start_port` or nothing; otherwise the first free port at or above
/// `start_port` is returned.
#[must_use]
pub fn find_free_port(
    host: &str,
    start_port: u16,
    pinned: bool,
    reserved: &HashSet<u16>,
) -> Option<u16> {
    let usable = |port: u16| !reserved.contains(&port) && is_port_free(host, port);
    if pinned {
        return usable(start_port).then_some(start_port);
    }
    (start_port..=u16::MAX).find(|port| usable(*port))
}
