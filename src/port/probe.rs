use super::reservation::{ANY, LOOPBACK};
use std::net::TcpListener;

/// Answers "is anything bound to this port right now?".
pub trait PortProbe: Send + Sync {
    fn is_in_use(&self, port: u16) -> bool;
}

/// Bind-attempt probe.
///
/// Binds throwaway listeners on both addresses a [`Reservation`] uses and
/// drops them immediately. Any bind error, not just EADDRINUSE, counts as in
/// use: the caller only needs a yes/no, and a port we cannot bind is a port we
/// cannot reserve. `bind(2)` does not block, so no timeout is needed.
///
/// [`Reservation`]: super::Reservation
#[derive(Debug, Default, Clone, Copy)]
pub struct BindProbe;

impl PortProbe for BindProbe {
    fn is_in_use(&self, port: u16) -> bool {
        // On macOS, binding to 127.0.0.1 can succeed even when 0.0.0.0 is in use,
        // so we need to check both.
        let localhost_available = TcpListener::bind((LOOPBACK, port)).is_ok();
        let any_available = localhost_available && TcpListener::bind((ANY, port)).is_ok();
        !(localhost_available && any_available)
    }
}
