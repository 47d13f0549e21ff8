use crate::error::{Error, Result};
use std::net::TcpListener;

/// Addresses a reservation occupies. The probe checks the same pair so that
/// "free" and "bindable" agree.
pub(crate) const LOOPBACK: &str = "127.0.0.1";
pub(crate) const ANY: &str = "0.0.0.0";

/// A held, never-accepting listener whose only job is to occupy a port.
///
/// The listeners are closed by [`Reservation::release`] or on drop, whichever
/// comes first. Releasing is idempotent.
#[derive(Debug)]
pub struct Reservation {
    port: u16,
    listeners: Vec<TcpListener>,
}

impl Reservation {
    /// Bind `port` and keep it bound.
    ///
    /// Binds 127.0.0.1 (required) and 0.0.0.0 (best effort). On Linux the
    /// second bind fails with EADDRINUSE because the kernel treats
    /// 127.0.0.1:PORT as overlapping with 0.0.0.0:PORT; the first bind already
    /// covers it. On macOS the two coexist, so holding both keeps either
    /// address from being claimed.
    pub fn hold(port: u16) -> Result<Self> {
        let listener_v4 =
            TcpListener::bind((LOOPBACK, port)).map_err(|source| Error::Bind { port, source })?;
        let listener_any = TcpListener::bind((ANY, port)).ok();

        let mut listeners = vec![listener_v4];
        listeners.extend(listener_any);

        tracing::debug!("Holding port {} ({} listener(s))", port, listeners.len());
        Ok(Self { port, listeners })
    }

    /// A reservation that holds nothing, for wiring tests that never touch
    /// real sockets.
    #[cfg(test)]
    pub(crate) fn detached(port: u16) -> Self {
        Self {
            port,
            listeners: Vec::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_held(&self) -> bool {
        !self.listeners.is_empty()
    }

    /// Close the listeners. Calling this again is a no-op.
    pub fn release(&mut self) {
        if self.listeners.is_empty() {
            return;
        }
        self.listeners.clear();
        tracing::debug!("Released port {}", self.port);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release();
    }
}
