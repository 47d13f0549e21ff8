use super::owner::OwnerCheck;
use super::probe::{BindProbe, PortProbe};
use super::range::PortRange;
use super::reservation::Reservation;
use super::store::AssignmentStore;
use crate::error::{Error, Result};

/// Where an allocated port came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationSource {
    /// The stored assignment from a previous run was still free.
    Previous,
    /// Found by scanning the range.
    Scanned,
}

/// A chosen port, already held.
#[derive(Debug)]
pub struct Allocation {
    pub reservation: Reservation,
    pub source: AllocationSource,
}

impl Allocation {
    pub fn port(&self) -> u16 {
        self.reservation.port()
    }
}

/// Binds a candidate port. The real implementation is [`Reservation::hold`];
/// tests substitute a fake so scans don't depend on what the host has bound.
pub trait PortBinder: Send + Sync {
    fn hold(&self, port: u16) -> Result<Reservation>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SocketBinder;

impl PortBinder for SocketBinder {
    fn hold(&self, port: u16) -> Result<Reservation> {
        Reservation::hold(port)
    }
}

const PORT_CEILING: u16 = u16::MAX;
const MIN_INCREMENT: u16 = 50;
const MAX_INCREMENT: u16 = 2000;

/// Chooses this run's port.
///
/// Prefers the stored assignment when it is in range and free, otherwise
/// scans the range ascending. Every port it returns is already held, so the
/// scan path has no window between checking and binding.
pub struct PortAllocator {
    range: PortRange,
    probe: Box<dyn PortProbe>,
    binder: Box<dyn PortBinder>,
    owner: OwnerCheck,
    forced: bool,
    expand_max: bool,
}

impl PortAllocator {
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            probe: Box::new(BindProbe),
            binder: Box::new(SocketBinder),
            owner: OwnerCheck::default(),
            forced: false,
            expand_max: false,
        }
    }

    pub fn with_probe(mut self, probe: Box<dyn PortProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_binder(mut self, binder: Box<dyn PortBinder>) -> Self {
        self.binder = binder;
        self
    }

    pub fn with_owner_check(mut self, owner: OwnerCheck) -> Self {
        self.owner = owner;
        self
    }

    /// Ignore the stored assignment and always scan.
    pub fn forced(mut self, forced: bool) -> Self {
        self.forced = forced;
        self
    }

    /// Grow the range upward instead of failing when it is exhausted.
    pub fn expand_max(mut self, expand_max: bool) -> Self {
        self.expand_max = expand_max;
        self
    }

    pub async fn allocate(
        &self,
        store: &dyn AssignmentStore,
        key: &str,
        app_name: &str,
    ) -> Result<Allocation> {
        if self.forced {
            tracing::info!("Forced allocation, ignoring any previous assignment");
        } else if let Some(reservation) = self.try_previous(store, key, app_name).await? {
            return Ok(Allocation {
                reservation,
                source: AllocationSource::Previous,
            });
        }

        let reservation = self.scan()?;
        tracing::info!("Available port found: {}", reservation.port());
        Ok(Allocation {
            reservation,
            source: AllocationSource::Scanned,
        })
    }

    /// Re-adopt the stored port if it is in range and free.
    ///
    /// A bind failure after the probe reported the port free means another
    /// process won the race; that is surfaced, not retried.
    async fn try_previous(
        &self,
        store: &dyn AssignmentStore,
        key: &str,
        app_name: &str,
    ) -> Result<Option<Reservation>> {
        let Some(previous) = store.read(key) else {
            tracing::debug!("No previous assignment for {}", key);
            return Ok(None);
        };

        if !self.range.contains(previous) {
            tracing::info!(
                "Previous port {} is outside {}, scanning",
                previous,
                self.range
            );
            return Ok(None);
        }

        if self.probe.is_in_use(previous) {
            // Ownership only explains the conflict; a bound port is never reused.
            if self.owner.is_owned_by_self(previous, app_name).await {
                tracing::warn!(
                    "Previous port {} is still held by '{}', scanning for another",
                    previous,
                    app_name
                );
            } else {
                tracing::info!(
                    "Previous port {} is in use by another process, scanning",
                    previous
                );
            }
            return Ok(None);
        }

        let reservation = self.binder.hold(previous)?;
        tracing::info!("Reusing previous port: {}", previous);
        Ok(Some(reservation))
    }

    fn scan(&self) -> Result<Reservation> {
        if let Some(reservation) = self.scan_ports(self.range.min(), self.range.max()) {
            return Ok(reservation);
        }

        if !self.expand_max {
            return Err(Error::NoPortAvailable {
                min: self.range.min(),
                max: self.range.max(),
            });
        }

        let mut current_max = self.range.max();
        while current_max < PORT_CEILING {
            let new_max = next_max(current_max);

            if new_max > 60000 && current_max <= 60000 {
                tracing::warn!("Approaching high port range (> 60000)");
            }
            if new_max > 65000 && current_max <= 65000 {
                tracing::warn!("Very close to port upper limit (> 65000)");
            }
            tracing::info!(
                "No port found in {}-{}, expanding max from {} to {}",
                self.range.min(),
                current_max,
                current_max,
                new_max
            );

            if let Some(reservation) = self.scan_ports(current_max + 1, new_max) {
                return Ok(reservation);
            }
            current_max = new_max;
        }

        tracing::debug!("Reached max port limit ({}), cannot expand further", PORT_CEILING);
        Err(Error::NoPortAvailable {
            min: self.range.min(),
            max: PORT_CEILING,
        })
    }

    fn scan_ports(&self, from: u16, to: u16) -> Option<Reservation> {
        (from..=to).find_map(|port| match self.binder.hold(port) {
            Ok(reservation) => Some(reservation),
            Err(e) => {
                tracing::trace!("Skipping port {}: {}", port, e);
                None
            }
        })
    }
}

/// Grow by a tenth of the remaining headroom, clamped to a sane step.
fn next_max(current_max: u16) -> u16 {
    let remaining = PORT_CEILING.saturating_sub(current_max);
    let increment = (remaining / 10).clamp(MIN_INCREMENT, MAX_INCREMENT);
    current_max.saturating_add(increment).min(PORT_CEILING)
}
