//! Port lifecycle: probe, owner check, persisted assignment, allocation and
//! reservation.

pub mod allocator;
pub mod owner;
pub mod probe;
pub mod range;
pub mod reservation;
pub mod store;

pub use allocator::{Allocation, AllocationSource, PortAllocator, PortBinder, SocketBinder};
pub use owner::{LsofLookup, OwnerCheck, Pm2Supervisor, PortOwnerLookup, ProcessSupervisor};
pub use probe::{BindProbe, PortProbe};
pub use range::PortRange;
pub use reservation::Reservation;
pub use store::{AssignmentStore, EnvFileStore, MemoryStore};
