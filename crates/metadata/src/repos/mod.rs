//! Repository traits for metadata operations.

pub mod depots;
pub mod ownership;
pub mod pairing;
pub mod refcounts;
pub mod roles;
pub mod tickets;
pub mod tokens;
pub mod usage;

pub use depots::{DepotAdvance, DepotRepo};
pub use ownership::OwnershipRepo;
pub use pairing::PairingRepo;
pub use refcounts::{RefCountRepo, RefDecrement, RefIncrement};
pub use roles::RoleRepo;
pub use tickets::TicketRepo;
pub use tokens::TokenRepo;
pub use usage::UsageRepo;
