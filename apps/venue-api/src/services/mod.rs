//! Service layer for the Venue API.
//!
//! Each service owns one slice of the protocol:
//! - [`pairing`] - token issuance and the single-winner claim flow
//! - [`sync`] - batch intake into the idempotent sales ledger, heartbeats
//! - [`device`] - admin device CRUD, PIN login, config snapshots

pub mod device;
pub mod pairing;
pub mod sync;

pub use device::DeviceService;
pub use pairing::PairingService;
pub use sync::SyncService;
