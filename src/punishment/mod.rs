//! Punishment state
//!
//! Records, their durable store, and the tracker that keeps expired records
//! from ever being read as active.

mod error;
mod record;
mod sqlite;
mod store;
mod tracker;

pub use error::{StoreError, StoreResult};
pub use record::{
    Expiry, NO_REASON, PERMANENT_SENTINEL, PunishmentDuration, PunishmentKind, PunishmentRecord,
    UnknownKind, format_duration,
};
pub use sqlite::SqlitePunishmentStore;
pub use store::{MemoryPunishmentStore, PunishmentStore};
pub use tracker::{PunishmentLookup, PunishmentTracker};
