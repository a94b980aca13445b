mod filesystem;
mod kv;
mod memory;
mod pending;

pub use filesystem::FsStore;
pub use kv::{KeyValueStore, StoreTier};
pub use memory::MemoryStore;
pub use pending::{PendingEvent, PendingStore, PENDING_KEY};
