mod git;
mod memory;
mod store;
mod transport;

pub use git::GitTransport;
pub use memory::MemoryTransport;
pub use store::{ConnectionOutcome, FetchOutcome, RemoteStore, REVISION_POINTER_KEY};
pub use transport::{auth_header, RemoteHead, Transport};
