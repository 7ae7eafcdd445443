pub mod engine;

pub use engine::{SyncEngine, SyncReport, DEFAULT_SYNC_CHUNK_SIZE};
