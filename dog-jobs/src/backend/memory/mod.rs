mod sorted_set;
mod storage;

pub use storage::MemoryBackend;
