pub mod frame_store;
pub mod progress_store;

pub use frame_store::{DiskFrameStore, FrameRef, FrameStore, MemoryFrameStore};
pub use progress_store::{FileProgressStore, MemoryProgressStore, ProgressStore, SessionProgress};
