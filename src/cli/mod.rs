pub mod replay;

pub use replay::{ReplayLine, ReplayScript, ReplayStep};
