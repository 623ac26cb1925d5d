pub mod cache;
pub mod date;

pub use cache::MemoCache;
pub use date::*;
