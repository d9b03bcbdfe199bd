//! Query layer: managers, cursors and reference prefetching.

mod cursor;
pub mod filter;
mod manager;
mod prefetch;

pub use cursor::Cursor;
pub use filter::{flatten, process_query};
pub use manager::Manager;
