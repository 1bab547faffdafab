mod buffer_pool_manager;
mod page_handle;
mod replacer;
mod slot;

pub use buffer_pool_manager::*;
pub use page_handle::*;
pub use replacer::*;
pub use slot::{Slot, SwapState};
