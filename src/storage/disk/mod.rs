mod disk_manager;
mod free_space;

pub use disk_manager::*;
pub use free_space::*;
