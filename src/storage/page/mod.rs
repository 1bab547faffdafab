mod file_header;
mod free_list_page;
pub mod header;
mod lookup_page;
mod object_page;

pub use file_header::*;
pub use free_list_page::*;
pub use header::{PageHeader, PageType};
pub use lookup_page::*;
pub use object_page::*;
