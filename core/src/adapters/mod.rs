pub mod fs;
pub mod interface;
