pub mod adapters;
pub mod archive;
pub mod audit;
pub mod config;
pub mod fault;
pub mod ids;
pub mod model;
pub mod reliability;
pub mod storage;

pub mod error;
