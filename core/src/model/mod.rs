pub mod build;
pub mod incident;
