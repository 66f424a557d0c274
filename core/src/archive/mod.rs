pub mod accumulator;
pub mod budget;
pub mod controller;
