pub mod classifier;
pub mod escalation;
pub mod recorder;
