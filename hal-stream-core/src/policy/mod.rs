pub mod classifier;
pub mod constants;
pub mod sizing;
