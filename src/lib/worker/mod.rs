pub mod engine;
pub mod prepare;
pub mod stats;
pub mod types;
pub mod worker;
