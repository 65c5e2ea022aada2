pub mod deployer;
pub mod health;
pub mod image;
pub mod lifecycle;
pub mod ports;
pub mod report;
pub mod types;
