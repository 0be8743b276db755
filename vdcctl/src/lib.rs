pub mod credentials;
pub mod exec;
pub mod power;
pub mod ssh;
pub mod targets;
