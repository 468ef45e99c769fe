pub mod bridge;
pub mod consumer;
pub mod sources;
