pub mod health;
pub mod orchestrator;
pub mod store;
