pub mod config;
pub mod lifecycle;
pub mod llm;
pub mod scheduler;
pub mod store;
pub mod terminal;
