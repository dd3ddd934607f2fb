pub mod agents;
pub mod customers;
pub mod google;
pub mod llm;
pub mod system;
pub mod tasks;
