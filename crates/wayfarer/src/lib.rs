pub mod agent;
pub mod code_executor;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod models;
pub mod prompt_template;
pub mod providers;
pub mod registry;
pub mod retrieval;
pub mod token_counter;
pub mod tools;
