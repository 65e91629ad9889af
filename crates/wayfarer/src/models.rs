//! These models represent the objects passed around by the conversation
//!
//! There are two related formats we need to interact with:
//! - openai (and azure openai) messages/tools, sent from the controller to the LLM
//! - tool calls, sent from the controller to the handlers in the tool registry
//!
//! We always immediately convert the wire formats into the internal structs using
//! the helpers in `providers::utils`, so the internal models are not an exact match
//! to any of these formats.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
