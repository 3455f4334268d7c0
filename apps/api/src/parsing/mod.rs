//! Resume parsing: extracted text in, typed sections out.

pub mod mapper;
pub mod prompts;
pub mod service;

pub use service::{ParseError, ParsingConfig, ParsingService};
