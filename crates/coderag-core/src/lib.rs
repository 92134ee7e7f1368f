//! Configuration, bootstrap and the hybrid retrieval orchestrator.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod orchestrator;

pub use config::Config;
pub use error::{AnswerError, RetrievalError};
pub use orchestrator::{
    Answer, AnswerOptions, AnswerStream, ContextItem, ContextSource, Orchestrator,
    RetrievalSettings,
};
