#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use loom_link::LinkError;
use loom_order::OrderingError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum WeaveError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Ordering(#[from] OrderingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Link(#[from] LinkError),

    #[error("config error: {message}")]
    #[diagnostic(code(loom::config))]
    Config { message: String },

    #[error("fixture error: {message}")]
    #[diagnostic(code(loom::fixture))]
    Fixture { message: String },
}

impl WeaveError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        WeaveError::Config {
            message: message.into(),
        }
    }

    pub(crate) fn fixture(message: impl Into<String>) -> Self {
        WeaveError::Fixture {
            message: message.into(),
        }
    }
}
