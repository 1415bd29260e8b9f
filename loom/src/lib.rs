#![forbid(unsafe_code)]

pub mod config;
pub mod fixture;
pub mod report;

mod error;
mod pipeline;

pub use config::{LoomConfig, OutputFormat, ReduceConfig, WeaveOptions};
pub use error::WeaveError;
pub use fixture::{load_fixture, parse_fixture};
pub use pipeline::{Compilation, Woven, weave, weave_all};
pub use report::{WeaveReport, emission_name};
