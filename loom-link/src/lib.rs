#![forbid(unsafe_code)]

mod build;
mod error;
mod reduce;
mod resolve;

pub use build::build_chains;
pub use error::LinkError;
pub use reduce::{ReduceOptions, ReducedChain, RemovalReason, RemovedLink, RetentionReason, reduce_chains};
pub use resolve::{ResolvedChain, ResolvedTarget, base_target, resolve_chains, resolve_link};

use std::collections::BTreeMap;

use loom_model::{Chain, MemberId};

/// Every chain of one compilation, keyed by member.
pub type ChainSet = BTreeMap<MemberId, Chain>;
