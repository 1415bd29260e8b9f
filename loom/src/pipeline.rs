#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use loom_link::{ReducedChain, build_chains, reduce_chains, resolve_chains};
use loom_model::{Advice, AspectClass, MemberId, OrderingConstraint, OrderingDeclaration, SourceMember};
use loom_order::{LayerOrder, order_layers};
use rayon::prelude::*;
use tracing::{info, instrument};

use crate::{WeaveError, WeaveOptions};

/// Everything one weaving run needs: aspect classes in discovery order, ordering
/// inputs, pre-existing members and the advice contributed to them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Compilation {
    pub name: String,
    pub aspects: Vec<AspectClass>,
    pub declarations: Vec<OrderingDeclaration>,
    pub constraints: Vec<OrderingConstraint>,
    pub sources: Vec<SourceMember>,
    pub advice: Vec<Advice>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Woven {
    pub order: LayerOrder,
    pub chains: BTreeMap<MemberId, ReducedChain>,
}

/// Orders layers, builds and resolves every chain, then reduces.
///
/// Stops at the first failing stage; a cycle means no chain is built at all.
#[instrument(skip_all, fields(compilation = %compilation.name))]
pub fn weave(compilation: &Compilation, options: &WeaveOptions) -> Result<Woven, WeaveError> {
    let order = order_layers(
        &compilation.aspects,
        &compilation.declarations,
        &compilation.constraints,
    )?;
    let chains = build_chains(&order, &compilation.sources, &compilation.advice)?;
    let resolved = resolve_chains(&chains)?;
    let chains = reduce_chains(&resolved, options.reduce.options())?;

    let removed: usize = chains.values().map(|c| c.removed.len()).sum();
    info!(layers = order.len(), members = chains.len(), removed, "woven");
    Ok(Woven { order, chains })
}

/// Weaves independent compilations in parallel. Results keep input order.
pub fn weave_all(compilations: &[Compilation], options: &WeaveOptions) -> Vec<Result<Woven, WeaveError>> {
    compilations.par_iter().map(|c| weave(c, options)).collect()
}
