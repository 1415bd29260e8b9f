#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use loom_model::{Chain, LinkKind, LinkPosition, LinkRef, MemberId};
use serde::Serialize;
use tracing::{instrument, trace};

use crate::{ChainSet, LinkError};

/// Concrete call target of one link reference.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolvedTarget {
    Link { member: MemberId, position: LinkPosition },
    /// The literal empty body (a synthesized original, or nothing below the original).
    Empty,
}

impl ResolvedTarget {
    pub fn link(member: &MemberId, position: LinkPosition) -> Self {
        ResolvedTarget::Link {
            member: member.clone(),
            position,
        }
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedTarget::Link { member, position } => write!(f, "{member}@{position}"),
            ResolvedTarget::Empty => f.write_str("<empty>"),
        }
    }
}

/// A chain together with the target of every reference in every link body,
/// in occurrence order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedChain {
    pub chain: Chain,
    pub targets: BTreeMap<LinkPosition, Vec<ResolvedTarget>>,
}

impl ResolvedChain {
    pub fn targets_of(&self, position: LinkPosition) -> &[ResolvedTarget] {
        self.targets.get(&position).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn at(chain: &Chain, position: LinkPosition) -> ResolvedTarget {
    match position {
        LinkPosition::Original if chain.original.is_synthesized() => ResolvedTarget::Empty,
        _ => ResolvedTarget::link(&chain.member, position),
    }
}

/// What a `Base` reference at `position` resolves to within its own chain.
pub fn base_target(chain: &Chain, position: LinkPosition) -> ResolvedTarget {
    match chain.predecessor(position) {
        Some(p) => at(chain, p),
        None => ResolvedTarget::Empty,
    }
}

/// Resolves one reference found in the link at `position` of `member`'s chain.
///
/// Depends only on the referenced member's chain and the containing position.
pub fn resolve_link(
    chains: &ChainSet,
    member: &MemberId,
    position: LinkPosition,
    link: &LinkRef,
) -> Result<ResolvedTarget, LinkError> {
    let unresolvable = |reason| LinkError::UnresolvableLink {
        link: link.clone(),
        member: member.clone(),
        position: position.to_string(),
        reason,
    };

    let target = chains
        .get(&link.target)
        .ok_or_else(|| unresolvable("the referenced member has no chain"))?;

    let resolved = match link.kind {
        LinkKind::Original => at(target, LinkPosition::Original),
        LinkKind::Final => at(target, target.final_position()),
        LinkKind::Base | LinkKind::This if &link.target == member => {
            if target.get(position).is_none() {
                return Err(unresolvable("the containing position is outside the chain"));
            }
            base_target(target, position)
        }
        // Cross-member references observe the other member from outside.
        LinkKind::Base | LinkKind::This => at(target, target.final_position()),
    };
    Ok(resolved)
}

/// Second global pass: resolves every reference of every link of every chain.
///
/// Runs only once all chains exist, since references may cross members.
#[instrument(skip_all, fields(chains = chains.len()))]
pub fn resolve_chains(chains: &ChainSet) -> Result<BTreeMap<MemberId, ResolvedChain>, LinkError> {
    let mut out = BTreeMap::new();
    for (member, chain) in chains {
        let mut targets = BTreeMap::new();
        for (position, link) in chain.iter() {
            let resolved = link
                .body
                .references()
                .map(|r| resolve_link(chains, member, position, r))
                .collect::<Result<Vec<_>, _>>()?;
            for (r, t) in link.body.references().zip(&resolved) {
                trace!(%member, %position, link = %r, target = %t, "link resolved");
            }
            targets.insert(position, resolved);
        }
        out.insert(
            member.clone(),
            ResolvedChain {
                chain: chain.clone(),
                targets,
            },
        );
    }
    Ok(out)
}
