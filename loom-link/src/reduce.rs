#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use loom_model::{Chain, ChainLink, LinkPosition, MemberId};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::{ChainSet, LinkError, ResolvedChain, ResolvedTarget, base_target, resolve_chains};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReduceOptions {
    /// Remove links whose body only forwards to the next link down.
    pub inline_forwarders: bool,
    /// Remove links nothing can reach from any final link.
    pub discard_unreferenced: bool,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            inline_forwarders: true,
            discard_unreferenced: true,
        }
    }
}

impl ReduceOptions {
    pub fn disabled() -> Self {
        Self {
            inline_forwarders: false,
            discard_unreferenced: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemovalReason {
    Unreferenced,
    Forwarder,
}

/// Why a link that looked removable was kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetentionReason {
    NotInlineable,
    NotDiscardable,
    /// A final link forwarding to the empty body must stay to declare the member.
    ForwardsToEmpty,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovedLink {
    /// Position before reduction.
    pub position: LinkPosition,
    pub link: ChainLink,
    pub reason: RemovalReason,
}

/// A reduced, re-resolved chain. Positions refer to the reduced chain unless noted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReducedChain {
    pub resolved: ResolvedChain,
    pub retained: BTreeMap<LinkPosition, RetentionReason>,
    pub removed: Vec<RemovedLink>,
    /// Position each surviving link had before reduction.
    pub previous: BTreeMap<LinkPosition, LinkPosition>,
}

impl ReducedChain {
    pub fn chain(&self) -> &Chain {
        &self.resolved.chain
    }

    pub fn member(&self) -> &MemberId {
        &self.resolved.chain.member
    }

    /// Declarations that still need to be emitted.
    pub fn declarations(&self) -> impl Iterator<Item = (LinkPosition, &ChainLink)> + '_ {
        self.resolved.chain.iter().filter(|(_, l)| !l.is_synthesized())
    }
}

type Site = (usize, LinkPosition);

/// Index-addressed view over every resolved chain of the compilation.
struct LinkGraph<'a> {
    members: Vec<&'a MemberId>,
    index: BTreeMap<&'a MemberId, usize>,
    chains: Vec<&'a ResolvedChain>,
}

impl<'a> LinkGraph<'a> {
    fn new(resolved: &'a BTreeMap<MemberId, ResolvedChain>) -> Self {
        let members: Vec<&MemberId> = resolved.keys().collect();
        let index = members.iter().enumerate().map(|(i, m)| (*m, i)).collect();
        Self {
            members,
            index,
            chains: resolved.values().collect(),
        }
    }

    fn site_of(&self, target: &ResolvedTarget) -> Option<Site> {
        match target {
            ResolvedTarget::Link { member, position } => self.index.get(member).map(|&i| (i, *position)),
            ResolvedTarget::Empty => None,
        }
    }

    fn link(&self, (m, p): Site) -> Option<&'a ChainLink> {
        self.chains[m].chain.get(p)
    }

    fn targets(&self, (m, p): Site) -> &'a [ResolvedTarget] {
        self.chains[m].targets_of(p)
    }

    fn sites(&self) -> impl Iterator<Item = Site> + '_ {
        self.chains
            .iter()
            .enumerate()
            .flat_map(|(m, rc)| rc.chain.iter().map(move |(p, _)| (m, p)))
    }

    fn finals(&self) -> impl Iterator<Item = Site> + '_ {
        self.chains
            .iter()
            .enumerate()
            .map(|(m, rc)| (m, rc.chain.final_position()))
    }

    fn reach(&self, roots: impl IntoIterator<Item = Site>, live: &mut BTreeSet<Site>) {
        let mut work: VecDeque<Site> = VecDeque::new();
        for r in roots {
            if live.insert(r) {
                work.push_back(r);
            }
        }
        while let Some(site) = work.pop_front() {
            for t in self.targets(site) {
                if let Some(next) = self.site_of(t) {
                    if live.insert(next) {
                        work.push_back(next);
                    }
                }
            }
        }
    }

    /// Follows a target through removed forwarders until it lands on a survivor.
    fn redirect(&self, target: &ResolvedTarget, forwarders: &BTreeSet<Site>) -> ResolvedTarget {
        let mut current = target.clone();
        while let Some(site) = self.site_of(&current) {
            if !forwarders.contains(&site) {
                break;
            }
            match self.targets(site).first() {
                Some(next) => current = next.clone(),
                None => break,
            }
        }
        current
    }
}

fn removable(link: &ChainLink) -> bool {
    link.is_inlineable() && link.is_discardable() && !link.is_synthesized()
}

fn retention_reason(link: &ChainLink) -> RetentionReason {
    if link.is_inlineable() {
        RetentionReason::NotDiscardable
    } else {
        RetentionReason::NotInlineable
    }
}

/// Removes dead links and pure forwarding links, then re-resolves the reduced chains.
///
/// Removal is conservative: a link survives unless it is provably unreachable or its body
/// is exactly a verbatim forward to the link it would be replaced by. The reduced chains
/// are resolved again with the ordinary rules and checked against the redirected targets.
#[instrument(skip_all, fields(chains = resolved.len()))]
pub fn reduce_chains(
    resolved: &BTreeMap<MemberId, ResolvedChain>,
    options: ReduceOptions,
) -> Result<BTreeMap<MemberId, ReducedChain>, LinkError> {
    let graph = LinkGraph::new(resolved);
    let mut retained: BTreeMap<Site, RetentionReason> = BTreeMap::new();

    let live: BTreeSet<Site> = if options.discard_unreferenced {
        let mut live = BTreeSet::new();
        graph.reach(graph.finals(), &mut live);

        let pinned: Vec<Site> = graph
            .sites()
            .filter(|s| !live.contains(s))
            .filter(|&s| graph.link(s).is_some_and(|l| !l.is_synthesized() && !removable(l)))
            .collect();
        for &site in &pinned {
            if let Some(link) = graph.link(site) {
                retained.insert(site, retention_reason(link));
            }
        }
        graph.reach(pinned, &mut live);
        live
    } else {
        graph.sites().collect()
    };

    let mut forwarders: BTreeSet<Site> = BTreeSet::new();
    if options.inline_forwarders {
        for &site in &live {
            let (m, position) = site;
            if position == LinkPosition::Original {
                continue;
            }
            let Some(link) = graph.link(site) else { continue };
            let Some(forward) = link.body.as_forwarder() else { continue };
            if &forward.target != graph.members[m] {
                continue;
            }
            let [target] = graph.targets(site) else { continue };
            if *target != base_target(&graph.chains[m].chain, position) {
                continue;
            }
            if !removable(link) {
                retained.entry(site).or_insert_with(|| retention_reason(link));
                continue;
            }
            forwarders.insert(site);
        }

        for site in graph.finals().collect::<Vec<_>>() {
            if !forwarders.contains(&site) {
                continue;
            }
            let landing = graph
                .targets(site)
                .first()
                .map(|t| graph.redirect(t, &forwarders))
                .unwrap_or(ResolvedTarget::Empty);
            if landing == ResolvedTarget::Empty {
                forwarders.remove(&site);
                retained.insert(site, RetentionReason::ForwardsToEmpty);
            }
        }
    }

    let mut new_position: BTreeMap<Site, LinkPosition> = BTreeMap::new();
    let mut reduced = ChainSet::new();
    let mut removed_by_member: Vec<Vec<RemovedLink>> = Vec::with_capacity(graph.chains.len());

    for (m, rc) in graph.chains.iter().enumerate() {
        let chain = &rc.chain;
        let keep = |p: LinkPosition| live.contains(&(m, p)) && !forwarders.contains(&(m, p));
        let mut removed = Vec::new();

        let original = if chain.original.is_synthesized() {
            chain.original.clone()
        } else if keep(LinkPosition::Original) {
            new_position.insert((m, LinkPosition::Original), LinkPosition::Original);
            chain.original.clone()
        } else {
            removed.push(RemovedLink {
                position: LinkPosition::Original,
                link: chain.original.clone(),
                reason: RemovalReason::Unreferenced,
            });
            ChainLink::synthesized()
        };

        let mut links = Vec::new();
        for (i, link) in chain.links.iter().enumerate() {
            let p = LinkPosition::Advice(i);
            if keep(p) {
                new_position.insert((m, p), LinkPosition::Advice(links.len()));
                links.push(link.clone());
            } else {
                let reason = if forwarders.contains(&(m, p)) {
                    RemovalReason::Forwarder
                } else {
                    RemovalReason::Unreferenced
                };
                removed.push(RemovedLink {
                    position: p,
                    link: link.clone(),
                    reason,
                });
            }
        }

        if !removed.is_empty() {
            debug!(member = %chain.member, removed = removed.len(), kept = links.len(), "chain reduced");
        }
        removed_by_member.push(removed);
        reduced.insert(chain.member.clone(), Chain::new(chain.member.clone(), original, links));
    }

    for (site, reason) in &retained {
        debug!(member = %graph.members[site.0], position = %site.1, ?reason, "link retained");
    }

    let mut re_resolved = resolve_chains(&reduced)?;

    for (m, rc) in graph.chains.iter().enumerate() {
        let member = graph.members[m];
        for (old_position, targets) in &rc.targets {
            let Some(&position) = new_position.get(&(m, *old_position)) else {
                continue;
            };
            let actual = re_resolved[member].targets_of(position);
            for (k, t) in targets.iter().enumerate() {
                let landing = graph.redirect(t, &forwarders);
                let expected = match graph.site_of(&landing) {
                    None => Some(ResolvedTarget::Empty),
                    Some(s) => new_position
                        .get(&s)
                        .map(|&p| ResolvedTarget::link(graph.members[s.0], p)),
                };
                if expected.as_ref() != actual.get(k) {
                    return Err(LinkError::ReductionMismatch {
                        member: member.clone(),
                        position: old_position.to_string(),
                        reference: k,
                        expected: expected.map_or_else(|| "a removed link".to_string(), |e| e.to_string()),
                        actual: actual.get(k).map_or_else(|| "nothing".to_string(), |a| a.to_string()),
                    });
                }
            }
        }
    }

    let mut out = BTreeMap::new();
    for (m, removed) in removed_by_member.into_iter().enumerate() {
        let member = graph.members[m];
        let Some(resolved) = re_resolved.remove(member) else { continue };
        let previous: BTreeMap<LinkPosition, LinkPosition> = new_position
            .iter()
            .filter(|((mm, _), _)| *mm == m)
            .map(|((_, old), new)| (*new, *old))
            .collect();
        let retained = retained
            .iter()
            .filter(|((mm, _), _)| *mm == m)
            .filter_map(|((_, old), reason)| new_position.get(&(m, *old)).map(|&p| (p, *reason)))
            .collect();
        out.insert(
            member.clone(),
            ReducedChain {
                resolved,
                retained,
                removed,
                previous,
            },
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use loom_model::{
        AdviceId, AdviceKind, Body, DeclarationFlags, LayerId, LinkKind, LinkOrigin, SourceRange, Stmt,
    };

    use super::*;

    fn m() -> MemberId {
        MemberId::method("C", "M")
    }

    fn link(n: u32, body: Body, flags: DeclarationFlags) -> ChainLink {
        ChainLink {
            origin: LinkOrigin::Advice {
                id: AdviceId(n),
                layer: LayerId::default_of(format!("L{n}")),
                kind: AdviceKind::Override,
            },
            body,
            flags,
            span: SourceRange::default(),
        }
    }

    fn forwarder(n: u32) -> ChainLink {
        link(n, Body::forwarding(LinkKind::Base, m()), DeclarationFlags::NONE)
    }

    fn logging(n: u32) -> ChainLink {
        let mut body = Body::forwarding(LinkKind::Base, m());
        body.stmts.insert(0, Stmt::Opaque(format!("log({n})")));
        link(n, body, DeclarationFlags::NONE)
    }

    fn source() -> ChainLink {
        ChainLink {
            origin: LinkOrigin::Source,
            body: Body::new(vec![Stmt::Return(Some("42".into()))]),
            flags: DeclarationFlags::NONE,
            span: SourceRange::default(),
        }
    }

    fn reduce(chain: Chain, options: ReduceOptions) -> ReducedChain {
        let chains = ChainSet::from([(chain.member.clone(), chain)]);
        let resolved = resolve_chains(&chains).unwrap();
        reduce_chains(&resolved, options).unwrap().remove(&m()).unwrap()
    }

    fn surviving_ids(r: &ReducedChain) -> Vec<u32> {
        r.chain().links.iter().filter_map(|l| l.advice()).map(|a| a.0).collect()
    }

    #[test]
    fn forwarders_are_removed_and_references_relinked() {
        let chain = Chain::new(m(), source(), vec![logging(0), forwarder(1), logging(2)]);
        let r = reduce(chain, ReduceOptions::default());
        assert_eq!(surviving_ids(&r), [0, 2]);
        assert_eq!(r.resolved.targets_of(LinkPosition::Advice(1)), [ResolvedTarget::link(&m(), LinkPosition::Advice(0))]);
        assert_eq!(r.removed.len(), 1);
        assert_eq!(r.removed[0].reason, RemovalReason::Forwarder);
        assert_eq!(r.previous[&LinkPosition::Advice(1)], LinkPosition::Advice(2));
    }

    #[test]
    fn not_inlineable_forwarders_survive() {
        let pinned = link(1, Body::forwarding(LinkKind::Base, m()), DeclarationFlags::not_inlineable());
        let chain = Chain::new(m(), source(), vec![logging(0), pinned, logging(2)]);
        let r = reduce(chain, ReduceOptions::default());
        assert_eq!(surviving_ids(&r), [0, 1, 2]);
        assert_eq!(r.retained[&LinkPosition::Advice(1)], RetentionReason::NotInlineable);
    }

    #[test]
    fn final_forwarder_collapses_onto_predecessor() {
        let chain = Chain::new(m(), source(), vec![logging(0), forwarder(1)]);
        let r = reduce(chain, ReduceOptions::default());
        assert_eq!(surviving_ids(&r), [0]);
        assert_eq!(r.chain().final_position(), LinkPosition::Advice(0));
    }

    #[test]
    fn final_forwarder_to_empty_body_is_kept() {
        let chain = Chain::new(m(), ChainLink::synthesized(), vec![forwarder(0)]);
        let r = reduce(chain, ReduceOptions::default());
        assert_eq!(surviving_ids(&r), [0]);
        assert_eq!(r.retained[&LinkPosition::Advice(0)], RetentionReason::ForwardsToEmpty);
        assert_eq!(r.declarations().count(), 1);
    }

    #[test]
    fn unreferenced_links_are_discarded_unless_pinned() {
        // The final link never calls down, so everything below it is dead.
        let replacing = link(2, Body::new(vec![Stmt::Return(Some("0".into()))]), DeclarationFlags::NONE);
        let kept = link(1, Body::new(vec![Stmt::Opaque("audit()".into())]), DeclarationFlags::not_discardable());
        let chain = Chain::new(m(), source(), vec![logging(0), kept, replacing]);
        let r = reduce(chain, ReduceOptions::default());

        assert_eq!(surviving_ids(&r), [1, 2]);
        assert!(r.chain().original.is_synthesized());
        assert_eq!(r.retained[&LinkPosition::Advice(0)], RetentionReason::NotDiscardable);
        let reasons: Vec<RemovalReason> = r.removed.iter().map(|l| l.reason).collect();
        assert_eq!(reasons, [RemovalReason::Unreferenced, RemovalReason::Unreferenced]);
    }

    #[test]
    fn disabled_options_keep_everything() {
        let chain = Chain::new(m(), source(), vec![forwarder(0), forwarder(1)]);
        let r = reduce(chain.clone(), ReduceOptions::disabled());
        assert_eq!(r.chain(), &chain);
        assert!(r.removed.is_empty());
    }

    #[test]
    fn original_link_forwards_are_only_removed_when_equivalent_to_base() {
        // `original` from position 1 skips position 0, so it is not a plain forward.
        let skipping = link(1, Body::forwarding(LinkKind::Original, m()), DeclarationFlags::NONE);
        let chain = Chain::new(m(), source(), vec![logging(0), skipping]);
        let r = reduce(chain, ReduceOptions {
            inline_forwarders: true,
            discard_unreferenced: false,
        });
        assert_eq!(surviving_ids(&r), [0, 1]);
    }
}
