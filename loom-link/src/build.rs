#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use loom_model::{Advice, AdviceKind, Chain, ChainLink, LinkOrigin, MemberId, SourceMember};
use loom_order::LayerOrder;
use tracing::{debug, instrument, trace};

use crate::{ChainSet, LinkError};

/// Builds one chain per member that exists in the source or is targeted by advice.
///
/// Advice is grouped by target and sorted by layer order; advice sharing a layer keeps
/// its declaration order within the aspect, then aspect instance discovery order.
#[instrument(skip_all, fields(sources = sources.len(), advice = advice.len()))]
pub fn build_chains(
    order: &LayerOrder,
    sources: &[SourceMember],
    advice: &[Advice],
) -> Result<ChainSet, LinkError> {
    let mut by_member: BTreeMap<&MemberId, &SourceMember> = BTreeMap::new();
    for s in sources {
        if by_member.insert(&s.id, s).is_some() {
            return Err(LinkError::DuplicateMember { member: s.id.clone() });
        }
    }

    let mut grouped: BTreeMap<&MemberId, Vec<(usize, &Advice)>> = BTreeMap::new();
    for a in advice {
        let Some(layer_order) = order.order_of(&a.layer) else {
            return Err(LinkError::UnorderedLayer {
                advice: a.id,
                layer: a.layer.clone(),
                span: a.span.into(),
            });
        };
        grouped.entry(&a.target).or_default().push((layer_order, a));
    }

    let mut chains = ChainSet::new();
    for (member, mut contributions) in grouped {
        contributions.sort_by_key(|(layer_order, a)| (*layer_order, a.index, a.instance, a.id));
        let ordered: Vec<&Advice> = contributions.into_iter().map(|(_, a)| a).collect();
        let chain = build_chain(member, by_member.get(member).copied(), &ordered)?;
        debug!(%member, links = chain.links.len(), "chain built");
        chains.insert(member.clone(), chain);
    }

    for s in sources {
        if !chains.contains_key(&s.id) {
            trace!(member = %s.id, "source member without advice");
            chains.insert(s.id.clone(), Chain::new(s.id.clone(), source_link(s), Vec::new()));
        }
    }

    Ok(chains)
}

fn build_chain(member: &MemberId, source: Option<&SourceMember>, advice: &[&Advice]) -> Result<Chain, LinkError> {
    let mut introduction: Option<&Advice> = None;
    for (position, a) in advice.iter().enumerate() {
        if !a.is_introduction() {
            continue;
        }
        if let Some(first) = introduction {
            return Err(LinkError::DuplicateIntroduction {
                member: member.clone(),
                first: first.id,
                second: a.id,
                span: a.span.into(),
            });
        }
        if position != 0 {
            return Err(LinkError::MisplacedIntroduction {
                advice: a.id,
                member: member.clone(),
                span: a.span.into(),
            });
        }
        introduction = Some(a);
    }

    let original = match (source, introduction) {
        (Some(_), Some(a)) if a.kind == AdviceKind::Introduce => {
            return Err(LinkError::IntroductionConflict {
                advice: a.id,
                member: member.clone(),
                span: a.span.into(),
            });
        }
        (Some(s), _) => source_link(s),
        (None, Some(a)) if a.kind == AdviceKind::Introduce => ChainLink::synthesized(),
        (None, _) => {
            // Groups are never empty.
            let a = advice[0];
            return Err(LinkError::MissingDeclaration {
                advice: a.id,
                member: member.clone(),
                span: a.span.into(),
            });
        }
    };

    let links = advice
        .iter()
        .map(|a| ChainLink {
            origin: LinkOrigin::Advice {
                id: a.id,
                layer: a.layer.clone(),
                kind: a.kind,
            },
            body: a.body.clone(),
            flags: a.flags,
            span: a.span,
        })
        .collect();

    Ok(Chain::new(member.clone(), original, links))
}

fn source_link(s: &SourceMember) -> ChainLink {
    ChainLink {
        origin: LinkOrigin::Source,
        body: s.body.clone(),
        flags: s.flags,
        span: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use loom_model::{AdviceId, AspectClass, Body, LayerId, LinkKind, OrderingDeclaration, OrderingSource};
    use loom_order::order_layers;

    use super::*;

    fn member() -> MemberId {
        MemberId::method("Calc", "Add")
    }

    fn order(names: &[&str]) -> LayerOrder {
        let classes: Vec<AspectClass> = names.iter().map(|n| AspectClass::new(*n)).collect();
        let decl = OrderingDeclaration::compile_time(
            OrderingSource::Attribute,
            names.iter().map(|n| n.parse().unwrap()).collect(),
        );
        order_layers(&classes, &[decl], &[]).unwrap()
    }

    fn advice(id: u32, layer: &str, kind: AdviceKind) -> Advice {
        Advice::new(
            AdviceId(id),
            LayerId::default_of(layer),
            member(),
            kind,
            Body::forwarding(LinkKind::Base, member()),
        )
    }

    fn source() -> SourceMember {
        SourceMember::new(member(), Body::empty())
    }

    fn ids(chain: &Chain) -> Vec<u32> {
        chain.links.iter().filter_map(|l| l.advice()).map(|a| a.0).collect()
    }

    #[test]
    fn links_follow_layer_order_not_input_order() {
        let order = order(&["A", "B", "C"]);
        let input = [
            advice(1, "C", AdviceKind::Override),
            advice(2, "A", AdviceKind::Override),
            advice(3, "B", AdviceKind::Override),
        ];
        let chains = build_chains(&order, &[source()], &input).unwrap();
        let chain = &chains[&member()];
        assert_eq!(ids(chain), [2, 3, 1]);
        assert_eq!(chain.original.origin, LinkOrigin::Source);
    }

    #[test]
    fn same_layer_advice_keeps_declaration_then_discovery_order() {
        let order = order(&["A"]);
        let input = [
            advice(1, "A", AdviceKind::Override).with_position(1, 0),
            advice(2, "A", AdviceKind::Override).with_position(0, 1),
            advice(3, "A", AdviceKind::Override).with_position(0, 0),
        ];
        let chains = build_chains(&order, &[source()], &input).unwrap();
        assert_eq!(ids(&chains[&member()]), [3, 1, 2]);
    }

    #[test]
    fn introduction_synthesizes_original() {
        let order = order(&["A", "B"]);
        let input = [
            advice(1, "B", AdviceKind::Override),
            advice(2, "A", AdviceKind::Introduce),
        ];
        let chains = build_chains(&order, &[], &input).unwrap();
        let chain = &chains[&member()];
        assert!(chain.original.is_synthesized());
        assert_eq!(ids(chain), [2, 1]);
    }

    #[test]
    fn introduction_rules_are_enforced() {
        let order = order(&["A", "B"]);

        let err = build_chains(&order, &[source()], &[advice(1, "A", AdviceKind::Introduce)]).unwrap_err();
        assert!(matches!(err, LinkError::IntroductionConflict { .. }));

        let err = build_chains(&order, &[], &[advice(1, "A", AdviceKind::Override)]).unwrap_err();
        assert!(matches!(err, LinkError::MissingDeclaration { .. }));

        let err = build_chains(&order, &[], &[advice(1, "A", AdviceKind::Replace)]).unwrap_err();
        assert!(matches!(err, LinkError::MissingDeclaration { .. }));

        let err = build_chains(
            &order,
            &[],
            &[advice(1, "A", AdviceKind::Override), advice(2, "B", AdviceKind::Introduce)],
        )
        .unwrap_err();
        assert!(matches!(err, LinkError::MisplacedIntroduction { .. }));

        let err = build_chains(
            &order,
            &[source()],
            &[advice(1, "A", AdviceKind::Replace), advice(2, "B", AdviceKind::Replace)],
        )
        .unwrap_err();
        assert!(matches!(err, LinkError::DuplicateIntroduction { .. }));
    }

    #[test]
    fn replacement_keeps_source_as_original() {
        let order = order(&["A"]);
        let chains = build_chains(&order, &[source()], &[advice(1, "A", AdviceKind::Replace)]).unwrap();
        assert_eq!(chains[&member()].original.origin, LinkOrigin::Source);
    }

    #[test]
    fn advice_on_unordered_layer_is_a_defect() {
        let order = order(&["A"]);
        let err = build_chains(&order, &[source()], &[advice(1, "Ghost", AdviceKind::Override)]).unwrap_err();
        assert!(matches!(err, LinkError::UnorderedLayer { .. }));
    }

    #[test]
    fn unadvised_source_members_get_trivial_chains() {
        let chains = build_chains(&LayerOrder::default(), &[source()], &[]).unwrap();
        let chain = &chains[&member()];
        assert!(chain.links.is_empty());
        assert_eq!(chain.final_position(), loom_model::LinkPosition::Original);
    }
}
