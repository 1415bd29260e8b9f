use std::collections::BTreeMap;

use loom_link::{
    ChainSet, ReduceOptions, ResolvedChain, ResolvedTarget, build_chains, reduce_chains, resolve_chains,
};
use loom_model::{
    Advice, AdviceId, AdviceKind, Arguments, AspectClass, Body, Chain, ChainLink, DeclarationFlags, Invocation,
    LayerId, LinkKind, LinkOrigin, LinkPosition, LinkRef, MemberId, OrderingDeclaration, OrderingSource, ResultUse,
    SourceMember, SourceRange, Stmt,
};
use loom_order::order_layers;
use proptest::prelude::*;

fn member() -> MemberId {
    MemberId::property("Target", "Foo")
}

fn call(kind: LinkKind, target: MemberId, result: ResultUse) -> Stmt {
    Stmt::Invoke(Invocation {
        link: LinkRef::new(kind, target),
        args: Arguments::Forwarded,
        result,
    })
}

/// Override body touching every link kind: `self`, `final`, `original`, then `return base(..)`.
fn every_kind_body(tag: &str) -> Body {
    Body::new(vec![
        Stmt::Opaque(format!("enter {tag}")),
        call(LinkKind::This, member(), ResultUse::Discard),
        call(LinkKind::Final, member(), ResultUse::Discard),
        call(LinkKind::Original, member(), ResultUse::Discard),
        call(LinkKind::Base, member(), ResultUse::Return),
    ])
}

#[test]
fn three_layer_fixture_links_every_kind() {
    let classes = [AspectClass::new("L0"), AspectClass::new("L1"), AspectClass::new("L2")];
    let decl = OrderingDeclaration::compile_time(
        OrderingSource::Attribute,
        vec!["L0".parse().unwrap(), "L1".parse().unwrap(), "L2".parse().unwrap()],
    );
    let order = order_layers(&classes, &[decl], &[]).expect("order");

    let advice = |id: u32, layer: &str, index: u32| {
        Advice::new(
            AdviceId(id),
            LayerId::default_of(layer),
            member(),
            AdviceKind::Override,
            every_kind_body(&format!("{layer}/{index}")),
        )
        .with_position(0, index)
    };
    // Deliberately shuffled; the extras share layers L1 and L2.
    let input = [
        advice(4, "L2", 1),
        advice(1, "L1", 0),
        advice(3, "L2", 0),
        advice(0, "L0", 0),
        advice(2, "L1", 1),
    ];
    let source = SourceMember::new(member(), Body::new(vec![Stmt::Return(Some("field".into()))]));

    let chains = build_chains(&order, &[source], &input).expect("chains");
    let chain = &chains[&member()];
    let ids: Vec<u32> = chain.links.iter().filter_map(|l| l.advice()).map(|a| a.0).collect();
    assert_eq!(ids, [0, 1, 2, 3, 4]);

    let resolved = resolve_chains(&chains).expect("resolve");
    let rc = &resolved[&member()];
    let at = |p| ResolvedTarget::link(&member(), p);
    for i in 0..5 {
        let base = if i == 0 { LinkPosition::Original } else { LinkPosition::Advice(i - 1) };
        assert_eq!(
            rc.targets_of(LinkPosition::Advice(i)),
            [at(base), at(LinkPosition::Advice(4)), at(LinkPosition::Original), at(base)],
            "position {i}"
        );
    }
}

#[test]
fn cross_member_references_observe_the_final_declaration() {
    let order = order_layers(&[AspectClass::new("A"), AspectClass::new("B")], &[], &[]).expect("order");
    let getter = MemberId::method("Target", "GetFoo");

    let input = [
        Advice::new(
            AdviceId(0),
            LayerId::default_of("A"),
            getter.clone(),
            AdviceKind::Introduce,
            Body::new(vec![call(LinkKind::Base, member(), ResultUse::Return)]),
        ),
        Advice::new(AdviceId(1), LayerId::default_of("A"), member(), AdviceKind::Override, every_kind_body("a")),
        Advice::new(AdviceId(2), LayerId::default_of("B"), member(), AdviceKind::Override, every_kind_body("b")),
    ];
    let sources = [SourceMember::new(member(), Body::empty())];

    let chains = build_chains(&order, &sources, &input).expect("chains");
    let resolved = resolve_chains(&chains).expect("resolve");
    assert_eq!(
        resolved[&getter].targets_of(LinkPosition::Advice(0)),
        [ResolvedTarget::link(&member(), LinkPosition::Advice(1))]
    );
}

#[test]
fn references_to_unknown_members_abort_resolution() {
    let order = order_layers(&[AspectClass::new("A")], &[], &[]).expect("order");
    let input = [Advice::new(
        AdviceId(0),
        LayerId::default_of("A"),
        member(),
        AdviceKind::Override,
        Body::new(vec![call(LinkKind::Final, MemberId::method("Elsewhere", "Gone"), ResultUse::Return)]),
    )];
    let chains = build_chains(&order, &[SourceMember::new(member(), Body::empty())], &input).expect("chains");
    let err = resolve_chains(&chains).expect_err("unresolvable");
    assert!(matches!(err, loom_link::LinkError::UnresolvableLink { .. }));
}

#[test]
fn reduction_relinks_across_members() {
    let order = order_layers(&[AspectClass::new("A"), AspectClass::new("B")], &[], &[]).expect("order");
    let reader = MemberId::method("Target", "Read");
    let input = [
        Advice::new(AdviceId(0), LayerId::default_of("A"), member(), AdviceKind::Override, every_kind_body("a")),
        Advice::new(
            AdviceId(1),
            LayerId::default_of("B"),
            member(),
            AdviceKind::Override,
            Body::forwarding(LinkKind::Base, member()),
        ),
        Advice::new(
            AdviceId(2),
            LayerId::default_of("B"),
            reader.clone(),
            AdviceKind::Introduce,
            Body::new(vec![call(LinkKind::Final, member(), ResultUse::Return)]),
        ),
    ];
    let sources = [SourceMember::new(member(), Body::new(vec![Stmt::Return(Some("v".into()))]))];

    let chains = build_chains(&order, &sources, &input).expect("chains");
    let resolved = resolve_chains(&chains).expect("resolve");
    let reduced = reduce_chains(&resolved, ReduceOptions::default()).expect("reduce");

    let foo = &reduced[&member()];
    assert_eq!(foo.chain().links.len(), 1);
    assert_eq!(
        reduced[&reader].resolved.targets_of(LinkPosition::Advice(0)),
        [ResolvedTarget::link(&member(), LinkPosition::Advice(0))]
    );
}

// --- properties -----------------------------------------------------------------------

fn member_at(k: usize) -> MemberId {
    MemberId::property("Target", format!("P{k}"))
}

#[derive(Clone, Debug)]
enum Shape {
    Forward(LinkKind),
    Logged(LinkKind),
    Custom,
    Terminal,
    /// Calls the final declaration of a lower-numbered member, then returns `base`.
    Across(usize),
}

fn arb_shape(k: usize) -> BoxedStrategy<Shape> {
    let local = prop_oneof![
        prop_oneof![Just(LinkKind::Base), Just(LinkKind::This), Just(LinkKind::Original)].prop_map(Shape::Forward),
        prop_oneof![Just(LinkKind::Base), Just(LinkKind::This), Just(LinkKind::Original)].prop_map(Shape::Logged),
        Just(Shape::Custom),
        Just(Shape::Terminal),
    ];
    if k == 0 {
        local.boxed()
    } else {
        prop_oneof![3 => local, 1 => (0..k).prop_map(Shape::Across)].boxed()
    }
}

fn arb_flags() -> impl Strategy<Value = DeclarationFlags> {
    (prop::bool::weighted(0.2), prop::bool::weighted(0.2)).prop_map(|(a, b)| DeclarationFlags {
        not_inlineable: a,
        not_discardable: b,
    })
}

fn body_for(own: &MemberId, n: usize, shape: &Shape) -> Body {
    match shape {
        Shape::Forward(kind) => Body::forwarding(*kind, own.clone()),
        Shape::Logged(kind) => Body::new(vec![
            Stmt::Opaque(format!("log {own} {n}")),
            call(*kind, own.clone(), ResultUse::Return),
        ]),
        Shape::Custom => Body::new(vec![Stmt::Invoke(Invocation {
            link: LinkRef::new(LinkKind::Base, own.clone()),
            args: Arguments::Custom(format!("{own} {n}")),
            result: ResultUse::Return,
        })]),
        Shape::Terminal => Body::new(vec![
            Stmt::Opaque(format!("body {own} {n}")),
            Stmt::Return(Some(format!("{n}"))),
        ]),
        Shape::Across(j) => Body::new(vec![
            Stmt::Opaque(format!("across {own} {n}")),
            call(LinkKind::Final, member_at(*j), ResultUse::Discard),
            call(LinkKind::Base, own.clone(), ResultUse::Return),
        ]),
    }
}

/// Chain for member `k`; its links only reach down its own chain or into members below `k`.
fn arb_chain(k: usize) -> impl Strategy<Value = Chain> {
    (
        any::<bool>(),
        prop::collection::vec((arb_shape(k), arb_flags()), 1..7),
    )
        .prop_map(move |(has_source, links)| {
            let own = member_at(k);
            let original = if has_source {
                ChainLink {
                    origin: LinkOrigin::Source,
                    body: Body::new(vec![Stmt::Opaque(format!("source {own}")), Stmt::Return(Some("s".into()))]),
                    flags: DeclarationFlags::NONE,
                    span: SourceRange::default(),
                }
            } else {
                ChainLink::synthesized()
            };
            let links = links
                .iter()
                .enumerate()
                .map(|(n, (shape, flags))| ChainLink {
                    origin: LinkOrigin::Advice {
                        id: AdviceId(n as u32),
                        layer: LayerId::default_of(format!("L{n}")),
                        kind: AdviceKind::Override,
                    },
                    body: body_for(&own, n, shape),
                    flags: *flags,
                    span: SourceRange::default(),
                })
                .collect();
            Chain::new(own, original, links)
        })
}

fn arb_chain_set() -> impl Strategy<Value = ChainSet> {
    (1..=3usize).prop_flat_map(|count| {
        (0..count)
            .map(arb_chain)
            .collect::<Vec<_>>()
            .prop_map(|chains| chains.into_iter().map(|c| (c.member.clone(), c)).collect::<ChainSet>())
    })
}

/// Observable trace of invoking the declaration at `position`.
fn execute(chains: &BTreeMap<MemberId, ResolvedChain>, member: &MemberId, position: LinkPosition, out: &mut Vec<String>) {
    let rc = &chains[member];
    let link = rc.chain.get(position).expect("position exists");
    let targets = rc.targets_of(position);
    let mut k = 0;
    for stmt in &link.body.stmts {
        match stmt {
            Stmt::Opaque(text) => out.push(text.clone()),
            Stmt::Return(value) => {
                out.push(format!("return {value:?}"));
                return;
            }
            Stmt::Invoke(inv) => {
                if let Arguments::Custom(args) = &inv.args {
                    out.push(format!("args {args}"));
                }
                match &targets[k] {
                    ResolvedTarget::Empty => out.push("empty".into()),
                    ResolvedTarget::Link { member, position } => execute(chains, member, *position, out),
                }
                k += 1;
                if inv.result == ResultUse::Return {
                    return;
                }
            }
        }
    }
}

/// Traces of calling every member through its final declaration, keyed by member.
fn traces_of(chains: &BTreeMap<MemberId, ResolvedChain>) -> BTreeMap<MemberId, Vec<String>> {
    chains
        .iter()
        .map(|(member, rc)| {
            let mut out = Vec::new();
            execute(chains, member, rc.chain.final_position(), &mut out);
            (member.clone(), out)
        })
        .collect()
}

proptest! {
    #[test]
    fn resolution_is_total_and_positional(chain in arb_chain(0)) {
        let own = member_at(0);
        let chains = ChainSet::from([(own.clone(), chain.clone())]);
        let resolved = resolve_chains(&chains).expect("total");
        let rc = &resolved[&own];
        for (position, link) in chain.iter() {
            let targets = rc.targets_of(position);
            prop_assert_eq!(targets.len(), link.body.reference_count());
            for (r, t) in link.body.references().zip(targets) {
                if let ResolvedTarget::Link { position: p, .. } = t {
                    prop_assert!(chain.get(*p).is_some());
                }
                match r.kind {
                    LinkKind::Base | LinkKind::This => {
                        let expected = match chain.predecessor(position) {
                            Some(LinkPosition::Original) if chain.original.is_synthesized() => ResolvedTarget::Empty,
                            Some(p) => ResolvedTarget::link(&own, p),
                            None => ResolvedTarget::Empty,
                        };
                        prop_assert_eq!(t, &expected);
                    }
                    LinkKind::Original if chain.original.is_synthesized() => prop_assert_eq!(t, &ResolvedTarget::Empty),
                    LinkKind::Original => prop_assert_eq!(t, &ResolvedTarget::link(&own, LinkPosition::Original)),
                    LinkKind::Final => prop_assert_eq!(t, &ResolvedTarget::link(&own, chain.final_position())),
                }
            }
        }
    }

    #[test]
    fn reduction_preserves_observable_behavior(chains in arb_chain_set()) {
        let resolved = resolve_chains(&chains).expect("resolve");
        let reduced = reduce_chains(&resolved, ReduceOptions::default()).expect("reduce");
        prop_assert_eq!(reduced.len(), chains.len());

        let after: BTreeMap<MemberId, ResolvedChain> = reduced
            .iter()
            .map(|(m, r)| (m.clone(), r.resolved.clone()))
            .collect();
        prop_assert_eq!(traces_of(&resolved), traces_of(&after));

        for (member, chain) in &chains {
            let r = &reduced[member];
            for removed in &r.removed {
                prop_assert!(removed.link.is_inlineable());
                prop_assert!(removed.link.is_discardable());
            }
            for (position, link) in chain.iter() {
                if !link.is_synthesized() && (!link.is_inlineable() || !link.is_discardable()) {
                    prop_assert!(
                        r.previous.values().any(|p| *p == position),
                        "pinned link {member}@{position} removed"
                    );
                }
            }
        }
    }
}
