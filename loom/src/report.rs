#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use loom_link::{ReducedChain, RemovalReason, ResolvedTarget, RetentionReason};
use loom_model::{Chain, LinkOrigin, LinkPosition, MemberId, MemberKind, SourceRange};
use loom_order::LayerOrder;
use serde::Serialize;

use crate::Woven;

pub const SCHEMA: &str = "loom.weave-report.v1";

const EMPTY: &str = "<empty>";

fn advice_stem(chain: &Chain, position: LinkPosition) -> Option<String> {
    let layer = chain.get(position)?.layer()?;
    Some(match &layer.layer {
        Some(l) => format!("{}_{}_{}", chain.member.name, layer.aspect, l),
        None => format!("{}_{}", chain.member.name, layer.aspect),
    })
}

/// Name under which the link at `position` is emitted.
///
/// The final link takes the member's own name, the source original is renamed
/// `<name>_Source`, and every other link is named after its aspect layer, numbered
/// when one layer contributes more than once.
pub fn emission_name(chain: &Chain, position: LinkPosition) -> String {
    let Some(link) = chain.get(position) else {
        return EMPTY.to_string();
    };
    if link.is_synthesized() {
        return EMPTY.to_string();
    }
    if position == chain.final_position() {
        return chain.member.name.clone();
    }
    let Some(stem) = advice_stem(chain, position) else {
        return format!("{}_Source", chain.member.name);
    };

    let final_position = chain.final_position();
    let siblings: Vec<LinkPosition> = chain
        .iter()
        .map(|(p, _)| p)
        .filter(|p| *p != final_position && advice_stem(chain, *p).as_deref() == Some(stem.as_str()))
        .collect();
    if siblings.len() < 2 {
        return stem;
    }
    let nth = siblings.iter().position(|p| *p == position).unwrap_or(0) + 1;
    format!("{stem}_{nth}")
}

fn target_name(chains: &BTreeMap<MemberId, ReducedChain>, from: &MemberId, target: &ResolvedTarget) -> String {
    match target {
        ResolvedTarget::Empty => EMPTY.to_string(),
        ResolvedTarget::Link { member, position } => {
            let name = chains
                .get(member)
                .map(|c| emission_name(c.chain(), *position))
                .unwrap_or_else(|| EMPTY.to_string());
            if member.declaring_type == from.declaring_type {
                name
            } else {
                format!("{}.{name}", member.declaring_type)
            }
        }
    }
}

fn origin_label(origin: &LinkOrigin) -> String {
    match origin {
        LinkOrigin::Source => "source".to_string(),
        LinkOrigin::Synthesized => "synthesized".to_string(),
        LinkOrigin::Advice { id, layer, kind } => format!("{layer} {kind} {id}"),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerReport {
    pub layer: String,
    pub order: usize,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallReport {
    pub link: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeclarationReport {
    pub name: String,
    pub position: LinkPosition,
    pub origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<LinkPosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retained: Option<RetentionReason>,
    pub span: SourceRange,
    pub calls: Vec<CallReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovedReport {
    /// Position before reduction.
    pub position: LinkPosition,
    pub origin: String,
    pub reason: RemovalReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberReport {
    pub member: String,
    pub kind: MemberKind,
    pub declarations: Vec<DeclarationReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<RemovedReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeaveReport {
    pub schema: &'static str,
    pub compilation: String,
    pub layers: Vec<LayerReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<MemberReport>,
}

pub fn layer_report(order: &LayerOrder) -> Vec<LayerReport> {
    order
        .iter()
        .map(|(id, l)| LayerReport {
            layer: id.to_string(),
            order: l.order,
            rank: l.rank,
        })
        .collect()
}

fn member_report(chains: &BTreeMap<MemberId, ReducedChain>, reduced: &ReducedChain) -> MemberReport {
    let chain = reduced.chain();
    let member = reduced.member();
    let declarations = reduced
        .declarations()
        .map(|(position, link)| DeclarationReport {
            name: emission_name(chain, position),
            position,
            origin: origin_label(&link.origin),
            previous: reduced.previous.get(&position).copied().filter(|p| *p != position),
            retained: reduced.retained.get(&position).copied(),
            span: link.span,
            calls: link
                .body
                .references()
                .zip(reduced.resolved.targets_of(position))
                .map(|(r, t)| CallReport {
                    link: r.to_string(),
                    target: target_name(chains, member, t),
                })
                .collect(),
        })
        .collect();
    let removed = reduced
        .removed
        .iter()
        .map(|r| RemovedReport {
            position: r.position,
            origin: origin_label(&r.link.origin),
            reason: r.reason,
        })
        .collect();
    MemberReport {
        member: member.to_string(),
        kind: member.kind,
        declarations,
        removed,
    }
}

impl WeaveReport {
    pub fn new(compilation: impl Into<String>, woven: &Woven) -> Self {
        Self {
            schema: SCHEMA,
            compilation: compilation.into(),
            layers: layer_report(&woven.order),
            members: woven.chains.values().map(|c| member_report(&woven.chains, c)).collect(),
        }
    }

    /// A report carrying only the layer order.
    pub fn order_only(compilation: impl Into<String>, order: &LayerOrder) -> Self {
        Self {
            schema: SCHEMA,
            compilation: compilation.into(),
            layers: layer_report(order),
            members: Vec::new(),
        }
    }
}

impl fmt::Display for WeaveReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "compilation {}", self.compilation)?;
        writeln!(f, "layers")?;
        for l in &self.layers {
            writeln!(f, "  {:>3}  {} (rank {})", l.order, l.layer, l.rank)?;
        }
        for m in &self.members {
            writeln!(f, "{} ({:?})", m.member, m.kind)?;
            for d in &m.declarations {
                write!(f, "  {:<24} {:<8} {}", d.name, d.position.to_string(), d.origin)?;
                if let Some(reason) = d.retained {
                    write!(f, " [kept: {reason:?}]")?;
                }
                writeln!(f)?;
                for c in &d.calls {
                    writeln!(f, "      {} -> {}", c.link, c.target)?;
                }
            }
            for r in &m.removed {
                writeln!(f, "  removed {} {} ({:?})", r.position, r.origin, r.reason)?;
            }
        }
        Ok(())
    }
}
