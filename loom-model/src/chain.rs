#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{AdviceId, AdviceKind, Body, DeclarationFlags, LayerId, MemberId, SourceRange};

/// Position of a link inside a chain. `Original` precedes every advice position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkPosition {
    Original,
    Advice(usize),
}

impl fmt::Display for LinkPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkPosition::Original => f.write_str("original"),
            LinkPosition::Advice(i) => write!(f, "{i}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkOrigin {
    /// The pre-existing declaration.
    Source,
    /// Stand-in original of an introduced member; never emitted.
    Synthesized,
    Advice {
        id: AdviceId,
        layer: LayerId,
        kind: AdviceKind,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    pub origin: LinkOrigin,
    pub body: Body,
    pub flags: DeclarationFlags,
    #[serde(default)]
    pub span: SourceRange,
}

impl ChainLink {
    pub fn synthesized() -> Self {
        Self {
            origin: LinkOrigin::Synthesized,
            body: Body::empty(),
            flags: DeclarationFlags::NONE,
            span: SourceRange::default(),
        }
    }

    pub fn is_synthesized(&self) -> bool {
        matches!(self.origin, LinkOrigin::Synthesized)
    }

    pub fn is_inlineable(&self) -> bool {
        !self.flags.not_inlineable
    }

    pub fn is_discardable(&self) -> bool {
        !self.flags.not_discardable
    }

    pub fn layer(&self) -> Option<&LayerId> {
        match &self.origin {
            LinkOrigin::Advice { layer, .. } => Some(layer),
            _ => None,
        }
    }

    pub fn advice(&self) -> Option<AdviceId> {
        match &self.origin {
            LinkOrigin::Advice { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Ordered declarations of one member: the original, then advice links by ascending
/// layer order. The last advice link (or the original, if there is none) is final.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub member: MemberId,
    pub original: ChainLink,
    pub links: Vec<ChainLink>,
}

impl Chain {
    pub fn new(member: MemberId, original: ChainLink, links: Vec<ChainLink>) -> Self {
        Self {
            member,
            original,
            links,
        }
    }

    pub fn final_position(&self) -> LinkPosition {
        match self.links.len() {
            0 => LinkPosition::Original,
            n => LinkPosition::Advice(n - 1),
        }
    }

    pub fn get(&self, position: LinkPosition) -> Option<&ChainLink> {
        match position {
            LinkPosition::Original => Some(&self.original),
            LinkPosition::Advice(i) => self.links.get(i),
        }
    }

    /// The immediately preceding position, `None` below the original.
    pub fn predecessor(&self, position: LinkPosition) -> Option<LinkPosition> {
        match position {
            LinkPosition::Original => None,
            LinkPosition::Advice(0) => Some(LinkPosition::Original),
            LinkPosition::Advice(i) => Some(LinkPosition::Advice(i - 1)),
        }
    }

    /// Original first, then advice links in order.
    pub fn iter(&self) -> impl Iterator<Item = (LinkPosition, &ChainLink)> + '_ {
        std::iter::once((LinkPosition::Original, &self.original)).chain(
            self.links
                .iter()
                .enumerate()
                .map(|(i, l)| (LinkPosition::Advice(i), l)),
        )
    }
}
