#![forbid(unsafe_code)]

mod advice;
mod body;
mod chain;
mod layer;
mod member;

pub use advice::{Advice, AdviceId, AdviceKind};
pub use body::{Arguments, Body, Invocation, LinkKind, LinkRef, ResultUse, Stmt};
pub use chain::{Chain, ChainLink, LinkOrigin, LinkPosition};
pub use layer::{
    AspectClass, LayerId, LayerSelector, OrderDirection, OrderingConstraint, OrderingDeclaration,
    OrderingSource, ParseLayerError,
};
pub use member::{DeclarationFlags, MemberId, MemberKind, SourceMember};

use miette::SourceSpan;
use serde::{Deserialize, Serialize};

pub type Span = SourceSpan;

/// Byte range of a declaration in the aspect source, kept serializable so fixtures
/// and reports can carry it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    pub offset: usize,
    pub len: usize,
}

impl SourceRange {
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }
}

impl From<SourceRange> for Span {
    fn from(r: SourceRange) -> Self {
        SourceSpan::new(r.offset.into(), r.len)
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}
