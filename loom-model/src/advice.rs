#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Body, DeclarationFlags, LayerId, MemberId, SourceRange};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AdviceId(pub u32);

impl fmt::Display for AdviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdviceKind {
    Override,
    /// Adds a member that did not exist before weaving.
    Introduce,
    /// Adds a member that takes the place of an existing source declaration.
    Replace,
}

impl fmt::Display for AdviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AdviceKind::Override => "override",
            AdviceKind::Introduce => "introduce",
            AdviceKind::Replace => "replace",
        })
    }
}

/// One contribution of one aspect instance, at one layer, to one member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    pub id: AdviceId,
    pub layer: LayerId,
    pub target: MemberId,
    pub kind: AdviceKind,
    /// Discovery order of the contributing aspect instance.
    #[serde(default)]
    pub instance: u32,
    /// Declaration order of the advice within its aspect.
    #[serde(default)]
    pub index: u32,
    pub body: Body,
    #[serde(default)]
    pub flags: DeclarationFlags,
    #[serde(default)]
    pub span: SourceRange,
}

impl Advice {
    pub fn new(id: AdviceId, layer: LayerId, target: MemberId, kind: AdviceKind, body: Body) -> Self {
        Self {
            id,
            layer,
            target,
            kind,
            instance: 0,
            index: 0,
            body,
            flags: DeclarationFlags::NONE,
            span: SourceRange::default(),
        }
    }

    pub fn with_flags(mut self, flags: DeclarationFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_position(mut self, instance: u32, index: u32) -> Self {
        self.instance = instance;
        self.index = index;
        self
    }

    pub fn is_introduction(&self) -> bool {
        matches!(self.kind, AdviceKind::Introduce | AdviceKind::Replace)
    }
}
