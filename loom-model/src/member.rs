#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Body;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemberKind {
    Method,
    Property,
    Indexer,
    Event,
    Field,
}

/// Stable identity shared by every physical declaration of one member.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId {
    pub declaring_type: String,
    pub name: String,
    pub kind: MemberKind,
}

impl MemberId {
    pub fn new(declaring_type: impl Into<String>, name: impl Into<String>, kind: MemberKind) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn method(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(declaring_type, name, MemberKind::Method)
    }

    pub fn property(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(declaring_type, name, MemberKind::Property)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring_type, self.name)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeclarationFlags {
    #[serde(default)]
    pub not_inlineable: bool,
    #[serde(default)]
    pub not_discardable: bool,
}

impl DeclarationFlags {
    pub const NONE: DeclarationFlags = DeclarationFlags {
        not_inlineable: false,
        not_discardable: false,
    };

    pub fn not_inlineable() -> Self {
        Self {
            not_inlineable: true,
            ..Self::NONE
        }
    }

    pub fn not_discardable() -> Self {
        Self {
            not_discardable: true,
            ..Self::NONE
        }
    }
}

/// A member as it exists in the program before weaving.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMember {
    pub id: MemberId,
    pub body: Body,
    #[serde(default)]
    pub flags: DeclarationFlags,
}

impl SourceMember {
    pub fn new(id: MemberId, body: Body) -> Self {
        Self {
            id,
            body,
            flags: DeclarationFlags::NONE,
        }
    }
}
