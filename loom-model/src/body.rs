#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::MemberId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkKind {
    /// The member as it was before any advice.
    Original,
    /// The next declaration down the chain.
    Base,
    /// The `self` link; currently resolved exactly like `Base`.
    #[serde(rename = "self")]
    This,
    /// What external callers observe.
    Final,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkKind::Original => "original",
            LinkKind::Base => "base",
            LinkKind::This => "self",
            LinkKind::Final => "final",
        })
    }
}

/// A symbolic call placeholder left in an advice body by template expansion.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkRef {
    pub kind: LinkKind,
    pub target: MemberId,
}

impl LinkRef {
    pub fn new(kind: LinkKind, target: MemberId) -> Self {
        Self { kind, target }
    }
}

impl fmt::Display for LinkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.target, self.kind)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Arguments {
    /// The caller's own parameters, passed through unchanged.
    Forwarded,
    Custom(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultUse {
    Discard,
    /// Returned (or, for void members, propagated) verbatim.
    Return,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Invocation {
    pub link: LinkRef,
    pub args: Arguments,
    pub result: ResultUse,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stmt {
    /// Anything with observable behavior that is not a linked call.
    Opaque(String),
    Invoke(Invocation),
    Return(Option<String>),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Body {
    pub stmts: Vec<Stmt>,
}

impl Body {
    pub fn empty() -> Self {
        Self { stmts: Vec::new() }
    }

    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }

    /// `return <kind>(...)` with forwarded arguments.
    pub fn forwarding(kind: LinkKind, target: MemberId) -> Self {
        Self::new(vec![Stmt::Invoke(Invocation {
            link: LinkRef::new(kind, target),
            args: Arguments::Forwarded,
            result: ResultUse::Return,
        })])
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    /// Link references in statement order; the index of an item is its occurrence number.
    pub fn references(&self) -> impl Iterator<Item = &LinkRef> + '_ {
        self.stmts.iter().filter_map(|s| match s {
            Stmt::Invoke(inv) => Some(&inv.link),
            _ => None,
        })
    }

    pub fn reference_count(&self) -> usize {
        self.references().count()
    }

    /// The single link this body forwards to, if the body does nothing else.
    ///
    /// Only the exact shape `return link(<forwarded args>)` qualifies; anything else,
    /// including custom arguments or a discarded result, is treated as observable.
    pub fn as_forwarder(&self) -> Option<&LinkRef> {
        match self.stmts.as_slice() {
            [
                Stmt::Invoke(Invocation {
                    link,
                    args: Arguments::Forwarded,
                    result: ResultUse::Return,
                }),
            ] => Some(link),
            _ => None,
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Opaque(text) => write!(f, "{text};"),
            Stmt::Return(Some(value)) => write!(f, "return {value};"),
            Stmt::Return(None) => f.write_str("return;"),
            Stmt::Invoke(inv) => {
                let args = match &inv.args {
                    Arguments::Forwarded => "..",
                    Arguments::Custom(a) => a.as_str(),
                };
                match inv.result {
                    ResultUse::Return => write!(f, "return {}({args});", inv.link),
                    ResultUse::Discard => write!(f, "{}({args});", inv.link),
                }
            }
        }
    }
}
