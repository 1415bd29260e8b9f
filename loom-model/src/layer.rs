#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of one aspect layer: the aspect class plus an optional layer name.
/// `layer == None` is the class's default (unnamed) layer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LayerId {
    pub aspect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
}

impl LayerId {
    pub fn default_of(aspect: impl Into<String>) -> Self {
        Self {
            aspect: aspect.into(),
            layer: None,
        }
    }

    pub fn named(aspect: impl Into<String>, layer: impl Into<String>) -> Self {
        Self {
            aspect: aspect.into(),
            layer: Some(layer.into()),
        }
    }

    pub fn is_default(&self) -> bool {
        self.layer.is_none()
    }

    /// The same layer name on another aspect class.
    pub fn rebased(&self, aspect: &str) -> Self {
        Self {
            aspect: aspect.to_string(),
            layer: self.layer.clone(),
        }
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.layer {
            Some(layer) => write!(f, "{}:{}", self.aspect, layer),
            None => f.write_str(&self.aspect),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseLayerError {
    #[error("empty aspect name in layer reference '{0}'")]
    EmptyAspect(String),
    #[error("empty layer name in layer reference '{0}'")]
    EmptyLayer(String),
}

impl FromStr for LayerId {
    type Err = ParseLayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(':') {
            Some((aspect, layer)) => {
                let (aspect, layer) = (aspect.trim(), layer.trim());
                if aspect.is_empty() {
                    return Err(ParseLayerError::EmptyAspect(s.to_string()));
                }
                if layer.is_empty() {
                    return Err(ParseLayerError::EmptyLayer(s.to_string()));
                }
                Ok(LayerId::named(aspect, layer))
            }
            None if s.is_empty() => Err(ParseLayerError::EmptyAspect(s.to_string())),
            None => Ok(LayerId::default_of(s)),
        }
    }
}

/// A kind of aspect, discovered once per compilation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectClass {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    /// Explicitly declared named layers, in declaration order.
    #[serde(default)]
    pub layers: Vec<String>,
}

impl AspectClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            layers: Vec::new(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn with_layers<I, S>(mut self, layers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.layers = layers.into_iter().map(Into::into).collect();
        self
    }

    pub fn default_layer(&self) -> LayerId {
        LayerId::default_of(self.name.clone())
    }
}

/// Where an ordering constraint came from. Carried through to cycle diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderingSource {
    /// Declared with typed aspect references.
    Attribute,
    /// Declared by aspect type name.
    TypeName,
    /// Derived from aspect class inheritance.
    Inheritance,
    /// Reversed from a run-time execution order declaration.
    ExecutionDirection,
    /// Intrinsic order of the layers declared by one aspect class.
    LayerDeclaration,
}

impl fmt::Display for OrderingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderingSource::Attribute => "attribute",
            OrderingSource::TypeName => "type name",
            OrderingSource::Inheritance => "inheritance",
            OrderingSource::ExecutionDirection => "execution direction",
            OrderingSource::LayerDeclaration => "layer declaration",
        })
    }
}

/// `predecessor` is woven before (closer to the original than) `successor`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderingConstraint {
    pub predecessor: LayerId,
    pub successor: LayerId,
    pub source: OrderingSource,
}

impl OrderingConstraint {
    pub fn new(predecessor: LayerId, successor: LayerId, source: OrderingSource) -> Self {
        Self {
            predecessor,
            successor,
            source,
        }
    }

    pub fn is_self_edge(&self) -> bool {
        self.predecessor == self.successor
    }
}

impl fmt::Display for OrderingConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.predecessor, self.successor, self.source)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderDirection {
    /// Listed in weaving order: the first entry is applied first.
    #[default]
    CompileTime,
    /// Listed in execution order: the first entry runs outermost, so it is woven last.
    RunTime,
}

/// One entry of an ordering declaration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerSelector {
    /// Every layer of the aspect class.
    Aspect(String),
    Layer(LayerId),
}

impl LayerSelector {
    pub fn aspect(&self) -> &str {
        match self {
            LayerSelector::Aspect(name) => name,
            LayerSelector::Layer(id) => &id.aspect,
        }
    }
}

impl FromStr for LayerSelector {
    type Err = ParseLayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: LayerId = s.parse()?;
        Ok(match id.layer {
            Some(_) => LayerSelector::Layer(id),
            None => LayerSelector::Aspect(id.aspect),
        })
    }
}

impl fmt::Display for LayerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerSelector::Aspect(name) => f.write_str(name),
            LayerSelector::Layer(id) => id.fmt(f),
        }
    }
}

/// An author-declared ordering: adjacent selectors are ordered pairwise.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingDeclaration {
    pub source: OrderingSource,
    #[serde(default)]
    pub direction: OrderDirection,
    pub selectors: Vec<LayerSelector>,
}

impl OrderingDeclaration {
    pub fn compile_time(source: OrderingSource, selectors: Vec<LayerSelector>) -> Self {
        Self {
            source,
            direction: OrderDirection::CompileTime,
            selectors,
        }
    }

    pub fn run_time(source: OrderingSource, selectors: Vec<LayerSelector>) -> Self {
        Self {
            source,
            direction: OrderDirection::RunTime,
            selectors,
        }
    }

    /// Selectors in weaving order.
    pub fn weaving_order(&self) -> Vec<&LayerSelector> {
        match self.direction {
            OrderDirection::CompileTime => self.selectors.iter().collect(),
            OrderDirection::RunTime => self.selectors.iter().rev().collect(),
        }
    }
}
