#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use loom_model::{
    AspectClass, LayerId, LayerSelector, OrderDirection, OrderingConstraint, OrderingDeclaration,
    OrderingSource,
};
use tracing::{debug, trace};

use crate::OrderingError;

/// One vertex of the ordering graph, with the keys used to break ties.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerNode {
    pub id: LayerId,
    /// Discovery order of the owning aspect class.
    pub aspect_index: usize,
    /// 0 for the default layer, then named layers in declaration order.
    pub layer_index: usize,
}

impl LayerNode {
    pub(crate) fn tie_key(&self) -> (usize, usize, &LayerId) {
        (self.aspect_index, self.layer_index, &self.id)
    }
}

#[derive(Clone, Debug, Default)]
pub struct OrderingGraph {
    nodes: Vec<LayerNode>,
    index: BTreeMap<LayerId, usize>,
    constraints: BTreeSet<OrderingConstraint>,
}

impl OrderingGraph {
    pub fn nodes(&self) -> &[LayerNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_index(&self, id: &LayerId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Union of the constraints from every source, deduplicated.
    pub fn constraints(&self) -> impl Iterator<Item = &OrderingConstraint> + '_ {
        self.constraints.iter()
    }

    /// Successor sets per node. Constraints naming the same pair collapse into one edge.
    pub(crate) fn successors(&self) -> Vec<BTreeSet<usize>> {
        let mut out = vec![BTreeSet::new(); self.nodes.len()];
        for c in &self.constraints {
            let (Some(p), Some(s)) = (self.node_index(&c.predecessor), self.node_index(&c.successor)) else {
                continue;
            };
            out[p].insert(s);
        }
        out
    }
}

#[derive(Clone, Debug)]
struct AspectEntry {
    name: String,
    base: Option<usize>,
    layers: Vec<LayerId>,
}

/// Collects ordering facts from every ordering source for one compilation.
pub struct OrderingGraphBuilder {
    aspects: Vec<AspectEntry>,
    by_name: BTreeMap<String, usize>,
    declared: BTreeSet<OrderingConstraint>,
}

impl OrderingGraphBuilder {
    /// `classes` must be in discovery order; that order is the first tie-break key.
    pub fn new(classes: &[AspectClass]) -> Result<Self, OrderingError> {
        let mut by_name = BTreeMap::new();
        for (i, class) in classes.iter().enumerate() {
            if by_name.insert(class.name.clone(), i).is_some() {
                return Err(OrderingError::DuplicateAspect {
                    name: class.name.clone(),
                });
            }
        }

        let aspects = classes
            .iter()
            .enumerate()
            .map(|(i, class)| {
                let mut layers = vec![class.default_layer()];
                layers.extend(
                    effective_layer_names(classes, &by_name, i)
                        .into_iter()
                        .map(|name| LayerId::named(class.name.clone(), name)),
                );
                AspectEntry {
                    name: class.name.clone(),
                    base: class.base.as_deref().and_then(|b| by_name.get(b).copied()),
                    layers,
                }
            })
            .collect();

        Ok(Self {
            aspects,
            by_name,
            declared: BTreeSet::new(),
        })
    }

    pub fn layers_of(&self, aspect: &str) -> Option<&[LayerId]> {
        self.by_name
            .get(aspect)
            .map(|&i| self.aspects[i].layers.as_slice())
    }

    pub fn add_declaration(&mut self, decl: &OrderingDeclaration) -> Result<(), OrderingError> {
        let source = match decl.direction {
            OrderDirection::CompileTime => decl.source,
            OrderDirection::RunTime => OrderingSource::ExecutionDirection,
        };

        let mut selected: Vec<(LayerId, LayerId)> = Vec::new();
        for sel in decl.weaving_order() {
            match self.select(sel)? {
                Some(bounds) => selected.push(bounds),
                None => debug!(selector = %sel, %source, "ordering selector names no participating aspect"),
            }
        }

        for pair in selected.windows(2) {
            let (_, last) = &pair[0];
            let (first, _) = &pair[1];
            self.insert(OrderingConstraint::new(last.clone(), first.clone(), source));
        }
        Ok(())
    }

    pub fn add_constraint(&mut self, constraint: OrderingConstraint) -> Result<(), OrderingError> {
        for layer in [&constraint.predecessor, &constraint.successor] {
            if !self.has_layer(layer) {
                return Err(OrderingError::UnknownLayer { layer: layer.clone() });
            }
        }
        self.insert(constraint);
        Ok(())
    }

    pub fn build(self) -> OrderingGraph {
        let mut constraints = BTreeSet::new();
        let mut add = |c: OrderingConstraint| {
            if c.is_self_edge() {
                trace!(layer = %c.predecessor, "ignoring self-ordering");
            } else {
                constraints.insert(c);
            }
        };

        for c in &self.declared {
            add(c.clone());
        }

        for aspect in &self.aspects {
            for w in aspect.layers.windows(2) {
                add(OrderingConstraint::new(
                    w[0].clone(),
                    w[1].clone(),
                    OrderingSource::LayerDeclaration,
                ));
            }
        }

        let derived = self.derived_classes();
        for c in &self.declared {
            let (Some(&p), Some(&s)) = (
                self.by_name.get(&c.predecessor.aspect),
                self.by_name.get(&c.successor.aspect),
            ) else {
                continue;
            };
            let preds = std::iter::once(p).chain(derived[p].iter().copied());
            for dp in preds {
                let succs = std::iter::once(s).chain(derived[s].iter().copied());
                for ds in succs {
                    if dp == ds || (dp, ds) == (p, s) {
                        continue;
                    }
                    let pred = c.predecessor.rebased(&self.aspects[dp].name);
                    let succ = c.successor.rebased(&self.aspects[ds].name);
                    if self.has_layer(&pred) && self.has_layer(&succ) {
                        add(OrderingConstraint::new(pred, succ, OrderingSource::Inheritance));
                    }
                }
            }
        }

        for aspect in &self.aspects {
            let Some(b) = aspect.base else { continue };
            let base = &self.aspects[b];
            let reversed = self
                .declared
                .iter()
                .any(|c| c.predecessor.aspect == aspect.name && c.successor.aspect == base.name);
            if reversed {
                debug!(aspect = %aspect.name, base = %base.name, "explicit ordering overrides inherited default");
                continue;
            }
            add(OrderingConstraint::new(
                base.layers[0].clone(),
                aspect.layers[0].clone(),
                OrderingSource::Inheritance,
            ));
        }

        let mut nodes = Vec::new();
        let mut index = BTreeMap::new();
        for (aspect_index, aspect) in self.aspects.iter().enumerate() {
            for (layer_index, id) in aspect.layers.iter().enumerate() {
                index.insert(id.clone(), nodes.len());
                nodes.push(LayerNode {
                    id: id.clone(),
                    aspect_index,
                    layer_index,
                });
            }
        }

        debug!(layers = nodes.len(), constraints = constraints.len(), "ordering graph built");
        OrderingGraph {
            nodes,
            index,
            constraints,
        }
    }

    fn insert(&mut self, constraint: OrderingConstraint) {
        if constraint.is_self_edge() {
            trace!(layer = %constraint.predecessor, "ignoring self-ordering");
            return;
        }
        trace!(%constraint, "ordering constraint");
        self.declared.insert(constraint);
    }

    fn has_layer(&self, id: &LayerId) -> bool {
        self.layers_of(&id.aspect)
            .is_some_and(|layers| layers.contains(id))
    }

    /// First and last layer covered by a selector, `None` if its aspect does not participate.
    fn select(&self, sel: &LayerSelector) -> Result<Option<(LayerId, LayerId)>, OrderingError> {
        let Some(layers) = self.layers_of(sel.aspect()) else {
            return Ok(None);
        };
        match sel {
            LayerSelector::Aspect(_) => {
                let (Some(first), Some(last)) = (layers.first(), layers.last()) else {
                    return Ok(None);
                };
                Ok(Some((first.clone(), last.clone())))
            }
            LayerSelector::Layer(id) if layers.contains(id) => Ok(Some((id.clone(), id.clone()))),
            LayerSelector::Layer(id) => Err(OrderingError::UnknownLayer { layer: id.clone() }),
        }
    }

    /// Transitive subclasses per aspect index.
    fn derived_classes(&self) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); self.aspects.len()];
        for (i, aspect) in self.aspects.iter().enumerate() {
            let mut seen = BTreeSet::from([i]);
            let mut current = aspect.base;
            while let Some(b) = current {
                if !seen.insert(b) {
                    break;
                }
                out[b].push(i);
                current = self.aspects[b].base;
            }
        }
        out
    }
}

/// Named layers of a class, inherited from the nearest ancestor declaring any.
fn effective_layer_names(
    classes: &[AspectClass],
    by_name: &BTreeMap<String, usize>,
    index: usize,
) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut current = index;
    loop {
        let class = &classes[current];
        if !class.layers.is_empty() {
            return class.layers.clone();
        }
        if !seen.insert(current) {
            return Vec::new();
        }
        match class.base.as_deref().and_then(|b| by_name.get(b)) {
            Some(&b) => current = b,
            None => return Vec::new(),
        }
    }
}
