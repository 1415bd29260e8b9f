#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use loom_model::{LayerId, OrderingConstraint};
use tracing::{debug, instrument, trace};

use crate::{OrderingError, OrderingGraph};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderedLayer {
    /// Position in the total order; unique per layer.
    pub order: usize,
    /// Sorting round in which the layer became ready. Incomparable layers may share a rank.
    pub rank: usize,
}

/// The total order of every layer of one compilation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LayerOrder {
    positions: BTreeMap<LayerId, OrderedLayer>,
    sequence: Vec<LayerId>,
}

impl LayerOrder {
    pub fn get(&self, layer: &LayerId) -> Option<OrderedLayer> {
        self.positions.get(layer).copied()
    }

    pub fn order_of(&self, layer: &LayerId) -> Option<usize> {
        self.get(layer).map(|l| l.order)
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Layers in ascending order.
    pub fn layers(&self) -> &[LayerId] {
        &self.sequence
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LayerId, OrderedLayer)> + '_ {
        self.sequence.iter().map(|id| (id, self.positions[id]))
    }

    fn push(&mut self, id: LayerId, rank: usize) {
        let order = self.sequence.len();
        self.positions.insert(id.clone(), OrderedLayer { order, rank });
        self.sequence.push(id);
    }
}

/// Stable topological sort of the ordering graph.
///
/// Each round takes every layer whose predecessors are all placed and places them by
/// aspect discovery order, then layer declaration order, then name. If a round finds
/// nothing ready while layers remain, all remaining layers are reported as a cycle.
#[instrument(skip_all, fields(layers = graph.len()))]
pub fn sort_layers(graph: &OrderingGraph) -> Result<LayerOrder, OrderingError> {
    let nodes = graph.nodes();
    let successors = graph.successors();

    let mut in_degree = vec![0usize; nodes.len()];
    for succ in &successors {
        for &s in succ {
            in_degree[s] += 1;
        }
    }

    let mut order = LayerOrder::default();
    let mut ready: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut rank = 0;

    while !ready.is_empty() {
        ready.sort_by(|&a, &b| nodes[a].tie_key().cmp(&nodes[b].tie_key()));

        let mut next = Vec::new();
        for &n in &ready {
            trace!(layer = %nodes[n].id, order = order.len(), rank, "layer placed");
            order.push(nodes[n].id.clone(), rank);
            for &s in &successors[n] {
                in_degree[s] -= 1;
                if in_degree[s] == 0 {
                    next.push(s);
                }
            }
        }

        ready = next;
        rank += 1;
    }

    if order.len() < nodes.len() {
        let mut remaining: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] > 0).collect();
        remaining.sort_by(|&a, &b| nodes[a].tie_key().cmp(&nodes[b].tie_key()));

        let stuck: BTreeSet<&LayerId> = remaining.iter().map(|&i| &nodes[i].id).collect();
        let constraints: Vec<OrderingConstraint> = graph
            .constraints()
            .filter(|c| stuck.contains(&c.predecessor) && stuck.contains(&c.successor))
            .cloned()
            .collect();
        let layers = remaining.into_iter().map(|i| nodes[i].id.clone()).collect();

        return Err(OrderingError::cycle(layers, constraints));
    }

    debug!(layers = order.len(), ranks = rank, "layer order computed");
    Ok(order)
}
