#![forbid(unsafe_code)]

mod error;
mod graph;
mod sort;

pub use error::OrderingError;
pub use graph::{LayerNode, OrderingGraph, OrderingGraphBuilder};
pub use sort::{LayerOrder, OrderedLayer, sort_layers};

use loom_model::{AspectClass, OrderingConstraint, OrderingDeclaration};

/// Builds the ordering graph from every source and sorts it in one go.
pub fn order_layers(
    aspects: &[AspectClass],
    declarations: &[OrderingDeclaration],
    constraints: &[OrderingConstraint],
) -> Result<LayerOrder, OrderingError> {
    let mut builder = OrderingGraphBuilder::new(aspects)?;
    for decl in declarations {
        builder.add_declaration(decl)?;
    }
    for c in constraints {
        builder.add_constraint(c.clone())?;
    }
    sort_layers(&builder.build())
}
