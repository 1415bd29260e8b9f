#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use loom_model::{LayerId, OrderingConstraint};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum OrderingError {
    #[error("aspect layers cannot be ordered: cycle among {}", join(layers))]
    #[diagnostic(code(loom::order::cycle))]
    Cycle {
        /// Every layer left unplaced when the sorter stalled.
        layers: Vec<LayerId>,
        constraints: Vec<OrderingConstraint>,
        #[help]
        help: String,
    },

    #[error("unknown aspect layer '{layer}'")]
    #[diagnostic(
        code(loom::order::unknown_layer),
        help("the aspect class does not declare this layer")
    )]
    UnknownLayer { layer: LayerId },

    #[error("aspect class '{name}' is declared more than once")]
    #[diagnostic(code(loom::order::duplicate_aspect))]
    DuplicateAspect { name: String },
}

impl OrderingError {
    pub(crate) fn cycle(layers: Vec<LayerId>, constraints: Vec<OrderingConstraint>) -> Self {
        let mut help = String::from("constraints between the unplaced layers:");
        for c in &constraints {
            help.push_str("\n  ");
            help.push_str(&c.to_string());
        }
        OrderingError::Cycle {
            layers,
            constraints,
            help,
        }
    }

    pub fn cycle_layers(&self) -> Option<&[LayerId]> {
        match self {
            OrderingError::Cycle { layers, .. } => Some(layers),
            _ => None,
        }
    }
}

fn join(layers: &[LayerId]) -> String {
    layers
        .iter()
        .map(|l| format!("'{l}'"))
        .collect::<Vec<_>>()
        .join(", ")
}
