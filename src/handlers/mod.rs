// Handlers module - application collaborators of the node
// Acknowledgement logging and cache reconciliation, attached through node callbacks

mod ack;
mod reconcile;

pub use ack::AckHandler;
pub use reconcile::{ReconcileStats, Reconciler, ReconcilerCallbacks};
