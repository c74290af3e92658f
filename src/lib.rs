pub mod daemon;
pub mod distance;
pub mod neighbor;
pub mod wire;

/// Nodes are identified by their IPv4 address in dotted-decimal form.
pub type NodeId = String;
