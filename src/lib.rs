//! Incremental, in-memory vote-graph for GHOST-based finality voting.
//!
//! Stewart, A. and Kokoris-Kogia, E. "GRANDPA: a Byzantine Finality
//! Gadget." The graph accumulates weighted votes against a block tree and
//! answers the two queries a voting round needs: the heaviest observed
//! subtree above a threshold, and the highest qualifying ancestor on a
//! given chain.
//!
//! The voted-on portion of the block tree is stored compressed: only blocks
//! that received a direct vote (or were materialized by an edge split)
//! become nodes, and each node remembers the run of block hashes back to
//! its parent node. Vote weight flows upward along those edges, so the
//! weight stored at any node is the weight of its entire subtree.

mod chain;
mod graph;
mod primitives;
mod weights;

#[cfg(test)]
pub mod test;

pub use {
  chain::{Chain, Error},
  graph::VoteGraph,
  primitives::Pubkey,
  weights::{StakeWeight, Vote, VoteInput, VoteWeight},
};
