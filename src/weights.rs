use {
  crate::primitives::Pubkey,
  serde::{Deserialize, Serialize},
  std::collections::BTreeMap,
};

/// Vote data accumulated along the edges of the graph.
///
/// The graph is generic over how votes are counted; the only capabilities
/// it needs are merging two accumulated weights, folding in one raw vote,
/// and cloning. Both operations must be commutative and associative, since
/// weight reaches a node once per insertion, in insertion order, and the
/// final tally must not depend on that order.
pub trait VoteWeight: Clone {
  /// The raw vote type this weight accumulates.
  type Vote;

  /// Merges another accumulated weight into this one.
  fn add_weight(&mut self, other: &Self);

  /// Incorporates a single raw vote.
  fn add_vote(&mut self, vote: &Self::Vote);
}

/// What a caller feeds into [`VoteGraph::insert`](crate::VoteGraph::insert).
///
/// A live round inserts single votes as they arrive; composing a graph out
/// of an imported round state inserts whole accumulated weights.
pub enum VoteInput<W: VoteWeight> {
  /// One raw vote.
  Single(W::Vote),
  /// An already accumulated weight, merged in wholesale.
  Merged(W),
}

/// A single validator's vote together with its voting power.
///
/// Validation and signature checking happen upstream; by the time a vote
/// reaches the graph it is just an identity and a stake amount.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
  /// The validator casting the vote.
  pub voter: Pubkey,

  /// The stake backing it.
  pub stake: u64,
}

impl Vote {
  pub fn new(voter: Pubkey, stake: u64) -> Self {
    Self { voter, stake }
  }
}

impl std::fmt::Debug for Vote {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Vote")
      .field("voter", &self.voter.to_string())
      .field("stake", &self.stake)
      .finish()
  }
}

/// Accumulated stake, tracked per voter.
///
/// A validator voting twice inside the same subtree must not count twice,
/// so the weight remembers who already contributed: the first recorded
/// stake for a voter wins and later sightings of the same voter are
/// ignored. This makes `add_weight` idempotent over shared voters, which
/// is exactly what merging two overlapping subtree tallies needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeWeight {
  votes: BTreeMap<Pubkey, u64>,
}

impl StakeWeight {
  pub fn new() -> Self {
    Self::default()
  }

  /// Total stake of all distinct voters seen so far.
  pub fn total(&self) -> u64 {
    self.votes.values().sum()
  }

  /// The distinct voters that contributed to this weight.
  pub fn voters(&self) -> impl Iterator<Item = &Pubkey> {
    self.votes.keys()
  }
}

impl VoteWeight for StakeWeight {
  type Vote = Vote;

  fn add_weight(&mut self, other: &Self) {
    for (voter, stake) in &other.votes {
      self.votes.entry(voter.clone()).or_insert(*stake);
    }
  }

  fn add_vote(&mut self, vote: &Vote) {
    self.votes.entry(vote.voter.clone()).or_insert(vote.stake);
  }
}

/// Plain tallied weight with no notion of voter identity.
///
/// Useful when deduplication is handled before votes reach the graph, and
/// throughout the test suite where raw numbers keep scenarios readable.
impl VoteWeight for u64 {
  type Vote = u64;

  fn add_weight(&mut self, other: &Self) {
    *self += *other;
  }

  fn add_vote(&mut self, vote: &u64) {
    *self += *vote;
  }
}

#[cfg(test)]
mod tests {
  use {
    super::{StakeWeight, Vote, VoteInput, VoteWeight},
    crate::{graph::VoteGraph, primitives::Pubkey, test::DummyChain},
    multihash::{Code, MultihashDigest},
  };

  fn voter(tag: u8) -> Pubkey {
    [tag; 32].into()
  }

  #[test]
  fn duplicate_votes_count_once() {
    let mut weight = StakeWeight::new();
    weight.add_vote(&Vote::new(voter(1), 10));
    weight.add_vote(&Vote::new(voter(1), 10));
    weight.add_vote(&Vote::new(voter(2), 5));

    assert_eq!(weight.total(), 15);
    assert_eq!(weight.voters().count(), 2);
  }

  #[test]
  fn merging_overlapping_weights_does_not_double_count() {
    let mut left = StakeWeight::new();
    left.add_vote(&Vote::new(voter(1), 10));
    left.add_vote(&Vote::new(voter(2), 5));

    let mut right = StakeWeight::new();
    right.add_vote(&Vote::new(voter(2), 5));
    right.add_vote(&Vote::new(voter(3), 7));

    left.add_weight(&right);
    assert_eq!(left.total(), 22);
  }

  #[test]
  fn vote_serde_round_trip() {
    let vote = Vote::new(voter(9), 42);
    let json = serde_json::to_string(&vote).unwrap();
    assert_eq!(serde_json::from_str::<Vote>(&json).unwrap(), vote);
  }

  #[test]
  fn stake_threshold_voting_over_hashed_blocks() {
    let hashed = |label: &str| Code::Sha3_256.digest(label.as_bytes());

    let genesis = hashed("genesis");
    let a = hashed("A");
    let b1 = hashed("B1");
    let b2 = hashed("B2");

    let mut chain = DummyChain::new(genesis, 0);
    chain.push_blocks(&genesis, &[a, b1]);
    chain.push_blocks(&a, &[b2]);

    let mut graph =
      VoteGraph::new(genesis, 0, StakeWeight::new(), StakeWeight::new());
    let threshold = |w: &StakeWeight| w.total() >= 3;

    graph
      .insert(b1, 2, VoteInput::Single(Vote::new(voter(1), 1)), &chain)
      .unwrap();
    graph
      .insert(b2, 2, VoteInput::Single(Vote::new(voter(2), 1)), &chain)
      .unwrap();
    assert_eq!(graph.find_ghost(None, threshold), None);

    // two voters on one branch, one on the other: only the common
    // ancestor clears the threshold
    graph
      .insert(b1, 2, VoteInput::Single(Vote::new(voter(3), 1)), &chain)
      .unwrap();
    assert_eq!(graph.find_ghost(None, threshold), Some((a, 1)));

    // a repeated voter changes nothing
    graph
      .insert(b1, 2, VoteInput::Single(Vote::new(voter(1), 1)), &chain)
      .unwrap();
    assert_eq!(graph.find_ghost(None, threshold), Some((a, 1)));

    // a fourth distinct voter tips the branch itself over the threshold
    graph
      .insert(b1, 2, VoteInput::Single(Vote::new(voter(4), 1)), &chain)
      .unwrap();
    assert_eq!(graph.find_ghost(None, threshold), Some((b1, 2)));
  }

  #[test]
  fn stake_weight_serde_round_trip() {
    let mut weight = StakeWeight::new();
    weight.add_vote(&Vote::new(voter(1), 10));
    weight.add_vote(&Vote::new(voter(2), 5));

    let json = serde_json::to_string(&weight).unwrap();
    assert_eq!(serde_json::from_str::<StakeWeight>(&json).unwrap(), weight);
  }
}
