//! The vote-graph: a compressed view of every chain that received votes
//! since the round's base block.
//!
//! Only blocks that were voted on directly (or materialized by splitting an
//! edge between two of them) become nodes. Each node stores the hashes of
//! the skipped blocks back to its parent node, and the accumulated weight
//! of its whole subtree. That makes the two round queries cheap: GHOST
//! walks down the heavy child, ancestor search walks up one edge.

use {
  crate::{
    chain::{Chain, Error},
    weights::{VoteInput, VoteWeight},
  },
  std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
  },
  tracing::{debug, trace, warn},
};

/// Answer to an ancestry probe against a node's compressed edge.
#[derive(Debug, Clone, Copy)]
enum EdgeAncestry {
  /// The block lies on this node's edge.
  Contains,
  /// The edge covers that height with a different block.
  Diverges,
  /// The edge does not reach back that far; the answer lies
  /// deeper in the graph.
  Unknown,
}

#[derive(Debug)]
struct Entry<H, W> {
  number: u64,

  /// Ancestor block hashes in reverse height order: `ancestors[0]` is the
  /// immediate parent block and the last element is the hash of the parent
  /// vote-node. Empty for the base.
  ancestors: Vec<H>,

  /// Child vote-nodes.
  descendants: Vec<H>,

  /// Weight of this node's entire subtree.
  cumulative_vote: W,
}

impl<H: Eq + Clone, W> Entry<H, W> {
  /// Whether the given block is a direct ancestor of this node, i.e. lies
  /// on the compressed edge between this node and its parent node.
  fn in_direct_ancestry(&self, hash: &H, number: u64) -> EdgeAncestry {
    match self.ancestor_block(number) {
      Some(h) if h == hash => EdgeAncestry::Contains,
      Some(_) => EdgeAncestry::Diverges,
      None => EdgeAncestry::Unknown,
    }
  }

  fn contains_in_edge(&self, hash: &H, number: u64) -> bool {
    matches!(self.in_direct_ancestry(hash, number), EdgeAncestry::Contains)
  }

  /// The hash at the given height on this node's edge, if the edge covers
  /// that height.
  fn ancestor_block(&self, number: u64) -> Option<&H> {
    if number >= self.number {
      return None;
    }
    let offset = (self.number - number - 1) as usize;
    self.ancestors.get(offset)
  }

  /// The parent vote-node, absent for the base.
  fn ancestor_node(&self) -> Option<H> {
    self.ancestors.last().cloned()
  }
}

/// A run of blocks by hash, lowest first.
struct Subchain<H> {
  hashes: Vec<H>,
  best_number: u64,
}

impl<H: Clone> Subchain<H> {
  fn best(&self) -> Option<(H, u64)> {
    self.hashes.last().map(|x| (x.clone(), self.best_number))
  }
}

/// Tracks the weighted votes cast on a tree of blocks and answers the two
/// queries a finality round asks: the heaviest observed subtree above a
/// threshold, and the highest block on a chain whose subtree weight meets
/// the threshold.
///
/// The graph is owned by a single round and mutated only through
/// [`insert`](VoteGraph::insert) and [`adjust_base`](VoteGraph::adjust_base).
pub struct VoteGraph<H: Ord, W> {
  entries: BTreeMap<H, Entry<H, W>>,
  heads: BTreeSet<H>,
  base: H,
  base_number: u64,

  /// Zero-weight prototype cloned for every freshly created node.
  empty_weight: W,
}

impl<H, W> VoteGraph<H, W>
where
  H: Eq + Ord + Clone + Debug,
  W: VoteWeight,
{
  /// Creates a graph rooted at the given block.
  ///
  /// `base_weight` seeds the base's cumulative vote; it is a fresh zero in
  /// normal operation and non-zero only when composing a graph out of an
  /// imported round state. `empty_weight` is the zero value cloned for
  /// every node created later.
  pub fn new(
    base_hash: H,
    base_number: u64,
    base_weight: W,
    empty_weight: W,
  ) -> Self {
    let mut entries = BTreeMap::new();
    entries.insert(base_hash.clone(), Entry {
      number: base_number,
      ancestors: Vec::new(),
      descendants: Vec::new(),
      cumulative_vote: base_weight,
    });

    let mut heads = BTreeSet::new();
    heads.insert(base_hash.clone());

    Self {
      entries,
      heads,
      base: base_hash,
      base_number,
      empty_weight,
    }
  }

  /// The current base block of the graph.
  pub fn base(&self) -> (H, u64) {
    (self.base.clone(), self.base_number)
  }

  /// Inserts a vote for the given block and propagates its weight to every
  /// ancestor node up to the base.
  ///
  /// The chain oracle is consulted only when the block is new to the graph,
  /// and before any mutation, so a failed lookup leaves the graph exactly
  /// as it was.
  pub fn insert<C: Chain<H>>(
    &mut self,
    hash: H,
    number: u64,
    vote: VoteInput<W>,
    chain: &C,
  ) -> Result<(), Error> {
    match self.find_containing_nodes(hash.clone(), number) {
      Some(containing) => {
        if containing.is_empty() {
          self.append(hash.clone(), number, chain)?;
        } else {
          self.introduce_branch(containing, hash.clone(), number);
        }
      }
      None => {} // already a vote-node
    }

    // At this point a node with the given hash is guaranteed to exist, so
    // walk upward merging the vote into every subtree it lands in.
    let mut inspecting_hash = hash;
    loop {
      let active_entry = self
        .entries
        .get_mut(&inspecting_hash)
        .expect("node was just inserted or already present");

      match &vote {
        VoteInput::Single(v) => active_entry.cumulative_vote.add_vote(v),
        VoteInput::Merged(w) => active_entry.cumulative_vote.add_weight(w),
      }

      match active_entry.ancestor_node() {
        Some(parent) => inspecting_hash = parent,
        None => break, // reached the base
      }
    }

    Ok(())
  }

  /// Finds the block with the highest height whose subtree weight satisfies
  /// `condition`, given that weights are monotone down the tree and at most
  /// one child of any block can be heavy enough to satisfy it.
  ///
  /// `current_best` is an optional hint: when it lies inside the graph the
  /// search descends from it instead of the base, and when it sits in the
  /// middle of an edge the descent is constrained to the chain that passes
  /// through it.
  pub fn find_ghost<F>(
    &self,
    current_best: Option<(H, u64)>,
    condition: F,
  ) -> Option<(H, u64)>
  where
    F: Fn(&W) -> bool,
  {
    let entries = &self.entries;
    let get_node = |hash: &H| -> &Entry<H, W> {
      entries
        .get(hash)
        .expect("every stored hash resolves to an entry")
    };

    let (mut node_key, mut force_constrain) = current_best
      .clone()
      .and_then(|(hash, number)| {
        match self.find_containing_nodes(hash.clone(), number) {
          None => Some((hash, false)),
          Some(ref x) if !x.is_empty() => {
            let ancestor = get_node(&x[0]).ancestor_node().expect(
              "a node with a non-empty edge has a parent node",
            );
            Some((ancestor, true))
          }
          Some(_) => None,
        }
      })
      .unwrap_or_else(|| (self.base.clone(), false));

    let mut active_node = get_node(&node_key);

    if !condition(&active_node.cumulative_vote) {
      return None;
    }

    // Descend into the unique descendant that still satisfies the
    // condition, for as long as one exists.
    loop {
      let next_descendant = active_node
        .descendants
        .iter()
        .map(|d| (d.clone(), get_node(d)))
        .filter(|(_, node)| match (force_constrain, current_best.as_ref()) {
          (true, Some((h, n))) => node.contains_in_edge(h, *n),
          _ => true,
        })
        .find(|(_, node)| condition(&node.cumulative_vote));

      match next_descendant {
        Some((key, node)) => {
          // one hop made, the constraint hash is behind us now
          force_constrain = false;
          node_key = key;
          active_node = node;
        }
        None => break,
      }
    }

    // `active_node` is the highest vote-node that satisfies the condition,
    // but the best block may lie on the edges above it: wherever enough of
    // its descendants still share ancestry.
    self
      .ghost_find_merge_point(
        node_key,
        active_node,
        if force_constrain { current_best } else { None },
        condition,
      )
      .best()
  }

  /// Finds the block of highest height less than or equal to the given one,
  /// on the chain ending at `(hash, number)`, whose subtree weight
  /// satisfies `condition`.
  pub fn find_ancestor<F>(
    &self,
    mut hash: H,
    mut number: u64,
    condition: F,
  ) -> Option<(H, u64)>
  where
    F: Fn(&W) -> bool,
  {
    loop {
      let containing = match self.find_containing_nodes(hash.clone(), number) {
        None => {
          // the block is a vote-node, so the weight is stored with it
          let node = self
            .entries
            .get(&hash)
            .expect("already checked that the entry exists");

          if condition(&node.cumulative_vote) {
            return Some((hash, number));
          }

          match node.ancestors.first() {
            Some(parent) => {
              hash = parent.clone();
              number -= 1;
              continue;
            }
            None => return None, // reached the base
          }
        }
        Some(containing) => containing,
      };

      if containing.is_empty() {
        return None; // the block is not part of the graph
      }

      // The block sits on one or more edges; its subtree weight is the
      // combined weight of every node whose edge passes through it.
      let mut cumulative_vote = self.empty_weight.clone();
      for node in &containing {
        let entry = self
          .entries
          .get(node)
          .expect("containing nodes were just looked up");
        cumulative_vote.add_weight(&entry.cumulative_vote);
      }

      if condition(&cumulative_vote) {
        return Some((hash, number));
      }

      // walk one block toward the base, using any containing edge
      let last = containing.last().expect("emptiness checked above");
      let entry = self
        .entries
        .get(last)
        .expect("containing nodes were just looked up");

      match entry.ancestor_block(number - 1) {
        Some(parent) => {
          hash = parent.clone();
          number -= 1;
        }
        None => return None,
      }
    }
  }

  /// Extends the graph downward when finalization reveals that the base
  /// itself sits on a longer ancestry segment.
  ///
  /// `ancestry_proof` is the ancestry of the old base in reverse order from
  /// its parent: the first element is the old base's parent block and the
  /// last element becomes the new base.
  pub fn adjust_base(&mut self, ancestry_proof: &[H]) {
    let new_hash = match ancestry_proof.last() {
      Some(hash) => hash.clone(),
      None => return, // nothing to do
    };

    if ancestry_proof.len() as u64 > self.base_number {
      warn!(
        "ancestry proof of length {} reaches below height zero from base \
         height {}; ignoring",
        ancestry_proof.len(),
        self.base_number
      );
      return;
    }

    let new_number = self.base_number - ancestry_proof.len() as u64;

    let entry = {
      let old_entry = self
        .entries
        .get_mut(&self.base)
        .expect("the base always has an entry");
      old_entry.ancestors.extend(ancestry_proof.iter().cloned());

      // the new base has seen every vote the old base has seen
      Entry {
        number: new_number,
        ancestors: Vec::new(),
        descendants: vec![self.base.clone()],
        cumulative_vote: old_entry.cumulative_vote.clone(),
      }
    };

    debug!(
      "graph base moved from {:?} to {:?} at height {}",
      self.base, new_hash, new_number
    );

    self.entries.insert(new_hash.clone(), entry);
    self.base = new_hash;
    self.base_number = new_number;
  }

  // Given a node that satisfies the condition, finds the highest block at
  // which its descendants' edges still merge into enough weight, which may
  // be the node's own block.
  fn ghost_find_merge_point<'a, F>(
    &'a self,
    node_key: H,
    active_node: &'a Entry<H, W>,
    force_constrain: Option<(H, u64)>,
    condition: F,
  ) -> Subchain<H>
  where
    F: Fn(&W) -> bool,
  {
    let mut descendant_nodes: Vec<_> = active_node
      .descendants
      .iter()
      .map(|h| {
        self
          .entries
          .get(h)
          .expect("child nodes are always stored")
      })
      .filter(|n| match force_constrain.as_ref() {
        Some((h, num)) => n.contains_in_edge(h, *num),
        None => true,
      })
      .collect();

    let base_number = active_node.number;
    let mut best_number = active_node.number;
    let mut descendant_blocks = Vec::with_capacity(descendant_nodes.len());
    let mut hashes = vec![node_key];

    // Walk up block by block, tallying which hash each descendant edge
    // passes through at that height. The tally is kept sorted by hash so
    // lookups stay cheap and iteration order never influences the result.
    for offset in 1u64.. {
      let mut new_best = None;
      for d_node in descendant_nodes.iter() {
        if let Some(d_block) = d_node.ancestor_block(base_number + offset) {
          match descendant_blocks
            .binary_search_by_key(&d_block, |&(ref x, _): &(H, W)| x)
          {
            Ok(idx) => {
              descendant_blocks[idx].1.add_weight(&d_node.cumulative_vote);
              if condition(&descendant_blocks[idx].1) {
                new_best = Some(d_block.clone());
                break;
              }
            }
            Err(idx) => descendant_blocks.insert(
              idx,
              (d_block.clone(), d_node.cumulative_vote.clone()),
            ),
          }
        }
      }

      match new_best {
        Some(new_best) => {
          best_number += 1;

          descendant_blocks.clear();
          descendant_nodes
            .retain(|n| n.contains_in_edge(&new_best, best_number));

          hashes.push(new_best);
        }
        None => break,
      }
    }

    Subchain {
      hashes,
      best_number,
    }
  }

  // Attempts to find the keys of the nodes whose compressed edge passes
  // through the given block.
  //
  // Returns `None` if there is a node for that block already, and a
  // (possibly empty) list of containing node keys otherwise.
  fn find_containing_nodes(&self, hash: H, number: u64) -> Option<Vec<H>> {
    if self.entries.contains_key(&hash) {
      return None;
    }

    let mut containing_keys = Vec::new();
    let mut visited = BTreeSet::new();

    // iterate the heads and walk their ancestry backwards, stopping every
    // walk at the first node that was already visited from another head
    for mut head in self.heads.iter().cloned() {
      let mut active_entry;

      loop {
        active_entry = match self.entries.get(&head) {
          Some(e) => e,
          None => break,
        };

        if !visited.insert(head.clone()) {
          break;
        }

        match active_entry.in_direct_ancestry(&hash, number) {
          EdgeAncestry::Contains => {
            containing_keys.push(head.clone());
          }
          EdgeAncestry::Diverges => {} // nothing on this branch
          EdgeAncestry::Unknown => {
            if let Some(prev) = active_entry.ancestor_node() {
              head = prev;
              continue; // iterate backwards
            }
          }
        }

        break;
      }
    }

    Some(containing_keys)
  }

  // Introduces a new interior node in the middle of the edges held by the
  // given descendants.
  //
  // Every member of `descendants` must be a vote-node whose edge contains
  // the given block, and no entry for the block may exist yet; violations
  // are programmer errors.
  fn introduce_branch(
    &mut self,
    descendants: Vec<H>,
    ancestor_hash: H,
    ancestor_number: u64,
  ) {
    debug!(
      "introducing interior vote-node {:?} at height {} below {} nodes",
      ancestor_hash,
      ancestor_number,
      descendants.len()
    );

    let produced_entry =
      descendants.into_iter().fold(None, |mut maybe_entry, descendant| {
        let entry = self
          .entries
          .get_mut(&descendant)
          .expect("callers pass keys of existing nodes");

        debug_assert!(
          entry.contains_in_edge(&ancestor_hash, ancestor_number),
          "{descendant:?} does not contain the split block in its edge"
        );

        // A node at height 7 with a parent node at height 3 keeps the
        // hashes at heights 6 and 5 when split at height 5; the new
        // interior node takes over the rest of the edge. The lower half is
        // drained off even when the interior entry was already built for
        // an earlier descendant.
        {
          let offset = (entry
            .number
            .checked_sub(ancestor_number)
            .expect("the split point is below every descendant"))
            as usize;
          let prev_ancestor = entry.ancestor_node();
          let empty_weight = self.empty_weight.clone();
          let new_ancestors = entry.ancestors.drain(offset..);

          let (new_entry, _) = maybe_entry.get_or_insert_with(move || {
            let new_entry = Entry {
              number: ancestor_number,
              ancestors: new_ancestors.collect(),
              descendants: vec![],
              cumulative_vote: empty_weight,
            };

            (new_entry, prev_ancestor)
          });

          new_entry.descendants.push(descendant);
          new_entry.cumulative_vote.add_weight(&entry.cumulative_vote);
        }

        maybe_entry
      });

    if let Some((new_entry, prev_ancestor)) = produced_entry {
      if let Some(prev_ancestor) = prev_ancestor {
        let prev_ancestor_node = self
          .entries
          .get_mut(&prev_ancestor)
          .expect("the previous parent is still a node");

        prev_ancestor_node
          .descendants
          .retain(|h| !new_entry.descendants.contains(h));
        prev_ancestor_node.descendants.push(ancestor_hash.clone());
      }

      assert!(
        self.entries.insert(ancestor_hash, new_entry).is_none(),
        "no entry exists for the split block yet",
      )
    }
  }

  // Appends a new leaf node. This should only be called when no node in
  // the graph keeps the block on an edge.
  fn append<C: Chain<H>>(
    &mut self,
    hash: H,
    number: u64,
    chain: &C,
  ) -> Result<(), Error> {
    let mut ancestry = chain.ancestry(self.base.clone(), hash.clone())?;
    ancestry.push(self.base.clone());

    let mut ancestor_index = None;
    for (i, ancestor) in ancestry.iter().enumerate() {
      if let Some(entry) = self.entries.get_mut(ancestor) {
        entry.descendants.push(hash.clone());
        ancestor_index = Some(i);
        break;
      }
    }

    let ancestor_index = ancestor_index
      .expect("the appended ancestry always ends at the base entry");

    let ancestor_hash = ancestry[ancestor_index].clone();
    ancestry.truncate(ancestor_index + 1);

    trace!(
      "appending vote-node {:?} at height {} under {:?}",
      hash,
      number,
      ancestor_hash
    );

    self.entries.insert(hash.clone(), Entry {
      number,
      ancestors: ancestry,
      descendants: Vec::new(),
      cumulative_vote: self.empty_weight.clone(),
    });

    self.heads.remove(&ancestor_hash);
    self.heads.insert(hash);

    Ok(())
  }
}
