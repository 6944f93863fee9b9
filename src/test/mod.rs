//! Shared fixtures for the in-crate test suite.

use {
  crate::chain::{Chain, Error},
  std::{collections::HashMap, hash::Hash},
};

pub const GENESIS_HASH: &str = "genesis";

struct BlockRecord<H> {
  number: u64,
  parent: Option<H>,
}

/// An in-memory block tree standing in for the caller's view of the chain.
///
/// The graph only ever talks to the chain through ancestry queries, so a
/// hash map of parent links is all a test needs to simulate arbitrary
/// forks.
pub struct DummyChain<H> {
  blocks: HashMap<H, BlockRecord<H>>,
}

impl<H: Eq + Hash + Clone> DummyChain<H> {
  pub fn new(genesis: H, number: u64) -> Self {
    let mut blocks = HashMap::new();
    blocks.insert(genesis, BlockRecord {
      number,
      parent: None,
    });

    Self { blocks }
  }

  /// Appends a linear run of blocks on top of `parent`.
  pub fn push_blocks(&mut self, parent: &H, blocks: &[H]) {
    let mut number =
      self.blocks.get(parent).expect("unknown parent block").number + 1;
    let mut parent = parent.clone();

    for block in blocks {
      self.blocks.insert(block.clone(), BlockRecord {
        number,
        parent: Some(parent),
      });

      parent = block.clone();
      number += 1;
    }
  }

  pub fn number(&self, block: &H) -> u64 {
    self.blocks.get(block).expect("unknown block").number
  }
}

impl<H: Eq + Hash + Clone> Chain<H> for DummyChain<H> {
  fn ancestry(&self, base: H, block: H) -> Result<Vec<H>, Error> {
    let mut ancestry = Vec::new();
    let mut current = block;

    loop {
      let record = self.blocks.get(&current).ok_or(Error::NotDescendant)?;
      match &record.parent {
        // walked off the tree without meeting the base
        None => return Err(Error::NotDescendant),
        Some(parent) => {
          if *parent == base {
            return Ok(ancestry);
          }
          ancestry.push(parent.clone());
          current = parent.clone();
        }
      }
    }
  }
}

/// Routes graph tracing to the test output, filtered by `RUST_LOG`.
pub fn init_logging() {
  use tracing_subscriber::EnvFilter;

  let _ = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}
