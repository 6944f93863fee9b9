use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
  #[error("Block is not a descendant of the graph base")]
  NotDescendant,
}

/// Ancestry oracle backed by the caller's view of the block tree.
///
/// The graph never walks blocks on its own; whenever it needs the chain
/// between its base and a newly voted block it asks this trait. The oracle
/// is trusted: a response is taken as the canonical ancestry of the block
/// at the time of insertion.
pub trait Chain<H> {
  /// Returns the hashes of all blocks from the parent of `block` walking
  /// backwards up to, but not including, `base`.
  ///
  /// Fails with [`Error::NotDescendant`] when `block` does not descend
  /// from `base` or is unknown altogether.
  fn ancestry(&self, base: H, block: H) -> Result<Vec<H>, Error>;
}
