mod keys;

pub use keys::Pubkey;
