use {
  serde::{
    de::{self, Visitor},
    Deserialize,
    Deserializer,
    Serialize,
  },
  std::{
    fmt::{Debug, Display, Formatter},
    ops::Deref,
    str::FromStr,
  },
};

/// Identity of a voting validator.
///
/// The graph layer never checks signatures; it only needs a stable,
/// orderable identifier to tell voters apart when tallying stake. Keys are
/// rendered in base58 everywhere a human might read them.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pubkey([u8; 32]);

impl Deref for Pubkey {
  type Target = [u8];

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl Display for Pubkey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", bs58::encode(self.0).into_string())
  }
}

impl Debug for Pubkey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "Pubkey({})", bs58::encode(self.0).into_string())
  }
}

impl From<[u8; 32]> for Pubkey {
  fn from(bytes: [u8; 32]) -> Self {
    Self(bytes)
  }
}

impl From<Pubkey> for String {
  fn from(pk: Pubkey) -> Self {
    bs58::encode(pk.0).into_string()
  }
}

impl FromStr for Pubkey {
  type Err = bs58::decode::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut bytes = [0u8; 32];
    bs58::decode(s).into(&mut bytes)?;
    Ok(Self(bytes))
  }
}

/// Deserialize a pubkey from either a user-friendly base58
/// representation or a machine-friendly byte array.
impl<'de> Deserialize<'de> for Pubkey {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    struct StringOrArray;

    impl<'de> Visitor<'de> for StringOrArray {
      type Value = Pubkey;

      fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("base58 string or byte array")
      }

      fn visit_str<E>(self, value: &str) -> Result<Pubkey, E>
      where
        E: de::Error,
      {
        FromStr::from_str(value)
          .map_err(|e| de::Error::custom(format!("{e:?}")))
      }

      fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
      where
        A: de::SeqAccess<'de>,
      {
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
          *byte = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(i, &self))?;
        }
        Ok(Pubkey(bytes))
      }
    }

    deserializer.deserialize_any(StringOrArray)
  }
}

impl Serialize for Pubkey {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&bs58::encode(self.0).into_string())
  }
}
