use super::*;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Extranonce(Vec<u8>);

impl Extranonce {
    pub fn random(size: usize) -> Self {
        let mut bytes = vec![0u8; size];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn zeros(size: usize) -> Self {
        Self(vec![0u8; size])
    }

    /// Encodes an integer big-endian into `size` bytes, truncating to the
    /// low `size` bytes; the hex form is always `2 * size` digits.
    pub fn from_value(value: u64, size: usize) -> Self {
        let mut bytes = vec![0u8; size];
        let be = value.to_be_bytes();
        let take = size.min(8);
        bytes[size - take..].copy_from_slice(&be[8 - take..]);
        Self(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, InternalError> {
        let bytes = hex::decode(s).map_err(|source| InternalError::HexParse { source })?;
        Ok(Self(bytes))
    }
}

impl Serialize for Extranonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Extranonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(|e| de::Error::custom(e.to_string()))
    }
}

impl Display for Extranonce {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Extranonce {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
