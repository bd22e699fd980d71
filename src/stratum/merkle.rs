use super::*;

/// A merkle branch from `mining.notify`. Branches arrive and are folded in
/// exactly the byte order the pool sends; no reversal at any step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeFromStr, SerializeDisplay)]
pub struct MerkleNode([u8; 32]);

impl MerkleNode {
    pub fn as_byte_array(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_byte_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl FromStr for MerkleNode {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(InternalError::InvalidLength {
                expected: 64,
                actual: s.len(),
            });
        }

        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|source| InternalError::HexParse { source })?;
        Ok(MerkleNode(bytes))
    }
}

impl Display for MerkleNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
