use super::*;

/// Previous-block hash as `mining.notify` carries it: 64 hex digits whose
/// 4-byte words are each reversed relative to header byte order. The swap is
/// applied once, at job-build time, via [`PrevHash::to_header_bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeFromStr, SerializeDisplay)]
pub struct PrevHash([u8; 32]);

impl PrevHash {
    pub fn as_wire_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Word-wise byte swap into the order the 80-byte header hashes over.
    pub fn to_header_bytes(self) -> [u8; 32] {
        let mut bytes = self.0;
        for word in bytes.chunks_exact_mut(4) {
            word.reverse();
        }
        bytes
    }
}

impl FromStr for PrevHash {
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
        Ok(PrevHash(bytes))
    }
}

impl Display for PrevHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
