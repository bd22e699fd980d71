use super::*;

/// Wire form is exactly eight lowercase hex digits of the value, big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeFromStr, SerializeDisplay)]
pub struct Nonce(u32);

impl FromStr for Nonce {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let nonce = u32::from_str_radix(s, 16).map_err(|e| InternalError::Parse {
            message: format!("invalid nonce hex string '{s}': {e}"),
        })?;
        Ok(Nonce(nonce))
    }
}

impl Display for Nonce {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl From<Nonce> for u32 {
    fn from(nonce: Nonce) -> u32 {
        nonce.0
    }
}

impl From<u32> for Nonce {
    fn from(nonce: u32) -> Nonce {
        Nonce(nonce)
    }
}
