use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeFromStr, SerializeDisplay)]
pub struct Nbits(u32);

impl Nbits {
    pub fn to_target(self) -> Target {
        Target::from_nbits(self.0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl FromStr for Nbits {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 8 {
            return Err(InternalError::InvalidLength {
                expected: 8,
                actual: s.len(),
            });
        }

        let bits = u32::from_str_radix(s, 16).map_err(|e| InternalError::Parse {
            message: format!("invalid nbits hex string '{s}': {e}"),
        })?;

        Ok(Nbits(bits))
    }
}

impl Display for Nbits {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl From<u32> for Nbits {
    fn from(bits: u32) -> Nbits {
        Nbits(bits)
    }
}
