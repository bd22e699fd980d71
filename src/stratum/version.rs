use super::*;

/// Block version as it appears in `mining.notify`: eight hex digits,
/// big-endian value. Stored as the raw consensus u32; the header serializes
/// it little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeFromStr, SerializeDisplay)]
pub struct Version(u32);

impl Version {
    pub fn to_consensus(self) -> u32 {
        self.0
    }
}

impl FromStr for Version {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let version = u32::from_str_radix(s, 16).map_err(|e| InternalError::Parse {
            message: format!("invalid version hex string '{s}': {e}"),
        })?;
        Ok(Version(version))
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl From<u32> for Version {
    fn from(version: u32) -> Version {
        Version(version)
    }
}
