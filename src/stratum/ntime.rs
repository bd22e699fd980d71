use super::*;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, DeserializeFromStr, SerializeDisplay,
)]
pub struct Ntime(u32);

impl FromStr for Ntime {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let time = u32::from_str_radix(s, 16).map_err(|e| InternalError::Parse {
            message: format!("invalid ntime hex string '{s}': {e}"),
        })?;
        Ok(Ntime(time))
    }
}

impl Display for Ntime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl From<Ntime> for u32 {
    fn from(ntime: Ntime) -> u32 {
        ntime.0
    }
}

impl From<u32> for Ntime {
    fn from(ntime: u32) -> Ntime {
        Ntime(ntime)
    }
}
