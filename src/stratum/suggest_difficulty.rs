use super::*;

/// Fire-and-forget: no pool is obliged to answer, which also makes this the
/// cheapest possible keepalive probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuggestDifficulty(pub Difficulty);

impl Serialize for SuggestDifficulty {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(1))?;
        seq.serialize_element(&self.0)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for SuggestDifficulty {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (difficulty,): (Difficulty,) = Deserialize::deserialize(deserializer)?;
        Ok(SuggestDifficulty(difficulty))
    }
}
