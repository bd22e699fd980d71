use super::*;

/// Pool share difficulty: a positive, finite float. Sub-unity values are
/// routine on solo pools serving low-power miners, so the wire form may be
/// an integer or a float.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Difficulty(f64);

impl Difficulty {
    pub fn new(difficulty: f64) -> Result<Self, InternalError> {
        if !difficulty.is_finite() || difficulty <= 0.0 {
            return Err(InternalError::InvalidValue {
                reason: format!("difficulty must be finite and > 0, got {difficulty}"),
            });
        }
        Ok(Self(difficulty))
    }

    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Self(1.0)
    }
}

impl Serialize for Difficulty {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0 >= 1.0 && self.0.fract() == 0.0 && self.0 <= u64::MAX as f64 {
            serializer.serialize_u64(self.0 as u64)
        } else {
            serializer.serialize_f64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Difficulty {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Int(u64),
            Float(f64),
        }

        let value = match Wire::deserialize(deserializer)? {
            Wire::Int(n) => n as f64,
            Wire::Float(x) => x,
        };

        Difficulty::new(value).map_err(|e| de::Error::custom(e.to_string()))
    }
}

impl Display for Difficulty {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.0 >= 1.0 && self.0.fract() == 0.0 {
            write!(f, "{}", self.0 as u64)
        } else {
            let s = format!("{:.8}", self.0);
            f.write_str(s.trim_end_matches('0').trim_end_matches('.'))
        }
    }
}

impl FromStr for Difficulty {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().parse::<f64>().map_err(|e| InternalError::Parse {
            message: format!("difficulty must be a number: {e}"),
        })?;
        Difficulty::new(value)
    }
}
