use super::*;

#[derive(Debug, PartialEq)]
pub struct Authorize {
    pub username: String,
    pub password: String,
}

impl Serialize for Authorize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&self.username)?;
        seq.serialize_element(&self.password)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Authorize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One((String,)),
            Two((String, Option<String>)),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::One((username,)) => Authorize {
                username,
                password: "x".into(),
            },
            Raw::Two((username, password)) => Authorize {
                username,
                password: password.unwrap_or_else(|| "x".into()),
            },
        })
    }
}
