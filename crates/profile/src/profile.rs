use autobackup_common::ProfileId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A profile document.
///
/// Only `info.id` is interpreted; every other field is carried verbatim so a
/// snapshot is a faithful copy of whatever the host keeps in the profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub info: ProfileInfo,
    #[serde(flatten)]
    pub state: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileInfo {
    /// Identity assigned at creation. Never changes.
    pub id: ProfileId,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Profile {
    /// Create a profile with the given identity and no other state.
    pub fn new(id: impl Into<ProfileId>) -> Self {
        Self {
            info: ProfileInfo {
                id: id.into(),
                extra: Map::new(),
            },
            state: Map::new(),
        }
    }

    pub fn id(&self) -> &ProfileId {
        &self.info.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_fields_survive_roundtrip() {
        let raw = json!({
            "info": { "id": "abc", "username": "pmc", "wipe": false },
            "characters": { "pmc": { "Level": 12 } },
            "suits": ["a", "b"]
        });
        let profile: Profile = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(profile.id().as_str(), "abc");
        assert_eq!(profile.info.extra["username"], json!("pmc"));
        assert_eq!(serde_json::to_value(&profile).unwrap(), raw);
    }

    #[test]
    fn missing_identity_is_rejected() {
        let raw = json!({ "info": { "username": "pmc" } });
        assert!(serde_json::from_value::<Profile>(raw).is_err());
    }
}
