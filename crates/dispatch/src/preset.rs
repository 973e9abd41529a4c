use crate::Schema;
use serde::Deserialize;
use serde::Serialize;

/// Preset summary as shown to clients in room info and preset polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A validated preset: summary plus the simplified dispatch schema a
/// session will walk.
#[derive(Clone)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schema: Schema,
}

impl std::fmt::Debug for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preset")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl Preset {
    pub fn info(&self) -> PresetInfo {
        PresetInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}
