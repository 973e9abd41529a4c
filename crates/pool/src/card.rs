use dd_core::CardCode;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;

/// Card metadata as read from the external card database. The core never
/// writes these; it only derives tag sets to evaluate unlock predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardInfo {
    pub code: CardCode,
    pub name: String,
    /// Category tags such as MONSTER/SPELL/TRAP/LINK/XYZ.
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub attack: i32,
    #[serde(default)]
    pub defense: i32,
    #[serde(default)]
    pub attribute: String,
    #[serde(default)]
    pub race: String,
}

impl CardInfo {
    /// Lowercased tag set for predicate evaluation: category types plus
    /// attribute and race.
    pub fn tags(&self) -> Vec<String> {
        self.types
            .iter()
            .map(String::as_str)
            .chain([self.attribute.as_str(), self.race.as_str()])
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
            .collect()
    }
}

/// Read-only lookup into the external card database.
pub trait CardLookup: Send + Sync {
    fn card(&self, code: CardCode) -> Option<CardInfo>;
}

impl CardLookup for HashMap<CardCode, CardInfo> {
    fn card(&self, code: CardCode) -> Option<CardInfo> {
        self.get(&code).cloned()
    }
}
