use dd_core::CardCode;
use dd_core::DraftError;
use dd_core::ErrorCode;
use dd_dispatch::Preset;
use dd_dispatch::PresetBuilder;
use dd_dispatch::PresetConfig;
use dd_dispatch::PresetInfo;
use dd_gameroom::PresetSource;
use dd_pool::CardInfo;
use dd_pool::CardLookup;
use dd_pool::PoolItem;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// One record of a pool data file: a single card id with its tags.
#[derive(Debug, Deserialize)]
struct PoolRecord {
    id: CardCode,
    #[serde(default)]
    tags: Vec<String>,
}

/// Draftable content loaded once at startup.
///
/// Layout under the content directory:
///   pools/<name>.json    [{id, tags}] records, keyed by file stem
///   cards.json           optional card database, needed by adaptive rounds
///   presets/<id>.json    declarative preset configurations
///
/// Every preset is resolved and validated here, so a malformed pattern or
/// an undersized pool kills the server at boot instead of a session later.
pub struct ContentStore {
    presets: Vec<Preset>,
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("presets", &self.presets.len())
            .finish()
    }
}

impl ContentStore {
    pub fn load(dir: &Path) -> Result<Self, DraftError> {
        let pools = Self::pools(&dir.join("pools"))?;
        let cards = Self::cards(&dir.join("cards.json"))?;
        let presets = Self::presets(&dir.join("presets"), &pools, cards)?;
        log::info!(
            "[store] loaded {} pools and {} presets from {}",
            pools.len(),
            presets.len(),
            dir.display()
        );
        Ok(Self { presets })
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }
    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    fn pools(dir: &Path) -> Result<HashMap<String, Vec<PoolItem>>, DraftError> {
        let mut pools = HashMap::new();
        for path in Self::listing(dir)? {
            let name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| DraftError::config(format!("bad pool file name {:?}", path)))?
                .to_string();
            let records: Vec<PoolRecord> = Self::parse(&path)?;
            let items = records
                .into_iter()
                .map(|record| PoolItem::single(record.id, record.tags).lowercased())
                .collect::<Vec<_>>();
            log::debug!("[store] pool {} holds {} items", name, items.len());
            pools.insert(name, items);
        }
        match pools.is_empty() {
            true => Err(DraftError::config(format!("no pools under {:?}", dir))),
            false => Ok(pools),
        }
    }

    fn cards(path: &Path) -> Result<Option<Arc<dyn CardLookup>>, DraftError> {
        if !path.exists() {
            return Ok(None);
        }
        let cards: Vec<CardInfo> = Self::parse(path)?;
        let lookup = cards
            .into_iter()
            .map(|card| (card.code, card))
            .collect::<HashMap<_, _>>();
        log::debug!("[store] card database holds {} entries", lookup.len());
        Ok(Some(Arc::new(lookup)))
    }

    fn presets(
        dir: &Path,
        pools: &HashMap<String, Vec<PoolItem>>,
        cards: Option<Arc<dyn CardLookup>>,
    ) -> Result<Vec<Preset>, DraftError> {
        let builder = PresetBuilder::new(pools, cards);
        let mut presets = Vec::new();
        for path in Self::listing(dir)? {
            let config: PresetConfig = Self::parse(&path)?;
            let preset = builder
                .build(&config)
                .map_err(|e| DraftError::with(e.code, format!("{:?}: {}", path, e.message)))?;
            if presets.iter().any(|p: &Preset| p.id == preset.id) {
                return Err(DraftError::config(format!("duplicate preset id {}", preset.id)));
            }
            presets.push(preset);
        }
        match presets.is_empty() {
            true => Err(DraftError::config(format!("no presets under {:?}", dir))),
            false => Ok(presets),
        }
    }

    /// Json files directly under a directory, in name order.
    fn listing(dir: &Path) -> Result<Vec<std::path::PathBuf>, DraftError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| DraftError::config(format!("cannot read {:?}: {}", dir, e)))?;
        let mut paths = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect::<Vec<_>>();
        paths.sort();
        Ok(paths)
    }

    fn parse<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, DraftError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DraftError::config(format!("cannot read {:?}: {}", path, e)))?;
        serde_json::from_str(&text)
            .map_err(|e| DraftError::config(format!("malformed {:?}: {}", path, e)))
    }
}

impl PresetSource for ContentStore {
    fn list(&self) -> Vec<PresetInfo> {
        self.presets.iter().map(|preset| preset.info()).collect()
    }
    fn preset(&self, id: &str) -> Option<Preset> {
        self.presets.iter().find(|preset| preset.id == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        dir: std::path::PathBuf,
    }

    impl Fixture {
        fn new(tag: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("dd-store-{}-{}", tag, uuid::Uuid::new_v4()));
            std::fs::create_dir_all(dir.join("pools")).unwrap();
            std::fs::create_dir_all(dir.join("presets")).unwrap();
            Self { dir }
        }
        fn write(&self, rel: &str, body: &str) -> &Self {
            std::fs::write(self.dir.join(rel), body).unwrap();
            self
        }
        fn pool(&self) -> &Self {
            self.write(
                "pools/main.json",
                r#"[
                    {"id": 1, "tags": ["MONSTER"]},
                    {"id": 2, "tags": ["monster"]},
                    {"id": 3, "tags": ["spell"]},
                    {"id": 4, "tags": ["spell"]},
                    {"id": 5, "tags": ["trap"]},
                    {"id": 6, "tags": ["trap"]}
                ]"#,
            )
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    const PRESET: &str = r#"{
        "id": "starter",
        "name": "Starter",
        "uses": [{"pool": "main", "alias": "main"}],
        "patterns": [{
            "mode": "sealed",
            "minpicks": 1,
            "maxpicks": 1,
            "segments": [{
                "candidates": [{
                    "rate": 1,
                    "parts": [{"n": 1, "filter": "monster"}]
                }]
            }]
        }]
    }"#;

    #[test]
    fn loads_pools_and_presets_with_lowercased_tags() {
        let fixture = Fixture::new("ok");
        fixture.pool().write("presets/starter.json", PRESET);
        let store = ContentStore::load(&fixture.dir).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.list()[0].id, "starter");
        assert!(store.preset("starter").is_some());
        assert!(store.preset("absent").is_none());
    }

    #[test]
    fn preset_against_a_missing_pool_is_a_config_error() {
        let fixture = Fixture::new("nopool");
        fixture.pool().write(
            "presets/broken.json",
            &PRESET.replace(r#""pool": "main""#, r#""pool": "ghost""#),
        );
        let error = ContentStore::load(&fixture.dir).unwrap_err();
        assert_eq!(error.code, ErrorCode::Config);
    }

    #[test]
    fn duplicate_preset_ids_are_rejected() {
        let fixture = Fixture::new("dupe");
        fixture
            .pool()
            .write("presets/a.json", PRESET)
            .write("presets/b.json", PRESET);
        let error = ContentStore::load(&fixture.dir).unwrap_err();
        assert_eq!(error.code, ErrorCode::Config);
        assert!(error.message.contains("duplicate"));
    }

    #[test]
    fn empty_content_directories_are_fatal() {
        let fixture = Fixture::new("empty");
        fixture.pool();
        let error = ContentStore::load(&fixture.dir).unwrap_err();
        assert_eq!(error.code, ErrorCode::Config);
    }
}
