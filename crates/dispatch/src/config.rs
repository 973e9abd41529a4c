use crate::Adaptive;
use crate::AdaptiveComposition;
use crate::AdaptivePart;
use crate::AdaptiveSegment;
use crate::Composed;
use crate::Composition;
use crate::Dispatcher;
use crate::Mode;
use crate::Part;
use crate::Preset;
use crate::Schema;
use crate::Segment;
use crate::UnlockRule;
use dd_core::DraftError;
use dd_core::Rate;
use dd_pool::Bundle;
use dd_pool::CardLookup;
use dd_pool::DealConfig;
use dd_pool::Pool;
use dd_pool::PoolItem;
use dd_pool::TagFilter;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Declarative preset description, loaded from configuration and resolved
/// into a validated [`Preset`]. Every malformed shape fails here, before a
/// session can start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub uses: Vec<UsePool>,
    pub patterns: Vec<PatternConfig>,
}

/// Binds a named pool from the store to a local alias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsePool {
    pub pool: String,
    pub alias: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternConfig {
    Seql { seql: Vec<PatternConfig> },
    Fork { fork: Vec<PatternConfig> },
    Deal(Box<DealNode>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealNode {
    #[serde(flatten)]
    pub mode: ModeConfig,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Replicates this round under a fork or seql node.
    #[serde(default)]
    pub repeats: Option<RepeatConfig>,
    #[serde(default)]
    pub uniq: Option<bool>,
    #[serde(default)]
    pub bundle: Option<Bundle>,
    pub segments: Vec<SegmentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ModeConfig {
    Draft { shifts: Vec<usize> },
    Sealed { minpicks: usize, maxpicks: usize },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepeatConfig {
    Fork { fork: usize },
    Seql { seql: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    pub candidates: Vec<CompositionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionConfig {
    pub rate: Rate,
    pub parts: Vec<PartConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartConfig {
    pub n: usize,
    /// Pool alias; defaults to the preset's first use.
    #[serde(default)]
    pub pool: Option<String>,
    pub filter: String,
    #[serde(default)]
    pub uniq: Option<bool>,
    #[serde(default)]
    pub bundle: Option<Bundle>,
    /// Presence of unlock rules (or a fallback filter) makes the whole
    /// round adaptive.
    #[serde(default)]
    pub unlocks: Vec<UnlockConfig>,
    #[serde(default)]
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockConfig {
    pub desc: String,
    pub trigger: String,
    pub grants: String,
}

/// Resolves preset configurations against a named pool store and an
/// optional card database (required for adaptive rounds).
pub struct PresetBuilder<'a> {
    pools: &'a HashMap<String, Vec<PoolItem>>,
    cards: Option<Arc<dyn CardLookup>>,
}

impl<'a> PresetBuilder<'a> {
    pub fn new(
        pools: &'a HashMap<String, Vec<PoolItem>>,
        cards: Option<Arc<dyn CardLookup>>,
    ) -> Self {
        Self { pools, cards }
    }

    pub fn build(&self, config: &PresetConfig) -> Result<Preset, DraftError> {
        let aliases = self.aliases(config)?;
        let default = config
            .uses
            .first()
            .map(|u| u.alias.clone())
            .ok_or_else(|| DraftError::config("preset uses no pools"))?;
        let mut labels = 0usize;
        let children = config
            .patterns
            .iter()
            .map(|p| self.pattern(p, &aliases, &default, &mut labels))
            .collect::<Result<Vec<_>, _>>()?;
        let schema = Schema::Seql(children)
            .simplify()
            .ok_or_else(|| DraftError::config("preset produces no rounds"))?;
        Ok(Preset {
            id: config.id.clone(),
            name: config.name.clone(),
            description: config.description.clone(),
            schema,
        })
    }

    /// Resolves `uses` into alias → lowercased item lists.
    fn aliases(&self, config: &PresetConfig) -> Result<HashMap<String, Pool>, DraftError> {
        let mut aliases = HashMap::new();
        for along in &config.uses {
            let items = self.pools.get(&along.pool).ok_or_else(|| {
                DraftError::config(format!("unknown pool '{}'", along.pool))
            })?;
            let items: Vec<PoolItem> = items.iter().cloned().map(PoolItem::lowercased).collect();
            if aliases
                .insert(along.alias.clone(), Pool::from_items(items))
                .is_some()
            {
                return Err(DraftError::config(format!(
                    "duplicate alias '{}'",
                    along.alias
                )));
            }
        }
        Ok(aliases)
    }

    fn pattern(
        &self,
        pattern: &PatternConfig,
        aliases: &HashMap<String, Pool>,
        default: &str,
        labels: &mut usize,
    ) -> Result<Schema, DraftError> {
        match pattern {
            PatternConfig::Seql { seql } => Ok(Schema::Seql(
                seql.iter()
                    .map(|p| self.pattern(p, aliases, default, labels))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            PatternConfig::Fork { fork } => Ok(Schema::Fork(
                fork.iter()
                    .map(|p| self.pattern(p, aliases, default, labels))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            PatternConfig::Deal(node) => self.deal(node, aliases, default, labels),
        }
    }

    fn deal(
        &self,
        node: &DealNode,
        aliases: &HashMap<String, Pool>,
        default: &str,
        labels: &mut usize,
    ) -> Result<Schema, DraftError> {
        let count = match node.repeats {
            None => 1,
            Some(RepeatConfig::Fork { fork }) => fork,
            Some(RepeatConfig::Seql { seql }) => seql,
        };
        if count == 0 {
            return Err(DraftError::config("repeats must be positive"));
        }
        let atoms = (0..count)
            .map(|_| {
                let dispatcher = self.atom(node, aliases, default, labels)?;
                Ok(Schema::Atom(dispatcher))
            })
            .collect::<Result<Vec<_>, DraftError>>()?;
        match node.repeats {
            None => Ok(atoms.into_iter().next().expect("count is one")),
            Some(RepeatConfig::Fork { .. }) => Ok(Schema::Fork(atoms)),
            Some(RepeatConfig::Seql { .. }) => Ok(Schema::Seql(atoms)),
        }
    }

    fn atom(
        &self,
        node: &DealNode,
        aliases: &HashMap<String, Pool>,
        default: &str,
        labels: &mut usize,
    ) -> Result<Dispatcher, DraftError> {
        let mode = match &node.mode {
            ModeConfig::Draft { shifts } => Mode::draft(shifts.clone())?,
            ModeConfig::Sealed { minpicks, maxpicks } => Mode::sealed(*minpicks, *maxpicks)?,
        };
        let label = match &node.label {
            Some(label) => label.clone(),
            None => {
                *labels += 1;
                format!("D{}", *labels - 1)
            }
        };
        let adaptive = node
            .segments
            .iter()
            .flat_map(|s| &s.candidates)
            .flat_map(|c| &c.parts)
            .any(|p| !p.unlocks.is_empty() || p.fallback.is_some());
        match adaptive {
            false => {
                let segments = node
                    .segments
                    .iter()
                    .map(|s| self.segment(s, node, aliases, default))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Dispatcher::Composed(Composed::new(
                    mode,
                    label,
                    node.title.clone(),
                    segments,
                )?))
            }
            true => {
                let cards = self
                    .cards
                    .clone()
                    .ok_or_else(|| DraftError::config("adaptive preset without card database"))?;
                let segments = node
                    .segments
                    .iter()
                    .map(|s| self.adaptive_segment(s, node, aliases, default))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Dispatcher::Adaptive(Adaptive::new(
                    mode,
                    label,
                    node.title.clone(),
                    segments,
                    cards,
                )?))
            }
        }
    }

    fn segment(
        &self,
        segment: &SegmentConfig,
        node: &DealNode,
        aliases: &HashMap<String, Pool>,
        default: &str,
    ) -> Result<Segment, DraftError> {
        let candidates = segment
            .candidates
            .iter()
            .map(|c| {
                let parts = c
                    .parts
                    .iter()
                    .map(|p| Part::new(p.n, self.part_pool(p, node, aliases, default)?))
                    .collect::<Result<Vec<_>, _>>()?;
                Composition::new(c.rate, parts)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Segment::new(candidates)
    }

    fn adaptive_segment(
        &self,
        segment: &SegmentConfig,
        node: &DealNode,
        aliases: &HashMap<String, Pool>,
        default: &str,
    ) -> Result<AdaptiveSegment, DraftError> {
        let candidates = segment
            .candidates
            .iter()
            .map(|c| {
                let parts = c
                    .parts
                    .iter()
                    .map(|p| {
                        let base = self.part_pool(p, node, aliases, default)?;
                        let fallback = p
                            .fallback
                            .as_ref()
                            .map(|f| {
                                let filter = parse_filter(f)?;
                                Ok::<_, DraftError>(
                                    self.alias(p, aliases, default)?.select(&filter),
                                )
                            })
                            .transpose()?;
                        let rules = p
                            .unlocks
                            .iter()
                            .map(|u| {
                                Ok(UnlockRule {
                                    desc: u.desc.clone(),
                                    trigger: parse_filter(&u.trigger)?,
                                    grants: parse_filter(&u.grants)?,
                                })
                            })
                            .collect::<Result<Vec<_>, DraftError>>()?;
                        AdaptivePart::new(p.n, base, fallback, rules)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                AdaptiveComposition::new(c.rate, parts)
            })
            .collect::<Result<Vec<_>, _>>()?;
        AdaptiveSegment::new(candidates)
    }

    fn alias<'p>(
        &self,
        part: &PartConfig,
        aliases: &'p HashMap<String, Pool>,
        default: &str,
    ) -> Result<&'p Pool, DraftError> {
        let alias = part.pool.as_deref().unwrap_or(default);
        aliases
            .get(alias)
            .ok_or_else(|| DraftError::config(format!("unknown alias '{}'", alias)))
    }

    /// The part's eligible set: alias pool filtered by the tag expression,
    /// carrying the cascaded deal configuration.
    fn part_pool(
        &self,
        part: &PartConfig,
        node: &DealNode,
        aliases: &HashMap<String, Pool>,
        default: &str,
    ) -> Result<Pool, DraftError> {
        let filter = parse_filter(&part.filter)?;
        let config = DealConfig {
            uniq: part.uniq.or(node.uniq).unwrap_or(false),
            bundle: part.bundle.or(node.bundle).unwrap_or_default(),
        };
        let selected = self.alias(part, aliases, default)?.select(&filter);
        Ok(Pool::new(selected.items().to_vec(), config))
    }
}

/// Filters are lowercased before parsing; item tags are lowercased at
/// load, so both sides of the comparison normalize the same way.
fn parse_filter(source: &str) -> Result<TagFilter, DraftError> {
    TagFilter::parse(&source.to_lowercase())
        .map_err(|e| DraftError::config(format!("filter '{}': {}", source, e)))
}
