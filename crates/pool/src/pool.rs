use crate::TagFilter;
use dd_core::CardCode;
use dd_core::DraftError;
use dd_core::POOL_GUARD_FACTOR;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashSet;

/// A unit of the pool. The pack may hold more than one card code when
/// companion cards are dealt together as a single pick option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolItem {
    pub pack: Vec<CardCode>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PoolItem {
    pub fn single(code: CardCode, tags: Vec<String>) -> Self {
        Self {
            pack: vec![code],
            tags,
        }
    }
    /// Lowercases all tags. Loaders apply this once so filter evaluation
    /// can stay a plain case-sensitive comparison.
    pub fn lowercased(mut self) -> Self {
        for tag in &mut self.tags {
            *tag = tag.to_lowercase();
        }
        self
    }
}

/// Whether a multi-code pack stays whole or is re-flattened into one
/// single-code item per code after dealing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bundle {
    #[default]
    Whole,
    Free,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealConfig {
    /// Unique mode deals distinct underlying card codes, not just distinct
    /// item indices.
    #[serde(default)]
    pub uniq: bool,
    #[serde(default)]
    pub bundle: Bundle,
}

/// Immutable list of tagged pool items with a dealing configuration.
/// Shared read-only across all per-participant tasks once a session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    items: Vec<PoolItem>,
    config: DealConfig,
}

impl Pool {
    pub fn new(items: Vec<PoolItem>, config: DealConfig) -> Self {
        Self { items, config }
    }
    pub fn from_items(items: Vec<PoolItem>) -> Self {
        Self::new(items, DealConfig::default())
    }
    pub fn items(&self) -> &[PoolItem] {
        &self.items
    }
    pub fn config(&self) -> DealConfig {
        self.config
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    /// Retains only items matching the filter, keeping the deal config.
    pub fn select(&self, filter: &TagFilter) -> Self {
        Self {
            items: self
                .items
                .iter()
                .filter(|i| filter.matches(&i.tags))
                .cloned()
                .collect(),
            config: self.config,
        }
    }
    /// Build-time sanity check for a declared `deal(n)`. Unique mode
    /// requires `POOL_GUARD_FACTOR * n` items so rejection sampling has
    /// room to terminate; this is never enforced again at draw time.
    pub fn guard(&self, n: usize) -> Result<(), DraftError> {
        if n == 0 {
            return Err(DraftError::config("deal count must be positive"));
        }
        let floor = match self.config.uniq {
            true => POOL_GUARD_FACTOR * n,
            false => 1,
        };
        if self.items.len() < floor {
            return Err(DraftError::config(format!(
                "pool of {} items cannot deal {} ({} required)",
                self.items.len(),
                n,
                floor
            )));
        }
        Ok(())
    }
    /// Deals `n` items per the pool's configuration.
    pub fn deal<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<PoolItem> {
        let dealt = match self.config.uniq {
            false => self.deal_replacing(n, rng),
            true => self.deal_unique(n, rng),
        };
        match self.config.bundle {
            Bundle::Whole => dealt,
            Bundle::Free => dealt
                .into_iter()
                .flat_map(|item| {
                    let tags = item.tags;
                    item.pack
                        .into_iter()
                        .map(move |code| PoolItem::single(code, tags.clone()))
                })
                .collect(),
        }
    }
    /// Independent uniform draws with replacement; duplicates allowed.
    fn deal_replacing<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<PoolItem> {
        match self.items.is_empty() {
            true => Vec::new(),
            false => (0..n)
                .map(|_| self.items[rng.random_range(0..self.items.len())].clone())
                .collect(),
        }
    }
    /// Draws `n` items whose packs' card codes are pairwise disjoint.
    /// Rejection sampling with a retry budget; a shuffled greedy pass
    /// finishes pools the guard let through anyway.
    fn deal_unique<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<PoolItem> {
        let mut drawn: Vec<PoolItem> = Vec::with_capacity(n);
        let mut codes: HashSet<CardCode> = HashSet::new();
        if self.items.is_empty() {
            return drawn;
        }
        let mut budget = 32 * n.max(1);
        while drawn.len() < n && budget > 0 {
            budget -= 1;
            let item = &self.items[rng.random_range(0..self.items.len())];
            if item.pack.iter().any(|c| codes.contains(c)) {
                continue;
            }
            codes.extend(item.pack.iter().copied());
            drawn.push(item.clone());
        }
        if drawn.len() < n {
            let mut order: Vec<usize> = (0..self.items.len()).collect();
            order.shuffle(rng);
            for idx in order {
                if drawn.len() == n {
                    break;
                }
                let item = &self.items[idx];
                if item.pack.iter().any(|c| codes.contains(c)) {
                    continue;
                }
                codes.extend(item.pack.iter().copied());
                drawn.push(item.clone());
            }
        }
        drawn
    }
}
