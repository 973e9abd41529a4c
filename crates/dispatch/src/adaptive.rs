use crate::DispatchContext;
use crate::Dispatching;
use crate::Mode;
use crate::PickCandidate;
use dd_core::CardCode;
use dd_core::DraftError;
use dd_core::PAD_THRESHOLD;
use dd_core::Rate;
use dd_core::UNLOCK_FLOOR;
use dd_pool::CardLookup;
use dd_pool::Pool;
use dd_pool::PoolItem;
use dd_pool::TagFilter;
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;

/// One "reveal synergy cards as you draft" relation: when a participant
/// has already picked a card matching `trigger`, items matching `grants`
/// become eligible to appear.
#[derive(Clone)]
pub struct UnlockRule {
    pub desc: String,
    pub trigger: TagFilter,
    pub grants: TagFilter,
}

/// Adaptive dispatcher: like [`crate::Composed`], but a part's working set
/// is derived from the participant's earlier picks through unlock rules.
/// Thin working sets fall back to the part's full eligible set
/// (`UNLOCK_FLOOR`) and are padded from a declared fallback pool
/// (`PAD_THRESHOLD`) before dealing.
#[derive(Clone)]
pub struct Adaptive {
    mode: Mode,
    label: String,
    title: Option<String>,
    segments: Vec<AdaptiveSegment>,
    cards: Arc<dyn CardLookup>,
}

#[derive(Clone)]
pub struct AdaptiveSegment {
    candidates: Vec<AdaptiveComposition>,
    total: Rate,
}

#[derive(Clone)]
pub struct AdaptiveComposition {
    rate: Rate,
    parts: Vec<AdaptivePart>,
}

#[derive(Clone)]
pub struct AdaptivePart {
    n: usize,
    /// Full eligible set for this part; also the fallback when too few
    /// items are unlocked.
    base: Pool,
    /// Pad source for thin working sets.
    fallback: Option<Pool>,
    rules: Vec<UnlockRule>,
}

impl AdaptivePart {
    pub fn new(
        n: usize,
        base: Pool,
        fallback: Option<Pool>,
        rules: Vec<UnlockRule>,
    ) -> Result<Self, DraftError> {
        base.guard(n)?;
        Ok(Self {
            n,
            base,
            fallback,
            rules,
        })
    }
    /// Working set for one participant given the tag sets of their picks.
    fn working(&self, picked: &[Vec<String>]) -> (Vec<PoolItem>, Vec<&UnlockRule>) {
        let active: Vec<&UnlockRule> = self
            .rules
            .iter()
            .filter(|rule| picked.iter().any(|tags| rule.trigger.matches(tags)))
            .collect();
        let unlocked: Vec<PoolItem> = self
            .base
            .items()
            .iter()
            .filter(|item| active.iter().any(|rule| rule.grants.matches(&item.tags)))
            .cloned()
            .collect();
        match unlocked.len() < UNLOCK_FLOOR {
            true => (self.base.items().to_vec(), active),
            false => (unlocked, active),
        }
    }
    fn deal<R: Rng>(&self, picked: &[Vec<String>], rng: &mut R) -> Vec<PoolItem> {
        let (mut working, _) = self.working(picked);
        if working.len() < PAD_THRESHOLD {
            if let Some(fallback) = &self.fallback {
                pad(&mut working, fallback, rng);
            }
        }
        Pool::new(working, self.base.config()).deal(self.n, rng)
    }
}

/// Pads the working set with a uniform, duplicate-free sample from the
/// fallback pool, stopping at the pad threshold.
fn pad<R: Rng>(working: &mut Vec<PoolItem>, fallback: &Pool, rng: &mut R) {
    let mut codes: HashSet<CardCode> = working
        .iter()
        .flat_map(|i| i.pack.iter().copied())
        .collect();
    let mut order: Vec<usize> = (0..fallback.len()).collect();
    order.shuffle(rng);
    for idx in order {
        if working.len() >= PAD_THRESHOLD {
            break;
        }
        let item = &fallback.items()[idx];
        if item.pack.iter().any(|c| codes.contains(c)) {
            continue;
        }
        codes.extend(item.pack.iter().copied());
        working.push(item.clone());
    }
}

impl AdaptiveComposition {
    pub fn new(rate: Rate, parts: Vec<AdaptivePart>) -> Result<Self, DraftError> {
        if rate == 0 {
            return Err(DraftError::config("composition rate must be positive"));
        }
        if parts.is_empty() {
            return Err(DraftError::config("composition without parts"));
        }
        Ok(Self { rate, parts })
    }
}

impl AdaptiveSegment {
    pub fn new(candidates: Vec<AdaptiveComposition>) -> Result<Self, DraftError> {
        if candidates.is_empty() {
            return Err(DraftError::config("segment without candidates"));
        }
        let total = candidates.iter().map(|c| c.rate).sum();
        Ok(Self { candidates, total })
    }
    fn roll<'a, R: Rng>(&'a self, rng: &mut R) -> &'a AdaptiveComposition {
        let roll = rng.random_range(0..self.total);
        let mut cumulative = 0;
        for candidate in &self.candidates {
            cumulative += candidate.rate;
            if roll < cumulative {
                return candidate;
            }
        }
        self.candidates.last().expect("non-empty by construction")
    }
}

impl Adaptive {
    pub fn new(
        mode: Mode,
        label: impl Into<String>,
        title: Option<String>,
        segments: Vec<AdaptiveSegment>,
        cards: Arc<dyn CardLookup>,
    ) -> Result<Self, DraftError> {
        if segments.is_empty() {
            return Err(DraftError::config("dispatcher without segments"));
        }
        Ok(Self {
            mode,
            label: label.into(),
            title,
            segments,
            cards,
        })
    }
    pub fn dispatch<R: Rng>(&self, contexts: &[DispatchContext], rng: &mut R) -> Dispatching {
        let mut serial = 0usize;
        let dispatches = contexts
            .iter()
            .map(|ctx| self.one(ctx, &mut serial, rng))
            .collect::<Vec<_>>();
        match &self.mode {
            Mode::Draft { shifts } => Dispatching::Draft {
                shifts: shifts.clone(),
                title: self.title.clone(),
                dispatches,
            },
            Mode::Sealed { npicks } => Dispatching::Sealed {
                npicks: *npicks,
                title: self.title.clone(),
                dispatches,
            },
        }
    }
    fn one<R: Rng>(
        &self,
        ctx: &DispatchContext,
        serial: &mut usize,
        rng: &mut R,
    ) -> Vec<PickCandidate> {
        let picked = self.picked_tags(ctx);
        self.segments
            .iter()
            .enumerate()
            .flat_map(|(seg, segment)| {
                let composition = segment.roll(rng);
                composition
                    .parts
                    .iter()
                    .flat_map(|part| {
                        let active: Vec<&UnlockRule> = part
                            .rules
                            .iter()
                            .filter(|rule| picked.iter().any(|tags| rule.trigger.matches(tags)))
                            .collect();
                        part.deal(&picked, rng)
                            .into_iter()
                            .map(|item| {
                                *serial += 1;
                                let id = format!("{}.{}.{}", self.label, seg, serial);
                                match hint(&item, &active) {
                                    Some(desc) => PickCandidate::described(id, item.pack, desc),
                                    None => PickCandidate::new(id, item.pack),
                                }
                            })
                            .collect::<Vec<_>>()
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }
    /// Tag sets of every card the participant has picked so far, looked up
    /// in the external card database.
    fn picked_tags(&self, ctx: &DispatchContext) -> Vec<Vec<String>> {
        ctx.picked
            .iter()
            .flat_map(|candidate| candidate.pack.iter().copied())
            .filter_map(|code| self.cards.card(code))
            .map(|card| card.tags())
            .collect()
    }
}

/// Lists which active unlock predicates a dealt pack satisfies.
fn hint(item: &PoolItem, active: &[&UnlockRule]) -> Option<String> {
    let descs: Vec<&str> = active
        .iter()
        .filter(|rule| rule.grants.matches(&item.tags))
        .map(|rule| rule.desc.as_str())
        .collect();
    match descs.is_empty() {
        true => None,
        false => Some(descs.join(", ")),
    }
}
