use crate::Dispatching;
use crate::Mode;
use crate::PickCandidate;
use dd_core::DraftError;
use dd_core::Rate;
use dd_pool::Pool;
use rand::Rng;

/// Weighted-composition dispatcher. Each participant gets, per segment,
/// one composition rolled from a cumulative-rate table; every part of the
/// chosen composition deals `n` items from its pre-filtered pool, and the
/// parts concatenate into the participant's candidate list.
#[derive(Clone)]
pub struct Composed {
    mode: Mode,
    label: String,
    title: Option<String>,
    segments: Vec<Segment>,
}

#[derive(Clone)]
pub struct Segment {
    candidates: Vec<Composition>,
    total: Rate,
}

#[derive(Clone)]
pub struct Composition {
    rate: Rate,
    parts: Vec<Part>,
}

#[derive(Clone)]
pub struct Part {
    n: usize,
    pool: Pool,
}

impl Part {
    /// Validates the pool against its declared deal count at build time.
    pub fn new(n: usize, pool: Pool) -> Result<Self, DraftError> {
        pool.guard(n)?;
        Ok(Self { n, pool })
    }
}

impl Composition {
    pub fn new(rate: Rate, parts: Vec<Part>) -> Result<Self, DraftError> {
        if rate == 0 {
            return Err(DraftError::config("composition rate must be positive"));
        }
        if parts.is_empty() {
            return Err(DraftError::config("composition without parts"));
        }
        Ok(Self { rate, parts })
    }
}

impl Segment {
    pub fn new(candidates: Vec<Composition>) -> Result<Self, DraftError> {
        if candidates.is_empty() {
            return Err(DraftError::config("segment without candidates"));
        }
        let total = candidates.iter().map(|c| c.rate).sum();
        Ok(Self { candidates, total })
    }
    /// Rolls a uniform integer in `[0, total)` and takes the first
    /// cumulative bucket exceeding it.
    fn roll<'a, R: Rng>(&'a self, rng: &mut R) -> &'a Composition {
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

impl Composed {
    pub fn new(
        mode: Mode,
        label: impl Into<String>,
        title: Option<String>,
        segments: Vec<Segment>,
    ) -> Result<Self, DraftError> {
        if segments.is_empty() {
            return Err(DraftError::config("dispatcher without segments"));
        }
        Ok(Self {
            mode,
            label: label.into(),
            title,
            segments,
        })
    }
    pub fn dispatch<R: Rng>(&self, nseats: usize, rng: &mut R) -> Dispatching {
        let mut serial = 0usize;
        let dispatches = (0..nseats)
            .map(|_| self.one(&mut serial, rng))
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
    /// Candidate list for one participant: segments concatenate across
    /// the round.
    fn one<R: Rng>(&self, serial: &mut usize, rng: &mut R) -> Vec<PickCandidate> {
        self.segments
            .iter()
            .enumerate()
            .flat_map(|(seg, segment)| {
                let composition = segment.roll(rng);
                composition
                    .parts
                    .iter()
                    .flat_map(|part| part.pool.deal(part.n, rng))
                    .map(|item| {
                        *serial += 1;
                        PickCandidate::new(format!("{}.{}.{}", self.label, seg, serial), item.pack)
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
