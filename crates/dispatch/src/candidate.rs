use dd_core::CardCode;
use dd_core::DraftError;
use dd_core::Position;
use serde::Deserialize;
use serde::Serialize;

/// One offered option within a round. The id is unique within that round
/// only; clients echo ids back when picking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickCandidate {
    pub id: String,
    pub pack: Vec<CardCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<CandidateMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateMeta {
    /// Hint listing which unlock predicates this pack satisfies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<u8>,
}

impl PickCandidate {
    pub fn new(id: String, pack: Vec<CardCode>) -> Self {
        Self {
            id,
            pack,
            meta: None,
        }
    }
    pub fn described(id: String, pack: Vec<CardCode>, desc: String) -> Self {
        Self {
            id,
            pack,
            meta: Some(CandidateMeta {
                desc: Some(desc),
                tier: None,
            }),
        }
    }
}

/// Allowed pick count for a sealed round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Npicks {
    pub min: usize,
    pub max: usize,
}

impl Npicks {
    pub fn new(min: usize, max: usize) -> Result<Self, DraftError> {
        match min <= max {
            true => Ok(Self { min, max }),
            false => Err(DraftError::config(format!(
                "npicks min {} exceeds max {}",
                min, max
            ))),
        }
    }
    pub fn contains(&self, n: usize) -> bool {
        self.min <= n && n <= self.max
    }
}

/// What kind of round an atom runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Packs rotate among participants across `shifts.len()` sub-rounds;
    /// sub-round `s` demands exactly `shifts[s]` picks.
    Draft { shifts: Vec<usize> },
    /// Each participant picks directly from their own candidates.
    Sealed { npicks: Npicks },
}

impl Mode {
    pub fn draft(shifts: Vec<usize>) -> Result<Self, DraftError> {
        if shifts.is_empty() {
            return Err(DraftError::config("draft mode requires at least one shift"));
        }
        if shifts.contains(&0) {
            return Err(DraftError::config("zero-pick shift"));
        }
        Ok(Self::Draft { shifts })
    }
    pub fn sealed(min: usize, max: usize) -> Result<Self, DraftError> {
        Ok(Self::Sealed {
            npicks: Npicks::new(min, max)?,
        })
    }
}

/// One round's candidate assignment, one list per participant slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatching {
    Draft {
        shifts: Vec<usize>,
        title: Option<String>,
        dispatches: Vec<Vec<PickCandidate>>,
    },
    Sealed {
        npicks: Npicks,
        title: Option<String>,
        dispatches: Vec<Vec<PickCandidate>>,
    },
}

impl Dispatching {
    pub fn dispatches(&self) -> &[Vec<PickCandidate>] {
        match self {
            Self::Draft { dispatches, .. } => dispatches,
            Self::Sealed { dispatches, .. } => dispatches,
        }
    }
}

/// Per-participant context handed to a dispatcher: seat order and every
/// candidate the participant has already picked in earlier rounds.
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    pub seat: Position,
    pub picked: Vec<PickCandidate>,
}
