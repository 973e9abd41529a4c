use crate::Dispatching;
use crate::Npicks;
use crate::PickCandidate;
use dd_core::CardCode;
use dd_core::DraftError;

/// Fixed dispatcher: every participant receives the identical list of
/// packs. Used for fixed "opening pack" rounds; no randomness involved.
#[derive(Clone)]
pub struct Fixed {
    npicks: Npicks,
    title: Option<String>,
    packs: Vec<Vec<CardCode>>,
}

impl Fixed {
    pub fn new(
        npicks: Npicks,
        title: Option<String>,
        packs: Vec<Vec<CardCode>>,
    ) -> Result<Self, DraftError> {
        if packs.is_empty() {
            return Err(DraftError::config("fixed dispatcher without packs"));
        }
        if packs.len() < npicks.min {
            return Err(DraftError::config(format!(
                "{} fixed packs cannot satisfy {} minimum picks",
                packs.len(),
                npicks.min
            )));
        }
        Ok(Self {
            npicks,
            title,
            packs,
        })
    }
    pub fn dispatch(&self, nseats: usize) -> Dispatching {
        let candidates: Vec<PickCandidate> = self
            .packs
            .iter()
            .enumerate()
            .map(|(i, pack)| PickCandidate::new(format!("F.{}", i), pack.clone()))
            .collect();
        Dispatching::Sealed {
            npicks: self.npicks,
            title: self.title.clone(),
            dispatches: vec![candidates; nseats],
        }
    }
}
