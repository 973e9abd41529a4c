use crate::Adaptive;
use crate::Composed;
use crate::DispatchContext;
use crate::Dispatching;
use crate::Fixed;
use dd_core::DraftError;
use rand::Rng;

/// Closed union over the dispatcher kinds. The schema is fully known at
/// load time, so no open-ended polymorphism is needed here.
#[derive(Clone)]
pub enum Dispatcher {
    Composed(Composed),
    Fixed(Fixed),
    Adaptive(Adaptive),
}

impl Dispatcher {
    /// Produces one candidate-pack assignment per participant for a round.
    pub fn dispatch<R: Rng>(
        &self,
        contexts: &[DispatchContext],
        rng: &mut R,
    ) -> Result<Dispatching, DraftError> {
        let dispatching = match self {
            Self::Composed(d) => d.dispatch(contexts.len(), rng),
            Self::Fixed(d) => d.dispatch(contexts.len()),
            Self::Adaptive(d) => d.dispatch(contexts, rng),
        };
        debug_assert_eq!(dispatching.dispatches().len(), contexts.len());
        Ok(dispatching)
    }
}

/// Declarative schedule of pick rounds: `fork` children run concurrently,
/// `seql` children run strictly in order, an `atom` is one concrete round.
#[derive(Clone)]
pub enum Schema {
    Atom(Dispatcher),
    Fork(Vec<Schema>),
    Seql(Vec<Schema>),
}

impl Schema {
    /// Normalizes the tree: same-tag children flatten one level
    /// (associativity), childless nodes drop, and a node reduced to one
    /// child is replaced by that child. Returns None when nothing remains.
    pub fn simplify(self) -> Option<Schema> {
        match self {
            Self::Atom(d) => Some(Self::Atom(d)),
            Self::Fork(children) => Self::collapse(children, true),
            Self::Seql(children) => Self::collapse(children, false),
        }
    }
    fn collapse(children: Vec<Schema>, fork: bool) -> Option<Schema> {
        let mut out = Vec::new();
        for child in children {
            match (child, fork) {
                (Self::Fork(grand), true) | (Self::Seql(grand), false) => {
                    out.extend(grand.into_iter().filter_map(Self::simplify));
                }
                (child, _) => out.extend(child.simplify()),
            }
        }
        match out.len() {
            0 => None,
            1 => out.pop(),
            _ => Some(match fork {
                true => Self::Fork(out),
                false => Self::Seql(out),
            }),
        }
    }
    /// Number of atoms (concrete rounds) in the tree.
    pub fn atoms(&self) -> usize {
        match self {
            Self::Atom(_) => 1,
            Self::Fork(children) | Self::Seql(children) => {
                children.iter().map(Schema::atoms).sum()
            }
        }
    }
}
