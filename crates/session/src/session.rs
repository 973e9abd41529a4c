use crate::ParticipantInfo;
use crate::PickBudget;
use crate::PickProgressEntry;
use crate::PickSelection;
use crate::RoundKind;
use crate::ServerMessage;
use async_trait::async_trait;
use dd_core::DraftError;
use dd_core::ErrorCode;
use dd_core::ID;
use dd_core::ImageId;
use dd_dispatch::DispatchContext;
use dd_dispatch::Dispatcher;
use dd_dispatch::Dispatching;
use dd_dispatch::Npicks;
use dd_dispatch::PickCandidate;
use dd_dispatch::Preset;
use dd_dispatch::Schema;
use futures::future::BoxFuture;
use futures::future::join_all;
use futures::future::try_join_all;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tokio::sync::watch;
use uuid::Uuid;

/// Marker for draft session ids.
pub struct Draft;

/// A logical participant. The uuid is the durable key; it outlives any
/// single connection. Selections are mutated only by the participant's
/// own round task.
pub struct Participant {
    pub uuid: Uuid,
    pub image_id: ImageId,
    selections: Mutex<Vec<(String, Vec<PickCandidate>)>>,
}

impl Participant {
    pub fn new(uuid: Uuid, image_id: ImageId) -> Self {
        Self {
            uuid,
            image_id,
            selections: Mutex::new(Vec::new()),
        }
    }
    pub fn record(&self, req_id: &str, picks: Vec<PickCandidate>) {
        let mut selections = self.selections.lock().expect("selections lock");
        match selections.iter_mut().find(|(id, _)| id == req_id) {
            Some((_, existing)) => *existing = picks,
            None => selections.push((req_id.to_string(), picks)),
        }
    }
    /// Flattened picks across all rounds, in acceptance order.
    pub fn picks(&self) -> Vec<PickCandidate> {
        self.selections
            .lock()
            .expect("selections lock")
            .iter()
            .flat_map(|(_, picks)| picks.iter().cloned())
            .collect()
    }
    pub fn done(&self, req_id: &str) -> bool {
        self.selections
            .lock()
            .expect("selections lock")
            .iter()
            .any(|(id, _)| id == req_id)
    }
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            uuid: self.uuid,
            image_id: self.image_id,
        }
    }
}

/// Seat-ordered participant list, fixed for the lifetime of a session.
pub struct Roster {
    participants: Vec<Arc<Participant>>,
}

impl Roster {
    pub fn new(participants: Vec<Arc<Participant>>) -> Self {
        Self { participants }
    }
    pub fn len(&self) -> usize {
        self.participants.len()
    }
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Participant>> {
        self.participants.iter()
    }
    pub fn at(&self, seat: usize) -> &Arc<Participant> {
        &self.participants[seat]
    }
    pub fn get(&self, uuid: Uuid) -> Option<&Arc<Participant>> {
        self.participants.iter().find(|p| p.uuid == uuid)
    }
    pub fn infos(&self) -> Vec<ParticipantInfo> {
        self.participants.iter().map(|p| p.info()).collect()
    }
}

/// Reliable per-participant delivery seam toward the gateway.
///
/// `emit` resolves once the participant acknowledged the message (possibly
/// after reconnection); `notify` is fire-and-forget.
#[async_trait]
pub trait Emitter: Send + Sync {
    async fn emit(
        &self,
        uuid: Uuid,
        message: ServerMessage,
    ) -> Result<serde_json::Value, DraftError>;
    async fn notify(&self, uuid: Uuid, message: ServerMessage);
}

/// One running draft. Walks the dispatch schema to completion, running
/// each atom as a draft (pack-passing) or sealed round, validating pick
/// counts and retrying per participant until they comply.
pub struct DraftingSession {
    id: ID<Draft>,
    preset: Preset,
    roster: Arc<Roster>,
    emitter: Arc<dyn Emitter>,
    supplier: AtomicU64,
    abort: watch::Sender<bool>,
}

impl DraftingSession {
    pub fn new(preset: Preset, roster: Arc<Roster>, emitter: Arc<dyn Emitter>) -> Self {
        Self::with_id(ID::default(), preset, roster, emitter)
    }
    pub fn with_id(
        id: ID<Draft>,
        preset: Preset,
        roster: Arc<Roster>,
        emitter: Arc<dyn Emitter>,
    ) -> Self {
        Self {
            id,
            preset,
            roster,
            emitter,
            supplier: AtomicU64::new(0),
            abort: watch::Sender::new(false),
        }
    }
    pub fn id(&self) -> ID<Draft> {
        self.id
    }
    fn draft_id(&self) -> Uuid {
        self.id.inner()
    }

    /// Runs the session to completion. On any unrecoverable error the
    /// session aborts itself before the error propagates.
    pub async fn start(&self) -> Result<(), DraftError> {
        log::info!(
            "[dss {}] starting '{}' with {} participants",
            self.id,
            self.preset.name,
            self.roster.len()
        );
        let opening = ServerMessage::DraftDidStart {
            draft_id: self.draft_id(),
            preset: self.preset.info(),
            participants: self.roster.infos(),
        };
        let run = async {
            try_join_all(
                self.roster
                    .iter()
                    .map(|p| self.deliver(p.uuid, opening.clone())),
            )
            .await?;
            self.walk(&self.preset.schema).await
        };
        match run.await {
            Ok(()) => self.complete().await,
            Err(error) => {
                log::warn!("[dss {}] failed: {}", self.id, error);
                self.abort().await;
                Err(error)
            }
        }
    }

    /// Cancels every outstanding delivery, announces the stop, then tells
    /// each participant the draft is over with empty picks. Idempotent.
    pub async fn abort(&self) {
        if self.abort.send_replace(true) {
            return;
        }
        log::warn!("[dss {}] aborting", self.id);
        self.broadcast(ServerMessage::DraftDidStop {
            draft_id: self.draft_id(),
        })
        .await;
        for participant in self.roster.iter() {
            self.emitter
                .notify(
                    participant.uuid,
                    ServerMessage::DraftComplete {
                        draft_id: self.draft_id(),
                        picks: Vec::new(),
                    },
                )
                .await;
        }
    }

    /// Depth-first schema evaluation: fork children run concurrently, seql
    /// children strictly in order.
    fn walk<'a>(&'a self, schema: &'a Schema) -> BoxFuture<'a, Result<(), DraftError>> {
        Box::pin(async move {
            match schema {
                Schema::Atom(dispatcher) => self.round(dispatcher).await,
                Schema::Fork(children) => {
                    try_join_all(children.iter().map(|child| self.walk(child))).await?;
                    Ok(())
                }
                Schema::Seql(children) => {
                    for child in children {
                        self.walk(child).await?;
                    }
                    Ok(())
                }
            }
        })
    }

    async fn round(&self, dispatcher: &Dispatcher) -> Result<(), DraftError> {
        let req_id = (self.supplier.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        let contexts: Vec<DispatchContext> = self
            .roster
            .iter()
            .enumerate()
            .map(|(seat, participant)| DispatchContext {
                seat,
                picked: participant.picks(),
            })
            .collect();
        let dispatching = dispatcher.dispatch(&contexts, &mut rand::rng())?;
        log::debug!("[dss {}] round {} dispatched", self.id, req_id);
        match dispatching {
            Dispatching::Sealed {
                npicks,
                title,
                dispatches,
            } => {
                self.sealed(&req_id, npicks, title.as_deref(), dispatches)
                    .await?
            }
            Dispatching::Draft {
                shifts,
                title,
                dispatches,
            } => {
                self.draft(&req_id, &shifts, title.as_deref(), dispatches)
                    .await?
            }
        }
        self.broadcast(ServerMessage::PickComplete {
            draft_id: self.draft_id(),
            req_id: req_id.clone(),
        })
        .await;
        log::debug!("[dss {}] round {} complete", self.id, req_id);
        Ok(())
    }

    /// Sealed sub-protocol: each participant picks from their own
    /// candidates, independently and concurrently.
    async fn sealed(
        &self,
        req_id: &str,
        npicks: Npicks,
        title: Option<&str>,
        dispatches: Vec<Vec<PickCandidate>>,
    ) -> Result<(), DraftError> {
        let tasks = dispatches
            .into_iter()
            .enumerate()
            .map(|(seat, candidates)| async move {
                let participant = self.roster.at(seat);
                loop {
                    let message = ServerMessage::PickRequest {
                        draft_id: self.draft_id(),
                        req_id: req_id.to_string(),
                        ptype: RoundKind::Sealed,
                        candidates: candidates.clone(),
                        npicks: PickBudget::Range {
                            min: npicks.min,
                            max: npicks.max,
                        },
                        title: title.map(String::from),
                        shift: None,
                        prev: None,
                        next: None,
                    };
                    let data = self.deliver(participant.uuid, message).await?;
                    let selected = chosen(&candidates, data);
                    if !npicks.contains(selected.len()) {
                        self.mismatch(participant.uuid, req_id, selected.len())
                            .await;
                        continue;
                    }
                    participant.record(req_id, selected);
                    self.picked(participant.uuid, req_id).await;
                    return Ok::<(), DraftError>(());
                }
            });
        try_join_all(tasks).await?;
        Ok(())
    }

    /// Draft sub-protocol: packs rotate backward through the seating order,
    /// one seat per sub-round. In sub-round `s`, seat `i` holds the list
    /// originally dealt to slot `(i - s) mod N`; the un-picked remainder is
    /// what the next holder sees. `modpad` keeps the index math
    /// non-negative.
    async fn draft(
        &self,
        base: &str,
        shifts: &[usize],
        title: Option<&str>,
        mut slots: Vec<Vec<PickCandidate>>,
    ) -> Result<(), DraftError> {
        let nseats = self.roster.len();
        let rounds = shifts.len();
        let modpad = nseats * rounds;
        for (s, &need) in shifts.iter().enumerate() {
            let req_id = format!("{}:{}", base, s);
            let tasks = (0..nseats).map(|seat| {
                let slot = (modpad + seat - s) % nseats;
                let candidates = slots[slot].clone();
                let prev = (s > 0).then(|| self.roster.at((slot + s - 1) % nseats).uuid);
                let next =
                    (s + 1 < rounds).then(|| self.roster.at((slot + s + 1) % nseats).uuid);
                let req_id = req_id.clone();
                async move {
                    let leftover = self
                        .shift(seat, &req_id, need, candidates, s, prev, next, title)
                        .await?;
                    Ok::<_, DraftError>((slot, leftover))
                }
            });
            for (slot, leftover) in try_join_all(tasks).await? {
                slots[slot] = leftover;
            }
        }
        Ok(())
    }

    /// One seat's exchange within one draft sub-round. Returns the
    /// un-picked remainder of the held pack.
    #[allow(clippy::too_many_arguments)]
    async fn shift(
        &self,
        seat: usize,
        req_id: &str,
        need: usize,
        candidates: Vec<PickCandidate>,
        shift: usize,
        prev: Option<Uuid>,
        next: Option<Uuid>,
        title: Option<&str>,
    ) -> Result<Vec<PickCandidate>, DraftError> {
        let participant = self.roster.at(seat);
        loop {
            let message = ServerMessage::PickRequest {
                draft_id: self.draft_id(),
                req_id: req_id.to_string(),
                ptype: RoundKind::Draft,
                candidates: candidates.clone(),
                npicks: PickBudget::Exact(need),
                title: title.map(String::from),
                shift: Some(shift),
                prev,
                next,
            };
            let data = self.deliver(participant.uuid, message).await?;
            let selected = chosen(&candidates, data);
            if selected.len() != need {
                self.mismatch(participant.uuid, req_id, selected.len()).await;
                continue;
            }
            let leftover = candidates
                .into_iter()
                .filter(|c| !selected.iter().any(|s| s.id == c.id))
                .collect();
            participant.record(req_id, selected);
            self.picked(participant.uuid, req_id).await;
            return Ok(leftover);
        }
    }

    /// Delivery raced against the abort token, so every suspension point
    /// settles promptly on `abort()`.
    async fn deliver(
        &self,
        uuid: Uuid,
        message: ServerMessage,
    ) -> Result<serde_json::Value, DraftError> {
        let mut abort = self.abort.subscribe();
        tokio::select! {
            result = self.emitter.emit(uuid, message) => result,
            _ = abort.wait_for(|stop| *stop) => Err(DraftError::new(ErrorCode::Aborted)),
        }
    }

    async fn mismatch(&self, uuid: Uuid, req_id: &str, got: usize) {
        log::debug!(
            "[dss {}] round {} rejected {} picks from {}",
            self.id,
            req_id,
            got,
            uuid
        );
        let error = DraftError::with(
            ErrorCode::NpicksMismatch,
            format!("{} picks are not acceptable for round {}", got, req_id),
        );
        self.emitter
            .notify(uuid, ServerMessage::error(&error))
            .await;
    }

    /// Progress broadcast after every accepted pick.
    async fn picked(&self, who: Uuid, req_id: &str) {
        let participants: Vec<PickProgressEntry> = self
            .roster
            .iter()
            .map(|p| PickProgressEntry {
                uuid: p.uuid,
                image_id: p.image_id,
                done: p.done(req_id),
            })
            .collect();
        self.broadcast(ServerMessage::ParticipantDidPick {
            draft_id: self.draft_id(),
            req_id: req_id.to_string(),
            who,
        })
        .await;
        self.broadcast(ServerMessage::PickProgress {
            draft_id: self.draft_id(),
            req_id: req_id.to_string(),
            participants,
        })
        .await;
    }

    async fn complete(&self) -> Result<(), DraftError> {
        let farewells = self.roster.iter().map(|participant| {
            self.deliver(
                participant.uuid,
                ServerMessage::DraftComplete {
                    draft_id: self.draft_id(),
                    picks: participant.picks(),
                },
            )
        });
        for result in join_all(farewells).await {
            if let Err(error) = result {
                log::warn!("[dss {}] completion delivery failed: {}", self.id, error);
            }
        }
        self.broadcast(ServerMessage::DraftDidStop {
            draft_id: self.draft_id(),
        })
        .await;
        log::info!("[dss {}] stopped", self.id);
        Ok(())
    }

    async fn broadcast(&self, message: ServerMessage) {
        for participant in self.roster.iter() {
            self.emitter.notify(participant.uuid, message.clone()).await;
        }
    }
}

/// Filters the offered candidates down to the ids the client chose.
/// Unknown ids drop out here, so they surface as a count mismatch.
fn chosen(candidates: &[PickCandidate], data: serde_json::Value) -> Vec<PickCandidate> {
    let selection: PickSelection = serde_json::from_value(data).unwrap_or_default();
    candidates
        .iter()
        .filter(|c| selection.picks.iter().any(|id| *id == c.id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dd_core::CardCode;
    use dd_dispatch::Composed;
    use dd_dispatch::Composition;
    use dd_dispatch::Mode;
    use dd_dispatch::Part;
    use dd_dispatch::Segment;
    use dd_pool::Pool;
    use dd_pool::PoolItem;
    use serde_json::json;
    use std::collections::HashMap;
    use std::collections::HashSet;

    type Picker =
        Box<dyn Fn(Uuid, &ServerMessage, usize) -> Result<serde_json::Value, DraftError> + Send + Sync>;

    struct FakeEmitter {
        picker: Picker,
        requests: Mutex<Vec<(Uuid, ServerMessage)>>,
        notices: Mutex<Vec<(Uuid, ServerMessage)>>,
        attempts: Mutex<HashMap<(Uuid, String), usize>>,
    }

    impl FakeEmitter {
        fn with(picker: Picker) -> Arc<Self> {
            Arc::new(Self {
                picker,
                requests: Mutex::new(Vec::new()),
                notices: Mutex::new(Vec::new()),
                attempts: Mutex::new(HashMap::new()),
            })
        }
        /// Answers every pick request with the first `need` candidate ids.
        fn obedient() -> Arc<Self> {
            Self::with(Box::new(|_, message, _| Ok(first_picks(message))))
        }
        fn requests(&self) -> Vec<(Uuid, ServerMessage)> {
            self.requests.lock().unwrap().clone()
        }
        fn notices(&self) -> Vec<(Uuid, ServerMessage)> {
            self.notices.lock().unwrap().clone()
        }
    }

    fn first_picks(message: &ServerMessage) -> serde_json::Value {
        match message {
            ServerMessage::PickRequest {
                candidates, npicks, ..
            } => {
                let need = match npicks {
                    PickBudget::Exact(k) => *k,
                    PickBudget::Range { min, .. } => *min,
                };
                let picks: Vec<&str> =
                    candidates.iter().take(need).map(|c| c.id.as_str()).collect();
                json!({ "picks": picks })
            }
            _ => serde_json::Value::Null,
        }
    }

    #[async_trait]
    impl Emitter for FakeEmitter {
        async fn emit(
            &self,
            uuid: Uuid,
            message: ServerMessage,
        ) -> Result<serde_json::Value, DraftError> {
            self.requests.lock().unwrap().push((uuid, message.clone()));
            match &message {
                ServerMessage::PickRequest { req_id, .. } => {
                    let attempt = {
                        let mut attempts = self.attempts.lock().unwrap();
                        let count = attempts.entry((uuid, req_id.clone())).or_insert(0);
                        *count += 1;
                        *count
                    };
                    (self.picker)(uuid, &message, attempt)
                }
                _ => Ok(serde_json::Value::Null),
            }
        }
        async fn notify(&self, uuid: Uuid, message: ServerMessage) {
            self.notices.lock().unwrap().push((uuid, message));
        }
    }

    fn pool(codes: std::ops::Range<CardCode>) -> Pool {
        Pool::from_items(codes.map(|c| PoolItem::single(c, vec![])).collect())
    }
    fn dealt(mode: Mode, label: &str, n: usize) -> Dispatcher {
        let segment = Segment::new(vec![
            Composition::new(1, vec![Part::new(n, pool(0..100)).unwrap()]).unwrap(),
        ])
        .unwrap();
        Dispatcher::Composed(Composed::new(mode, label, None, vec![segment]).unwrap())
    }
    fn preset(schema: Schema) -> Preset {
        Preset {
            id: "t".into(),
            name: "test".into(),
            description: String::new(),
            schema,
        }
    }
    fn roster(n: usize) -> Arc<Roster> {
        Arc::new(Roster::new(
            (0..n)
                .map(|i| Arc::new(Participant::new(Uuid::from_u128(i as u128 + 1), i as u32)))
                .collect(),
        ))
    }
    fn offered(message: &ServerMessage) -> (String, HashSet<String>) {
        match message {
            ServerMessage::PickRequest {
                req_id, candidates, ..
            } => (
                req_id.clone(),
                candidates.iter().map(|c| c.id.clone()).collect(),
            ),
            _ => panic!("not a pick request"),
        }
    }

    #[tokio::test]
    async fn draft_rotation_passes_leftovers_around_the_table() {
        let emitter = FakeEmitter::obedient();
        let schema = Schema::Atom(dealt(Mode::draft(vec![1, 1, 1]).unwrap(), "R", 3));
        let roster = roster(3);
        let session = DraftingSession::new(preset(schema), roster.clone(), emitter.clone());
        session.start().await.unwrap();

        // Every participant picked one card per sub-round.
        for participant in roster.iter() {
            let picks = participant.picks();
            assert_eq!(picks.len(), 3);
            let ids: HashSet<&str> = picks.iter().map(|p| p.id.as_str()).collect();
            assert_eq!(ids.len(), 3);
        }
        // Within one sub-round no candidate id reaches two participants,
        // and across sub-rounds each participant sees three distinct slots.
        let picked: Vec<(Uuid, String, HashSet<String>)> = emitter
            .requests()
            .iter()
            .filter(|(_, m)| matches!(m, ServerMessage::PickRequest { .. }))
            .map(|(uuid, m)| {
                let (req_id, ids) = offered(m);
                (*uuid, req_id, ids)
            })
            .collect();
        for s in 0..3 {
            let round: Vec<&HashSet<String>> = picked
                .iter()
                .filter(|(_, req_id, _)| *req_id == format!("1:{}", s))
                .map(|(_, _, ids)| ids)
                .collect();
            assert_eq!(round.len(), 3);
            let union: HashSet<&String> = round.iter().flat_map(|ids| ids.iter()).collect();
            assert_eq!(union.len(), round.iter().map(|ids| ids.len()).sum::<usize>());
            // Sub-round s offers packs shrunk by s earlier picks.
            assert!(round.iter().all(|ids| ids.len() == 3 - s));
        }
        for participant in roster.iter() {
            let seen: Vec<&HashSet<String>> = picked
                .iter()
                .filter(|(uuid, _, _)| *uuid == participant.uuid)
                .map(|(_, _, ids)| ids)
                .collect();
            assert_eq!(seen.len(), 3);
            let union: HashSet<&String> = seen.iter().flat_map(|ids| ids.iter()).collect();
            assert_eq!(union.len(), seen.iter().map(|ids| ids.len()).sum::<usize>());
        }
    }

    #[tokio::test]
    async fn draft_requests_carry_neighbors_except_at_the_ends() {
        let emitter = FakeEmitter::obedient();
        let schema = Schema::Atom(dealt(Mode::draft(vec![1, 1]).unwrap(), "N", 2));
        let session = DraftingSession::new(preset(schema), roster(2), emitter.clone());
        session.start().await.unwrap();
        for (_, message) in emitter.requests() {
            if let ServerMessage::PickRequest {
                shift, prev, next, ..
            } = message
            {
                match shift {
                    Some(0) => assert!(prev.is_none() && next.is_some()),
                    Some(1) => assert!(prev.is_some() && next.is_none()),
                    _ => panic!("unexpected shift"),
                }
            }
        }
    }

    #[tokio::test]
    async fn sealed_mismatch_is_rejected_and_reissued_unchanged() {
        // First attempt under-picks; the second complies.
        let emitter = FakeEmitter::with(Box::new(|_, message, attempt| {
            match (message, attempt) {
                (ServerMessage::PickRequest { candidates, .. }, 1) => {
                    Ok(json!({ "picks": [candidates[0].id] }))
                }
                _ => Ok(first_picks(message)),
            }
        }));
        let schema = Schema::Atom(dealt(Mode::sealed(2, 2).unwrap(), "S", 4));
        let roster = roster(1);
        let session = DraftingSession::new(preset(schema), roster.clone(), emitter.clone());
        session.start().await.unwrap();

        assert_eq!(roster.at(0).picks().len(), 2);
        let mismatches: Vec<_> = emitter
            .notices()
            .into_iter()
            .filter(|(_, m)| {
                matches!(
                    m,
                    ServerMessage::Error {
                        code: ErrorCode::NpicksMismatch,
                        ..
                    }
                )
            })
            .collect();
        assert_eq!(mismatches.len(), 1);
        let rounds: Vec<HashSet<String>> = emitter
            .requests()
            .iter()
            .filter(|(_, m)| matches!(m, ServerMessage::PickRequest { .. }))
            .map(|(_, m)| offered(m).1)
            .collect();
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0], rounds[1]);
    }

    #[tokio::test]
    async fn seql_children_run_strictly_in_order() {
        let emitter = FakeEmitter::obedient();
        let schema = Schema::Seql(vec![
            Schema::Atom(dealt(Mode::sealed(1, 1).unwrap(), "A", 2)),
            Schema::Atom(dealt(Mode::sealed(1, 1).unwrap(), "B", 2)),
        ]);
        let session = DraftingSession::new(preset(schema), roster(2), emitter.clone());
        session.start().await.unwrap();
        let order: Vec<String> = emitter
            .requests()
            .iter()
            .filter(|(_, m)| matches!(m, ServerMessage::PickRequest { .. }))
            .map(|(_, m)| offered(m).0)
            .collect();
        assert_eq!(order, vec!["1", "1", "2", "2"]);
    }

    #[tokio::test]
    async fn all_offline_failure_aborts_with_empty_completion() {
        let emitter = FakeEmitter::with(Box::new(|_, _, _| {
            Err(DraftError::new(ErrorCode::AllOffline))
        }));
        let schema = Schema::Atom(dealt(Mode::sealed(1, 1).unwrap(), "X", 2));
        let roster = roster(2);
        let session = DraftingSession::new(preset(schema), roster.clone(), emitter.clone());
        let error = session.start().await.unwrap_err();
        assert_eq!(error.code, ErrorCode::AllOffline);
        for participant in roster.iter() {
            assert!(participant.picks().is_empty());
            assert!(emitter.notices().iter().any(|(uuid, m)| {
                *uuid == participant.uuid
                    && matches!(m, ServerMessage::DraftComplete { picks, .. } if picks.is_empty())
            }));
        }
        // The stop announcement lands before any empty completion.
        let notices = emitter.notices();
        let stopped = notices
            .iter()
            .position(|(_, m)| matches!(m, ServerMessage::DraftDidStop { .. }))
            .unwrap();
        let completed = notices
            .iter()
            .position(|(_, m)| matches!(m, ServerMessage::DraftComplete { .. }))
            .unwrap();
        assert!(stopped < completed);
    }

    #[tokio::test]
    async fn draft_mismatch_is_rejected_and_reissued_unchanged() {
        // Seat 0 under-picks its first pack once; everyone else complies.
        let offender = Uuid::from_u128(1);
        let emitter = FakeEmitter::with(Box::new(move |uuid, message, attempt| {
            match (message, attempt) {
                (ServerMessage::PickRequest { shift: Some(0), .. }, 1) if uuid == offender => {
                    Ok(json!({ "picks": [] }))
                }
                _ => Ok(first_picks(message)),
            }
        }));
        let schema = Schema::Atom(dealt(Mode::draft(vec![1, 1]).unwrap(), "D", 2));
        let roster = roster(2);
        let session = DraftingSession::new(preset(schema), roster.clone(), emitter.clone());
        session.start().await.unwrap();

        for participant in roster.iter() {
            assert_eq!(participant.picks().len(), 2);
        }
        // Exactly one mismatch notice, and only the offender got it.
        let mismatches: Vec<Uuid> = emitter
            .notices()
            .into_iter()
            .filter(|(_, m)| {
                matches!(
                    m,
                    ServerMessage::Error {
                        code: ErrorCode::NpicksMismatch,
                        ..
                    }
                )
            })
            .map(|(uuid, _)| uuid)
            .collect();
        assert_eq!(mismatches, vec![offender]);
        // The rejected pack comes back to the offender untouched.
        let reissued: Vec<HashSet<String>> = emitter
            .requests()
            .iter()
            .filter(|(uuid, m)| {
                *uuid == offender
                    && matches!(m, ServerMessage::PickRequest { .. })
                    && offered(m).0 == "1:0"
            })
            .map(|(_, m)| offered(m).1)
            .collect();
        assert_eq!(reissued.len(), 2);
        assert_eq!(reissued[0], reissued[1]);
        // The pack only sheds a card once the pick is finally accepted.
        let passed: Vec<HashSet<String>> = emitter
            .requests()
            .iter()
            .filter(|(_, m)| {
                matches!(m, ServerMessage::PickRequest { .. }) && offered(m).0 == "1:1"
            })
            .map(|(_, m)| offered(m).1)
            .collect();
        assert_eq!(passed.len(), 2);
        assert!(passed.iter().all(|ids| ids.len() == 1));
    }

    #[tokio::test]
    async fn abort_settles_outstanding_waits() {
        // Pick requests never resolve; only the abort token can.
        let emitter = FakeEmitter::with(Box::new(|_, _, _| unreachable!()));
        struct Stuck(Arc<FakeEmitter>);
        #[async_trait]
        impl Emitter for Stuck {
            async fn emit(
                &self,
                uuid: Uuid,
                message: ServerMessage,
            ) -> Result<serde_json::Value, DraftError> {
                match &message {
                    ServerMessage::PickRequest { .. } => futures::future::pending().await,
                    _ => self.0.emit(uuid, message).await,
                }
            }
            async fn notify(&self, uuid: Uuid, message: ServerMessage) {
                self.0.notify(uuid, message).await;
            }
        }
        let schema = Schema::Atom(dealt(Mode::sealed(1, 1).unwrap(), "Z", 2));
        let session = Arc::new(DraftingSession::new(
            preset(schema),
            roster(2),
            Arc::new(Stuck(emitter.clone())),
        ));
        let running = tokio::spawn({
            let session = session.clone();
            async move { session.start().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        session.abort().await;
        let error = running.await.unwrap().unwrap_err();
        assert_eq!(error.code, ErrorCode::Aborted);
        assert!(emitter.notices().iter().any(|(_, m)| {
            matches!(m, ServerMessage::DraftComplete { picks, .. } if picks.is_empty())
        }));
    }
}
