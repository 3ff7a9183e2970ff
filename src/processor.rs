use async_std::channel::Receiver;
use log::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::aggregate::{project, DisplayView};
use crate::config::SyncConfig;
use crate::error::{classify, Failure, PollError};
use crate::models::{OptionId, PollAddress, PollDraft, PollId, PollResultsModel, Voter};
use crate::observe::{lock, Observable};
use crate::service::PollService;
use crate::status::{SyncStatus, SyncStatusTracker};

/**
 * An optimistic change that the service has not answered yet.
 *
 * Selections are absolute, so the newest pending change alone decides what is shown.
 */
#[derive(Clone, Debug)]
struct Pending {
    generation: u64,
    selection: BTreeSet<OptionId>,
}

/**
 * Everything known about one open poll
 */
struct PollSlot {
    address: PollAddress,
    /**
     * Newest results the service has confirmed
     */
    confirmed: Arc<PollResultsModel>,
    pending: Vec<Pending>,
    generation: u64,
    published: Observable<Arc<PollResultsModel>>,
    tracker: SyncStatusTracker,
}

impl PollSlot {
    fn new(address: PollAddress, results: PollResultsModel, config: &SyncConfig) -> Self {
        let label = format!("poll {}", results.poll_id());
        let confirmed = Arc::new(results);
        PollSlot {
            address,
            published: Observable::new(Arc::clone(&confirmed)),
            confirmed,
            pending: vec![],
            generation: 0,
            tracker: SyncStatusTracker::new(&label, config.saved_reset_after),
        }
    }

    fn current(&self) -> &Arc<PollResultsModel> {
        self.published.get()
    }

    /**
     * Recompute what the display layer sees from the confirmed results and pending changes
     */
    fn publish(&mut self, user: &Voter) {
        let snapshot = match self.pending.last() {
            Some(pending) => Arc::new(self.confirmed.with_selection(user, &pending.selection)),
            None => Arc::clone(&self.confirmed),
        };
        if **self.published.get() != *snapshot {
            self.published.set(snapshot);
        }
    }

    /**
     * Show `selection` right away and number the command that asks the service for it
     */
    fn begin(&mut self, selection: BTreeSet<OptionId>, user: &Voter) -> u64 {
        self.generation += 1;
        let generation = self.generation;
        self.pending.push(Pending {
            generation,
            selection,
        });
        self.publish(user);
        self.tracker.begin(generation);
        generation
    }

    /**
     * Options and the answer mode never change after a poll is created, so results that
     * disagree on them cannot carry our pending changes.
     */
    fn check_compatible(&self, results: &PollResultsModel) -> Result<(), Failure> {
        let confirmed = &self.confirmed;
        if results.poll_id() != confirmed.poll_id() {
            return Err(Failure::Malformed(format!(
                "asked for poll {} but got poll {}",
                confirmed.poll_id(),
                results.poll_id()
            )));
        }
        if results.allow_multiple_answers() != confirmed.allow_multiple_answers() {
            return Err(Failure::Malformed(format!(
                "poll {} changed whether it allows multiple answers",
                confirmed.poll_id()
            )));
        }
        let same_options = results.options().len() == confirmed.options().len()
            && results
                .options()
                .iter()
                .zip(confirmed.options().iter())
                .all(|(got, known)| got.option_id() == known.option_id());
        if !same_options {
            return Err(Failure::Malformed(format!(
                "poll {} changed its options",
                confirmed.poll_id()
            )));
        }
        Ok(())
    }

    /**
     * Adopt `results` if they are newer than anything confirmed so far.
     *
     * Returns whether they were adopted. Results for a different poll shape are refused
     * and leave the slot untouched.
     */
    fn reconcile(&mut self, results: PollResultsModel, user: &Voter) -> Result<bool, Failure> {
        self.check_compatible(&results)?;
        let newer = results.revision() > self.confirmed.revision();
        if newer {
            self.confirmed = Arc::new(results);
        } else {
            debug!(
                "Discarding results of poll {} at revision {}, already at {}",
                self.confirmed.poll_id(),
                results.revision(),
                self.confirmed.revision()
            );
        }
        self.publish(user);
        Ok(newer)
    }

    /**
     * The command numbered `generation` succeeded with `results`.
     *
     * The service has seen that command and every one before it, so their optimistic
     * changes are no longer needed on top of the answer.
     */
    fn commit(
        &mut self,
        generation: u64,
        results: PollResultsModel,
        user: &Voter,
    ) -> Result<bool, Failure> {
        self.check_compatible(&results)?;
        self.pending.retain(|p| p.generation > generation);
        self.reconcile(results, user)
    }

    /**
     * The command numbered `generation` failed; forget its optimistic change.
     *
     * When a newer change is pending this does not alter what is shown.
     */
    fn rollback(&mut self, generation: u64, user: &Voter) {
        let superseded = self
            .pending
            .last()
            .map_or(false, |latest| latest.generation > generation);
        if superseded {
            debug!(
                "Command {} on poll {} was superseded, keeping the newer change",
                generation,
                self.confirmed.poll_id()
            );
        }
        self.pending.retain(|p| p.generation != generation);
        self.publish(user);
    }
}

struct Inner {
    service: Arc<dyn PollService>,
    user: Voter,
    config: SyncConfig,
    polls: Mutex<HashMap<PollId, PollSlot>>,
    creation: SyncStatusTracker,
    creations: AtomicU64,
}

/**
 * The only writer of poll results.
 *
 * Every vote is shown right away, sent to the service, and then either replaced by the
 * service's answer or undone. Answers are ordered by their revision, never by arrival.
 * Cloning is cheap and every clone works on the same polls.
 */
#[derive(Clone)]
pub struct VoteCommandProcessor {
    inner: Arc<Inner>,
}

impl VoteCommandProcessor {
    pub fn new(service: Arc<dyn PollService>, user: Voter, config: SyncConfig) -> Self {
        let creation = SyncStatusTracker::new("poll creation", config.saved_reset_after);
        VoteCommandProcessor {
            inner: Arc::new(Inner {
                service,
                user,
                config,
                polls: Mutex::new(HashMap::new()),
                creation,
                creations: AtomicU64::new(0),
            }),
        }
    }

    pub fn user(&self) -> &Voter {
        &self.inner.user
    }

    /**
     * Start tracking the poll on the message at `address`, typically when it is first displayed
     */
    pub async fn open(&self, address: PollAddress) -> Result<PollId, PollError> {
        debug!("Opening poll on {}", address);
        let results = self
            .inner
            .service
            .fetch_poll_results(&address.group_id, &address.message_id)
            .await
            .map_err(|failure| report(&address, &failure))?;
        self.register(address, results)
    }

    /**
     * Stop tracking a poll, typically when its message goes off screen.
     *
     * Answers still on their way for it are dropped.
     */
    pub fn close(&self, poll_id: PollId) -> bool {
        let removed = lock(&self.inner.polls).remove(&poll_id).is_some();
        if removed {
            debug!("Closed poll {}", poll_id);
        }
        removed
    }

    pub fn is_open(&self, poll_id: PollId) -> bool {
        lock(&self.inner.polls).contains_key(&poll_id)
    }

    fn register(
        &self,
        address: PollAddress,
        results: PollResultsModel,
    ) -> Result<PollId, PollError> {
        let poll_id = results.poll_id();
        let mut polls = lock(&self.inner.polls);
        match polls.get_mut(&poll_id) {
            Some(slot) => {
                slot
                    .reconcile(results, &self.inner.user)
                    .map_err(|failure| report(&address, &failure))?;
            }
            None => {
                info!("Tracking poll {} on {}", poll_id, address);
                polls.insert(poll_id, PollSlot::new(address, results, &self.inner.config));
            }
        }
        Ok(poll_id)
    }

    /**
     * Vote for `option_ids`.
     *
     * On a single-answer poll this replaces the user's earlier vote; on a multi-answer poll
     * the options are added to the ones already chosen.
     */
    pub async fn submit_vote(
        &self,
        poll_id: PollId,
        option_ids: &[OptionId],
    ) -> Result<Arc<PollResultsModel>, PollError> {
        let (address, generation) = {
            let mut polls = lock(&self.inner.polls);
            let slot = polls.get_mut(&poll_id).ok_or_else(|| unknown_poll(poll_id))?;
            let selection = target_selection(slot.current(), option_ids)?;
            let generation = slot.begin(selection, &self.inner.user);
            (slot.address.clone(), generation)
        };
        debug!(
            "Command {} on poll {}: vote for {:?}",
            generation, poll_id, option_ids
        );

        let outcome = self
            .inner
            .service
            .submit_vote(&address.group_id, &address.message_id, option_ids)
            .await;
        self.settle(poll_id, generation, outcome).await
    }

    /**
     * Take back every vote of the user on this poll
     */
    pub async fn remove_vote(&self, poll_id: PollId) -> Result<Arc<PollResultsModel>, PollError> {
        let (address, generation) = {
            let mut polls = lock(&self.inner.polls);
            let slot = polls.get_mut(&poll_id).ok_or_else(|| unknown_poll(poll_id))?;
            let generation = slot.begin(BTreeSet::new(), &self.inner.user);
            (slot.address.clone(), generation)
        };
        debug!("Command {} on poll {}: remove vote", generation, poll_id);

        let outcome = self
            .inner
            .service
            .remove_vote(&address.group_id, &address.message_id)
            .await;
        self.settle(poll_id, generation, outcome).await
    }

    /**
     * Fetch the latest results without changing anything.
     *
     * Does not touch the sync indicator, and a failure leaves the results as they were.
     */
    pub async fn fetch_results(&self, poll_id: PollId) -> Result<Arc<PollResultsModel>, PollError> {
        let address = {
            let polls = lock(&self.inner.polls);
            let slot = polls.get(&poll_id).ok_or_else(|| unknown_poll(poll_id))?;
            slot.address.clone()
        };

        let results = self
            .inner
            .service
            .fetch_poll_results(&address.group_id, &address.message_id)
            .await
            .map_err(|failure| report(&address, &failure))?;

        let mut polls = lock(&self.inner.polls);
        match polls.get_mut(&poll_id) {
            Some(slot) => {
                slot
                    .reconcile(results, &self.inner.user)
                    .map_err(|failure| report(&address, &failure))?;
                Ok(Arc::clone(slot.current()))
            }
            None => Ok(Arc::new(results)),
        }
    }

    /**
     * Create a new poll in `group_id` and start tracking it
     */
    pub async fn create_poll(&self, group_id: &str, draft: PollDraft) -> Result<PollId, PollError> {
        draft.validate()?;

        let operation = self.inner.creations.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.creation.begin(operation);

        match self.inner.service.create_poll(group_id, &draft).await {
            Ok(created) => {
                self.inner.creation.succeed(operation);
                self.register(created.address, created.results)
            }
            Err(failure) => {
                let error = classify(&failure);
                warn!("Could not create poll in {}: {} ({})", group_id, error, failure);
                self.inner.creation.fail(operation, error.clone());
                Err(error)
            }
        }
    }

    /**
     * Apply the service's answer to command `generation`
     */
    async fn settle(
        &self,
        poll_id: PollId,
        generation: u64,
        outcome: Result<PollResultsModel, Failure>,
    ) -> Result<Arc<PollResultsModel>, PollError> {
        let result = {
            let mut polls = lock(&self.inner.polls);
            let slot = match polls.get_mut(&poll_id) {
                Some(slot) => slot,
                None => {
                    debug!("Poll {} was closed before command {} finished", poll_id, generation);
                    return outcome.map(Arc::new).map_err(|failure| classify(&failure));
                }
            };

            let committed = outcome.and_then(|results| {
                let revision = results.revision();
                slot
                    .commit(generation, results, &self.inner.user)
                    .map(|adopted| (adopted, revision))
            });
            match committed {
                Ok((adopted, revision)) => {
                    if adopted {
                        debug!(
                            "Command {} on poll {} committed revision {}",
                            generation, poll_id, revision
                        );
                    }
                    slot.tracker.succeed(generation);
                    Ok(Arc::clone(slot.current()))
                }
                Err(failure) => {
                    let error = report(&slot.address, &failure);
                    slot.rollback(generation, &self.inner.user);
                    slot.tracker.fail(generation, error.clone());
                    Err(error)
                }
            }
        };

        if let Err(error) = &result {
            if error.suggests_refresh() && self.inner.config.refresh_on_conflict {
                info!("Refreshing poll {} after a conflict", poll_id);
                if let Err(refresh) = self.fetch_results(poll_id).await {
                    warn!("Refreshing poll {} failed: {}", poll_id, refresh);
                }
            }
        }
        result
    }

    /**
     * The results as currently shown, including changes the service has not confirmed yet
     */
    pub fn snapshot(&self, poll_id: PollId) -> Option<Arc<PollResultsModel>> {
        lock(&self.inner.polls)
            .get(&poll_id)
            .map(|slot| Arc::clone(slot.current()))
    }

    pub fn view(&self, poll_id: PollId) -> Option<DisplayView> {
        self.snapshot(poll_id).map(|results| project(&results))
    }

    /**
     * Whether the shown results have all been confirmed by the service
     */
    pub fn is_settled(&self, poll_id: PollId) -> Option<bool> {
        lock(&self.inner.polls)
            .get(&poll_id)
            .map(|slot| slot.pending.is_empty())
    }

    pub fn status(&self, poll_id: PollId) -> Option<SyncStatus> {
        lock(&self.inner.polls)
            .get(&poll_id)
            .map(|slot| slot.tracker.status())
    }

    pub fn subscribe_results(&self, poll_id: PollId) -> Option<Receiver<Arc<PollResultsModel>>> {
        lock(&self.inner.polls)
            .get_mut(&poll_id)
            .map(|slot| slot.published.subscribe())
    }

    pub fn subscribe_status(&self, poll_id: PollId) -> Option<Receiver<SyncStatus>> {
        lock(&self.inner.polls)
            .get(&poll_id)
            .map(|slot| slot.tracker.subscribe())
    }

    /**
     * The user dismissed the error shown for this poll
     */
    pub fn acknowledge(&self, poll_id: PollId) -> bool {
        lock(&self.inner.polls)
            .get(&poll_id)
            .map_or(false, |slot| slot.tracker.acknowledge())
    }

    pub fn creation_status(&self) -> SyncStatus {
        self.inner.creation.status()
    }

    pub fn subscribe_creation_status(&self) -> Receiver<SyncStatus> {
        self.inner.creation.subscribe()
    }
}

fn unknown_poll(poll_id: PollId) -> PollError {
    PollError::not_found(format!("Poll {} is not open", poll_id))
}

fn report(address: &PollAddress, failure: &Failure) -> PollError {
    let error = classify(failure);
    warn!("Poll on {} failed: {} ({})", address, error, failure);
    error
}

/**
 * What the user's selection becomes after voting for `option_ids`
 */
fn target_selection(
    current: &PollResultsModel,
    option_ids: &[OptionId],
) -> Result<BTreeSet<OptionId>, PollError> {
    if option_ids.is_empty() {
        return Err(PollError::validation("Choose at least one option"));
    }
    if let Some(unknown) = option_ids.iter().find(|id| current.option(id).is_none()) {
        return Err(PollError::validation(format!(
            "Option {} is not part of this poll",
            unknown
        )));
    }

    if current.allow_multiple_answers() {
        let mut selection = current.current_user_selection().clone();
        selection.extend(option_ids.iter().cloned());
        Ok(selection)
    } else if option_ids.len() == 1 {
        Ok(option_ids.iter().cloned().collect())
    } else {
        Err(PollError::validation("This poll accepts a single answer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PollOption;

    fn poll(allow_multiple_answers: bool, selected: &[&str]) -> PollResultsModel {
        let me = Voter::new("me", "Me");
        let options = ["a", "b", "c"]
            .iter()
            .map(|id| {
                let mut voters = BTreeSet::new();
                if selected.contains(id) {
                    voters.insert(me.clone());
                }
                PollOption::new(OptionId::from(*id), &id.to_uppercase(), voters)
            })
            .collect();
        let selection = selected.iter().map(|id| OptionId::from(*id)).collect();
        PollResultsModel::new(PollId::new(), "?", allow_multiple_answers, options, selection, 1)
    }

    fn ids(ids: &[&str]) -> Vec<OptionId> {
        ids.iter().map(|id| OptionId::from(*id)).collect()
    }

    fn set(ids: &[&str]) -> BTreeSet<OptionId> {
        ids.iter().map(|id| OptionId::from(*id)).collect()
    }

    #[test]
    fn test_single_answer_replaces_selection() {
        let selection = target_selection(&poll(false, &["a"]), &ids(&["b"])).unwrap();
        assert_eq!(selection, set(&["b"]));
    }

    #[test]
    fn test_multi_answer_extends_selection() {
        let selection = target_selection(&poll(true, &["a"]), &ids(&["c"])).unwrap();
        assert_eq!(selection, set(&["a", "c"]));
    }

    #[test]
    fn test_preconditions() {
        assert!(target_selection(&poll(true, &[]), &[]).is_err());
        assert!(target_selection(&poll(false, &[]), &ids(&["a", "b"])).is_err());
        assert!(target_selection(&poll(false, &[]), &ids(&["a", "a"])).is_err());
        assert!(target_selection(&poll(true, &[]), &ids(&["zz"])).is_err());
    }

    #[test]
    fn test_rollback_restores_previous_pending_change() {
        let me = Voter::new("me", "Me");
        let config = SyncConfig::default();
        let mut slot = PollSlot::new(PollAddress::new("g", "m"), poll(false, &[]), &config);
        let before = Arc::clone(slot.current());

        let first = slot.begin(set(&["a"]), &me);
        let shown_after_first = Arc::clone(slot.current());
        let second = slot.begin(set(&["b"]), &me);

        slot.rollback(second, &me);
        assert_eq!(slot.current(), &shown_after_first);
        slot.rollback(first, &me);
        assert_eq!(slot.current(), &before);
        assert!(slot.pending.is_empty());
    }

    #[test]
    fn test_rollback_of_superseded_change_keeps_newer() {
        let me = Voter::new("me", "Me");
        let config = SyncConfig::default();
        let mut slot = PollSlot::new(PollAddress::new("g", "m"), poll(false, &[]), &config);

        let first = slot.begin(set(&["a"]), &me);
        slot.begin(set(&["b"]), &me);
        let shown = Arc::clone(slot.current());

        slot.rollback(first, &me);
        assert_eq!(slot.current(), &shown);
        assert_eq!(slot.current().current_user_selection(), &set(&["b"]));
    }

    #[test]
    fn test_results_for_another_poll_shape_are_refused() {
        let me = Voter::new("me", "Me");
        let config = SyncConfig::default();
        let confirmed = poll(false, &[]);
        let poll_id = confirmed.poll_id();
        let mut slot = PollSlot::new(PollAddress::new("g", "m"), confirmed, &config);

        let first = slot.begin(set(&["a"]), &me);
        slot.begin(set(&["b"]), &me);
        let shown = Arc::clone(slot.current());

        let voters: BTreeSet<Voter> = vec![me.clone()].into_iter().collect();
        let fewer_options = PollResultsModel::new(
            poll_id,
            "?",
            false,
            vec![PollOption::new(OptionId::from("a"), "A", voters)],
            set(&["a"]),
            2,
        );
        assert!(matches!(
            slot.commit(first, fewer_options, &me),
            Err(Failure::Malformed(_))
        ));

        let now_multi = PollResultsModel::new(
            poll_id,
            "?",
            true,
            poll(true, &["a"]).options().to_vec(),
            set(&["a"]),
            3,
        );
        assert!(matches!(
            slot.reconcile(now_multi, &me),
            Err(Failure::Malformed(_))
        ));

        assert_eq!(slot.current(), &shown);
        assert_eq!(slot.confirmed.revision(), 1);
        assert_eq!(slot.pending.len(), 2);
    }
}
