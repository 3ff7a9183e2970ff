use async_std::task;
use async_trait::async_trait;
use log::*;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::api_models::{OptionPayload, PollPayload, VoterPayload};
use crate::error::Failure;
use crate::models::{OptionId, PollAddress, PollDraft, PollId, PollResultsModel, Voter};
use crate::observe::lock;

/**
 * A poll that the service just created, together with the message hosting it
 */
#[derive(Clone, Debug, PartialEq)]
pub struct CreatedPoll {
    pub address: PollAddress,
    pub results: PollResultsModel,
}

/**
 * The remote poll service.
 *
 * Every call answers with the authoritative results as seen by the calling user.
 */
#[async_trait]
pub trait PollService: Send + Sync {
    async fn fetch_poll_results(
        &self,
        group_id: &str,
        message_id: &str,
    ) -> Result<PollResultsModel, Failure>;

    async fn submit_vote(
        &self,
        group_id: &str,
        message_id: &str,
        option_ids: &[OptionId],
    ) -> Result<PollResultsModel, Failure>;

    async fn remove_vote(&self, group_id: &str, message_id: &str)
        -> Result<PollResultsModel, Failure>;

    async fn create_poll(&self, group_id: &str, draft: &PollDraft)
        -> Result<CreatedPoll, Failure>;
}

#[derive(Debug)]
struct StoredOption {
    option_id: OptionId,
    text: String,
    voters: BTreeSet<Voter>,
}

#[derive(Debug)]
struct StoredPoll {
    poll_id: PollId,
    question: String,
    allow_multiple_answers: bool,
    options: Vec<StoredOption>,
    closed: bool,
    revision: u64,
}

impl StoredPoll {
    fn from_draft(draft: &PollDraft) -> Self {
        StoredPoll {
            poll_id: PollId::new(),
            question: draft.question.trim().to_string(),
            allow_multiple_answers: draft.allow_multiple_answers,
            options: draft
                .options
                .iter()
                .enumerate()
                .map(|(index, text)| StoredOption {
                    option_id: OptionId::from(format!("opt{}", index + 1)),
                    text: text.trim().to_string(),
                    voters: BTreeSet::new(),
                })
                .collect(),
            closed: false,
            revision: 1,
        }
    }

    fn vote(&mut self, voter: &Voter, option_ids: &[OptionId]) -> Result<(), Failure> {
        if self.closed {
            return Err(Failure::status(409, "This poll is closed."));
        }
        if option_ids.is_empty() {
            return Err(Failure::status(400, "Choose at least one option."));
        }
        if !self.allow_multiple_answers && option_ids.len() > 1 {
            return Err(Failure::status(400, "This poll accepts a single answer."));
        }
        if let Some(unknown) = option_ids
            .iter()
            .find(|id| !self.options.iter().any(|o| &o.option_id == *id))
        {
            return Err(Failure::status(
                400,
                &format!("Option {} is not part of this poll.", unknown),
            ));
        }

        for option in self.options.iter_mut() {
            let chosen = option_ids.contains(&option.option_id);
            if chosen || !self.allow_multiple_answers {
                option.voters.retain(|v| v.user_id != voter.user_id);
            }
            if chosen {
                option.voters.insert(voter.clone());
            }
        }
        self.revision += 1;
        Ok(())
    }

    fn unvote(&mut self, voter: &Voter) -> Result<(), Failure> {
        if self.closed {
            return Err(Failure::status(409, "This poll is closed."));
        }
        for option in self.options.iter_mut() {
            option.voters.retain(|v| v.user_id != voter.user_id);
        }
        self.revision += 1;
        Ok(())
    }

    /**
     * Render the poll the way it goes over the wire to `viewer`
     */
    fn payload_for(&self, viewer: &Voter) -> PollPayload {
        PollPayload {
            poll_id: Some(*self.poll_id.as_uuid()),
            question: Some(self.question.clone()),
            allow_multiple_answers: self.allow_multiple_answers,
            options: self
                .options
                .iter()
                .map(|option| OptionPayload {
                    option_id: option.option_id.to_string(),
                    text: option.text.clone(),
                    vote_count: option.voters.len() as u32,
                    voters: option
                        .voters
                        .iter()
                        .map(|voter| VoterPayload {
                            user_id: voter.user_id.clone(),
                            display_name: Some(voter.display_name.clone())
                                .filter(|name| !name.is_empty()),
                        })
                        .collect(),
                })
                .collect(),
            own_votes: self
                .options
                .iter()
                .filter(|option| option.voters.iter().any(|v| v.user_id == viewer.user_id))
                .map(|option| option.option_id.to_string())
                .collect(),
            revision: Some(self.revision),
        }
    }
}

#[derive(Debug, Default)]
struct Store {
    polls: HashMap<PollAddress, StoredPoll>,
    failures: VecDeque<Failure>,
    next_message: u64,
    calls: usize,
}

/**
 * A poll service that keeps everything in memory.
 *
 * It answers on behalf of a single signed-in `viewer`. Other people's votes can be cast
 * with `cast_as`, and failures injected with `fail_next`.
 */
#[derive(Debug)]
pub struct InMemoryPollService {
    viewer: Voter,
    latency: Duration,
    store: Mutex<Store>,
}

impl InMemoryPollService {
    pub fn new(viewer: Voter) -> Self {
        InMemoryPollService {
            viewer,
            latency: Duration::from_millis(0),
            store: Mutex::new(Store::default()),
        }
    }

    /**
     * Delay every answer, like a slow network would
     */
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /**
     * Put a poll on the message at `address` without going through `create_poll`
     */
    pub fn seed(&self, address: &PollAddress, draft: &PollDraft) -> PollId {
        let poll = StoredPoll::from_draft(draft);
        let poll_id = poll.poll_id;
        lock(&self.store).polls.insert(address.clone(), poll);
        poll_id
    }

    /**
     * Vote as somebody else
     */
    pub fn cast_as(
        &self,
        address: &PollAddress,
        voter: &Voter,
        option_ids: &[OptionId],
    ) -> Result<u64, Failure> {
        let mut store = lock(&self.store);
        let poll = store.polls.get_mut(address).ok_or_else(not_found)?;
        poll.vote(voter, option_ids)?;
        Ok(poll.revision)
    }

    pub fn close_poll(&self, address: &PollAddress) -> bool {
        match lock(&self.store).polls.get_mut(address) {
            Some(poll) => {
                poll.closed = true;
                true
            }
            None => false,
        }
    }

    /**
     * Make the next call fail with `failure` instead of doing anything
     */
    pub fn fail_next(&self, failure: Failure) {
        lock(&self.store).failures.push_back(failure);
    }

    pub fn call_count(&self) -> usize {
        lock(&self.store).calls
    }

    /**
     * Results of the poll at `address` as the viewer would get them, without counting a call
     */
    pub fn peek(&self, address: &PollAddress) -> Option<PollResultsModel> {
        let store = lock(&self.store);
        let poll = store.polls.get(address)?;
        PollResultsModel::try_from(poll.payload_for(&self.viewer)).ok()
    }

    async fn simulate_latency(&self) {
        if self.latency > Duration::from_millis(0) {
            task::sleep(self.latency).await;
        }
    }

    /**
     * Run `action` against the poll at `address` and answer with the viewer's results
     */
    fn with_poll<F>(&self, address: &PollAddress, action: F) -> Result<PollResultsModel, Failure>
    where
        F: FnOnce(&mut StoredPoll, &Voter) -> Result<(), Failure>,
    {
        let mut store = lock(&self.store);
        store.calls += 1;
        if let Some(failure) = store.failures.pop_front() {
            debug!("Injected failure for {}: {}", address, failure);
            return Err(failure);
        }

        let poll = store.polls.get_mut(address).ok_or_else(not_found)?;
        action(poll, &self.viewer)?;
        PollResultsModel::try_from(poll.payload_for(&self.viewer))
    }
}

fn not_found() -> Failure {
    Failure::status(404, "There is no poll on this message.")
}

#[async_trait]
impl PollService for InMemoryPollService {
    async fn fetch_poll_results(
        &self,
        group_id: &str,
        message_id: &str,
    ) -> Result<PollResultsModel, Failure> {
        self.simulate_latency().await;
        self.with_poll(&PollAddress::new(group_id, message_id), |_, _| Ok(()))
    }

    async fn submit_vote(
        &self,
        group_id: &str,
        message_id: &str,
        option_ids: &[OptionId],
    ) -> Result<PollResultsModel, Failure> {
        self.simulate_latency().await;
        self.with_poll(&PollAddress::new(group_id, message_id), |poll, viewer| {
            poll.vote(viewer, option_ids)
        })
    }

    async fn remove_vote(
        &self,
        group_id: &str,
        message_id: &str,
    ) -> Result<PollResultsModel, Failure> {
        self.simulate_latency().await;
        self.with_poll(&PollAddress::new(group_id, message_id), |poll, viewer| {
            poll.unvote(viewer)
        })
    }

    async fn create_poll(&self, group_id: &str, draft: &PollDraft) -> Result<CreatedPoll, Failure> {
        self.simulate_latency().await;

        let mut store = lock(&self.store);
        store.calls += 1;
        if let Some(failure) = store.failures.pop_front() {
            return Err(failure);
        }
        if draft.validate().is_err() {
            return Err(Failure::status(400, "This poll cannot be created."));
        }

        store.next_message += 1;
        let address = PollAddress::new(group_id, &format!("msg-{}", store.next_message));
        let poll = StoredPoll::from_draft(draft);
        let results = PollResultsModel::try_from(poll.payload_for(&self.viewer))?;
        info!("Created poll {} on {}", poll.poll_id, address);
        store.polls.insert(address.clone(), poll);

        Ok(CreatedPoll { address, results })
    }
}
