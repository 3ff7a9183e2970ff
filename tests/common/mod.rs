#![allow(dead_code)]

use async_std::channel::{bounded, Sender};
use async_std::task;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use pollsync::{
    CreatedPoll, Failure, InMemoryPollService, OptionId, PollAddress, PollDraft, PollResultsModel,
    PollService, SyncConfig, Voter,
};

pub fn me() -> Voter {
    Voter::new("me", "Sam Tester")
}

pub fn others(count: usize) -> Vec<Voter> {
    (0..count)
        .map(|n| Voter::new(&format!("other-{}", n), &format!("Other {}", n)))
        .collect()
}

pub fn address() -> PollAddress {
    PollAddress::new("group-1", "message-1")
}

pub fn colors(allow_multiple_answers: bool) -> PollDraft {
    PollDraft {
        question: "Favourite colour?".to_string(),
        options: vec!["Red".to_string(), "Blue".to_string()],
        allow_multiple_answers,
    }
}

/**
 * Keeps "saved" on screen for the whole test
 */
pub fn config() -> SyncConfig {
    SyncConfig::default().with_saved_reset_after(Duration::from_secs(60))
}

pub fn ids(ids: &[&str]) -> Vec<OptionId> {
    ids.iter().map(|id| OptionId::from(*id)).collect()
}

/**
 * Wraps the in-memory service so that votes reach the service right away but their
 * answers are held back until the test releases them, in any order it likes.
 */
pub struct GatedService {
    inner: Arc<InMemoryPollService>,
    gates: Mutex<Vec<Sender<Option<PollResultsModel>>>>,
}

impl GatedService {
    pub fn new(inner: Arc<InMemoryPollService>) -> Self {
        GatedService {
            inner,
            gates: Mutex::new(vec![]),
        }
    }

    fn gates(&self) -> MutexGuard<'_, Vec<Sender<Option<PollResultsModel>>>> {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn held(&self) -> usize {
        self.gates().len()
    }

    /**
     * Wait until `count` answers are being held back
     */
    pub async fn wait_for(&self, count: usize) {
        for _ in 0..2000 {
            if self.held() >= count {
                return;
            }
            task::sleep(Duration::from_millis(1)).await;
        }
        panic!("expected {} held answers, got {}", count, self.held());
    }

    /**
     * Let the answer to the `index`th vote call through
     */
    pub fn release(&self, index: usize) {
        self.gates()[index].try_send(None).unwrap();
    }

    /**
     * Answer the `index`th vote call with `results` instead of what the service said
     */
    pub fn release_with(&self, index: usize, results: PollResultsModel) {
        self.gates()[index].try_send(Some(results)).unwrap();
    }

    async fn hold(
        &self,
        answer: Result<PollResultsModel, Failure>,
    ) -> Result<PollResultsModel, Failure> {
        let (sender, receiver) = bounded(1);
        self.gates().push(sender);
        match receiver.recv().await.unwrap() {
            Some(replacement) => Ok(replacement),
            None => answer,
        }
    }
}

#[async_trait]
impl PollService for GatedService {
    async fn fetch_poll_results(
        &self,
        group_id: &str,
        message_id: &str,
    ) -> Result<PollResultsModel, Failure> {
        self.inner.fetch_poll_results(group_id, message_id).await
    }

    async fn submit_vote(
        &self,
        group_id: &str,
        message_id: &str,
        option_ids: &[OptionId],
    ) -> Result<PollResultsModel, Failure> {
        let answer = self.inner.submit_vote(group_id, message_id, option_ids).await;
        self.hold(answer).await
    }

    async fn remove_vote(
        &self,
        group_id: &str,
        message_id: &str,
    ) -> Result<PollResultsModel, Failure> {
        let answer = self.inner.remove_vote(group_id, message_id).await;
        self.hold(answer).await
    }

    async fn create_poll(&self, group_id: &str, draft: &PollDraft) -> Result<CreatedPoll, Failure> {
        self.inner.create_poll(group_id, draft).await
    }
}
