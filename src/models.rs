use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::error::PollError;

/**
 * Opaque identifier of a poll, assigned by the remote service
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollId(Uuid);

impl PollId {
    pub fn new() -> Self {
        PollId(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        PollId(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PollId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionId(String);

impl OptionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OptionId {
    fn from(id: &str) -> Self {
        OptionId(id.to_string())
    }
}

impl From<String> for OptionId {
    fn from(id: String) -> Self {
        OptionId(id)
    }
}

impl fmt::Display for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/**
 * Somebody who cast a vote
 */
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Voter {
    pub user_id: String,
    /**
     * May be empty when the service does not know the user's name
     */
    #[serde(default)]
    pub display_name: String,
}

impl Voter {
    pub fn new(user_id: &str, display_name: &str) -> Self {
        Voter {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
        }
    }
}

/**
 * The chat message hosting a poll, which is how the remote service addresses it
 */
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PollAddress {
    pub group_id: String,
    pub message_id: String,
}

impl PollAddress {
    pub fn new(group_id: &str, message_id: &str) -> Self {
        PollAddress {
            group_id: group_id.to_string(),
            message_id: message_id.to_string(),
        }
    }
}

impl fmt::Display for PollAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_id, self.message_id)
    }
}

/**
 * User-provided details to create a poll
 */
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollDraft {
    pub question: String,
    /**
     * Just the text of each option, in display order
     */
    pub options: Vec<String>,
    #[serde(default)]
    pub allow_multiple_answers: bool,
}

impl PollDraft {
    /**
     * Reject drafts the service would refuse anyway, before anything goes over the wire
     */
    pub fn validate(&self) -> Result<(), PollError> {
        if self.question.trim().is_empty() {
            return Err(PollError::validation("A poll needs a question"));
        }
        if self.options.len() < 2 {
            return Err(PollError::validation("A poll needs at least two options"));
        }

        let mut seen = HashSet::new();
        for text in self.options.iter() {
            let text = text.trim();
            if text.is_empty() {
                return Err(PollError::validation("Poll options cannot be blank"));
            }
            if !seen.insert(text.to_lowercase()) {
                return Err(PollError::validation(format!(
                    "The option \"{}\" appears more than once",
                    text
                )));
            }
        }
        Ok(())
    }
}

/**
 * Ways a poll snapshot can be internally inconsistent
 */
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("poll has no options")]
    NoOptions,
    #[error("option `{0}` appears more than once")]
    DuplicateOption(OptionId),
    #[error("option `{option}` counts {count} votes but lists {voters} voters")]
    CountMismatch {
        option: OptionId,
        count: u32,
        voters: usize,
    },
    #[error("selected option `{0}` is not part of the poll")]
    UnknownSelection(OptionId),
    #[error("single-answer poll has {0} selected options")]
    MultipleSelections(usize),
    #[error("user `{0}` voted for more than one option of a single-answer poll")]
    DoubleVote(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PollOption {
    option_id: OptionId,
    text: String,
    vote_count: u32,
    voters: BTreeSet<Voter>,
}

impl PollOption {
    /**
     * An option whose count is taken from its voters
     */
    pub fn new(option_id: OptionId, text: &str, voters: BTreeSet<Voter>) -> Self {
        let vote_count = voters.len() as u32;
        PollOption {
            option_id,
            text: text.to_string(),
            vote_count,
            voters,
        }
    }

    /**
     * An option with a count reported separately from its voters, as the service sends it.
     *
     * Whether the two agree is checked when the option becomes part of a snapshot.
     */
    pub fn with_count(
        option_id: OptionId,
        text: &str,
        vote_count: u32,
        voters: BTreeSet<Voter>,
    ) -> Self {
        PollOption {
            option_id,
            text: text.to_string(),
            vote_count,
            voters,
        }
    }

    pub fn option_id(&self) -> &OptionId {
        &self.option_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn vote_count(&self) -> u32 {
        self.vote_count
    }

    pub fn voters(&self) -> &BTreeSet<Voter> {
        &self.voters
    }

    pub fn has_voter(&self, user_id: &str) -> bool {
        self.voters.iter().any(|v| v.user_id == user_id)
    }
}

/**
 * Immutable snapshot of a poll and its results.
 *
 * Every change produces a new snapshot, so rolling back is just keeping the old one.
 */
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PollResultsModel {
    poll_id: PollId,
    question: String,
    allow_multiple_answers: bool,
    options: Vec<PollOption>,
    current_user_selection: BTreeSet<OptionId>,
    revision: u64,
}

impl PollResultsModel {
    /**
     * Build a snapshot that is known to be consistent.
     *
     * Panics when it is not: an inconsistent snapshot built locally is a logic error.
     */
    pub fn new(
        poll_id: PollId,
        question: &str,
        allow_multiple_answers: bool,
        options: Vec<PollOption>,
        current_user_selection: BTreeSet<OptionId>,
        revision: u64,
    ) -> Self {
        match Self::try_new(
            poll_id,
            question,
            allow_multiple_answers,
            options,
            current_user_selection,
            revision,
        ) {
            Ok(model) => model,
            Err(violation) => panic!("invalid snapshot of poll {}: {}", poll_id, violation),
        }
    }

    /**
     * Build a snapshot from data that may be inconsistent, such as a server response
     */
    pub fn try_new(
        poll_id: PollId,
        question: &str,
        allow_multiple_answers: bool,
        options: Vec<PollOption>,
        current_user_selection: BTreeSet<OptionId>,
        revision: u64,
    ) -> Result<Self, InvariantViolation> {
        let model = PollResultsModel {
            poll_id,
            question: question.to_string(),
            allow_multiple_answers,
            options,
            current_user_selection,
            revision,
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), InvariantViolation> {
        if self.options.is_empty() {
            return Err(InvariantViolation::NoOptions);
        }

        let mut ids = HashSet::new();
        for option in self.options.iter() {
            if !ids.insert(&option.option_id) {
                return Err(InvariantViolation::DuplicateOption(option.option_id.clone()));
            }
            if option.vote_count as usize != option.voters.len() {
                return Err(InvariantViolation::CountMismatch {
                    option: option.option_id.clone(),
                    count: option.vote_count,
                    voters: option.voters.len(),
                });
            }
        }

        if let Some(unknown) = self
            .current_user_selection
            .iter()
            .find(|id| !ids.contains(id))
        {
            return Err(InvariantViolation::UnknownSelection(unknown.clone()));
        }

        if !self.allow_multiple_answers {
            if self.current_user_selection.len() > 1 {
                return Err(InvariantViolation::MultipleSelections(
                    self.current_user_selection.len(),
                ));
            }

            let mut voted: HashMap<&str, &OptionId> = HashMap::new();
            for option in self.options.iter() {
                for voter in option.voters.iter() {
                    if voted.insert(&voter.user_id, &option.option_id).is_some() {
                        return Err(InvariantViolation::DoubleVote(voter.user_id.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn poll_id(&self) -> PollId {
        self.poll_id
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn allow_multiple_answers(&self) -> bool {
        self.allow_multiple_answers
    }

    pub fn options(&self) -> &[PollOption] {
        &self.options
    }

    pub fn option(&self, option_id: &OptionId) -> Option<&PollOption> {
        self.options.iter().find(|o| &o.option_id == option_id)
    }

    pub fn current_user_selection(&self) -> &BTreeSet<OptionId> {
        &self.current_user_selection
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn total_votes(&self) -> u32 {
        self.options.iter().map(|o| o.vote_count).sum()
    }

    /**
     * A copy of this snapshot in which `voter` has voted for exactly `selection`.
     *
     * The revision is kept: only the service hands out new revisions.
     */
    pub fn with_selection(&self, voter: &Voter, selection: &BTreeSet<OptionId>) -> Self {
        let options = self
            .options
            .iter()
            .map(|option| {
                let mut voters: BTreeSet<Voter> = option
                    .voters
                    .iter()
                    .filter(|v| v.user_id != voter.user_id)
                    .cloned()
                    .collect();
                if selection.contains(&option.option_id) {
                    voters.insert(voter.clone());
                }
                PollOption::new(option.option_id.clone(), &option.text, voters)
            })
            .collect();

        PollResultsModel::new(
            self.poll_id,
            &self.question,
            self.allow_multiple_answers,
            options,
            selection.clone(),
            self.revision,
        )
    }
}
