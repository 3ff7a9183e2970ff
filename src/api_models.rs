use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::Failure;
use crate::models::{OptionId, PollId, PollOption, PollResultsModel, Voter};

/**
 * Poll results as the service sends them.
 *
 * Fields the service may leave out are optional here; a response lacking one of them is
 * turned into `Failure::MissingField` rather than a snapshot.
 */
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollPayload {
    pub poll_id: Option<Uuid>,
    pub question: Option<String>,
    #[serde(default)]
    pub allow_multiple_answers: bool,
    #[serde(default)]
    pub options: Vec<OptionPayload>,
    /**
     * Options the requesting user voted for
     */
    #[serde(default)]
    pub own_votes: Vec<String>,
    pub revision: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionPayload {
    pub option_id: String,
    pub text: String,
    pub vote_count: u32,
    #[serde(default)]
    pub voters: Vec<VoterPayload>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterPayload {
    pub user_id: String,
    pub display_name: Option<String>,
}

impl PollPayload {
    /**
     * Decode a response body straight into a snapshot
     */
    pub fn from_json(body: &str) -> Result<PollResultsModel, Failure> {
        let payload: PollPayload =
            serde_json::from_str(body).map_err(|err| Failure::Malformed(err.to_string()))?;
        PollResultsModel::try_from(payload)
    }
}

impl TryFrom<PollPayload> for PollResultsModel {
    type Error = Failure;

    fn try_from(payload: PollPayload) -> Result<Self, Self::Error> {
        let poll_id = payload
            .poll_id
            .ok_or_else(|| Failure::MissingField("pollId".to_string()))?;
        let question = payload
            .question
            .ok_or_else(|| Failure::MissingField("question".to_string()))?;
        let revision = payload
            .revision
            .ok_or_else(|| Failure::MissingField("revision".to_string()))?;

        let options = payload
            .options
            .into_iter()
            .map(|option| {
                let voters: BTreeSet<Voter> = option
                    .voters
                    .into_iter()
                    .map(|voter| Voter {
                        user_id: voter.user_id,
                        display_name: voter.display_name.unwrap_or_default(),
                    })
                    .collect();
                PollOption::with_count(
                    OptionId::from(option.option_id),
                    &option.text,
                    option.vote_count,
                    voters,
                )
            })
            .collect();
        let selection = payload.own_votes.into_iter().map(OptionId::from).collect();

        PollResultsModel::try_new(
            PollId::from_uuid(poll_id),
            &question,
            payload.allow_multiple_answers,
            options,
            selection,
            revision,
        )
        .map_err(|violation| Failure::Malformed(violation.to_string()))
    }
}
