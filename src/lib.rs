/*!
 * Keeps the polls shown in a chat client in step with the poll service.
 *
 * Votes are shown as soon as they are cast, then confirmed or undone once the service
 * answers. A "saving / saved / error" indicator follows each poll along the way.
 */
pub mod aggregate;
pub mod api_models;
pub mod config;
pub mod error;
pub mod models;
pub mod observe;
pub mod processor;
pub mod service;
pub mod status;

pub use aggregate::{project, DisplayView, OptionView, VoterBadge};
pub use config::{ConfigError, SyncConfig};
pub use error::{classify, Failure, PollError, PollErrorKind};
pub use models::{OptionId, PollAddress, PollDraft, PollId, PollOption, PollResultsModel, Voter};
pub use processor::VoteCommandProcessor;
pub use service::{CreatedPoll, InMemoryPollService, PollService};
pub use status::{SyncState, SyncStatus, SyncStatusTracker};
