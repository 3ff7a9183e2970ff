use serde::Serialize;
use std::cmp::Reverse;

use crate::models::{OptionId, PollId, PollResultsModel, Voter};

/**
 * Everything the display layer needs to render a poll
 */
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DisplayView {
    pub poll_id: PollId,
    pub question: String,
    pub allow_multiple_answers: bool,
    pub revision: u64,
    pub total_votes: u32,
    /**
     * Most votes first
     */
    pub options: Vec<OptionView>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OptionView {
    pub option_id: OptionId,
    pub text: String,
    /**
     * Where the option sits in the poll as it was created
     */
    pub position: usize,
    pub vote_count: u32,
    pub percentage: u32,
    pub selected: bool,
    pub voters: Vec<VoterBadge>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VoterBadge {
    pub user_id: String,
    pub display_name: String,
    pub initials: String,
}

impl From<&Voter> for VoterBadge {
    fn from(voter: &Voter) -> Self {
        VoterBadge {
            user_id: voter.user_id.clone(),
            display_name: voter.display_name.clone(),
            initials: initials(&voter.display_name),
        }
    }
}

/**
 * Rank the options of `model` for display.
 *
 * Options with the same number of votes keep their original order, so nothing jumps
 * around alphabetically while votes come in.
 */
pub fn project(model: &PollResultsModel) -> DisplayView {
    let total_votes = model.total_votes();

    let mut options: Vec<OptionView> = model
        .options()
        .iter()
        .enumerate()
        .map(|(position, option)| OptionView {
            option_id: option.option_id().clone(),
            text: option.text().to_string(),
            position,
            vote_count: option.vote_count(),
            percentage: percentage(option.vote_count(), total_votes),
            selected: model.current_user_selection().contains(option.option_id()),
            voters: option.voters().iter().map(VoterBadge::from).collect(),
        })
        .collect();
    // sort_by_key is stable
    options.sort_by_key(|option| Reverse(option.vote_count));

    DisplayView {
        poll_id: model.poll_id(),
        question: model.question().to_string(),
        allow_multiple_answers: model.allow_multiple_answers(),
        revision: model.revision(),
        total_votes,
        options,
    }
}

/**
 * Share of `total` as a whole percent, rounded half up.
 *
 * Rounded shares of a poll do not always add up to exactly 100.
 */
pub fn percentage(count: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let (count, total) = (u64::from(count), u64::from(total));
    ((count * 200 + total) / (total * 2)) as u32
}

/**
 * Two letters standing in for an avatar: "Ada Lovelace" becomes "AL", "ada" becomes "AD"
 */
pub fn initials(display_name: &str) -> String {
    let words: Vec<&str> = display_name.split_whitespace().collect();
    let letters: String = match words.as_slice() {
        [] => return "?".to_string(),
        [word] => word.chars().take(2).collect(),
        [first, .., last] => first.chars().take(1).chain(last.chars().take(1)).collect(),
    };
    letters.to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PollOption;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn poll_with_counts(counts: &[u32]) -> PollResultsModel {
        let options = counts
            .iter()
            .enumerate()
            .map(|(index, count)| {
                let voters: BTreeSet<Voter> = (0..*count)
                    .map(|n| Voter::new(&format!("user-{}", n), &format!("User {}", n)))
                    .collect();
                PollOption::new(
                    OptionId::from(format!("idx{}", index)),
                    &format!("Option {}", index),
                    voters,
                )
            })
            .collect();
        PollResultsModel::new(PollId::new(), "Which?", true, options, BTreeSet::new(), 1)
    }

    fn order(view: &DisplayView) -> Vec<usize> {
        view.options.iter().map(|o| o.position).collect()
    }

    #[test]
    fn test_ties_keep_original_order() {
        let view = project(&poll_with_counts(&[3, 5, 5]));
        assert_eq!(order(&view), vec![1, 2, 0]);
        assert_eq!(view.total_votes, 13);
    }

    #[test]
    fn test_percentages() {
        let view = project(&poll_with_counts(&[1, 1, 1]));
        let shares: Vec<u32> = view.options.iter().map(|o| o.percentage).collect();
        assert_eq!(shares, vec![33, 33, 33]);

        let view = project(&poll_with_counts(&[1, 0, 1]));
        let shares: Vec<u32> = view.options.iter().map(|o| o.percentage).collect();
        assert_eq!(shares, vec![50, 50, 0]);

        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(2, 3), 67);
    }

    #[test]
    fn test_no_votes_is_zero_percent() {
        let view = project(&poll_with_counts(&[0, 0]));
        assert!(view.options.iter().all(|o| o.percentage == 0));
        assert_eq!(order(&view), vec![0, 1]);
    }

    #[test]
    fn test_initials() {
        assert_eq!(initials("Ada Lovelace"), "AL");
        assert_eq!(initials("grace brewster murray hopper"), "GH");
        assert_eq!(initials("linus"), "LI");
        assert_eq!(initials("Q"), "Q");
        assert_eq!(initials("  "), "?");
        assert_eq!(initials(""), "?");
        assert_eq!(initials("émile zola"), "ÉZ");
    }

    #[test]
    fn test_selection_and_badges() {
        let me = Voter::new("me", "Mary Ellen");
        let mut selection = BTreeSet::new();
        selection.insert(OptionId::from("idx0"));
        let model = poll_with_counts(&[0, 2]).with_selection(&me, &selection);

        let view = project(&model);
        let mine = view.options.iter().find(|o| o.selected).unwrap();
        assert_eq!(mine.option_id, OptionId::from("idx0"));
        assert_eq!(mine.voters[0].initials, "ME");
        assert!(!view.options.iter().find(|o| o.position == 1).unwrap().selected);
    }

    proptest! {
        #[test]
        fn prop_ranking_is_descending_and_stable(counts in prop::collection::vec(0u32..6, 1..8)) {
            let view = project(&poll_with_counts(&counts));
            prop_assert_eq!(view.options.len(), counts.len());
            for pair in view.options.windows(2) {
                prop_assert!(pair[0].vote_count >= pair[1].vote_count);
                if pair[0].vote_count == pair[1].vote_count {
                    prop_assert!(pair[0].position < pair[1].position);
                }
            }
            for option in view.options.iter() {
                prop_assert_eq!(option.vote_count, counts[option.position]);
                prop_assert!(option.percentage <= 100);
            }
        }
    }
}
