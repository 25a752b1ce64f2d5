use crate::{Answer, DecisionPoint, ValidationError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Header placed between the user's description and the merged answers.
pub const CLARIFICATIONS_HEADER: &str = "User clarifications:";

/// Where a [`ClarificationSession`] is in its single clarification round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "index", rename_all = "snake_case")]
pub enum SessionState {
    /// Extraction has not produced decision points yet.
    AwaitingQuestions,
    /// Decision point at this index is being shown.
    Presenting(usize),
    /// The escape hatch of the decision point at this index was chosen and
    /// free text is expected. No answer has been recorded for it yet.
    AwaitingCustomText(usize),
    /// Every decision point has an answer.
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Clarification questions were already loaded")]
    AlreadyLoaded,

    #[error("No question is being presented")]
    NotPresenting,

    #[error("Question {decision_id} has no option '{option_id}'")]
    UnknownOption {
        decision_id: String,
        option_id: String,
    },

    #[error("No custom answer was requested")]
    NotAwaitingCustomText,

    #[error("Clarification incomplete: {answered} of {total} questions answered")]
    Incomplete { answered: usize, total: usize },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// One clarification round: the decision points, a cursor, and the answers
/// collected so far in resolution order.
///
/// Dropping the session (see [`ClarificationSession::abandon`]) is the only
/// way back to description entry; nothing of a partial session survives.
#[derive(Debug, Clone)]
pub struct ClarificationSession {
    id: Uuid,
    decisions: Vec<DecisionPoint>,
    state: SessionState,
    answers: IndexMap<String, Answer>,
}

impl Default for ClarificationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ClarificationSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            decisions: Vec::new(),
            state: SessionState::AwaitingQuestions,
            answers: IndexMap::new(),
        }
    }

    /// Start a session already loaded with `decisions`.
    pub fn with_decisions(decisions: Vec<DecisionPoint>) -> Self {
        let mut session = Self::new();
        session.decisions = unique_by_id(decisions);
        session.state = session.first_state();
        session
    }

    /// Leave `AwaitingQuestions`. An empty list skips straight to `Complete`.
    pub fn load(&mut self, decisions: Vec<DecisionPoint>) -> Result<SessionState, SessionError> {
        if self.state != SessionState::AwaitingQuestions {
            return Err(SessionError::AlreadyLoaded);
        }
        self.decisions = unique_by_id(decisions);
        self.state = self.first_state();
        debug!(session = %self.id, questions = self.decisions.len(), "Clarification questions loaded");
        Ok(self.state)
    }

    fn first_state(&self) -> SessionState {
        if self.decisions.is_empty() {
            SessionState::Complete
        } else {
            SessionState::Presenting(0)
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Complete
    }

    pub fn decisions(&self) -> &[DecisionPoint] {
        &self.decisions
    }

    pub fn answers(&self) -> &IndexMap<String, Answer> {
        &self.answers
    }

    fn cursor(&self) -> Option<usize> {
        match self.state {
            SessionState::Presenting(i) | SessionState::AwaitingCustomText(i) => Some(i),
            _ => None,
        }
    }

    /// The decision point being shown, if any.
    pub fn current(&self) -> Option<&DecisionPoint> {
        self.cursor().and_then(|i| self.decisions.get(i))
    }

    /// `(position, total)` of the current question, 1-based.
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.cursor().map(|i| (i + 1, self.decisions.len()))
    }

    /// Pick an option of the current decision point.
    ///
    /// The escape hatch moves to `AwaitingCustomText` without recording
    /// anything. Picking a regular option while free text is pending records
    /// that option instead.
    pub fn select(&mut self, option_id: &str) -> Result<SessionState, SessionError> {
        let index = self.cursor().ok_or(SessionError::NotPresenting)?;
        let decision = &self.decisions[index];
        let option = decision
            .option(option_id)
            .ok_or_else(|| SessionError::UnknownOption {
                decision_id: decision.id.clone(),
                option_id: option_id.to_string(),
            })?;

        if option.escape_hatch {
            self.state = SessionState::AwaitingCustomText(index);
            return Ok(self.state);
        }

        let decision_id = decision.id.clone();
        self.record(index, decision_id, Answer::selected(option_id));
        Ok(self.state)
    }

    /// Submit the free text requested by the escape hatch. Blank text is
    /// rejected and leaves the state as it was.
    pub fn submit_custom(&mut self, text: &str) -> Result<SessionState, SessionError> {
        let SessionState::AwaitingCustomText(index) = self.state else {
            return Err(SessionError::NotAwaitingCustomText);
        };
        let text = crate::require_text(text, ValidationError::EmptyCustomAnswer)?;
        let decision_id = self.decisions[index].id.clone();
        self.record(index, decision_id, Answer::custom(text));
        Ok(self.state)
    }

    fn record(&mut self, index: usize, decision_id: String, answer: Answer) {
        debug!(session = %self.id, decision = %decision_id, ?answer, "Answer recorded");
        self.answers.insert(decision_id, answer);
        let next = index + 1;
        self.state = if next < self.decisions.len() {
            SessionState::Presenting(next)
        } else {
            SessionState::Complete
        };
    }

    /// Back to description entry: the session and its answers are discarded.
    pub fn abandon(self) {
        debug!(
            session = %self.id,
            answered = self.answers.len(),
            "Clarification abandoned"
        );
    }

    /// The description with every answer appended, available once complete.
    pub fn augmented_description(&self, description: &str) -> Result<String, SessionError> {
        if !self.is_complete() {
            return Err(SessionError::Incomplete {
                answered: self.answers.len(),
                total: self.decisions.len(),
            });
        }
        Ok(merge_clarifications(
            description,
            &self.decisions,
            &self.answers,
        ))
    }
}

/// Answers are keyed by decision id, so a repeated id would let one answer
/// overwrite another. Later repeats are skipped.
fn unique_by_id(decisions: Vec<DecisionPoint>) -> Vec<DecisionPoint> {
    let mut seen = HashSet::new();
    decisions
        .into_iter()
        .filter(|d| {
            let fresh = seen.insert(d.id.clone());
            if !fresh {
                warn!(decision = %d.id, "Skipping decision point with repeated id");
            }
            fresh
        })
        .collect()
}

/// Append one `- <question>: <answer>` line per answered decision point, in
/// decision-point order. Points without an answer are skipped; with no
/// answers at all the description comes back untouched.
pub fn merge_clarifications(
    description: &str,
    decisions: &[DecisionPoint],
    answers: &IndexMap<String, Answer>,
) -> String {
    let lines: Vec<String> = decisions
        .iter()
        .filter_map(|d| {
            let answer = answers.get(&d.id)?;
            let text = d.resolve(answer)?;
            Some(format!("- {}: {}", d.question, text))
        })
        .collect();

    if lines.is_empty() {
        return description.to_string();
    }

    format!(
        "{}\n\n{}\n{}",
        description,
        CLARIFICATIONS_HEADER,
        lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DecisionOption;

    fn stock_question() -> DecisionPoint {
        DecisionPoint::new(
            "q1",
            "What defines out of stock?",
            vec![
                DecisionOption::new("a", "Zero units"),
                DecisionOption::new("b", "Below safety threshold"),
                DecisionOption::escape_hatch("d", "Other (specify)"),
            ],
        )
    }

    fn shipping_question() -> DecisionPoint {
        DecisionPoint::new(
            "q2",
            "How are backorders handled?",
            vec![
                DecisionOption::new("a", "Notify customer and wait"),
                DecisionOption::new("b", "Cancel the order"),
                DecisionOption::escape_hatch("other", "Other (specify)"),
            ],
        )
    }

    #[test]
    fn empty_decisions_complete_immediately() {
        let mut session = ClarificationSession::new();
        assert_eq!(session.state(), SessionState::AwaitingQuestions);
        assert_eq!(session.load(vec![]), Ok(SessionState::Complete));
        assert!(session.answers().is_empty());
        assert_eq!(
            session.augmented_description("Order placed").unwrap(),
            "Order placed"
        );
    }

    #[test]
    fn repeated_decision_ids_keep_the_first() {
        let mut repeat = shipping_question();
        repeat.id = "q1".into();

        let mut session = ClarificationSession::new();
        session
            .load(vec![stock_question(), repeat.clone(), shipping_question()])
            .unwrap();
        assert_eq!(session.decisions().len(), 2);
        assert_eq!(session.decisions()[0].question, "What defines out of stock?");

        session.select("a").unwrap();
        session.select("b").unwrap();
        assert!(session.is_complete());
        assert_eq!(session.answers().len(), 2);
        assert_eq!(
            session.augmented_description("X").unwrap(),
            "X\n\nUser clarifications:\n- What defines out of stock?: Zero units\n- How are backorders handled?: Cancel the order"
        );

        let built = ClarificationSession::with_decisions(vec![stock_question(), repeat]);
        assert_eq!(built.decisions().len(), 1);
    }

    #[test]
    fn load_twice_is_rejected() {
        let mut session = ClarificationSession::new();
        session.load(vec![stock_question()]).unwrap();
        assert_eq!(
            session.load(vec![stock_question()]),
            Err(SessionError::AlreadyLoaded)
        );
    }

    #[test]
    fn selecting_option_advances_and_records() {
        let mut session = ClarificationSession::with_decisions(vec![stock_question()]);
        assert_eq!(session.state(), SessionState::Presenting(0));
        assert_eq!(session.progress(), Some((1, 1)));

        assert_eq!(session.select("a"), Ok(SessionState::Complete));
        assert_eq!(session.answers().get("q1"), Some(&Answer::selected("a")));
        assert_eq!(session.answers().len(), 1);
        assert!(session.current().is_none());
    }

    #[test]
    fn merged_description_contains_selected_text() {
        let description = "Order placed -> check inventory -> ship or backorder";
        let mut session = ClarificationSession::with_decisions(vec![stock_question()]);
        session.select("a").unwrap();

        let merged = session.augmented_description(description).unwrap();
        assert!(merged.starts_with(description));
        assert!(
            merged
                .lines()
                .any(|l| l == "- What defines out of stock?: Zero units")
        );
        assert!(merged.contains(CLARIFICATIONS_HEADER));
    }

    #[test]
    fn escape_hatch_waits_for_custom_text() {
        let mut session = ClarificationSession::with_decisions(vec![stock_question()]);

        assert_eq!(session.select("d"), Ok(SessionState::AwaitingCustomText(0)));
        assert!(session.answers().is_empty());
        assert_eq!(session.current().map(|d| d.id.as_str()), Some("q1"));

        assert_eq!(
            session.submit_custom("   "),
            Err(SessionError::Validation(ValidationError::EmptyCustomAnswer))
        );
        assert_eq!(session.state(), SessionState::AwaitingCustomText(0));
        assert!(session.answers().is_empty());

        assert_eq!(
            session.submit_custom("  Reserved for VIP orders "),
            Ok(SessionState::Complete)
        );
        assert_eq!(
            session.answers().get("q1"),
            Some(&Answer::custom("Reserved for VIP orders"))
        );
        let merged = session.augmented_description("Orders").unwrap();
        assert!(merged.ends_with("- What defines out of stock?: Reserved for VIP orders"));
    }

    #[test]
    fn regular_option_overrides_pending_custom_text() {
        let mut session =
            ClarificationSession::with_decisions(vec![stock_question(), shipping_question()]);
        session.select("d").unwrap();
        assert_eq!(session.select("b"), Ok(SessionState::Presenting(1)));
        assert_eq!(session.answers().get("q1"), Some(&Answer::selected("b")));
    }

    #[test]
    fn custom_text_without_escape_hatch_is_rejected() {
        let mut session = ClarificationSession::with_decisions(vec![stock_question()]);
        assert_eq!(
            session.submit_custom("anything"),
            Err(SessionError::NotAwaitingCustomText)
        );
        assert_eq!(session.state(), SessionState::Presenting(0));
    }

    #[test]
    fn unknown_option_leaves_state_unchanged() {
        let mut session = ClarificationSession::with_decisions(vec![stock_question()]);
        assert!(matches!(
            session.select("z"),
            Err(SessionError::UnknownOption { .. })
        ));
        assert_eq!(session.state(), SessionState::Presenting(0));
    }

    #[test]
    fn n_answers_complete_a_session_of_n() {
        for n in 1..=4 {
            let decisions: Vec<DecisionPoint> = (0..n)
                .map(|i| {
                    let mut d = stock_question();
                    d.id = format!("q{}", i);
                    d
                })
                .collect();
            let mut session = ClarificationSession::with_decisions(decisions);
            for i in 0..n {
                assert!(!session.is_complete());
                if i % 2 == 0 {
                    session.select("a").unwrap();
                } else {
                    session.select("d").unwrap();
                    session.submit_custom("custom").unwrap();
                }
            }
            assert!(session.is_complete());
            assert_eq!(session.answers().len(), n);
        }
    }

    #[test]
    fn select_after_complete_is_rejected() {
        let mut session = ClarificationSession::with_decisions(vec![stock_question()]);
        session.select("a").unwrap();
        assert_eq!(session.select("a"), Err(SessionError::NotPresenting));
    }

    #[test]
    fn incomplete_session_has_no_augmented_description() {
        let session =
            ClarificationSession::with_decisions(vec![stock_question(), shipping_question()]);
        assert_eq!(
            session.augmented_description("Orders"),
            Err(SessionError::Incomplete {
                answered: 0,
                total: 2
            })
        );
    }

    #[test]
    fn merge_follows_decision_order_not_answer_order() {
        let decisions = vec![stock_question(), shipping_question()];
        let mut answers = IndexMap::new();
        answers.insert("q2".to_string(), Answer::selected("b"));
        answers.insert("q1".to_string(), Answer::selected("a"));

        let merged = merge_clarifications("Orders", &decisions, &answers);
        assert_eq!(
            merged,
            "Orders\n\nUser clarifications:\n\
             - What defines out of stock?: Zero units\n\
             - How are backorders handled?: Cancel the order"
        );
    }

    #[test]
    fn merge_skips_unanswered_points() {
        let decisions = vec![stock_question(), shipping_question()];
        let mut answers = IndexMap::new();
        answers.insert("q2".to_string(), Answer::custom("Split shipment"));

        let merged = merge_clarifications("Orders", &decisions, &answers);
        assert!(!merged.contains("out of stock"));
        assert!(merged.ends_with("- How are backorders handled?: Split shipment"));
    }
}
