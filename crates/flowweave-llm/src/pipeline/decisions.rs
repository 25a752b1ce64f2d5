use super::EXTRACTION_TEMPERATURE;
use super::parse::{extract_json, parse_lenient};
use super::prompt::{decisions_system_prompt, decisions_user_prompt};
use crate::{ChatBackend, FlowError, FlowResult, Message, Stage};
use flowweave_core::{DecisionOption, DecisionPoint, ESCAPE_HATCH_ID, validate_description};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_QUESTIONS: usize = 5;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Decision points beyond this many are dropped, in response order.
    pub max_questions: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_questions: DEFAULT_MAX_QUESTIONS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExtractorOutput {
    questions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    id: String,
    question: String,
    options: Vec<RawOption>,
}

#[derive(Debug, Deserialize)]
struct RawOption {
    id: String,
    text: String,
    #[serde(default)]
    other: bool,
}

/// Ask the generator which decisions in `description` are ambiguous.
///
/// An empty list means "nothing to clarify". A reply that isn't the expected
/// JSON shape is logged and also yields an empty list, so generation can
/// proceed without clarification. Only an empty description or a failed
/// generator call are errors.
pub async fn extract_decisions(
    backend: &impl ChatBackend,
    description: &str,
    options: &ExtractOptions,
) -> FlowResult<Vec<DecisionPoint>> {
    let description = validate_description(description)?;

    let messages = vec![
        Message::system(decisions_system_prompt(options.max_questions)),
        Message::user(decisions_user_prompt(description)),
    ];

    info!(
        model = backend.model_name(),
        chars = description.len(),
        "Extracting decision points"
    );

    let response = backend
        .chat(messages, Some(EXTRACTION_TEMPERATURE))
        .await
        .map_err(|e| FlowError::generation(Stage::DecisionExtraction, e))?;

    let content = response.first_text().unwrap_or_default();
    debug!("Extractor raw output: {}", content);

    match parse_decisions(content, options.max_questions) {
        Ok((decisions, warnings)) => {
            for w in &warnings {
                warn!("Decision extraction: {}", w);
            }
            info!(count = decisions.len(), "Decision points extracted");
            Ok(decisions)
        }
        Err(e) => {
            warn!(error = %e, "Ignoring unusable extractor response; continuing without clarification");
            Ok(Vec::new())
        }
    }
}

/// Parse an extractor reply into decision points.
///
/// Fails with [`FlowError::ResponseShape`] only when the reply as a whole is
/// unusable; individual malformed questions are skipped with a warning.
pub(crate) fn parse_decisions(
    content: &str,
    max_questions: usize,
) -> FlowResult<(Vec<DecisionPoint>, Vec<String>)> {
    let json_str = extract_json(content);
    let output: ExtractorOutput = serde_json::from_str(json_str)
        .map_err(|e| FlowError::ResponseShape(format!("{}", e)))?;

    let (raw, mut warnings): (Vec<RawQuestion>, _) = parse_lenient(&output.questions);

    let mut seen = HashSet::new();
    let mut decisions = Vec::new();
    for question in raw {
        let point = match to_decision_point(question) {
            Ok(point) => point,
            Err(reason) => {
                warnings.push(reason);
                continue;
            }
        };
        // Ids are compared after trimming, as stored.
        if !seen.insert(point.id.clone()) {
            warnings.push(format!("'{}' skipped (duplicate question id)", point.id));
            continue;
        }
        decisions.push(point);
    }

    if decisions.len() > max_questions {
        warnings.push(format!(
            "{} questions returned, keeping the first {}",
            decisions.len(),
            max_questions
        ));
        decisions.truncate(max_questions);
    }

    Ok((decisions, warnings))
}

fn to_decision_point(raw: RawQuestion) -> Result<DecisionPoint, String> {
    let id = raw.id.trim();
    let question = raw.question.trim();
    if id.is_empty() || question.is_empty() {
        return Err(format!("'{}' skipped (blank id or question)", raw.id));
    }
    if !(2..=4).contains(&raw.options.len()) {
        return Err(format!(
            "'{}' skipped ({} options, expected 2 to 4)",
            id,
            raw.options.len()
        ));
    }

    let mut option_ids = HashSet::new();
    for opt in &raw.options {
        if opt.id.trim().is_empty() || opt.text.trim().is_empty() {
            return Err(format!("'{}' skipped (blank option)", id));
        }
        if !option_ids.insert(opt.id.trim()) {
            return Err(format!("'{}' skipped (duplicate option id '{}')", id, opt.id));
        }
    }

    // The first option marked by the structural flag, or by the reserved id,
    // is the escape hatch. Option text is never inspected.
    let escape_index = raw
        .options
        .iter()
        .position(|o| o.other)
        .or_else(|| raw.options.iter().position(|o| o.id.trim() == ESCAPE_HATCH_ID));

    let options = raw
        .options
        .iter()
        .enumerate()
        .map(|(i, o)| {
            if Some(i) == escape_index {
                DecisionOption::escape_hatch(o.id.trim(), o.text.trim())
            } else {
                DecisionOption::new(o.id.trim(), o.text.trim())
            }
        })
        .collect();

    Ok(DecisionPoint::new(id, question, options))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER_SCENARIO: &str = r#"{"questions":[{"id":"q1","question":"What defines out of stock?","options":[{"id":"a","text":"Zero units"},{"id":"b","text":"Below reorder point"},{"id":"other","text":"Other (specify)","other":true}]}]}"#;

    #[test]
    fn parses_scenario_reply() {
        let (decisions, warnings) = parse_decisions(ORDER_SCENARIO, 5).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(decisions.len(), 1);
        let point = &decisions[0];
        assert_eq!(point.id, "q1");
        assert_eq!(point.question, "What defines out of stock?");
        assert_eq!(point.options.len(), 3);
        assert_eq!(point.escape_option().map(|o| o.id.as_str()), Some("other"));
        assert!(!point.options[0].escape_hatch);
    }

    #[test]
    fn empty_question_list_is_not_an_error() {
        let (decisions, warnings) = parse_decisions(r#"{"questions": []}"#, 5).unwrap();
        assert!(decisions.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn non_json_is_a_shape_error() {
        assert!(matches!(
            parse_decisions("I could not find anything ambiguous.", 5),
            Err(FlowError::ResponseShape(_))
        ));
        assert!(matches!(
            parse_decisions(r#"{"items": []}"#, 5),
            Err(FlowError::ResponseShape(_))
        ));
    }

    #[test]
    fn fenced_reply_is_accepted() {
        let fenced = format!("```json\n{}\n```", ORDER_SCENARIO);
        let (decisions, _) = parse_decisions(&fenced, 5).unwrap();
        assert_eq!(decisions.len(), 1);
    }

    #[test]
    fn escape_hatch_by_flag_or_reserved_id_not_by_text() {
        let reply = r#"{"questions":[
            {"id":"q1","question":"Who approves?","options":[
                {"id":"a","text":"Manager"},
                {"id":"z","text":"Someone else","other":true}]},
            {"id":"q2","question":"When?","options":[
                {"id":"a","text":"Daily"},
                {"id":"other","text":"Another schedule"}]},
            {"id":"q3","question":"Where?","options":[
                {"id":"a","text":"Office"},
                {"id":"b","text":"Other (specify)"}]}
        ]}"#;
        let (decisions, _) = parse_decisions(reply, 5).unwrap();
        assert_eq!(decisions[0].escape_option().unwrap().id, "z");
        assert_eq!(decisions[1].escape_option().unwrap().id, "other");
        assert!(decisions[2].escape_option().is_none());
    }

    #[test]
    fn only_first_flagged_option_is_escape_hatch() {
        let reply = r#"{"questions":[{"id":"q1","question":"Which?","options":[
            {"id":"a","text":"A","other":true},
            {"id":"b","text":"B","other":true}]}]}"#;
        let (decisions, _) = parse_decisions(reply, 5).unwrap();
        let flagged: Vec<_> = decisions[0]
            .options
            .iter()
            .filter(|o| o.escape_hatch)
            .collect();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].id, "a");
    }

    #[test]
    fn malformed_questions_are_skipped_individually() {
        let reply = r#"{"questions":[
            {"id":"q1","question":"Too few?","options":[{"id":"a","text":"Only one"}]},
            {"id":"q2","question":"Too many?","options":[
                {"id":"a","text":"1"},{"id":"b","text":"2"},{"id":"c","text":"3"},
                {"id":"d","text":"4"},{"id":"e","text":"5"}]},
            {"id":"q3","question":"Dup options?","options":[{"id":"a","text":"1"},{"id":"a","text":"2"}]},
            {"id":"q4","options":[{"id":"a","text":"1"},{"id":"b","text":"2"}]},
            {"id":"q5","question":"Fine?","options":[{"id":"a","text":"Yes"},{"id":"b","text":"No"}]},
            {"id":"q5","question":"Duplicate id?","options":[{"id":"a","text":"Yes"},{"id":"b","text":"No"}]}
        ]}"#;
        let (decisions, warnings) = parse_decisions(reply, 5).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].id, "q5");
        assert_eq!(decisions[0].question, "Fine?");
        assert_eq!(warnings.len(), 5);
    }

    #[test]
    fn ids_differing_only_in_whitespace_are_duplicates() {
        let reply = r#"{"questions":[
            {"id":"q1","question":"First?","options":[{"id":"a","text":"Yes"},{"id":"b","text":"No"}]},
            {"id":" q1","question":"Second?","options":[{"id":"a","text":"Up"},{"id":"b","text":"Down"}]}
        ]}"#;
        let (decisions, warnings) = parse_decisions(reply, 5).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].question, "First?");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("duplicate question id"), "{}", warnings[0]);
    }

    #[test]
    fn questions_beyond_cap_are_dropped_in_order() {
        let questions: Vec<String> = (1..=4)
            .map(|i| {
                format!(
                    r#"{{"id":"q{}","question":"Q{}?","options":[{{"id":"a","text":"Yes"}},{{"id":"b","text":"No"}}]}}"#,
                    i, i
                )
            })
            .collect();
        let reply = format!(r#"{{"questions":[{}]}}"#, questions.join(","));
        let (decisions, warnings) = parse_decisions(&reply, 2).unwrap();
        let ids: Vec<_> = decisions.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q2"]);
        assert_eq!(warnings.len(), 1);
    }
}
