use serde::{Deserialize, Serialize};

/// Option id reserved for the open-ended "other / specify" choice.
pub const ESCAPE_HATCH_ID: &str = "other";

/// A question whose answer changes the topology of the resulting flowchart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionPoint {
    pub id: String,
    pub question: String,
    pub options: Vec<DecisionOption>,
}

/// One enumerated answer to a [`DecisionPoint`].
///
/// `escape_hatch` is set once, when the option is built from the extractor
/// response. Nothing downstream looks at `text` to decide whether an option
/// is open-ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOption {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub escape_hatch: bool,
}

impl DecisionOption {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            escape_hatch: false,
        }
    }

    pub fn escape_hatch(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            escape_hatch: true,
        }
    }
}

impl DecisionPoint {
    pub fn new(
        id: impl Into<String>,
        question: impl Into<String>,
        options: Vec<DecisionOption>,
    ) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            options,
        }
    }

    pub fn option(&self, option_id: &str) -> Option<&DecisionOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    pub fn escape_option(&self) -> Option<&DecisionOption> {
        self.options.iter().find(|o| o.escape_hatch)
    }

    /// Text an [`Answer`] stands for, as it appears in the merged description.
    /// `None` when a `Selected` answer names an option this point doesn't have.
    pub fn resolve<'a>(&'a self, answer: &'a Answer) -> Option<&'a str> {
        match answer {
            Answer::Selected { option_id } => self.option(option_id).map(|o| o.text.as_str()),
            Answer::Custom { text } => Some(text.as_str()),
        }
    }
}

/// A resolved decision: either one of the enumerated options or free text
/// entered through the escape hatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Answer {
    Selected { option_id: String },
    Custom { text: String },
}

impl Answer {
    pub fn selected(option_id: impl Into<String>) -> Self {
        Answer::Selected {
            option_id: option_id.into(),
        }
    }

    pub fn custom(text: impl Into<String>) -> Self {
        Answer::Custom { text: text.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn resolve_selected_uses_option_text() {
        let q = stock_question();
        assert_eq!(q.resolve(&Answer::selected("b")), Some("Below safety threshold"));
    }

    #[test]
    fn resolve_custom_uses_free_text() {
        let q = stock_question();
        assert_eq!(q.resolve(&Answer::custom("Reserved stock only")), Some("Reserved stock only"));
    }

    #[test]
    fn resolve_unknown_option_is_none() {
        let q = stock_question();
        assert_eq!(q.resolve(&Answer::selected("z")), None);
    }

    #[test]
    fn escape_option_is_structural() {
        let q = DecisionPoint::new(
            "q2",
            "Who approves?",
            vec![
                DecisionOption::new("a", "Other department"),
                DecisionOption::new("b", "Manager"),
            ],
        );
        assert!(q.escape_option().is_none());
        assert_eq!(stock_question().escape_option().map(|o| o.id.as_str()), Some("d"));
    }

    #[test]
    fn answer_serializes_as_tagged_union() {
        let json = serde_json::to_value(Answer::selected("a")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "selected", "optionId": "a"}));

        let json = serde_json::to_value(Answer::custom("Two approvers")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "custom", "text": "Two approvers"}));
    }
}
