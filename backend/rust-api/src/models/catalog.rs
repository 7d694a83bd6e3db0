use serde::{Deserialize, Serialize};

use crate::error::QuizError;

/// Quiz template owned by a lecturer. Read-only for the session workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestDefinition {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub subject_id: i64,
    #[serde(default)]
    pub subject_name: String,
    pub author_id: String,
    pub tasks_num: u32,
    pub duration_seconds: u32,
}

/// One option of a question. Either `text` or `image` (object storage path) is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionOption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub is_true: bool,
}

/// Question bank entry. Options are addressed by their 1-based position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: String,
    pub test_id: i64,
    pub formulation: String,
    #[serde(default)]
    pub multiselect: bool,
    pub options: Vec<QuestionOption>,
}

impl Question {
    /// Option ids marked correct, ascending.
    pub fn correct_option_ids(&self) -> Vec<u32> {
        self.options
            .iter()
            .enumerate()
            .filter(|(_, option)| option.is_true)
            .map(|(index, _)| index as u32 + 1)
            .collect()
    }

    /// At least one correct option; exactly one for single-select questions.
    pub fn validate(&self) -> Result<(), QuizError> {
        let invalid = |reason: &str| QuizError::InvalidQuestion {
            question_id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.options.is_empty() {
            return Err(invalid("question has no options"));
        }
        if self
            .options
            .iter()
            .any(|option| option.text.is_none() && option.image.is_none())
        {
            return Err(invalid("every option needs text or an image"));
        }

        match (self.multiselect, self.correct_option_ids().len()) {
            (_, 0) => Err(invalid("no option is marked correct")),
            (false, n) if n > 1 => Err(invalid(
                "single-select question must have exactly one correct option",
            )),
            _ => Ok(()),
        }
    }
}

/// Bulk catalog import format: the tests plus their question banks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogBundle {
    #[serde(default)]
    pub tests: Vec<TestDefinition>,
    #[serde(default)]
    pub questions: Vec<Question>,
}
