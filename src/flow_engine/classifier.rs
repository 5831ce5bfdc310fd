// Keyword classification of dialog text. Everything is a lowercase substring
// test against the configured lists; no tokenisation, no language detection.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::KeywordConfig;
use crate::flow_engine::state::FlowState;
use crate::perception::types::DialogSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    NamePrompt,
    IdPrompt,
    AlreadyRegisteredMessage,
    SuccessMessage,
    GenericAckDialog,
    ErrorMessage,
    Unknown,
}

pub struct TextClassifier {
    keywords: Arc<KeywordConfig>,
    already_registered_requires_fill: bool,
}

fn contains_any(text: &str, list: &[String]) -> bool {
    list.iter().any(|k| !k.is_empty() && text.contains(k.as_str()))
}

impl TextClassifier {
    pub fn new(keywords: Arc<KeywordConfig>, already_registered_requires_fill: bool) -> Self {
        Self {
            keywords,
            already_registered_requires_fill,
        }
    }

    pub fn is_name_prompt(&self, text: &str) -> bool {
        contains_any(text, &self.keywords.name)
    }

    /// Id keywords, or an enter/type verb together with a number/id noun.
    pub fn is_id_prompt(&self, text: &str) -> bool {
        contains_any(text, &self.keywords.id)
            || (contains_any(text, &self.keywords.id_verbs)
                && contains_any(text, &self.keywords.id_nouns))
    }

    pub fn is_success(&self, text: &str) -> bool {
        contains_any(text, &self.keywords.success)
    }

    pub fn is_already_registered(&self, text: &str) -> bool {
        contains_any(text, &self.keywords.already_registered)
    }

    pub fn is_error(&self, text: &str) -> bool {
        contains_any(text, &self.keywords.error)
    }

    /// Maps one dialog observation to a category. The first matching rule wins:
    ///
    /// 1. error wording without any success wording, regardless of progress
    /// 2. name prompt while the name step is open
    /// 3. id prompt (keywords) once the name is resolved and the id is open
    /// 4. already-registered wording
    /// 5. success wording once both steps are resolved
    /// 6. an input field with no name wording while the id step is open
    /// 7. any acknowledgement button once both steps are resolved
    /// 8. remaining error wording
    pub fn classify(&self, hints: &DialogSnapshot, state: &FlowState) -> Category {
        let text = hints.text.to_lowercase();
        let error = self.is_error(&text);
        let success = self.is_success(&text);

        if error && !success {
            return Category::ErrorMessage;
        }

        let name_prompt = self.is_name_prompt(&text);
        if !state.name_resolved() && name_prompt {
            return Category::NamePrompt;
        }

        let id_open = state.name_resolved() && !state.cne_resolved();
        if id_open && self.is_id_prompt(&text) {
            return Category::IdPrompt;
        }

        if self.is_already_registered(&text)
            && (!self.already_registered_requires_fill
                || state.name_resolved()
                || state.cne_resolved())
        {
            return Category::AlreadyRegisteredMessage;
        }

        if state.both_resolved() && success {
            return Category::SuccessMessage;
        }

        if id_open && hints.has_input && !name_prompt {
            return Category::IdPrompt;
        }

        if state.both_resolved() && hints.has_ack_button {
            return Category::GenericAckDialog;
        }

        if error {
            return Category::ErrorMessage;
        }

        Category::Unknown
    }
}
