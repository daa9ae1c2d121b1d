//! The closed set of customer intents

use serde::{Deserialize, Serialize};
use std::fmt;

/// Purpose of a single customer utterance
///
/// Declaration order is the classifier's match priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Order,
    History,
    Complaint,
    Greeting,
    MenuQa,
    StoreInfo,
    Cancel,
    Remove,
}

impl Intent {
    /// Every intent, in declaration order
    pub const ALL: [Intent; 8] = [
        Intent::Order,
        Intent::History,
        Intent::Complaint,
        Intent::Greeting,
        Intent::MenuQa,
        Intent::StoreInfo,
        Intent::Cancel,
        Intent::Remove,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Order => "ORDER",
            Intent::History => "HISTORY",
            Intent::Complaint => "COMPLAINT",
            Intent::Greeting => "GREETING",
            Intent::MenuQa => "MENU_QA",
            Intent::StoreInfo => "STORE_INFO",
            Intent::Cancel => "CANCEL",
            Intent::Remove => "REMOVE",
        }
    }

    /// Key used for this intent's task instructions in the prompt book
    pub fn task_key(&self) -> String {
        self.as_str().to_lowercase()
    }

    /// Exact (case-insensitive) label lookup
    pub fn from_label(label: &str) -> Option<Intent> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|intent| intent.as_str().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_label() {
        assert_eq!(Intent::from_label("menu_qa"), Some(Intent::MenuQa));
        assert_eq!(Intent::from_label(" STORE_INFO "), Some(Intent::StoreInfo));
        assert_eq!(Intent::from_label("general"), None);
    }

    #[test]
    fn test_serde_labels_match_as_str() {
        for intent in Intent::ALL {
            let json = serde_json::to_string(&intent).unwrap();
            assert_eq!(json, format!("\"{}\"", intent.as_str()));
        }
    }
}
