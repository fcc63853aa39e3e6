use std::str::FromStr;

use serde::{Deserialize, Serialize};

use weft_core::error::WeftError;

/// The closed set of actions a workflow can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Tweet,
    Reply,
    Retweet,
    Like,
    Follow,
    Unfollow,
    Dm,
    Webhook,
    Log,
    UpdateVar,
    AddToList,
    RemoveFromList,
}

impl ActionKind {
    pub const ALL: [ActionKind; 12] = [
        Self::Tweet,
        Self::Reply,
        Self::Retweet,
        Self::Like,
        Self::Follow,
        Self::Unfollow,
        Self::Dm,
        Self::Webhook,
        Self::Log,
        Self::UpdateVar,
        Self::AddToList,
        Self::RemoveFromList,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tweet => "tweet",
            Self::Reply => "reply",
            Self::Retweet => "retweet",
            Self::Like => "like",
            Self::Follow => "follow",
            Self::Unfollow => "unfollow",
            Self::Dm => "dm",
            Self::Webhook => "webhook",
            Self::Log => "log",
            Self::UpdateVar => "update_var",
            Self::AddToList => "add_to_list",
            Self::RemoveFromList => "remove_from_list",
        }
    }

    /// Whether the engine itself implements this action.
    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::Log | Self::UpdateVar)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = WeftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| WeftError::UnknownAction(s.to_string()))
    }
}
