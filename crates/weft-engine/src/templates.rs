//! Ready-made workflow definitions.

use serde_json::json;

use weft_core::condition::{Condition, ConditionOp};
use weft_core::node::Node;
use weft_core::types::{NewWorkflow, TriggerType};

/// Names accepted by [`by_name`].
pub const TEMPLATE_NAMES: [&str; 3] = ["welcome_dm", "engagement_boost", "content_pipeline"];

pub fn by_name(name: &str) -> Option<NewWorkflow> {
    match name {
        "welcome_dm" => Some(welcome_dm()),
        "engagement_boost" => Some(engagement_boost()),
        "content_pipeline" => Some(content_pipeline()),
        _ => None,
    }
}

/// DM new followers, with a different message above 100 followers.
pub fn welcome_dm() -> NewWorkflow {
    NewWorkflow::new("Welcome New Follower")
        .with_description("Send welcome DM to new followers")
        .with_trigger(TriggerType::Event, json!({"event": "new_follower"}))
        .with_nodes(vec![
            Node::condition(
                "check",
                vec![Condition::new("trigger.follower_count", ConditionOp::Gt, json!(100))],
                "dm_vip",
                "dm_regular",
            )
            .with_name("Check follower count"),
            Node::action("dm_vip", "dm", json!({"text": "Welcome! 🌟 As a valued member..."}))
                .with_name("DM VIP follower")
                .with_next("end"),
            Node::action("dm_regular", "dm", json!({"text": "Welcome! Thanks for following! 🎉"}))
                .with_name("DM regular follower")
                .with_next("end"),
            Node::end("end").with_name("Done"),
        ])
}

/// Like and thank positive mentions; log the rest.
pub fn engagement_boost() -> NewWorkflow {
    NewWorkflow::new("Engagement Boost")
        .with_description("Auto-engage with users who interact with your content")
        .with_trigger(TriggerType::Event, json!({"event": "mention"}))
        .with_nodes(vec![
            Node::condition(
                "sentiment",
                vec![Condition::new("trigger.sentiment", ConditionOp::Gte, json!(0.5))],
                "like_tweet",
                "log_negative",
            )
            .with_name("Check sentiment"),
            Node::action("like_tweet", "like", json!({}))
                .with_name("Like the tweet")
                .with_next("reply"),
            Node::action("reply", "reply", json!({"text": "Thanks for the mention! 🙏"}))
                .with_name("Reply with thanks")
                .with_next("end"),
            Node::action("log_negative", "log", json!({"message": "Negative mention detected"}))
                .with_name("Log negative mention")
                .with_next("end"),
            Node::end("end").with_name("Done"),
        ])
}

/// Weekday publishing slots at 09:00, 13:00 and 17:00.
pub fn content_pipeline() -> NewWorkflow {
    NewWorkflow::new("Content Pipeline")
        .with_description("Scheduled content publishing workflow")
        .with_trigger(TriggerType::Schedule, json!({"cron": "0 9,13,17 * * 1-5"}))
        .with_nodes(vec![
            Node::action("fetch", "log", json!({"message": "Fetching scheduled content"}))
                .with_name("Fetch next content")
                .with_next("check_content"),
            Node::condition(
                "check_content",
                vec![Condition::new(
                    "last_action_result.logged",
                    ConditionOp::Exists,
                    json!(true),
                )],
                "publish",
                "end",
            )
            .with_name("Has content?"),
            Node::action("publish", "tweet", json!({"text": "Automated content post"}))
                .with_name("Publish tweet")
                .with_next("log_success"),
            Node::action("log_success", "log", json!({"message": "Content published successfully"}))
                .with_name("Log success")
                .with_next("end"),
            Node::end("end").with_name("Done"),
        ])
}
