//! Reply payload rendering and the engine-wide fallback constants.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Action identifier carried by the affirmative button. Downstream
/// interaction handling keys on these identifiers; button labels are
/// cosmetic only.
pub const ACTION_ID_ANSWERED: &str = "button_click_answered";
/// Action identifier carried by the still-need-help button.
pub const ACTION_ID_QUESTION: &str = "button_click_question";

pub const DEFAULT_SUCCESS_LABEL: &str = ":white_check_mark: Thanks, I found my answer";
pub const DEFAULT_FAIL_LABEL: &str = ":question:I still need help";

pub const FALLBACK_SUCCESS_MESSAGE: &str = "Glad I could help, happy selling!";
pub const FALLBACK_FAIL_MESSAGE: &str =
    "No worries, an expert will check this out and help as soon as they can.";
pub const FALLBACK_SUCCESS_REACTION: &str = "white_check_mark";
pub const FALLBACK_FAIL_REACTION: &str = "question";

/// Placeholder token resolved to the invoking user's mention at dispatch
/// time.
pub const USER_PLACEHOLDER: &str = "${message.user}";

/// A rendered outbound reply: fallback text plus optional Block Kit blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub text: String,
    pub blocks: Option<Value>,
}

/// Substitutes the user placeholder with a full mention. Substitution is
/// total: the rendered text never carries the raw token.
pub fn resolve_template(template: &str, user_id: &str) -> String {
    template.replace(USER_PLACEHOLDER, &format!("<@{user_id}>"))
}

/// Builds the reply payload for a dispatched response: a markdown section,
/// plus the two feedback buttons when the rule asks for them.
pub fn render_reply(
    text: &str,
    show_buttons: bool,
    success_label: Option<&str>,
    fail_label: Option<&str>,
) -> ReplyPayload {
    let section = json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": text },
    });

    if !show_buttons {
        return ReplyPayload {
            text: text.to_string(),
            blocks: Some(json!([section])),
        };
    }

    let actions = json!({
        "type": "actions",
        "elements": [
            {
                "type": "button",
                "style": "primary",
                "text": {
                    "type": "plain_text",
                    "text": success_label.unwrap_or(DEFAULT_SUCCESS_LABEL),
                    "emoji": true,
                },
                "action_id": ACTION_ID_ANSWERED,
            },
            {
                "type": "button",
                "style": "danger",
                "text": {
                    "type": "plain_text",
                    "text": fail_label.unwrap_or(DEFAULT_FAIL_LABEL),
                    "emoji": true,
                },
                "action_id": ACTION_ID_QUESTION,
            },
        ],
    });

    ReplyPayload {
        text: text.to_string(),
        blocks: Some(json!([section, actions])),
    }
}

/// Builds the plain follow-up payload sent on feedback; never carries
/// buttons.
pub fn render_ack(text: &str) -> ReplyPayload {
    ReplyPayload {
        text: text.to_string(),
        blocks: None,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        render_ack, render_reply, resolve_template, ACTION_ID_ANSWERED, ACTION_ID_QUESTION,
        DEFAULT_FAIL_LABEL, DEFAULT_SUCCESS_LABEL, USER_PLACEHOLDER,
    };

    #[test]
    fn unit_resolve_template_substitutes_every_placeholder_occurrence() {
        let rendered = resolve_template(
            "Thanks for posting ${message.user}! We see you, ${message.user}.",
            "U123",
        );
        assert_eq!(rendered, "Thanks for posting <@U123>! We see you, <@U123>.");
        assert!(!rendered.contains(USER_PLACEHOLDER));
    }

    #[test]
    fn unit_render_reply_with_buttons_carries_fixed_action_ids() {
        let payload = render_reply("See refund policy", true, None, None);
        assert_eq!(payload.text, "See refund policy");

        let blocks = payload.blocks.expect("blocks");
        let blocks = blocks.as_array().expect("block array");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["type"], "section");
        assert_eq!(blocks[0]["text"]["text"], "See refund policy");

        let elements = blocks[1]["elements"].as_array().expect("buttons");
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0]["action_id"], ACTION_ID_ANSWERED);
        assert_eq!(elements[0]["style"], "primary");
        assert_eq!(elements[0]["text"]["text"], DEFAULT_SUCCESS_LABEL);
        assert_eq!(elements[1]["action_id"], ACTION_ID_QUESTION);
        assert_eq!(elements[1]["style"], "danger");
        assert_eq!(elements[1]["text"]["text"], DEFAULT_FAIL_LABEL);
    }

    #[test]
    fn unit_render_reply_labels_are_cosmetic_only() {
        let payload = render_reply("text", true, Some("Sorted!"), Some("Not yet"));
        let blocks = payload.blocks.expect("blocks");
        let elements = blocks[1]["elements"].as_array().expect("buttons");
        assert_eq!(elements[0]["text"]["text"], "Sorted!");
        assert_eq!(elements[1]["text"]["text"], "Not yet");
        // Custom labels never change the identifiers downstream keys on.
        assert_eq!(elements[0]["action_id"], ACTION_ID_ANSWERED);
        assert_eq!(elements[1]["action_id"], ACTION_ID_QUESTION);
    }

    #[test]
    fn unit_render_reply_without_buttons_has_single_section() {
        let payload = render_reply("See ya later <@U1> :wave:", false, None, None);
        let blocks = payload.blocks.expect("blocks");
        assert_eq!(blocks.as_array().expect("block array").len(), 1);
    }

    #[test]
    fn unit_render_ack_never_carries_blocks() {
        let payload = render_ack("Glad I could help!");
        assert_eq!(payload.text, "Glad I could help!");
        assert!(payload.blocks.is_none());
    }
}
