//! End-to-end triage flow over the real sqlite store: dispatch a matched
//! reply, click a feedback button, and verify the rule counters close the
//! loop.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use docent_engine::{
    ChatTransport, DispatchOutcome, Dispatcher, FeedbackInteraction, FeedbackKind, IgnoreReason,
    InboundMessage, InteractionHandler, PostedMessage, ReplyPayload, TransportError,
    FALLBACK_SUCCESS_MESSAGE,
};
use docent_store::{CounterKind, Rule, SqliteTriageStore, TriageStore, TriageStoreError};

#[derive(Debug, Clone, PartialEq)]
enum TransportCall {
    Post {
        channel_id: String,
        text: String,
        has_blocks: bool,
        thread_ts: String,
    },
    React {
        channel_id: String,
        timestamp: String,
        reaction: String,
    },
    StripBlocks {
        channel_id: String,
        ts: String,
    },
}

/// Records every outbound call and maps `C-SUPPORT` to the channel name the
/// rules are stored under.
struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    next_post_ts: Mutex<u64>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_post_ts: Mutex::new(100),
        }
    }

    fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn posts(&self) -> Vec<TransportCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, TransportCall::Post { .. }))
            .collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn channel_name(&self, channel_id: &str) -> Result<String, TransportError> {
        match channel_id {
            "C-SUPPORT" => Ok("support".to_string()),
            other => Err(TransportError::api(
                "conversations.info",
                format!("unknown channel {other}"),
            )),
        }
    }

    async fn post_reply(
        &self,
        channel_id: &str,
        payload: &ReplyPayload,
        thread_ts: &str,
    ) -> Result<PostedMessage, TransportError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(TransportCall::Post {
                channel_id: channel_id.to_string(),
                text: payload.text.clone(),
                has_blocks: payload.blocks.is_some(),
                thread_ts: thread_ts.to_string(),
            });
        let mut next = self.next_post_ts.lock().expect("ts lock");
        *next += 1;
        Ok(PostedMessage {
            channel: channel_id.to_string(),
            ts: format!("{}.0", *next),
        })
    }

    async fn add_reaction(
        &self,
        channel_id: &str,
        timestamp: &str,
        reaction: &str,
    ) -> Result<(), TransportError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(TransportCall::React {
                channel_id: channel_id.to_string(),
                timestamp: timestamp.to_string(),
                reaction: reaction.to_string(),
            });
        Ok(())
    }

    async fn strip_message_blocks(
        &self,
        channel_id: &str,
        ts: &str,
        _text: &str,
    ) -> Result<(), TransportError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(TransportCall::StripBlocks {
                channel_id: channel_id.to_string(),
                ts: ts.to_string(),
            });
        Ok(())
    }
}

struct TriageFixture {
    _workspace: tempfile::TempDir,
    store: Arc<SqliteTriageStore>,
    transport: Arc<RecordingTransport>,
    dispatcher: Dispatcher,
    interactions: InteractionHandler,
    refund_rule_id: i64,
    default_rule_id: i64,
}

fn base_rule(pattern: Option<&str>, template: &str, sort_order: i64) -> Rule {
    Rule {
        id: 0,
        channel: "support".to_string(),
        pattern: pattern.map(str::to_string),
        response_template: template.to_string(),
        show_buttons: true,
        success_label: None,
        fail_label: None,
        success_reaction: None,
        fail_reaction: None,
        success_message: None,
        fail_message: None,
        active: true,
        sort_order,
    }
}

fn triage_fixture() -> TriageFixture {
    let workspace = tempfile::tempdir().expect("tempdir");
    let store =
        Arc::new(SqliteTriageStore::new(workspace.path().join("docent.db")).expect("sqlite store"));

    let mut refund_rule = base_rule(
        Some("refund"),
        "Refunds are covered in the billing FAQ.",
        1,
    );
    refund_rule.success_message = Some("Happy to help!".to_string());
    refund_rule.success_reaction = Some("tada".to_string());
    let refund_rule_id = store.insert_rule(&refund_rule).expect("insert refund rule");

    let default_rule = base_rule(None, "Thanks for posting ${message.user}, see the FAQ", 99);
    let default_rule_id = store
        .insert_rule(&default_rule)
        .expect("insert default rule");

    let transport = Arc::new(RecordingTransport::new());
    let store_dyn: Arc<dyn TriageStore> = store.clone();
    let transport_dyn: Arc<dyn ChatTransport> = transport.clone();

    TriageFixture {
        _workspace: workspace,
        dispatcher: Dispatcher::new(store_dyn.clone(), transport_dyn.clone()),
        interactions: InteractionHandler::new(store_dyn, transport_dyn),
        store,
        transport,
        refund_rule_id,
        default_rule_id,
    }
}

fn support_message(text: &str, ts: &str) -> InboundMessage {
    InboundMessage {
        channel_id: "C-SUPPORT".to_string(),
        user_id: "U1".to_string(),
        text: text.to_string(),
        ts: ts.to_string(),
        thread_ts: None,
        hidden: false,
    }
}

fn button_click(kind: FeedbackKind, thread_ts: &str, message_ts: &str) -> FeedbackInteraction {
    FeedbackInteraction {
        channel_id: "C-SUPPORT".to_string(),
        user_id: "U9".to_string(),
        message_ts: message_ts.to_string(),
        message_thread_ts: Some(thread_ts.to_string()),
        message_text: "Refunds are covered in the billing FAQ.".to_string(),
        kind,
    }
}

#[tokio::test]
async fn integration_matched_message_then_answered_click_closes_the_loop() {
    let fixture = triage_fixture();

    let outcome = fixture
        .dispatcher
        .dispatch(&support_message("I need a REFUND please", "10.0"))
        .await
        .expect("dispatch");
    assert_eq!(
        outcome,
        DispatchOutcome::Replied {
            rule_id: fixture.refund_rule_id,
            thread_ts: "10.0".to_string(),
        }
    );

    let posts = fixture.transport.posts();
    assert_eq!(posts.len(), 1);
    let TransportCall::Post {
        channel_id,
        text,
        has_blocks,
        thread_ts,
    } = &posts[0]
    else {
        panic!("expected post call");
    };
    assert_eq!(channel_id, "C-SUPPORT");
    assert_eq!(text, "Refunds are covered in the billing FAQ.");
    assert!(*has_blocks, "buttons enabled so blocks must be attached");
    assert_eq!(thread_ts, "10.0");

    let record = fixture
        .store
        .dispatch_for_thread("10.0")
        .await
        .expect("lookup")
        .expect("record");
    assert_eq!(record.rule_id, fixture.refund_rule_id);
    assert_eq!(record.channel, "support");

    // First post_reply on the recording transport is assigned ts 101.0.
    let reply_ts = "101.0".to_string();

    let outcome = fixture
        .interactions
        .handle(&button_click(FeedbackKind::Answered, "10.0", &reply_ts))
        .await;
    assert_eq!(outcome.rule_id, Some(fixture.refund_rule_id));
    assert!(outcome.ack_sent);
    assert!(outcome.reaction_added);
    assert!(outcome.buttons_stripped);

    let calls = fixture.transport.calls();
    // Custom success text and reaction from the rule, not the fallbacks.
    assert!(calls.iter().any(|call| matches!(
        call,
        TransportCall::Post { text, thread_ts, has_blocks, .. }
            if text == "Happy to help!" && thread_ts == "10.0" && !has_blocks
    )));
    assert!(calls.iter().any(|call| matches!(
        call,
        TransportCall::React { timestamp, reaction, .. }
            if timestamp == "10.0" && reaction == "tada"
    )));
    assert!(calls.iter().any(|call| matches!(
        call,
        TransportCall::StripBlocks { ts, .. } if ts == &reply_ts
    )));

    let counters = fixture
        .store
        .counters_for_rule(fixture.refund_rule_id)
        .await
        .expect("counters");
    assert_eq!((counters.sent, counters.success, counters.fail), (1, 1, 0));
}

#[tokio::test]
async fn integration_unmatched_message_uses_default_rule_and_mentions_the_author() {
    let fixture = triage_fixture();

    let outcome = fixture
        .dispatcher
        .dispatch(&support_message("hello there", "20.0"))
        .await
        .expect("dispatch");
    assert_eq!(
        outcome,
        DispatchOutcome::Replied {
            rule_id: fixture.default_rule_id,
            thread_ts: "20.0".to_string(),
        }
    );

    let posts = fixture.transport.posts();
    let TransportCall::Post { text, .. } = &posts[0] else {
        panic!("expected post call");
    };
    assert_eq!(text, "Thanks for posting <@U1>, see the FAQ");

    let counters = fixture
        .store
        .counters_for_rule(fixture.default_rule_id)
        .await
        .expect("counters");
    assert_eq!(counters.sent, 1);
}

#[tokio::test]
async fn integration_still_need_help_click_counts_fail_against_the_matched_rule() {
    let fixture = triage_fixture();

    fixture
        .dispatcher
        .dispatch(&support_message("refund status?", "30.0"))
        .await
        .expect("dispatch");

    let outcome = fixture
        .interactions
        .handle(&button_click(FeedbackKind::StillNeedsHelp, "30.0", "101.0"))
        .await;
    assert_eq!(outcome.rule_id, Some(fixture.refund_rule_id));

    let counters = fixture
        .store
        .counters_for_rule(fixture.refund_rule_id)
        .await
        .expect("counters");
    assert_eq!((counters.sent, counters.success, counters.fail), (1, 0, 1));
}

#[tokio::test]
async fn integration_thread_replies_never_dispatch_or_record() {
    let fixture = triage_fixture();

    let mut message = support_message("refund inside a thread", "40.1");
    message.thread_ts = Some("40.0".to_string());

    let outcome = fixture.dispatcher.dispatch(&message).await.expect("dispatch");
    assert_eq!(outcome, DispatchOutcome::Ignored(IgnoreReason::ThreadReply));
    assert!(fixture.transport.calls().is_empty());
    assert!(fixture
        .store
        .dispatch_for_thread("40.0")
        .await
        .expect("lookup")
        .is_none());
}

#[tokio::test]
async fn integration_click_on_untracked_thread_falls_back_and_counts_nothing() {
    let fixture = triage_fixture();

    let outcome = fixture
        .interactions
        .handle(&button_click(FeedbackKind::Answered, "77.0", "78.0"))
        .await;
    assert_eq!(outcome.rule_id, None);
    assert!(outcome.ack_sent);

    let calls = fixture.transport.calls();
    assert!(calls.iter().any(|call| matches!(
        call,
        TransportCall::Post { text, .. } if text == FALLBACK_SUCCESS_MESSAGE
    )));

    let counters = fixture
        .store
        .counters_for_rule(fixture.refund_rule_id)
        .await
        .expect("counters");
    assert_eq!((counters.sent, counters.success, counters.fail), (0, 0, 0));
}

#[tokio::test]
async fn regression_duplicate_dispatch_record_is_rejected_by_the_store() {
    let fixture = triage_fixture();

    fixture
        .dispatcher
        .dispatch(&support_message("refund?", "50.0"))
        .await
        .expect("dispatch");

    let record = fixture
        .store
        .dispatch_for_thread("50.0")
        .await
        .expect("lookup")
        .expect("record");
    let error = fixture
        .store
        .record_dispatch(record)
        .await
        .expect_err("duplicate insert must fail");
    assert!(matches!(
        error,
        TriageStoreError::DispatchAlreadyRecorded(thread_ts) if thread_ts == "50.0"
    ));

    // The sent counter reflects the single real dispatch only.
    fixture
        .store
        .increment_counter(fixture.refund_rule_id, CounterKind::Sent)
        .await
        .expect("manual increment");
    let counters = fixture
        .store
        .counters_for_rule(fixture.refund_rule_id)
        .await
        .expect("counters");
    assert_eq!(counters.sent, 2);
}
