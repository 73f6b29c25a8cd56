//! End-to-end suite: events through the dispatcher against live rule,
//! variable and statistics stores, with a recording platform client.

use std::sync::Arc;
use std::time::Duration;

use chatwarden::config::EngineConfig;
use chatwarden::dispatcher::Dispatcher;
use chatwarden::eval::context::SharedContext;
use chatwarden::event::{ChatEvent, EventBus, EventTag, Message, UserRef};
use chatwarden::platform::{PlatformCall, RecordingClient};
use chatwarden::store::{
    MemoryRuleStore, MemoryStatsStore, MemoryVariableStore, VarScope, VariableStore,
};
use chatwarden::Value;

struct Harness {
    platform: Arc<RecordingClient>,
    variables: Arc<MemoryVariableStore>,
    rules: Arc<MemoryRuleStore>,
    bus: Arc<EventBus>,
    dispatcher: Arc<Dispatcher>,
}

fn harness_with_config(config: EngineConfig) -> Harness {
    let platform = Arc::new(RecordingClient::new());
    let variables = Arc::new(MemoryVariableStore::default());
    let stats = Arc::new(MemoryStatsStore::new());
    let rules = Arc::new(MemoryRuleStore::new());
    let shared = Arc::new(SharedContext {
        platform: platform.clone(),
        variables: variables.clone(),
        stats,
        config,
    });
    let bus = Arc::new(EventBus::new(64));
    let dispatcher = Arc::new(Dispatcher::new(shared, rules.clone(), bus.clone()));
    Harness {
        platform,
        variables,
        rules,
        bus,
        dispatcher,
    }
}

fn harness() -> Harness {
    harness_with_config(EngineConfig::default())
}

fn user(id: i64, name: &str) -> Arc<UserRef> {
    Arc::new(UserRef::new(id, name))
}

fn message_event(group_id: i64, message_id: i64, from: Arc<UserRef>, text: &str) -> ChatEvent {
    ChatEvent::with_message(
        EventTag::Message,
        group_id,
        chatwarden::event::text_message(group_id, message_id, from, text),
    )
}

fn command_event(group_id: i64, message_id: i64, from: Arc<UserRef>, text: &str) -> ChatEvent {
    ChatEvent::with_message(
        EventTag::Command,
        group_id,
        chatwarden::event::text_message(group_id, message_id, from, text),
    )
}

fn photo_event(group_id: i64, message_id: i64, from: Arc<UserRef>, media_group: &str) -> ChatEvent {
    let message = Arc::new(Message {
        id: message_id,
        chat_id: group_id,
        text: None,
        caption: None,
        from_user: Some(from),
        reply_to_message: None,
        media_group_id: Some(media_group.to_string()),
        date: 0,
    });
    ChatEvent::with_message(EventTag::Photo, group_id, message)
}

// Scenario: keyword reply.
#[tokio::test]
async fn test_keyword_reply() {
    let h = harness();
    h.rules.add_rule(
        1,
        "greeter",
        "WHEN message WHERE message.text contains \"hello\" THEN { reply(\"hi\"); } END",
        0,
    );

    h.dispatcher
        .handle_event(message_event(1, 100, user(1, "Ann"), "say hello there"))
        .await;

    assert_eq!(
        h.platform.side_effects(),
        vec![PlatformCall::Reply {
            chat_id: 1,
            message_id: 100,
            text: "hi".to_string()
        }]
    );
}

// Scenario: three-strike warning via /warn.
#[tokio::test]
async fn test_three_strike_warning() {
    let h = harness();
    h.platform.set_admin(1, 5);
    h.variables
        .write_var(1, VarScope::User, "warnings", Value::Integer(2), Some(77))
        .await
        .unwrap();

    h.rules.add_rule(
        1,
        "warn command",
        "WHEN command WHERE command.name == \"warn\" and user.is_admin THEN { t = int(command.arg[0]); n = get_var(\"user.warnings\", 0, t) + 1; set_var(\"user.warnings\", n, t); if (n >= 3) { kick_user(t); set_var(\"user.warnings\", null, t); } } END",
        0,
    );

    h.dispatcher
        .handle_event(command_event(1, 101, user(5, "Admin"), "/warn 77"))
        .await;

    assert_eq!(
        h.platform.side_effects(),
        vec![PlatformCall::Kick {
            chat_id: 1,
            user_id: 77
        }]
    );
    assert_eq!(
        h.variables
            .read_var(1, VarScope::User, "warnings", Some(77))
            .await
            .unwrap(),
        None
    );
}

// Below the threshold the warning count is only incremented.
#[tokio::test]
async fn test_warning_below_threshold_increments() {
    let h = harness();
    h.platform.set_admin(1, 5);

    h.rules.add_rule(
        1,
        "warn command",
        "WHEN command WHERE command.name == \"warn\" and user.is_admin THEN { t = int(command.arg[0]); n = get_var(\"user.warnings\", 0, t) + 1; set_var(\"user.warnings\", n, t); if (n >= 3) { kick_user(t); set_var(\"user.warnings\", null, t); } } END",
        0,
    );

    h.dispatcher
        .handle_event(command_event(1, 101, user(5, "Admin"), "/warn 77"))
        .await;

    assert!(h.platform.side_effects().is_empty());
    assert_eq!(
        h.variables
            .read_var(1, VarScope::User, "warnings", Some(77))
            .await
            .unwrap(),
        Some(Value::Integer(1))
    );
}

// Non-admins never pass the guard, and the admin check is not retried.
#[tokio::test]
async fn test_warn_denied_for_non_admin() {
    let h = harness();
    h.rules.add_rule(
        1,
        "warn command",
        "WHEN command WHERE command.name == \"warn\" and user.is_admin THEN { kick_user(); } END",
        0,
    );

    h.dispatcher
        .handle_event(command_event(1, 101, user(9, "Someone"), "/warn 77"))
        .await;
    assert!(h.platform.side_effects().is_empty());
}

// Scenario: media group aggregation through the live dispatcher loop.
#[tokio::test]
async fn test_media_group_aggregation() {
    let config = EngineConfig {
        media_group_delay: Duration::from_millis(120),
        ..EngineConfig::default()
    };
    let h = harness_with_config(config);
    h.rules.add_rule(
        1,
        "album counter",
        "WHEN media_group THEN { reply(\"got \" + str(media_group.message_count)); } END",
        0,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let run = tokio::spawn(h.dispatcher.clone().run(shutdown_rx));
    // Let the dispatcher subscribe before anything is published.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = std::time::Instant::now();
    h.bus
        .publish(photo_event(1, 200, user(1, "Ann"), "X"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.bus
        .publish(photo_event(1, 201, user(1, "Ann"), "X"))
        .await
        .unwrap();

    // Wait for the aggregate to fire and the rule to run.
    let mut side_effects = Vec::new();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        side_effects = h.platform.side_effects();
        if !side_effects.is_empty() {
            break;
        }
    }
    let elapsed = started.elapsed();

    assert_eq!(
        side_effects,
        vec![PlatformCall::Reply {
            chat_id: 1,
            message_id: 200,
            text: "got 2".to_string()
        }]
    );
    // Not earlier than the aggregation delay after the second message.
    assert!(elapsed >= Duration::from_millis(120));

    // Nothing further arrives for the same media group.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.platform.side_effects().len(), 1);

    shutdown_tx.send(()).unwrap();
    let _ = run.await;
}

// Scenario: short-circuit guard never resolves past a null reply chain.
#[tokio::test]
async fn test_short_circuit_guard() {
    let h = harness();
    h.rules.add_rule(
        1,
        "reply filter",
        "WHEN message WHERE message.reply_to_message and message.reply_to_message.from_user.id == 42 THEN { delete_message(); } END",
        0,
    );

    h.dispatcher
        .handle_event(message_event(1, 300, user(1, "Ann"), "not a reply"))
        .await;
    assert!(h.platform.side_effects().is_empty());
}

#[tokio::test]
async fn test_reply_chain_guard_matches() {
    let h = harness();
    h.rules.add_rule(
        1,
        "reply filter",
        "WHEN message WHERE message.reply_to_message and message.reply_to_message.from_user.id == 42 THEN { delete_message(); } END",
        0,
    );

    let target = Arc::new(Message {
        id: 299,
        chat_id: 1,
        text: Some("original".into()),
        caption: None,
        from_user: Some(user(42, "Target")),
        reply_to_message: None,
        media_group_id: None,
        date: 0,
    });
    let message = Arc::new(Message {
        id: 300,
        chat_id: 1,
        text: Some("a reply".into()),
        caption: None,
        from_user: Some(user(1, "Ann")),
        reply_to_message: Some(target),
        media_group_id: None,
        date: 0,
    });
    h.dispatcher
        .handle_event(ChatEvent::with_message(EventTag::Message, 1, message))
        .await;

    assert_eq!(
        h.platform.side_effects(),
        vec![PlatformCall::Delete {
            chat_id: 1,
            message_id: 300
        }]
    );
}

// Scenario: foreach + break.
#[tokio::test]
async fn test_foreach_break_reply() {
    let h = harness();
    h.rules.add_rule(
        1,
        "counter",
        "WHEN message THEN { i = 0; foreach (c in \"abcde\") { if (c == \"c\") { break; } i = i + 1; } reply(str(i)); } END",
        0,
    );

    h.dispatcher
        .handle_event(message_event(1, 400, user(1, "Ann"), "go"))
        .await;
    assert_eq!(
        h.platform.side_effects(),
        vec![PlatformCall::Reply {
            chat_id: 1,
            message_id: 400,
            text: "2".to_string()
        }]
    );
}

// Memoization invariant: one platform lookup per event even across rules.
#[tokio::test]
async fn test_admin_lookup_memoized_across_rules() {
    let h = harness();
    h.platform.set_admin(1, 7);
    h.rules.add_rule(
        1,
        "first",
        "WHEN message WHERE user.is_admin THEN { log(\"first\"); } END",
        100,
    );
    h.rules.add_rule(
        1,
        "second",
        "WHEN message WHERE user.is_admin and user.is_admin THEN { log(\"second\"); } END",
        10,
    );

    h.dispatcher
        .handle_event(message_event(1, 500, user(7, "Ann"), "x"))
        .await;

    let member_lookups = h
        .platform
        .calls()
        .into_iter()
        .filter(|c| matches!(c, PlatformCall::GetChatMember { .. }))
        .count();
    assert_eq!(member_lookups, 1);
    assert_eq!(h.variables.logs(1).len(), 2);
}

// A fresh event gets a fresh memo.
#[tokio::test]
async fn test_memo_scope_is_one_dispatch() {
    let h = harness();
    h.platform.set_admin(1, 7);
    h.rules.add_rule(
        1,
        "gate",
        "WHEN message WHERE user.is_admin THEN { log(\"ok\"); } END",
        0,
    );

    h.dispatcher
        .handle_event(message_event(1, 501, user(7, "Ann"), "x"))
        .await;
    h.dispatcher
        .handle_event(message_event(1, 502, user(7, "Ann"), "x"))
        .await;

    let member_lookups = h
        .platform
        .calls()
        .into_iter()
        .filter(|c| matches!(c, PlatformCall::GetChatMember { .. }))
        .count();
    assert_eq!(member_lookups, 2);
}

// Flood detection over the statistics store, default-rules style.
#[tokio::test]
async fn test_flood_detection_over_stats() {
    let h = harness();
    h.rules.add_rule(
        1,
        "flood",
        "WHEN message WHERE user.is_admin == false and user.stats.messages_30s > 5 THEN { mute_user(\"10m\"); delete_message(); stop(); } END",
        500,
    );

    // Five messages: below the threshold, nothing happens.
    for i in 0..5 {
        h.dispatcher
            .handle_event(message_event(1, 600 + i, user(9, "Spammer"), "buy now"))
            .await;
    }
    assert!(h.platform.side_effects().is_empty());

    // The sixth pushes the 30s count past 5 (the event itself records
    // before rules run).
    h.dispatcher
        .handle_event(message_event(1, 606, user(9, "Spammer"), "buy now"))
        .await;

    let side_effects = h.platform.side_effects();
    assert_eq!(side_effects.len(), 2);
    assert!(matches!(
        side_effects[0],
        PlatformCall::Restrict { chat_id: 1, user_id: 9, until: Some(_) }
    ));
    assert!(matches!(
        side_effects[1],
        PlatformCall::Delete { chat_id: 1, message_id: 606 }
    ));
}

// stop() halts later rules for the event, but only for that event.
#[tokio::test]
async fn test_stop_halts_remaining_rules() {
    let h = harness();
    h.rules.add_rule(
        1,
        "gate",
        "WHEN message WHERE message.text contains \"secret\" THEN { delete_message(); stop(); } END",
        100,
    );
    h.rules
        .add_rule(1, "echo", "WHEN message THEN { reply(\"seen\"); } END", 10);

    h.dispatcher
        .handle_event(message_event(1, 700, user(1, "Ann"), "the secret word"))
        .await;
    assert_eq!(
        h.platform.side_effects(),
        vec![PlatformCall::Delete {
            chat_id: 1,
            message_id: 700
        }]
    );

    h.dispatcher
        .handle_event(message_event(1, 701, user(1, "Ann"), "plain"))
        .await;
    assert_eq!(h.platform.side_effects().len(), 2);
    assert!(matches!(
        h.platform.side_effects()[1],
        PlatformCall::Reply { message_id: 701, .. }
    ));
}

// Scheduled events carry no user: user-scoped writes are no-ops and
// reads are null.
#[tokio::test]
async fn test_schedule_event_user_vars() {
    let h = harness();
    h.rules.add_rule(
        1,
        "nightly",
        "WHEN schedule(\"0 3 * * *\") THEN { set_var(\"user.x\", 1); if (vars.user.x == null) { send_message(\"no user context\"); } } END",
        0,
    );

    h.dispatcher
        .handle_event(ChatEvent::new(EventTag::Schedule, 1))
        .await;
    assert_eq!(
        h.platform.side_effects(),
        vec![PlatformCall::SendMessage {
            chat_id: 1,
            text: "no user context".to_string()
        }]
    );
}

// Group-scoped counters work from any event.
#[tokio::test]
async fn test_group_counter_rule() {
    let h = harness();
    h.rules.add_rule(
        1,
        "leave counter",
        "WHEN user_leave THEN { set_var(\"group.leaves\", get_var(\"group.leaves\", 0) + 1); } END",
        0,
    );

    for _ in 0..3 {
        h.dispatcher
            .handle_event(ChatEvent::with_user(EventTag::UserLeave, 1, user(9, "Gone")))
            .await;
    }
    assert_eq!(
        h.variables
            .read_var(1, VarScope::Group, "leaves", None)
            .await
            .unwrap(),
        Some(Value::Integer(3))
    );
}

// Adapter failures are absorbed; later statements still run.
#[tokio::test]
async fn test_adapter_failure_does_not_kill_rule() {
    let h = harness();
    h.rules.add_rule(
        1,
        "resilient",
        "WHEN message THEN { reply(\"a\"); set_var(\"group.ran\", true); } END",
        0,
    );

    h.platform.fail_api_calls(true);
    h.dispatcher
        .handle_event(message_event(1, 800, user(1, "Ann"), "x"))
        .await;
    h.platform.fail_api_calls(false);

    assert_eq!(
        h.variables
            .read_var(1, VarScope::Group, "ran", None)
            .await
            .unwrap(),
        Some(Value::Boolean(true))
    );
}
