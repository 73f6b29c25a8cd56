//! Parser integration suite: full sources through `compile`/`precompile`.

use chatwarden::ast::{Expression, Statement, Trigger};
use chatwarden::event::EventTag;
use chatwarden::parser::{compile, precompile};

#[test]
fn test_precompile_accepts_valid_sources() {
    let sources = [
        "WHEN message THEN { reply(\"hi\"); } END",
        "WHEN message WHERE message.text contains \"hello\" THEN { reply(\"hi\"); } END",
        "WHEN user_join THEN { start_verification(); } END",
        "WHEN message or command or edited_message WHERE user.is_admin THEN { stop(); } END",
        "WHEN schedule(\"0 9 * * 1-5\") THEN { send_message(\"good morning\"); } END",
        "WHEN command THEN { t = int(command.arg[0]); set_var(\"user.warnings\", null, t); } END",
        "WHEN message THEN { foreach (w in split(message.text, \" \")) { if (w == \"bad\") { delete_message(); break; } } } END",
        "WHEN message THEN { x = {\"limits\": [1, 2, 3], \"enabled\": true}; y = x[\"limits\"][0]; } END",
        "WHEN message THEN { a = b = c = 0; } END",
        // Comments and both quote styles.
        "WHEN message THEN {\n    // note to self\n    reply('single quoted');\n} END",
        // Case-insensitive keywords.
        "when message then { reply(\"hi\"); } end",
    ];
    for source in sources {
        let (ok, message) = precompile(source);
        assert!(ok, "expected valid source, got {:?}: {}", message, source);
    }
}

#[test]
fn test_precompile_rejects_invalid_sources() {
    let cases = [
        "WHEN THEN { } END",
        "WHEN message WHERE THEN { } END",
        "WHEN message THEN { reply(\"x\") } END",
        "WHEN message THEN { } ",
        "WHEN message THEN { foreach (x) { } } END",
        "WHEN message THEN { if message.text { } } END",
        "WHEN message THEN { break }; END",
        "WHEN schedule(\"* * * * *\") or message THEN { } END",
        "WHEN sticker THEN { } END",
        "WHEN message THEN { } END trailing",
    ];
    for source in cases {
        let (ok, message) = precompile(source);
        assert!(!ok, "expected parse failure for: {}", source);
        let message = message.unwrap();
        assert!(
            message.starts_with("parse error") || message.starts_with("lex error"),
            "unexpected diagnostic: {}",
            message
        );
    }
}

#[test]
fn test_missing_semicolon_diagnostic_format() {
    let (ok, message) = precompile("WHEN message THEN { reply(\"x\") } END");
    assert!(!ok);
    assert_eq!(
        message.unwrap(),
        "parse error (line 1, column 32): expected ';', got '}'"
    );
}

#[test]
fn test_lex_error_diagnostic_format() {
    let (ok, message) = precompile("WHEN message THEN { x = #1; } END");
    assert!(!ok);
    assert_eq!(
        message.unwrap(),
        "lex error (line 1, column 25): unexpected character '#'"
    );
}

#[test]
fn test_diagnostics_report_later_lines() {
    let source = "WHEN message\nWHERE message.text contains \"x\"\nTHEN {\n    reply(\"a\")\n    reply(\"b\");\n}\nEND";
    let (ok, message) = precompile(source);
    assert!(!ok);
    // The missing semicolon surfaces at the next token, on line 5.
    assert!(message.unwrap().contains("(line 5, column 5)"));
}

#[test]
fn test_trigger_list() {
    let rule = compile("WHEN photo or video or document THEN { } END").unwrap();
    assert_eq!(
        rule.triggers,
        vec![
            Trigger::Event(EventTag::Photo),
            Trigger::Event(EventTag::Video),
            Trigger::Event(EventTag::Document),
        ]
    );
}

#[test]
fn test_guard_is_optional() {
    let rule = compile("WHEN media_group THEN { reply(\"album\"); } END").unwrap();
    assert!(rule.guard.is_none());
    assert!(rule.matches(EventTag::MediaGroup));
}

#[test]
fn test_else_if_desugars_to_nested_if() {
    let rule = compile(
        "WHEN message THEN { if (a == 1) { x = 1; } else if (a == 2) { x = 2; } else { x = 3; } } END",
    )
    .unwrap();
    let Statement::If { else_block, .. } = &rule.body.statements[0] else {
        panic!("expected if statement");
    };
    let else_block = else_block.as_ref().unwrap();
    assert_eq!(else_block.statements.len(), 1);
    assert!(matches!(else_block.statements[0], Statement::If { .. }));
}

#[test]
fn test_statement_lines_recorded() {
    let source = "WHEN message\nTHEN {\n    x = 1;\n    reply(\"hi\");\n}\nEND";
    let rule = compile(source).unwrap();
    match &rule.body.statements[0] {
        Statement::Assign { line, .. } => assert_eq!(*line, 3),
        other => panic!("expected assign, got {:?}", other),
    }
    match &rule.body.statements[1] {
        Statement::Expression { line, .. } => assert_eq!(*line, 4),
        other => panic!("expected expression, got {:?}", other),
    }
}

#[test]
fn test_unary_minus_is_an_operator() {
    let rule = compile("WHEN message THEN { x = -5; y = 3 - -2; } END").unwrap();
    match &rule.body.statements[0] {
        Statement::Assign { value, .. } => {
            assert!(matches!(value, Expression::Unary { .. }));
        }
        other => panic!("expected assign, got {:?}", other),
    }
}

#[test]
fn test_canonical_roundtrip_of_complex_rules() {
    let sources = [
        "WHEN message WHERE not (message.text startswith \"/\") and len(message.text) > 0 THEN { reply(lower(message.text)); } END",
        "WHEN command WHERE command.name == \"warn\" and user.is_admin THEN { t = int(command.arg[0]); n = get_var(\"user.warnings\", 0, t) + 1; set_var(\"user.warnings\", n, t); if (n >= 3) { kick_user(t); set_var(\"user.warnings\", null, t); } } END",
        "WHEN media_group THEN { reply(\"got \" + str(media_group.message_count)); } END",
        "WHEN schedule(\"*/5 * * * *\") THEN { send_message(\"tick\"); } END",
        "WHEN message THEN { data = {\"a\": [1, 2.5], \"b\": {\"c\": false}}; foreach (x in data.a) { log(str(x)); } } END",
        "WHEN user_leave THEN { set_var(\"group.leaves\", get_var(\"group.leaves\", 0) + 1); } END",
    ];
    for source in sources {
        let rule = compile(source).unwrap();
        let canonical = rule.to_string();
        let reparsed = compile(&canonical)
            .unwrap_or_else(|e| panic!("canonical form failed to reparse: {}: {}", canonical, e));
        assert_eq!(rule, reparsed, "roundtrip mismatch via {}", canonical);
        // The canonical form is a fixed point.
        assert_eq!(reparsed.to_string(), canonical);
    }
}
