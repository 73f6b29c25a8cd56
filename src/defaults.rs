//! Built-in default rule set.
//!
//! Installed for newly managed groups by the embedding application; gives
//! administrators working moderation out of the box.

/// Name, priority and source for each default rule.
pub fn default_rules() -> Vec<(&'static str, i64, &'static str)> {
    vec![
        (
            "join verification",
            1000,
            r#"
WHEN user_join
THEN {
    start_verification();
}
END
"#,
        ),
        (
            "flood detection (text)",
            500,
            r#"
WHEN message or command
WHERE user.is_admin == false and user.stats.messages_30s > 5
THEN {
    mute_user("10m");
    reply("Flood detected, you have been muted for 10 minutes.");
    log("user " + str(user.id) + " muted for flooding", "auto_moderation");
    delete_message();
    stop();
}
END
"#,
        ),
        (
            "flood detection (media)",
            500,
            r#"
WHEN photo or video or document
WHERE user.is_admin == false and user.stats.messages_30s > 5
THEN {
    mute_user("10m");
    send_message("Flood detected, " + user.first_name + " has been muted for 10 minutes.");
    log("user " + str(user.id) + " muted for media flooding", "auto_moderation");
    delete_message();
    stop();
}
END
"#,
        ),
    ]
}
