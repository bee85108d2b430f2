//! Integration tests for message parsing and serialization.
//!
//! These verify that messages parse, serialize back to canonical form,
//! and survive the round trip unchanged.

use slirc_client::{Message, Prefix};

#[test]
fn test_message_round_trip_simple() {
    let original = "PING :irc.example.com";
    let message: Message = original.parse().expect("Failed to parse message");
    let serialized = message.to_string();

    let reparsed: Message = serialized.parse().expect("Failed to reparse message");
    assert_eq!(message, reparsed);
}

#[test]
fn test_message_round_trip_with_prefix() {
    let original = ":nick!user@host PRIVMSG #channel :Hello, world!";
    let message: Message = original.parse().expect("Failed to parse message");
    assert_eq!(message.to_string(), original);
}

#[test]
fn test_message_round_trip_with_tags() {
    let original =
        "@time=2023-01-01T00:00:00.000Z;msgid=abc123 :nick!user@host PRIVMSG #channel :Tagged message";
    let message: Message = original.parse().expect("Failed to parse message");
    assert_eq!(message.to_string(), original);
}

#[test]
fn test_message_round_trip_numeric_response() {
    let original = ":server 001 nickname :Welcome to the IRC Network";
    let message: Message = original.parse().expect("Failed to parse message");
    let reparsed: Message = message.to_string().parse().expect("Failed to reparse");
    assert_eq!(message, reparsed);
    assert_eq!(message.command, "001");
}

#[test]
fn test_canonical_whitespace() {
    // Runs of spaces collapse; the trailing marker appears only where
    // the last parameter needs it.
    let message: Message = "PRIVMSG  #channel   :hi".parse().unwrap();
    assert_eq!(message.to_string(), "PRIVMSG #channel hi");

    let message: Message = "PRIVMSG #channel :hi there".parse().unwrap();
    assert_eq!(message.to_string(), "PRIVMSG #channel :hi there");
}

#[test]
fn test_empty_trailing_round_trip() {
    let original = "TOPIC #channel :";
    let message: Message = original.parse().unwrap();
    assert_eq!(message.params, vec!["#channel", ""]);
    assert_eq!(message.to_string(), original);
}

#[test]
fn test_trailing_with_colon_round_trip() {
    let original = "PRIVMSG #channel ::)";
    let message: Message = original.parse().unwrap();
    assert_eq!(message.params[1], ":)");
    assert_eq!(message.to_string(), original);
}

#[test]
fn test_tag_escape_round_trip() {
    let message = Message::privmsg("#c", "x").with_tag("k", "semi;space backslash\\end");
    let reparsed: Message = message.to_string().parse().unwrap();
    assert_eq!(reparsed.tag("k"), Some("semi;space backslash\\end"));
    assert_eq!(message, reparsed);
}

#[test]
fn test_vendor_tag_round_trip() {
    let original = "@+example.com/foo=bar :n!u@h TAGMSG #chan";
    let message: Message = original.parse().unwrap();
    assert_eq!(message.tag("+example.com/foo"), Some("bar"));
    assert_eq!(message.to_string(), original);
}

#[test]
fn test_prefix_forms() {
    let server: Message = ":irc.example.com NOTICE * :Looking up your hostname".parse().unwrap();
    assert_eq!(
        server.prefix,
        Some(Prefix::ServerName("irc.example.com".into()))
    );

    let bare: Message = ":nick JOIN #chan".parse().unwrap();
    assert_eq!(bare.source_nickname(), Some("nick"));

    let full: Message = ":nick!user@host JOIN #chan".parse().unwrap();
    assert_eq!(
        full.prefix,
        Some(Prefix::Nickname("nick".into(), "user".into(), "host".into()))
    );
}

#[test]
fn test_fifteen_params_accepted_sixteen_rejected() {
    let fifteen = format!("FOO {}", ["x"; 15].join(" "));
    assert!(fifteen.parse::<Message>().is_ok());

    let sixteen = format!("FOO {}", ["x"; 16].join(" "));
    assert!(sixteen.parse::<Message>().is_err());
}

#[test]
fn test_spec_tag_example() {
    let message: Message =
        "@time=2024-01-01T00:00:00.000Z;+vendor/x=a\\:b\\sc :nick!u@h PRIVMSG #chan :hi there"
            .parse()
            .unwrap();
    assert_eq!(message.tag("time"), Some("2024-01-01T00:00:00.000Z"));
    assert_eq!(message.tag("+vendor/x"), Some("a;b c"));
    assert_eq!(message.source_nickname(), Some("nick"));
    assert_eq!(message.command, "PRIVMSG");
    assert_eq!(message.params, vec!["#chan", "hi there"]);
}
