use dbus_objects_common::{match_rule::MatchRule, Error};

#[test]
fn test_render_rules() {
    assert_eq!(MatchRule::signal().to_string(), "type='signal'");

    let rule = MatchRule::signal()
        .sender(":1.4")
        .interface("com.example.Calc")
        .path("/com/example");

    assert_eq!(
        rule.to_string(),
        "type='signal',sender=':1.4',interface='com.example.Calc',path='/com/example'"
    );
}

#[test]
fn test_parse_rules() {
    let rule = MatchRule::parse("type='signal', sender=':1.4',member=Tick ,path='/a'")
        .expect("Failed to parse rule");

    assert_eq!(rule.msg_type.as_deref(), Some("signal"));
    assert_eq!(rule.sender.as_deref(), Some(":1.4"));
    assert_eq!(rule.member.as_deref(), Some("Tick"));
    assert_eq!(rule.path.as_deref(), Some("/a"));
    assert!(rule.interface.is_none());

    let rendered = MatchRule::signal().sender("svc").interface("a.B").to_string();
    assert_eq!(
        MatchRule::parse(&rendered).unwrap(),
        MatchRule::signal().sender("svc").interface("a.B")
    );

    assert!(matches!(MatchRule::parse("type"), Err(Error::InvalidArgs(_))));
    assert!(matches!(MatchRule::parse("type='signal"), Err(Error::InvalidArgs(_))));
    assert!(matches!(MatchRule::parse("eavesdrop='true'"), Err(Error::InvalidArgs(_))));
}

#[test]
fn test_matching() {
    let catch_all = MatchRule::signal();
    assert!(catch_all.matches_signal(&[":1.1"], "/a", "a.B", "S"));

    let rule = MatchRule::signal().sender("svc").interface("a.B").path("/a");
    assert!(rule.matches_signal(&[":1.1", "svc"], "/a", "a.B", "S"));
    assert!(!rule.matches_signal(&[":1.1"], "/a", "a.B", "S"));
    assert!(!rule.matches_signal(&["svc"], "/b", "a.B", "S"));
    assert!(!rule.matches_signal(&["svc"], "/a", "a.C", "S"));

    let by_member = MatchRule::signal().member("Tick");
    assert!(by_member.matches_signal(&[], "/", "a.B", "Tick"));
    assert!(!by_member.matches_signal(&[], "/", "a.B", "Tock"));

    let method_calls = MatchRule::parse("type='method_call'").unwrap();
    assert!(!method_calls.matches_signal(&[], "/", "a.B", "S"));
}

#[test]
fn test_errors() {
    let typed = Error::new("com.example.Failure", "Something went wrong");
    assert_eq!(typed.dbus_name(), "com.example.Failure");
    assert_eq!(typed.dbus_message(), "Something went wrong");
    assert_eq!(typed.to_string(), "DBusError: Something went wrong");

    assert_eq!(Error::NotConnected.dbus_name(), "org.freedesktop.DBus.Error.Failed");
    assert_eq!(Error::NotConnected.dbus_message(), "Bus is no longer connected");
    assert_eq!(
        Error::InvalidArgs("x".into()).dbus_name(),
        "org.freedesktop.DBus.Error.InvalidArgs"
    );
    assert_eq!(
        Error::NoSuchMethod("M".into()).dbus_name(),
        "org.freedesktop.DBus.Error.UnknownMethod"
    );
}
