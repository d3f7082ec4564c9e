//! Introspection, method dispatch and property fetching against a mock session.

use std::rc::Rc;

use serde_json::json;

use busproxy::Bus;
use busproxy::BusKind;
use busproxy::PropertyPolicy;
use busproxy::Value;
use busproxy::codec;
use busproxy::dispatch;
use busproxy::introspect;
use busproxy::introspect::INTROSPECTABLE;
use busproxy::introspect::PROPERTIES;
use busproxy::mock::MockSession;
use busproxy::session;
use deferred::Deferred;
use deferred::Drain;
use deferred::scheduler;

const DEST: &str = "org.example.Svc";
const PATH: &str = "/obj";

/// Two interfaces both declaring `Foo`, with different arities.
const OVERLAPPING: &str = r#"<node>
  <interface name="org.example.if1">
    <method name="Foo"><arg type="i"/><arg type="i"/><arg type="s" direction="out"/></method>
  </interface>
  <interface name="org.example.if2">
    <method name="Foo"><arg type="s"/></method>
    <method name="Fail"/>
    <method name="Garbage"/>
    <method name="Nothing"/>
  </interface>
</node>"#;

/// Two property-carrying interfaces plus the properties interface.
const WITH_PROPERTIES: &str = r#"<node>
  <interface name="org.freedesktop.DBus.Properties">
    <method name="GetAll"><arg type="s"/><arg type="a{sv}" direction="out"/></method>
  </interface>
  <interface name="A">
    <property name="x" type="i" access="read"/>
    <property name="a_only" type="s" access="read"/>
  </interface>
  <interface name="B">
    <property name="x" type="i" access="read"/>
  </interface>
</node>"#;

/// Property-carrying interfaces but no properties interface.
const WITHOUT_PROPERTIES_INTERFACE: &str = r#"<node>
  <interface name="A"><property name="x" type="i" access="read"/></interface>
</node>"#;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Answers introspection with `document` and `GetAll` with
/// `get_all(interface)`. Other members echo `member:encodedArgs`.
fn responder<F>(document: &'static str, get_all: F) -> impl Fn(&str, &[String]) -> session::Result<String>
where
    F: Fn(&str) -> session::Result<String> + 'static,
{
    move |procedure: &str, args: &[String]| {
        assert_eq!(procedure, dispatch::SEND);
        match (args[3].as_str(), args[4].as_str()) {
            (INTROSPECTABLE, "Introspect") => Ok(json!([document]).to_string()),
            (PROPERTIES, "GetAll") => {
                let requested: Vec<String> = serde_json::from_str(&args[5]).unwrap();
                get_all(&requested[0])
            }
            (_, "Fail") => Err(session::Error::Remote("org.example.Error.Failed: nope".into())),
            (_, "Garbage") => Ok("not json".into()),
            (_, "Nothing") => Ok("[]".into()),
            (_, member) => Ok(json!([format!("{}:{}", member, args[5])]).to_string()),
        }
    }
}

fn service<F>(document: &'static str, get_all: F) -> Rc<MockSession>
where
    F: Fn(&str) -> session::Result<String> + 'static,
{
    Rc::new(MockSession::new(responder(document, get_all)))
}

fn no_properties(_interface: &str) -> session::Result<String> {
    Err(session::Error::Remote("no properties".into()))
}

fn properties_a_b(interface: &str) -> session::Result<String> {
    match interface {
        "A" => Ok(json!([{"x": 1, "a_only": "a"}]).to_string()),
        "B" => Ok(json!([{"x": 2}]).to_string()),
        other => Err(session::Error::Remote(format!("unknown interface {}", other))),
    }
}

fn settle<T: Clone + 'static, E: Clone + 'static>(deferred: Deferred<T, E>) -> Result<T, E> {
    scheduler::run_until_idle();
    deferred.result().expect("deferred value still pending")
}

fn get_all_requests(session: &MockSession) -> Vec<String> {
    session
        .calls_to(dispatch::SEND)
        .into_iter()
        .filter(|args| args[4] == "GetAll")
        .map(|args| args[5].clone())
        .collect()
}

// ============================================================================
// Method tables
// ============================================================================

#[test]
fn test_introspect_builds_method_tables() {
    init_logging();
    let session = service(OVERLAPPING, no_properties);
    let bus = Bus::new(BusKind::Session, session.clone());
    let object = settle(bus.introspect(DEST, PATH)).unwrap();

    assert_eq!(object.destination(), DEST);
    assert_eq!(object.object_path(), PATH);
    assert_eq!(object.method("Foo").unwrap().arg_count, 2);
    assert_eq!(object.method("Foo").unwrap().signature, "ii");
    assert_eq!(object.method_interface("Foo"), Some("org.example.if1"));

    let if2 = object.interface("org.example.if2").unwrap();
    assert_eq!(if2.method("Foo").unwrap().arg_count, 1);
    assert!(object.interface("org.example.missing").is_none());

    // No properties interface, so no property traffic.
    assert!(get_all_requests(&session).is_empty());
    assert!(object.properties().is_empty());
}

#[test]
fn test_introspect_call_shape() {
    let session = service(OVERLAPPING, no_properties);
    let bus = Bus::new(BusKind::System, session.clone());
    settle(bus.introspect(DEST, PATH)).unwrap();

    let calls = session.calls_to(dispatch::SEND);
    assert_eq!(
        calls[0],
        vec!["system", DEST, PATH, INTROSPECTABLE, "Introspect", "[]"]
    );
}

#[test]
fn test_get_object_does_not_introspect() {
    let session = service(OVERLAPPING, no_properties);
    let object = Bus::new(BusKind::Session, session.clone()).get_object(DEST, PATH);
    assert!(session.calls().is_empty());
    assert!(object.interface_names().next().is_none());

    let populated = settle(object.introspect()).unwrap();
    assert_eq!(populated.interface_names().count(), 2);
}

// ============================================================================
// Dispatch
// ============================================================================

#[test]
fn test_invoke_root_method() {
    let session = service(OVERLAPPING, no_properties);
    let object = settle(Bus::new(BusKind::Session, session.clone()).introspect(DEST, PATH)).unwrap();

    let result = settle(object.invoke("Foo", vec![Value::Int(1), Value::Int(2)])).unwrap();
    assert_eq!(result, Value::from("Foo:[1,2]"));

    let last = session.calls_to(dispatch::SEND).pop().unwrap();
    assert_eq!(last, vec!["session", DEST, PATH, "org.example.if1", "Foo", "[1,2]"]);
}

#[test]
fn test_invoke_interface_method() {
    let session = service(OVERLAPPING, no_properties);
    let object = settle(Bus::new(BusKind::Session, session.clone()).introspect(DEST, PATH)).unwrap();

    let if2 = object.interface("org.example.if2").unwrap();
    let result = settle(if2.invoke("Foo", vec![Value::from("hi")])).unwrap();
    assert_eq!(result, Value::from(r#"Foo:["hi"]"#));

    let last = session.calls_to(dispatch::SEND).pop().unwrap();
    assert_eq!(last[3], "org.example.if2");
}

#[test]
fn test_invoke_wrong_arity_rejects_without_calling() {
    let session = service(OVERLAPPING, no_properties);
    let object = settle(Bus::new(BusKind::Session, session.clone()).introspect(DEST, PATH)).unwrap();
    let before = session.calls().len();

    let err = settle(object.invoke("Foo", vec![Value::Int(1)])).unwrap_err();
    assert_eq!(
        err,
        dispatch::Error::ArgumentCount {
            method: "Foo".into(),
            expected: 2,
            found: 1,
        }
    );
    assert_eq!(session.calls().len(), before);
}

#[test]
fn test_invoke_unknown_method() {
    let session = service(OVERLAPPING, no_properties);
    let object = settle(Bus::new(BusKind::Session, session.clone()).introspect(DEST, PATH)).unwrap();

    let err = settle(object.invoke("Frobnicate", vec![])).unwrap_err();
    assert_eq!(err, dispatch::Error::UnknownMethod("Frobnicate".into()));
}

#[test]
fn test_call_failure_carries_description() {
    let session = service(OVERLAPPING, no_properties);
    let object = Bus::new(BusKind::Session, session).get_object(DEST, PATH);

    let err = settle(object.call_method("org.example.if2", "Fail", &[], None)).unwrap_err();
    assert_eq!(err, dispatch::Error::Remote("org.example.Error.Failed: nope".into()));
    assert_eq!(err.to_string(), "org.example.Error.Failed: nope");
}

#[test]
fn test_call_decode_failure() {
    let session = service(OVERLAPPING, no_properties);
    let object = Bus::new(BusKind::Session, session).get_object(DEST, PATH);

    let err = settle(object.call_method("org.example.if2", "Garbage", &[], None)).unwrap_err();
    assert!(matches!(err, dispatch::Error::Decode(codec::Error::Syntax(_))));
}

#[test]
fn test_call_empty_reply_is_null() {
    let session = service(OVERLAPPING, no_properties);
    let object = Bus::new(BusKind::Session, session).get_object(DEST, PATH);

    let value = settle(object.call_method("org.example.if2", "Nothing", &[], None)).unwrap();
    assert!(value.is_null());
}

#[test]
fn test_introspect_rejects_non_document() {
    let session = Rc::new(MockSession::new(|_, _| Ok("[42]".into())));
    let bus = Bus::new(BusKind::Session, session);
    let err = settle(bus.introspect(DEST, PATH)).unwrap_err();
    assert_eq!(err, introspect::Error::NotADocument("int"));
}

#[test]
fn test_introspect_rejects_malformed_document() {
    let session = Rc::new(MockSession::new(|_, _| Ok(json!(["<node><interface>"]).to_string())));
    let bus = Bus::new(BusKind::Session, session);
    let err = settle(bus.introspect(DEST, PATH)).unwrap_err();
    assert!(matches!(err, introspect::Error::Document(_)));
}

#[test]
fn test_introspect_call_failure() {
    let session = Rc::new(MockSession::new(|_, _| Err(session::Error::Remote("no such object".into()))));
    let bus = Bus::new(BusKind::Session, session);
    let err = settle(bus.introspect(DEST, PATH)).unwrap_err();
    assert_eq!(
        err,
        introspect::Error::Call(dispatch::Error::Remote("no such object".into()))
    );
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_properties_fetched_in_reverse_declaration_order() {
    init_logging();
    let session = service(WITH_PROPERTIES, properties_a_b);
    let object = settle(Bus::new(BusKind::Session, session.clone()).introspect(DEST, PATH)).unwrap();

    assert_eq!(get_all_requests(&session), vec![r#"["B"]"#, r#"["A"]"#]);
    assert_eq!(object.property("x"), Some(&Value::Int(1)));
    assert_eq!(object.property("a_only"), Some(&Value::from("a")));
    assert_eq!(object.interface("B").unwrap().property("x"), Some(&Value::Int(2)));
    assert_eq!(object.interface("A").unwrap().properties().len(), 2);
}

#[test]
fn test_properties_need_properties_interface() {
    let session = service(WITHOUT_PROPERTIES_INTERFACE, properties_a_b);
    let object = settle(Bus::new(BusKind::Session, session.clone()).introspect(DEST, PATH)).unwrap();

    assert!(get_all_requests(&session).is_empty());
    assert!(object.property("x").is_none());
}

#[test]
fn test_best_effort_skips_failed_interface() {
    let session = service(WITH_PROPERTIES, |interface| match interface {
        "A" => Ok(json!([{"x": 1}]).to_string()),
        _ => Err(session::Error::Remote("access denied".into())),
    });
    let bus = Bus::new(BusKind::Session, session.clone());
    let object = settle(bus.introspect(DEST, PATH)).unwrap();

    assert_eq!(get_all_requests(&session).len(), 2);
    assert_eq!(object.property("x"), Some(&Value::Int(1)));
    assert!(object.interface("B").unwrap().properties().is_empty());
}

#[test]
fn test_best_effort_skips_non_dictionary_reply() {
    let session = service(WITH_PROPERTIES, |interface| match interface {
        "A" => Ok(json!([{"x": 1}]).to_string()),
        _ => Ok(json!(["not a dict"]).to_string()),
    });
    let object = settle(Bus::new(BusKind::Session, session).introspect(DEST, PATH)).unwrap();
    assert_eq!(object.property("x"), Some(&Value::Int(1)));
}

#[test]
fn test_fail_fast_rejects_introspection() {
    let session = service(WITH_PROPERTIES, |interface| match interface {
        "A" => Ok(json!([{"x": 1}]).to_string()),
        _ => Err(session::Error::Remote("access denied".into())),
    });
    let bus = Bus::new(BusKind::Session, session.clone()).with_policy(PropertyPolicy::FailFast);
    let err = settle(bus.introspect(DEST, PATH)).unwrap_err();

    assert_eq!(
        err,
        introspect::Error::Properties {
            interface: "B".into(),
            source: dispatch::Error::Remote("access denied".into()),
        }
    );
    // B is popped first; A is never fetched.
    assert_eq!(get_all_requests(&session), vec![r#"["B"]"#]);
}

#[test]
fn test_introspect_with_overrides_bus_policy() {
    let session = service(WITH_PROPERTIES, |_| Ok(json!([7]).to_string()));
    let object = Bus::new(BusKind::Session, session).get_object(DEST, PATH);

    let err = settle(object.introspect_with(PropertyPolicy::FailFast)).unwrap_err();
    assert_eq!(
        err,
        introspect::Error::PropertiesShape {
            interface: "B".into(),
            found: "int",
        }
    );
}

// ============================================================================
// Queued sessions
// ============================================================================

#[tokio::test]
async fn test_introspect_with_queued_replies() {
    let session = Rc::new(MockSession::new(responder(WITH_PROPERTIES, properties_a_b)).with_drain(Drain::Queued));
    let bus = Bus::new(BusKind::Session, session.clone());

    let object = bus.introspect(DEST, PATH).settled().await.unwrap();
    assert_eq!(object.property("x"), Some(&Value::Int(1)));

    let value = object
        .call_method(PROPERTIES, "GetAll", &[Value::from("B")], Some("s"))
        .settled()
        .await
        .unwrap();
    assert_eq!(value.as_dict().unwrap()["x"], Value::Int(2));
}
