//! Connection, authentication and version negotiation.

use std::rc::Rc;

use serde_json::json;

use busproxy::BusKind;
use busproxy::Config;
use busproxy::Handshake;
use busproxy::Manifest;
use busproxy::PropertyPolicy;
use busproxy::Value;
use busproxy::config::CLIENT_VERSION;
use busproxy::connect;
use busproxy::connect::Error;
use busproxy::dispatch;
use busproxy::mock::MockConnector;
use busproxy::mock::MockSession;
use busproxy::session;
use deferred::Deferred;
use deferred::scheduler;

const URI: &str = "ws://localhost:9000";

fn settle<T: Clone + 'static, E: Clone + 'static>(deferred: Deferred<T, E>) -> Result<T, E> {
    scheduler::run_until_idle();
    deferred.result().expect("deferred value still pending")
}

/// A bridge reporting `version` and answering every method with `[true]`.
fn bridge(version: &'static str) -> Rc<MockSession> {
    Rc::new(MockSession::new(move |procedure, _| match procedure {
        dispatch::VERSION => Ok(version.to_string()),
        _ => Ok("[true]".into()),
    }))
}

fn manifest(key: Option<&str>) -> Manifest {
    Manifest {
        name: "demo-app".into(),
        key: key.map(str::to_string),
        permissions: vec!["org.example.Svc".into()],
    }
}

// ============================================================================
// Success
// ============================================================================

#[test]
fn test_connect_anonymous() {
    let session = bridge("0.5.1");
    let connector = MockConnector::new(session.clone());

    let connection = settle(connect(&connector, URI, None, &Config::default())).unwrap();
    assert_eq!(connection.uri(), URI);
    assert_eq!(connection.server_version(), "0.5.1");
    assert!(connection.capabilities().is_empty());
    assert_eq!(connection.session_bus().kind(), BusKind::Session);
    assert_eq!(connection.system_bus().kind(), BusKind::System);
    assert_eq!(connection.bus(BusKind::System).kind(), BusKind::System);

    assert_eq!(connector.opened(), vec![URI]);
    assert_eq!(session.handshakes(), vec![Handshake::anonymous()]);
    assert_eq!(session.calls_to(dispatch::VERSION), vec![Vec::<String>::new()]);
}

#[test]
fn test_connect_named_manifest() {
    let session = bridge("0.3.2");
    let connector = MockConnector::new(session.clone());
    let manifest = manifest(None);

    let connection = settle(connect(&connector, URI, Some(&manifest), &Config::default())).unwrap();
    assert_eq!(connection.capabilities(), ["org.example.Svc".to_string()]);
    let handshake = &session.handshakes()[0];
    assert_eq!(handshake.identity.as_deref(), Some("demo-app"));
    assert!(!handshake.is_signed());
}

#[test]
fn test_connect_signed_manifest() {
    let session = bridge("0.5.1");
    let connector = MockConnector::new(session.clone());
    let manifest = manifest(Some("s3cret"));

    settle(connect(&connector, URI, Some(&manifest), &Config::default())).unwrap();
    assert_eq!(
        session.handshakes(),
        vec![Handshake::signed("demo-app", vec!["org.example.Svc".into()], "s3cret")]
    );
}

#[test]
fn test_connect_accepts_quoted_version() {
    let session = bridge(r#""0.4.0""#);
    let connection = settle(connect(&MockConnector::new(session), URI, None, &Config::default())).unwrap();
    assert_eq!(connection.server_version(), "0.4.0");
}

#[test]
fn test_connect_bus_handles_carry_policy() {
    let session = bridge(CLIENT_VERSION);
    let config = Config {
        property_policy: PropertyPolicy::FailFast,
        ..Config::default()
    };
    let connection = settle(connect(&MockConnector::new(session), URI, None, &config)).unwrap();
    assert_eq!(connection.session_bus().policy(), PropertyPolicy::FailFast);
    assert_eq!(connection.system_bus().policy(), PropertyPolicy::FailFast);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_connect_open_failure() {
    let session = bridge("0.5.1");
    let connector = MockConnector::failing(session.clone(), session::Error::Connection("refused".into()));

    let err = settle(connect(&connector, URI, None, &Config::default())).unwrap_err();
    assert_eq!(
        err,
        Error::Connection {
            uri: URI.into(),
            source: session::Error::Connection("refused".into()),
        }
    );
    assert!(session.handshakes().is_empty());
}

#[test]
fn test_connect_authentication_failure() {
    let session = Rc::new(
        MockSession::new(|_, _| Ok("0.5.1".into())).rejecting_auth(session::Error::Authentication("bad signature".into())),
    );
    let connector = MockConnector::new(session.clone());

    let err = settle(connect(&connector, URI, Some(&manifest(Some("wrong"))), &Config::default())).unwrap_err();
    assert_eq!(
        err,
        Error::Authentication(session::Error::Authentication("bad signature".into()))
    );
    assert!(session.calls().is_empty());
}

#[test]
fn test_connect_rejects_old_server() {
    let session = bridge("0.3.1");
    let err = settle(connect(&MockConnector::new(session), URI, None, &Config::default())).unwrap_err();
    assert_eq!(
        err.to_string(),
        "server version 0.3.1 unsupported, need version 0.3.2 or superior"
    );
}

#[test]
fn test_connect_honours_configured_minimum() {
    let session = bridge("0.5.1");
    let config = Config::from_json(r#"{"min_version": "0.6"}"#).unwrap();
    let err = settle(connect(&MockConnector::new(session), URI, None, &config)).unwrap_err();
    assert_eq!(
        err,
        Error::Version {
            remote: "0.5.1".into(),
            minimum: "0.6".into(),
        }
    );
}

#[test]
fn test_connect_version_query_failure() {
    let session = Rc::new(MockSession::new(|_, _| Err(session::Error::Closed)));
    let err = settle(connect(&MockConnector::new(session), URI, None, &Config::default())).unwrap_err();
    assert_eq!(err, Error::VersionQuery(session::Error::Closed));
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_connect_then_call() {
    let document = r#"<node><interface name="org.example.Calc"><method name="Ping"/></interface></node>"#;
    let session = Rc::new(MockSession::new(move |procedure, args| match procedure {
        dispatch::VERSION => Ok(CLIENT_VERSION.into()),
        dispatch::SEND if args[4] == "Introspect" => Ok(json!([document]).to_string()),
        dispatch::SEND => Ok(json!([{"$kind": "struct", "value": ["pong", 1]}]).to_string()),
        _ => Err(session::Error::Remote("unexpected".into())),
    }));

    let connection = connect(&MockConnector::new(session), URI, None, &Config::default())
        .settled()
        .await
        .unwrap();
    let object = connection
        .session_bus()
        .introspect("org.example.Calc", "/calc")
        .settled()
        .await
        .unwrap();
    let reply = object.invoke("Ping", vec![]).settled().await.unwrap();
    assert_eq!(reply, Value::Struct(vec![Value::from("pong"), Value::Int(1)]));
}
