use std::{sync::Arc, time::Duration};

use async_channel::{unbounded, Receiver};
use log::LevelFilter;

use dbus_objects_common::{
    match_rule::MatchRule,
    transport::{BusEvent, BusHandle, BusScope, MethodCall, OutgoingSignal, Transport},
    Error, Value, DBUS_INTERFACE, DBUS_OBJECT_PATH, DBUS_SERVICE_NAME, DEFAULT_TIMEOUT,
    DISCONNECTED_SIGNAL, ERROR_LIMITS_EXCEEDED, ERROR_NO_REPLY, ERROR_SERVICE_UNKNOWN,
    ERROR_UNKNOWN_OBJECT, LOCAL_INTERFACE, LOCAL_OBJECT_PATH,
};
use dbus_objects_hub_lib::{args::Args, hub::Hub};

fn init_logger() {
    let _ = pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Debug)
        .try_init();
}

fn connect(hub: &Hub) -> (Arc<dyn BusHandle>, Receiver<BusEvent>) {
    let (sink, events) = unbounded();
    let handle = hub
        .acquire(BusScope::Session, sink)
        .expect("Failed to connect");

    (handle, events)
}

fn call(destination: &str, path: &str, member: &str, args: Vec<Value>) -> MethodCall {
    MethodCall {
        destination: destination.into(),
        path: path.into(),
        interface: "com.example.Echo".into(),
        member: member.into(),
        signature: String::new(),
        timeout_ms: DEFAULT_TIMEOUT,
        args,
    }
}

fn bus_call(member: &str, args: Vec<Value>) -> MethodCall {
    MethodCall {
        destination: DBUS_SERVICE_NAME.into(),
        path: DBUS_OBJECT_PATH.into(),
        interface: DBUS_INTERFACE.into(),
        member: member.into(),
        signature: "s".into(),
        timeout_ms: DEFAULT_TIMEOUT,
        args,
    }
}

fn signal(member: &str, value: f64) -> OutgoingSignal {
    OutgoingSignal {
        path: "/com/example/Echo".into(),
        interface: "com.example.Echo".into(),
        member: member.into(),
        args: vec![Value::Double(value)],
        signatures: vec!["d".into()],
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_names() {
    init_logger();

    let hub = Hub::new(Args::default());

    let (service, _service_events) = connect(&hub);
    let (client, _client_events) = connect(&hub);
    assert_ne!(service.unique_name(), client.unique_name());

    service
        .request_name("com.example.Echo")
        .expect("Failed to request name");
    // Repeated request by the owner succeeds
    service
        .request_name("com.example.Echo")
        .expect("Failed to request name");

    assert!(client.request_name("com.example.Echo").is_err());

    assert_eq!(
        client
            .call_method(bus_call("GetNameOwner", vec!["com.example.Echo".into()]))
            .await,
        Ok(Value::String(service.unique_name().into()))
    );
    assert_eq!(
        client
            .call_method(bus_call("NameHasOwner", vec!["com.example.Echo".into()]))
            .await,
        Ok(Value::Boolean(true))
    );

    let names = match client.call_method(bus_call("ListNames", vec![])).await {
        Ok(Value::Array(names)) => names,
        other => panic!("Unexpected names reply: {other:?}"),
    };
    assert!(names.contains(&Value::String("com.example.Echo".into())));
    assert!(names.contains(&Value::String(client.unique_name().into())));

    // Released connection gives up its names
    service.release();
    service.release();

    assert_eq!(hub.name_owner(BusScope::Session, "com.example.Echo"), None);
    assert_eq!(hub.connection_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_method_routing() {
    init_logger();

    let hub = Hub::new(Args::default());

    let (service, events) = connect(&hub);
    let (client, client_events) = connect(&hub);

    service
        .request_name("com.example.Echo")
        .expect("Failed to request name");
    service
        .register_object_path("/com/example/Echo")
        .expect("Failed to register path");

    assert_eq!(
        service.register_object_path("/com/example/Echo"),
        Err(Error::AlreadyRegistered("/com/example/Echo".into()))
    );

    let reply = client.call_method(call(
        "com.example.Echo",
        "/com/example/Echo",
        "Echo",
        vec![Value::String("hello".into())],
    ));

    let request = match events.recv().await {
        Ok(BusEvent::Request(request)) => request,
        other => panic!("Unexpected event: {other:?}"),
    };

    assert_eq!(request.unique_name, service.unique_name());
    assert_eq!(request.sender, client.unique_name());
    assert_eq!(request.member, "Echo");

    service
        .send_reply(request.message, request.args[0].clone(), "s")
        .expect("Failed to reply");

    assert_eq!(reply.await, Ok(Value::String("hello".into())));

    // Requests reach only the sink of the receiving connection
    assert!(client_events.is_empty());

    let error = client
        .call_method(call("com.example.Nobody", "/", "Echo", vec![]))
        .await
        .expect_err("Unknown destination was called");
    assert_eq!(error.name, ERROR_SERVICE_UNKNOWN);

    let error = client
        .call_method(call("com.example.Echo", "/com/example/Missing", "Echo", vec![]))
        .await
        .expect_err("Unknown path was called");
    assert_eq!(error.name, ERROR_UNKNOWN_OBJECT);

    service.set_max_message_size(16);
    let error = client
        .call_method(call(
            "com.example.Echo",
            "/com/example/Echo",
            "Echo",
            vec![Value::String("a long enough message".into())],
        ))
        .await
        .expect_err("Oversized message was delivered");
    assert_eq!(error.name, ERROR_LIMITS_EXCEEDED);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_no_reply() {
    init_logger();

    let hub = Hub::new(Args {
        default_call_timeout: Duration::from_millis(50),
    });

    let (service, events) = connect(&hub);
    let (client, _client_events) = connect(&hub);

    service
        .register_object_path("/com/example/Echo")
        .expect("Failed to register path");

    // Unique names are valid destinations
    let error = client
        .call_method(call(service.unique_name(), "/com/example/Echo", "Echo", vec![]))
        .await
        .expect_err("Call without a reply succeeded");
    assert_eq!(error.name, ERROR_NO_REPLY);

    // Late reply is ignored
    let request = match events.recv().await {
        Ok(BusEvent::Request(request)) => request,
        other => panic!("Unexpected event: {other:?}"),
    };
    assert!(service
        .send_reply(request.message, Value::Null, "")
        .is_ok());

    // Receiver leaves while the call is pending
    let reply = client.call_method(call(
        service.unique_name(),
        "/com/example/Echo",
        "Echo",
        vec![],
    ));
    service.release();

    let error = reply.await.expect_err("Call to a released connection succeeded");
    assert_eq!(error.name, ERROR_NO_REPLY);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_signal_delivery() {
    init_logger();

    let hub = Hub::new(Args::default());

    let (service, service_events) = connect(&hub);
    let (client, events) = connect(&hub);
    let (stranger, stranger_events) = connect(&hub);

    service
        .request_name("com.example.Echo")
        .expect("Failed to request name");

    let rule = MatchRule::signal()
        .sender("com.example.Echo")
        .interface("com.example.Echo")
        .path("/com/example/Echo");

    client.add_match(&rule.to_string()).expect("Failed to add rule");
    client.add_match(&rule.to_string()).expect("Failed to add rule");
    client
        .add_match(&MatchRule::signal().to_string())
        .expect("Failed to add rule");

    stranger
        .add_match(&MatchRule::signal().sender(":1.999").to_string())
        .expect("Failed to add rule");

    service
        .emit_signal(signal("Tick", 1.))
        .expect("Failed to emit signal");

    let delivered = match events.recv().await {
        Ok(BusEvent::Signal(signal)) => signal,
        other => panic!("Unexpected event: {other:?}"),
    };

    assert_eq!(delivered.unique_name, client.unique_name());
    assert_eq!(delivered.sender, service.unique_name());
    assert_eq!(delivered.member, "Tick");
    assert_eq!(delivered.args, vec![Value::Double(1.)]);

    // Overlapping rules never duplicate delivery
    assert!(events.is_empty());

    // Connections without a matching rule get nothing
    assert!(service_events.is_empty());
    assert!(stranger_events.is_empty());

    assert!(matches!(
        client.add_match("type='signal',color='red'"),
        Err(Error::InvalidArgs(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_drop_connection() {
    init_logger();

    let hub = Hub::new(Args::default());

    let (client, events) = connect(&hub);
    let unique_name = client.unique_name().to_owned();

    assert!(hub.drop_connection(&unique_name));
    assert!(!hub.drop_connection(&unique_name));

    let disconnected = match events.recv().await {
        Ok(BusEvent::Signal(signal)) => signal,
        other => panic!("Unexpected event: {other:?}"),
    };

    assert_eq!(disconnected.unique_name, unique_name);
    assert_eq!(disconnected.path, LOCAL_OBJECT_PATH);
    assert_eq!(disconnected.interface, LOCAL_INTERFACE);
    assert_eq!(disconnected.member, DISCONNECTED_SIGNAL);

    assert_eq!(
        client.register_object_path("/com/example/Echo"),
        Err(Error::NotConnected)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_event_sinks_per_connection() {
    init_logger();

    let hub = Hub::new(Args::default());

    let (first, first_events) = connect(&hub);
    let (second, second_events) = connect(&hub);
    let (client, _client_events) = connect(&hub);

    first
        .request_name("com.example.First")
        .expect("Failed to request name");
    first
        .register_object_path("/com/example/Echo")
        .expect("Failed to register path");

    second
        .request_name("com.example.Second")
        .expect("Failed to request name");
    second
        .register_object_path("/com/example/Echo")
        .expect("Failed to register path");

    let first_reply = client.call_method(call(
        "com.example.First",
        "/com/example/Echo",
        "Echo",
        vec![Value::Int32(1)],
    ));
    let second_reply = client.call_method(call(
        "com.example.Second",
        "/com/example/Echo",
        "Echo",
        vec![Value::Int32(2)],
    ));

    let first_request = match first_events.recv().await {
        Ok(BusEvent::Request(request)) => request,
        other => panic!("Unexpected event: {other:?}"),
    };
    let second_request = match second_events.recv().await {
        Ok(BusEvent::Request(request)) => request,
        other => panic!("Unexpected event: {other:?}"),
    };

    assert_eq!(first_request.args, vec![Value::Int32(1)]);
    assert_eq!(second_request.args, vec![Value::Int32(2)]);
    assert!(first_events.is_empty());
    assert!(second_events.is_empty());

    first
        .send_reply(first_request.message, Value::Int32(10), "i")
        .expect("Failed to reply");
    second
        .send_reply(second_request.message, Value::Int32(20), "i")
        .expect("Failed to reply");

    assert_eq!(first_reply.await, Ok(Value::Int32(10)));
    assert_eq!(second_reply.await, Ok(Value::Int32(20)));

    // Closed sink of the receiver fails the call at once
    drop(second_events);

    let error = client
        .call_method(call(
            "com.example.Second",
            "/com/example/Echo",
            "Echo",
            vec![],
        ))
        .await
        .expect_err("Call to a closed sink succeeded");
    assert_eq!(error.name, ERROR_NO_REPLY);
}
