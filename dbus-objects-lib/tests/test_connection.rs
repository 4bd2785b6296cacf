use dbus_objects_common::{
    transport::BusScope, ERROR_LIMITS_EXCEEDED, ERROR_NAME_HAS_NO_OWNER, ERROR_SERVICE_UNKNOWN,
};
use dbus_objects_lib::{Error, Value};
use futures::poll;
use rstest::rstest;

mod fixture;
use fixture::{make_fixture, Fixture, INTERFACE_NAME, OBJECT_PATH, SERVICE_NAME};

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_connect_disconnect(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let mut connect = Box::pin(fixture.bus().connect(BusScope::System));
    assert!(poll!(&mut connect).is_pending());

    let connection = connect.await.expect("Failed to connect");
    assert!(connection.connected());
    assert_eq!(connection.scope(), BusScope::System);
    assert!(connection
        .unique_name()
        .is_some_and(|name| name.starts_with(":1.")));

    connection.disconnect().await;
    assert!(!connection.connected());
    assert_eq!(connection.unique_name(), None);

    let mut lookup = Box::pin(connection.unique_service_name(SERVICE_NAME));
    assert!(poll!(&mut lookup).is_pending());
    assert_eq!(lookup.await, Err(Error::NotConnected));

    assert!(matches!(
        connection
            .get_interface(SERVICE_NAME, OBJECT_PATH, INTERFACE_NAME)
            .await,
        Err(Error::NotConnected)
    ));

    // Second disconnect is a no-op
    connection.disconnect().await;

    connection.reconnect().await.expect("Failed to reconnect");
    assert!(connection.connected());

    fixture.cancel()
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_unique_service_name(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let service = fixture.calc_service().await;

    let connection = fixture
        .bus()
        .connect(BusScope::Session)
        .await
        .expect("Failed to connect");

    assert_eq!(
        connection.unique_service_name(SERVICE_NAME).await.ok(),
        service.connection().unique_name()
    );

    let error = connection
        .unique_service_name("com.example.Nobody")
        .await
        .expect_err("Resolved a name without owner");
    assert_eq!(error.dbus_name(), ERROR_NAME_HAS_NO_OWNER);

    // Names are scoped
    let system = fixture
        .bus()
        .connect(BusScope::System)
        .await
        .expect("Failed to connect");

    assert!(system.unique_service_name(SERVICE_NAME).await.is_err());

    fixture.cancel()
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_register_service_idempotent(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let service = fixture.calc_service().await;

    let same = fixture
        .bus()
        .register_service(BusScope::Session, SERVICE_NAME)
        .await
        .expect("Failed to register service");

    assert_eq!(same.name(), SERVICE_NAME);
    assert_eq!(
        same.connection().unique_name(),
        service.connection().unique_name()
    );
    assert!(same.object(OBJECT_PATH).is_some());

    // Each named service gets its own connection
    let other = fixture
        .bus()
        .register_service(BusScope::Session, "com.example.Other")
        .await
        .expect("Failed to register service");
    assert_ne!(
        other.connection().unique_name(),
        service.connection().unique_name()
    );

    fixture.cancel()
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_max_message_size(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let service = fixture.calc_service().await;

    let connection = fixture
        .bus()
        .connect(BusScope::Session)
        .await
        .expect("Failed to connect");

    let calc = connection
        .get_interface(SERVICE_NAME, OBJECT_PATH, INTERFACE_NAME)
        .await
        .expect("Failed to get remote interface");

    service.connection().set_max_message_size(Some(16));

    let error = calc
        .call("Add", vec![Value::Double(1.), Value::Double(2.)])
        .await
        .expect_err("Oversized message was delivered");
    assert_eq!(error.dbus_name(), ERROR_LIMITS_EXCEEDED);

    service.connection().set_max_message_size(None);

    assert_eq!(
        calc.call("Add", vec![Value::Double(1.), Value::Double(2.)])
            .await,
        Ok(Value::Double(3.))
    );

    fixture.cancel()
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_service_restore(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let service = fixture.calc_service().await;

    let connection = fixture
        .bus()
        .connect(BusScope::Session)
        .await
        .expect("Failed to connect");

    let calc = connection
        .get_interface(SERVICE_NAME, OBJECT_PATH, INTERFACE_NAME)
        .await
        .expect("Failed to get remote interface");

    service
        .connection()
        .reconnect()
        .await
        .expect("Failed to reconnect service");

    // The new handle neither owns the name nor exports the object yet
    let error = calc
        .call("Add", vec![Value::Double(1.), Value::Double(2.)])
        .await
        .expect_err("Call reached a service without a name");
    assert_eq!(error.dbus_name(), ERROR_SERVICE_UNKNOWN);

    service.restore().await.expect("Failed to restore service");

    assert_eq!(
        calc.call("Add", vec![Value::Double(1.), Value::Double(2.)])
            .await,
        Ok(Value::Double(3.))
    );
    assert_eq!(
        fixture.hub().name_owner(BusScope::Session, SERVICE_NAME),
        service.connection().unique_name()
    );

    fixture.cancel()
}
