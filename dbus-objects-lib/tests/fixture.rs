use std::sync::Arc;

use dbus_objects_common::{describe_field, transport::BusScope, Kind, Value};
use dbus_objects_hub_lib::{args::Args, hub::Hub};
use dbus_objects_lib::{Bus, MethodSpec, Service};
use log::LevelFilter;
use rstest::fixture;
use tokio_util::sync::CancellationToken;

pub const SERVICE_NAME: &str = "com.example.Calc";
pub const OBJECT_PATH: &str = "/com/example/Calc";
pub const INTERFACE_NAME: &str = "com.example.Calc";

pub struct Fixture {
    hub: Arc<Hub>,
    bus: Bus,
    cancel_token: CancellationToken,
}

impl Fixture {
    pub async fn new(log_level: LevelFilter) -> Self {
        let _ = pretty_env_logger::formatted_builder()
            .filter_level(log_level)
            .try_init();

        let hub = Arc::new(Hub::new(Args::default()));
        let bus = Bus::new(hub.clone());

        let this = Self {
            hub,
            bus,
            cancel_token: CancellationToken::new(),
        };

        this.spawn_bus(this.bus.clone());
        this
    }

    fn spawn_bus(&self, bus: Bus) {
        let token = self.cancel_token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = bus.run() => {}
                _ = token.cancelled() => {}
            }
        });
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Start another bus context over the same hub
    pub fn new_bus(&self) -> Bus {
        let bus = Bus::new(self.hub.clone());
        self.spawn_bus(bus.clone());
        bus
    }

    /// Register a calculator service with a single `Add` method
    pub async fn calc_service(&self) -> Service {
        let service = self
            .bus
            .register_service(BusScope::Session, SERVICE_NAME)
            .await
            .expect("Failed to register service");

        let object = service
            .create_object(OBJECT_PATH)
            .expect("Failed to create object");

        object
            .create_interface(INTERFACE_NAME)
            .add_method(
                "Add",
                MethodSpec::new()
                    .input(describe_field(Kind::Number, Some("x")))
                    .input(describe_field(Kind::Number, Some("y")))
                    .output(describe_field(Kind::Number, Some("sum"))),
                |args| async move {
                    let sum: f64 = args.iter().filter_map(Value::as_f64).sum();
                    Ok(Value::Double(sum))
                },
            )
            .update();

        service
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel()
    }
}

#[fixture]
pub async fn make_fixture() -> Fixture {
    Fixture::new(LevelFilter::Debug).await
}
