//! Minimal end-to-end wiring: one Object (a thermometer at `/3303/0`),
//! a `std::Platform` connected to a peer, and a `step` loop.
//!
//! Run against a local `coap://127.0.0.1:5683` LwM2M Server to watch
//! the Bootstrap/Register handshake go out on the wire.

use lwm2m::client::Client;
use lwm2m::config::Config;
use lwm2m::dm::{HandlerResult, ObjectHandler, Registry, UriPath, Value};
use lwm2m::registration::ObjectLink;
use lwm2m::std::Platform;

/// IPSO Temperature Sensor (object 3303), instance 0, one readable
/// Sensor Value resource (5700).
struct Thermometer {
  celsius: f64,
}

impl ObjectHandler for Thermometer {
  fn oid(&self) -> u16 {
    3303
  }

  fn read(&mut self, path: &UriPath, out: &mut dyn FnMut(Value) -> HandlerResult) -> HandlerResult {
    match path.rid() {
      | Some(5700) | None => out(Value::Double(self.celsius)),
      | Some(_) => Err(toad_msg::Code::new(4, 4)),
    }
  }

  fn write(&mut self, _path: &UriPath, _value: Value) -> HandlerResult {
    Err(toad_msg::Code::new(4, 5))
  }
}

fn main() -> std::io::Result<()> {
  simple_logger::init().ok();

  let mut thermometer = Thermometer { celsius: 21.5 };
  let mut registry: Registry<4> = Registry::default();
  registry.add(&mut thermometer).expect("room for one object");

  let mut client: Client<Platform, 4> = Client::new(registry);
  client.set_advertised_objects(&[ObjectLink { oid: 3303, iid: Some(0), version: None }]);
  client.request_bootstrap();

  let mut platform = Platform::try_new("0.0.0.0:0", "127.0.0.1:5683", Config::new("urn:dev:thermo-1"))?;

  loop {
    client.step(&mut platform).ok();
    std::thread::sleep(std::time::Duration::from_millis(100));
  }
}
