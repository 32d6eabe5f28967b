//! Smallest possible client: no Objects beyond what the engine needs to
//! exist, just enough to watch `step` drive the Bootstrap state machine
//! without ever reaching an actual Server (the sends just go nowhere).

use lwm2m::client::Client;
use lwm2m::config::Config;
use lwm2m::dm::{HandlerResult, ObjectHandler, Registry, UriPath, Value};
use lwm2m::std::Platform;

struct Empty;

impl ObjectHandler for Empty {
  fn oid(&self) -> u16 {
    0
  }

  fn read(&mut self, _path: &UriPath, _out: &mut dyn FnMut(Value) -> HandlerResult) -> HandlerResult {
    Err(toad_msg::Code::new(4, 4))
  }

  fn write(&mut self, _path: &UriPath, _value: Value) -> HandlerResult {
    Err(toad_msg::Code::new(4, 5))
  }
}

fn main() -> std::io::Result<()> {
  let mut empty = Empty;
  let mut registry: Registry<1> = Registry::default();
  registry.add(&mut empty).unwrap();

  let mut client: Client<Platform, 1> = Client::new(registry);
  client.request_bootstrap();

  let mut platform = Platform::try_new("0.0.0.0:0", "127.0.0.1:5683", Config::new("urn:dev:minimal"))?;

  for _ in 0..10 {
    client.step(&mut platform).ok();
  }

  Ok(())
}
