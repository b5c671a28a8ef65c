// Abstractions over the MQTT client library.
//
// The endpoint logic talks to the broker through the `Connector` and
// `BrokerClient` traits so that it can be tested against a mock without a
// broker on the other end.  The production implementation in `rumqtt` wraps
// rumqttc.

pub mod rumqtt;

#[cfg(test)]
pub mod mock;

// Fixed connection parameters, from validated configuration.
#[derive(Clone, Debug)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub ca_path: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    pub insecure: bool,
}

pub const KEEPALIVE_SECS: u64 = 60;

// A live client handle.  The handle owns whatever background machinery the
// library needs; `stop` tears that down and must be the last call.
pub trait BrokerClient: Send {
    // Probe / restore connectivity on an existing handle.  Ok means the link
    // is usable for publishing right now.
    fn reconnect(&mut self) -> Result<(), String>;

    // Publish one message on the current connection.
    fn publish(&mut self, topic: &str, qos: u8, payload: Vec<u8>) -> Result<(), String>;

    // Send a clean disconnect if possible.  Errors are not interesting to
    // callers, the handle is going away anyway.
    fn disconnect(&mut self);

    // Shut down background machinery.  The handle is unusable afterward.
    fn stop(&mut self);
}

pub trait Connector: Send {
    // Create a client handle and establish the initial connection.
    fn connect(&self, params: &ConnectParams) -> Result<Box<dyn BrokerClient>, String>;
}

// Process-scoped library lifecycle.  rumqttc needs no global setup and the
// ring provider is compiled into rustls, so there is nothing to do here;
// holding this object while endpoints exist is the analogue of the
// init/cleanup bracket a C client library would demand, and gives future
// global setup a home.
pub struct ClientLibrary {}

impl ClientLibrary {
    pub fn init() -> ClientLibrary {
        ClientLibrary {}
    }
}

#[test]
pub fn test_client_library_init() {
    let _lib = ClientLibrary::init();
    let _lib2 = ClientLibrary::init();
}
