// Scriptable broker client for tests.  The shared MockState records every
// call and can be told to fail connects, reconnects, or publishes.

use crate::broker::{BrokerClient, ConnectParams, Connector};

use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct MockState {
    pub fail_connect: bool,
    pub fail_reconnect: bool,
    pub fail_publish: bool,
    pub connects: usize,
    pub reconnects: usize,
    pub disconnects: usize,
    pub stops: usize,
    pub published: Vec<(String, u8, Vec<u8>)>,
}

pub struct MockConnector {
    pub state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> (MockConnector, Arc<Mutex<MockState>>) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            MockConnector {
                state: state.clone(),
            },
            state,
        )
    }
}

impl Connector for MockConnector {
    fn connect(&self, _params: &ConnectParams) -> Result<Box<dyn BrokerClient>, String> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if state.fail_connect {
            return Err("mock: connect refused".to_string());
        }
        Ok(Box::new(MockClient {
            state: self.state.clone(),
        }))
    }
}

pub struct MockClient {
    state: Arc<Mutex<MockState>>,
}

impl BrokerClient for MockClient {
    fn reconnect(&mut self) -> Result<(), String> {
        let mut state = self.state.lock().unwrap();
        state.reconnects += 1;
        if state.fail_reconnect {
            return Err("mock: still down".to_string());
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, qos: u8, payload: Vec<u8>) -> Result<(), String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_publish {
            return Err("mock: publish failed".to_string());
        }
        state.published.push((topic.to_string(), qos, payload));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.state.lock().unwrap().disconnects += 1;
    }

    fn stop(&mut self) {
        self.state.lock().unwrap().stops += 1;
    }
}
