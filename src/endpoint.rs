// One MQTT destination: a persistent client handle, a send buffer of
// serialized records, a rate cache, and a complaint limiter, all behind one
// mutex.  Writers and flushers from any thread take the lock for the whole
// operation, so buffer and connection state never tear.
//
// The client handle is created lazily by the first write and kept until
// shutdown or a publish failure.  After a failure the endpoint is marked
// unconnected; the next flush asks the handle to reconnect before
// publishing.

use crate::broker::{BrokerClient, ConnectParams, Connector};
use crate::buffer::SendBuffer;
use crate::complain::Complaint;
use crate::config::EndpointIni;
use crate::format::{self, RateCache};
use crate::sample::Sample;

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub struct Endpoint {
    name: String,
    inner: Mutex<Inner>,
}

struct Inner {
    params: ConnectParams,
    topic: String,
    qos: u8,
    store_rates: bool,
    connector: Box<dyn Connector>,
    client: Option<Box<dyn BrokerClient>>,
    connected: bool,
    buffer: SendBuffer,
    rates: RateCache,
    complaint: Complaint,
}

impl Endpoint {
    pub fn new(ini: &EndpointIni, connector: Box<dyn Connector>) -> Endpoint {
        Endpoint {
            name: ini.name.clone(),
            inner: Mutex::new(Inner {
                params: ConnectParams {
                    host: ini.host.clone(),
                    port: ini.port,
                    client_id: ini.client_id.clone(),
                    ca_path: ini.ca_path.clone(),
                    client_cert: ini.client_cert.clone(),
                    client_key: ini.client_key.clone(),
                    insecure: ini.insecure,
                },
                topic: ini.topic.clone(),
                qos: ini.qos,
                store_rates: ini.store_rates,
                connector,
                client: None,
                connected: false,
                buffer: SendBuffer::new(ini.buffer_size),
                rates: RateCache::new(),
                complaint: Complaint::new(Duration::ZERO),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<Inner> {
        // A thread that panicked while holding the lock left at worst a
        // buffer we are about to reset; recover rather than poison forever.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Buffer one sample, flushing first if it does not fit.  A sample too
    // large for an empty buffer is dropped with an error.
    pub fn write(&self, s: &Sample) -> Result<(), String> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.init_client(&self.name)?;
        let rec = format::render_sample(s, inner.store_rates, &mut inner.rates);
        if inner.buffer.try_append(&rec).is_ok() {
            return Ok(());
        }
        inner.flush_locked(Duration::ZERO)?;
        if inner.buffer.try_append(&rec).is_ok() {
            return Ok(());
        }
        Err(format!(
            "Endpoint {}: record of {} bytes cannot fit a {} byte buffer",
            self.name,
            rec.len(),
            inner.buffer.capacity()
        ))
    }

    // Transmit buffered records.  With a zero timeout the flush is
    // unconditional; otherwise it only happens when the oldest buffered
    // record has been waiting at least that long.
    pub fn flush(&self, timeout: Duration) -> Result<(), String> {
        self.lock().flush_locked(timeout)
    }

    // Final flush and teardown of the client handle.
    pub fn shutdown(&self) {
        let mut guard = self.lock();
        if let Err(e) = guard.flush_locked(Duration::ZERO) {
            log::error!("Endpoint {}: final flush failed: {e}", self.name);
        }
        if let Some(mut client) = guard.client.take() {
            if guard.connected {
                client.disconnect();
            }
            client.stop();
        }
        guard.connected = false;
    }

    #[cfg(test)]
    pub fn buffer_fill(&self) -> usize {
        self.lock().buffer.fill()
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }
}

impl Inner {
    // Create the client handle if this endpoint does not have one yet.
    fn init_client(&mut self, name: &str) -> Result<(), String> {
        if self.client.is_some() {
            return Ok(());
        }
        match self.connector.connect(&self.params) {
            Ok(client) => {
                self.client = Some(client);
                self.connected = true;
                self.buffer.reset();
                Ok(())
            }
            Err(e) => {
                let msg = format!("Endpoint {name}: connect failed: {e}");
                log::error!("{msg}");
                Err(msg)
            }
        }
    }

    fn ensure_connected(&mut self) -> Result<(), String> {
        if self.connected {
            return Ok(());
        }
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| "No client handle".to_string())?;
        match client.reconnect() {
            Ok(()) => {
                self.connected = true;
                self.complaint.release("Successfully reconnected to broker");
                Ok(())
            }
            Err(e) => {
                self.complaint
                    .complain(&format!("Failed to reconnect to broker: {e}"));
                Err(e)
            }
        }
    }

    fn publish_locked(&mut self, doc: Vec<u8>) -> Result<(), String> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| "No client handle".to_string())?;
        match client.publish(&self.topic, self.qos, doc) {
            Ok(()) => {
                self.complaint.release("Successfully published to broker");
                Ok(())
            }
            Err(e) => {
                self.complaint
                    .complain(&format!("Failed to publish to broker: {e}"));
                // The handle survives but must reconnect before reuse.
                self.connected = false;
                if let Some(client) = self.client.as_mut() {
                    client.disconnect();
                }
                Err(e)
            }
        }
    }

    fn flush_locked(&mut self, timeout: Duration) -> Result<(), String> {
        if !timeout.is_zero() && self.buffer.age() < timeout {
            return Ok(());
        }
        if self.buffer.is_empty() {
            self.buffer.touch();
            return Ok(());
        }
        let doc = match self.buffer.finalize() {
            Ok(doc) => doc,
            Err(e) => {
                self.buffer.reset();
                return Err(e);
            }
        };
        // The document is gone from the buffer whatever happens next: a
        // destination that cannot be reached drops data rather than jamming
        // the buffer.
        self.buffer.reset();
        self.ensure_connected()?;
        self.publish_locked(doc)
    }
}
