// End-to-end tests of the write/flush/reconnect logic against the mock
// broker client.

use crate::broker::mock::{MockConnector, MockState};
use crate::buffer;
use crate::config::EndpointIni;
use crate::endpoint::Endpoint;
use crate::sample::{parse_putval, Sample, Value};

use std::sync::{Arc, Mutex};
use std::time::Duration;

fn test_ini(buffer_size: usize) -> EndpointIni {
    EndpointIni {
        name: "test".to_string(),
        host: "localhost".to_string(),
        port: 1883,
        client_id: "courier-test".to_string(),
        ca_path: None,
        client_cert: None,
        client_key: None,
        insecure: false,
        qos: 1,
        topic: "metrics".to_string(),
        store_rates: false,
        buffer_size,
    }
}

fn test_endpoint(buffer_size: usize) -> (Endpoint, Arc<Mutex<MockState>>) {
    let (connector, state) = MockConnector::new();
    (
        Endpoint::new(&test_ini(buffer_size), Box::new(connector)),
        state,
    )
}

fn load_sample(tag: &str) -> Sample {
    parse_putval(&format!("PUTVAL web1/load/load-{tag} 100 10 v:gauge:1.5")).unwrap()
}

#[test]
pub fn test_write_buffers_without_publishing() {
    let (e, state) = test_endpoint(buffer::MIN_BUFFER_SIZE);
    e.write(&load_sample("a")).unwrap();
    e.write(&load_sample("b")).unwrap();
    let state = state.lock().unwrap();
    assert!(state.connects == 1);
    assert!(state.published.is_empty());
    assert!(e.buffer_fill() > buffer::EMPTY_FILL);
}

#[test]
pub fn test_flush_publishes_and_resets() {
    let (e, state) = test_endpoint(buffer::MIN_BUFFER_SIZE);
    e.write(&load_sample("a")).unwrap();
    e.write(&load_sample("b")).unwrap();
    e.flush(Duration::ZERO).unwrap();

    let state = state.lock().unwrap();
    assert!(state.published.len() == 1);
    let (topic, qos, payload) = &state.published[0];
    assert!(topic == "metrics");
    assert!(*qos == 1);

    // One JSON array holding both records, in insertion order.
    let doc = String::from_utf8(payload.clone()).unwrap();
    assert!(doc.starts_with("[{"));
    assert!(doc.ends_with("}]"));
    assert!(doc.contains(r#"},{"#));
    let a = doc.find(r#""type_instance":"a""#).unwrap();
    let b = doc.find(r#""type_instance":"b""#).unwrap();
    assert!(a < b);

    // The buffer is back to an empty document.
    assert!(e.buffer_fill() <= buffer::EMPTY_FILL);
}

#[test]
pub fn test_conditional_flush_skips_fresh_buffer() {
    let (e, state) = test_endpoint(buffer::MIN_BUFFER_SIZE);
    e.write(&load_sample("a")).unwrap();
    let fill = e.buffer_fill();
    e.flush(Duration::from_secs(3600)).unwrap();
    assert!(state.lock().unwrap().published.is_empty());
    assert!(e.buffer_fill() == fill);
}

#[test]
pub fn test_empty_flush_sends_nothing() {
    let (e, state) = test_endpoint(buffer::MIN_BUFFER_SIZE);
    e.flush(Duration::ZERO).unwrap();
    let state = state.lock().unwrap();
    // Nothing buffered, so no client was ever created either.
    assert!(state.connects == 0);
    assert!(state.published.is_empty());
}

#[test]
pub fn test_overflow_flushes_then_retries() {
    // Samples of a couple hundred bytes against a 1 KiB buffer: the fourth
    // or so write overflows, triggering a publish of the earlier records,
    // and the overflowing record lands in the recycled buffer.
    let (e, state) = test_endpoint(buffer::MIN_BUFFER_SIZE);
    let s = Sample {
        host: "web1".to_string(),
        plugin: "x".to_string(),
        plugin_instance: "y".repeat(200),
        type_: "t".to_string(),
        type_instance: "".to_string(),
        time: 100,
        interval: 10,
        values: vec![("v".to_string(), Value::Gauge(1.0))],
    };
    for _ in 0..10 {
        e.write(&s).unwrap();
    }
    let state = state.lock().unwrap();
    assert!(!state.published.is_empty());
    for (_, _, payload) in &state.published {
        assert!(payload.len() <= buffer::MIN_BUFFER_SIZE);
        assert!(payload.starts_with(b"[{"));
        assert!(payload.ends_with(b"}]"));
    }
    assert!(e.buffer_fill() > buffer::EMPTY_FILL);
}

#[test]
pub fn test_oversized_record_is_dropped() {
    let (e, state) = test_endpoint(buffer::MIN_BUFFER_SIZE);
    e.write(&load_sample("a")).unwrap();
    let big = Sample {
        host: "web1".to_string(),
        plugin: "x".to_string(),
        plugin_instance: "y".repeat(2 * buffer::MIN_BUFFER_SIZE),
        type_: "t".to_string(),
        type_instance: "".to_string(),
        time: 100,
        interval: 10,
        values: vec![("v".to_string(), Value::Gauge(1.0))],
    };
    assert!(e.write(&big).is_err());
    // The oversized record forced a flush of the earlier sample but was
    // itself dropped; later writes proceed normally.
    let published = state.lock().unwrap().published.len();
    assert!(published == 1);
    e.write(&load_sample("b")).unwrap();
    e.flush(Duration::ZERO).unwrap();
    assert!(state.lock().unwrap().published.len() == 2);
}

#[test]
pub fn test_connect_failure_is_retried_next_write() {
    let (e, state) = test_endpoint(buffer::MIN_BUFFER_SIZE);
    state.lock().unwrap().fail_connect = true;
    assert!(e.write(&load_sample("a")).is_err());
    assert!(!e.is_connected());

    state.lock().unwrap().fail_connect = false;
    e.write(&load_sample("b")).unwrap();
    assert!(e.is_connected());
    assert!(state.lock().unwrap().connects == 2);
}

#[test]
pub fn test_publish_failure_disconnects_and_drops() {
    let (e, state) = test_endpoint(buffer::MIN_BUFFER_SIZE);
    e.write(&load_sample("a")).unwrap();
    state.lock().unwrap().fail_publish = true;
    assert!(e.flush(Duration::ZERO).is_err());

    // The batch is gone and the endpoint needs a reconnect.
    assert!(!e.is_connected());
    assert!(e.buffer_fill() <= buffer::EMPTY_FILL);
    assert!(state.lock().unwrap().disconnects == 1);
}

#[test]
pub fn test_reconnect_restores_publishing() {
    let (e, state) = test_endpoint(buffer::MIN_BUFFER_SIZE);
    e.write(&load_sample("a")).unwrap();
    state.lock().unwrap().fail_publish = true;
    assert!(e.flush(Duration::ZERO).is_err());

    // Broker still down: the flush fails at the reconnect step.
    state.lock().unwrap().fail_reconnect = true;
    e.write(&load_sample("b")).unwrap();
    assert!(e.flush(Duration::ZERO).is_err());
    assert!(!e.is_connected());

    // Broker back: reconnect, then publish goes through.
    {
        let mut state = state.lock().unwrap();
        state.fail_reconnect = false;
        state.fail_publish = false;
    }
    e.write(&load_sample("c")).unwrap();
    e.flush(Duration::ZERO).unwrap();
    let state = state.lock().unwrap();
    assert!(state.reconnects >= 2);
    assert!(state.published.len() == 1);
    assert!(e.is_connected());
}

#[test]
pub fn test_shutdown_flushes_and_stops() {
    let (e, state) = test_endpoint(buffer::MIN_BUFFER_SIZE);
    e.write(&load_sample("a")).unwrap();
    e.shutdown();
    let state = state.lock().unwrap();
    assert!(state.published.len() == 1);
    assert!(state.disconnects == 1);
    assert!(state.stops == 1);
}
