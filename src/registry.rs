// The set of configured endpoints.  Samples fan out to all of them; flushes
// can address one endpoint by name or all at once.

use crate::endpoint::Endpoint;
use crate::sample::Sample;

use std::sync::Arc;
use std::time::Duration;

pub struct Registry {
    endpoints: Vec<Arc<Endpoint>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry { endpoints: vec![] }
    }

    pub fn register(&mut self, e: Arc<Endpoint>) -> Result<(), String> {
        if self.endpoints.iter().any(|x| x.name() == e.name()) {
            return Err(format!("Endpoint {} already registered", e.name()));
        }
        self.endpoints.push(e);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    // One endpoint failing to take a sample must not stop the others from
    // getting it, so failures are logged and swallowed here.
    pub fn write_all(&self, s: &Sample) {
        for e in &self.endpoints {
            if let Err(err) = e.write(s) {
                // A failed write drops the sample for this endpoint; that
                // must be visible at the default log level.
                log::error!("{err}");
            }
        }
    }

    // Empty name means every endpoint; a nonempty name must match one.
    pub fn flush(&self, timeout: Duration, name: &str) -> Result<(), String> {
        if name.is_empty() {
            let mut failed = 0;
            for e in &self.endpoints {
                if let Err(err) = e.flush(timeout) {
                    log::error!("Endpoint {}: flush failed: {err}", e.name());
                    failed += 1;
                }
            }
            if failed > 0 {
                return Err(format!("Flush failed for {failed} endpoint(s)"));
            }
            return Ok(());
        }
        match self.endpoints.iter().find(|e| e.name() == name) {
            Some(e) => e.flush(timeout),
            None => Err(format!("No endpoint named {name}")),
        }
    }

    pub fn shutdown(&self) {
        for e in &self.endpoints {
            e.shutdown();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::broker::mock::MockConnector;
    use crate::config::EndpointIni;

    fn test_ini(name: &str) -> EndpointIni {
        EndpointIni {
            name: name.to_string(),
            host: "localhost".to_string(),
            port: 1883,
            client_id: "test".to_string(),
            ca_path: None,
            client_cert: None,
            client_key: None,
            insecure: false,
            qos: 0,
            topic: "collectd".to_string(),
            store_rates: false,
            buffer_size: crate::buffer::MIN_BUFFER_SIZE,
        }
    }

    #[test]
    pub fn test_registry_names() {
        let mut r = Registry::new();
        let (c1, _) = MockConnector::new();
        let (c2, _) = MockConnector::new();
        let (c3, _) = MockConnector::new();
        r.register(Arc::new(Endpoint::new(&test_ini("a"), Box::new(c1))))
            .unwrap();
        r.register(Arc::new(Endpoint::new(&test_ini("b"), Box::new(c2))))
            .unwrap();
        assert!(r
            .register(Arc::new(Endpoint::new(&test_ini("a"), Box::new(c3))))
            .is_err());
        assert!(r.len() == 2);

        assert!(r.flush(Duration::ZERO, "b").is_ok());
        assert!(r.flush(Duration::ZERO, "nosuch").is_err());
        assert!(r.flush(Duration::ZERO, "").is_ok());
    }

    #[test]
    pub fn test_registry_fanout() {
        let mut r = Registry::new();
        let (c1, s1) = MockConnector::new();
        let (c2, s2) = MockConnector::new();
        r.register(Arc::new(Endpoint::new(&test_ini("a"), Box::new(c1))))
            .unwrap();
        r.register(Arc::new(Endpoint::new(&test_ini("b"), Box::new(c2))))
            .unwrap();

        let s = crate::sample::parse_putval("PUTVAL h/p/load 100 10 x:gauge:1.5").unwrap();
        r.write_all(&s);
        r.flush(Duration::ZERO, "").unwrap();
        assert!(s1.lock().unwrap().published.len() == 1);
        assert!(s2.lock().unwrap().published.len() == 1);
    }

    #[test]
    pub fn test_registry_failure_is_surfaced_and_isolated() {
        // One endpoint down: its samples are dropped with an error but the
        // healthy endpoint still gets everything, and the aggregate flush
        // reports the failure.
        let mut r = Registry::new();
        let (c1, s1) = MockConnector::new();
        let (c2, s2) = MockConnector::new();
        s1.lock().unwrap().fail_connect = true;
        r.register(Arc::new(Endpoint::new(&test_ini("down"), Box::new(c1))))
            .unwrap();
        r.register(Arc::new(Endpoint::new(&test_ini("up"), Box::new(c2))))
            .unwrap();

        let s = crate::sample::parse_putval("PUTVAL h/p/load 100 10 x:gauge:1.5").unwrap();
        r.write_all(&s);
        r.write_all(&s);
        assert!(r.flush(Duration::ZERO, "").is_ok());
        assert!(s1.lock().unwrap().published.is_empty());
        assert!(s2.lock().unwrap().published.len() == 1);

        // A flush that fails at publish time comes back as an error.
        s2.lock().unwrap().fail_publish = true;
        r.write_all(&s);
        assert!(r.flush(Duration::ZERO, "").is_err());
    }
}
