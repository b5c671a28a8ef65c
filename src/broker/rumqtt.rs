// Production broker client on top of rumqttc.
//
// rumqttc's synchronous `Client` hands all network I/O to a `Connection`
// iterator that must be driven continuously, so each handle owns a thread
// doing exactly that.  The iterator also retries the TCP connection by
// itself after a failure; the shared `LinkState` is how the endpoint logic
// observes whether the link is currently up.

use crate::broker::{BrokerClient, ConnectParams, Connector, KEEPALIVE_SECS};
use crate::buffer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport};

// How long connect() waits for the broker's ConnAck.
const CONNECT_DEADLINE: Duration = Duration::from_secs(10);

// Pause between connection retries in the I/O thread.
const RETRY_PAUSE: Duration = Duration::from_secs(1);

pub struct RumqttConnector {}

struct LinkState {
    connected: AtomicBool,
    stopping: AtomicBool,
    last_error: Mutex<String>,
}

impl LinkState {
    fn last_error(&self) -> String {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

pub struct RumqttClient {
    client: Client,
    state: Arc<LinkState>,
    io_thread: Option<thread::JoinHandle<()>>,
}

impl Connector for RumqttConnector {
    fn connect(&self, params: &ConnectParams) -> Result<Box<dyn BrokerClient>, String> {
        let mut options = MqttOptions::new(&params.client_id, &params.host, params.port);
        options.set_keep_alive(Duration::from_secs(KEEPALIVE_SECS));
        // A full buffer plus the packet framing must fit in one message.
        options.set_max_packet_size(
            buffer::MAX_BUFFER_SIZE + 1024,
            buffer::MAX_BUFFER_SIZE + 1024,
        );
        if let Some(ref ca_path) = params.ca_path {
            options.set_transport(Transport::Tls(tls_configuration(params, ca_path)?));
        }

        let (client, connection) = Client::new(options, 10);
        let state = Arc::new(LinkState {
            connected: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            last_error: Mutex::new("".to_string()),
        });
        let io_state = state.clone();
        let io_thread = thread::spawn(move || {
            io_loop(connection, io_state);
        });

        let mut handle = RumqttClient {
            client,
            state,
            io_thread: Some(io_thread),
        };
        let deadline = Instant::now() + CONNECT_DEADLINE;
        while !handle.state.connected.load(Ordering::Relaxed) {
            if Instant::now() >= deadline {
                let err = handle.state.last_error();
                handle.stop();
                let msg = if err.is_empty() {
                    format!("Timed out connecting to {}:{}", params.host, params.port)
                } else {
                    format!("Connecting to {}:{}: {err}", params.host, params.port)
                };
                return Err(msg);
            }
            thread::sleep(Duration::from_millis(25));
        }
        Ok(Box::new(handle))
    }
}

fn io_loop(mut connection: Connection, state: Arc<LinkState>) {
    for event in connection.iter() {
        if state.stopping.load(Ordering::Relaxed) {
            break;
        }
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                state.connected.store(true, Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(e) => {
                state.connected.store(false, Ordering::Relaxed);
                *state.last_error.lock().unwrap_or_else(|e| e.into_inner()) = format!("{e}");
                thread::sleep(RETRY_PAUSE);
            }
        }
    }
}

impl BrokerClient for RumqttClient {
    fn reconnect(&mut self) -> Result<(), String> {
        // The I/O thread does the actual reconnecting; report where it got to.
        if self.state.connected.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(self.state.last_error())
        }
    }

    fn publish(&mut self, topic: &str, qos: u8, payload: Vec<u8>) -> Result<(), String> {
        if !self.state.connected.load(Ordering::Relaxed) {
            return Err(format!("Not connected: {}", self.state.last_error()));
        }
        let qos = if qos == 0 {
            QoS::AtMostOnce
        } else {
            QoS::AtLeastOnce
        };
        self.client
            .publish(topic, qos, false, payload)
            .map_err(|e| format!("{e}"))
    }

    fn disconnect(&mut self) {
        let _ = self.client.try_disconnect();
        self.state.connected.store(false, Ordering::Relaxed);
    }

    fn stop(&mut self) {
        self.state.stopping.store(true, Ordering::Relaxed);
        let _ = self.client.try_disconnect();
        if let Some(t) = self.io_thread.take() {
            let _ = t.join();
        }
    }
}

fn tls_configuration(params: &ConnectParams, ca_path: &str) -> Result<TlsConfiguration, String> {
    let ca = std::fs::read(ca_path).map_err(|e| format!("{ca_path}: {e}"))?;
    let client_auth = match (&params.client_cert, &params.client_key) {
        (Some(cert), Some(key)) => Some((
            std::fs::read(cert).map_err(|e| format!("{cert}: {e}"))?,
            std::fs::read(key).map_err(|e| format!("{key}: {e}"))?,
        )),
        _ => None,
    };

    if !params.insecure {
        return Ok(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth,
        });
    }

    // insecure: encrypt the link but skip server certificate verification.
    let builder = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new()));
    let config = match client_auth {
        Some((cert_pem, key_pem)) => {
            let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| format!("Reading client cert: {e}"))?;
            let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
                .map_err(|e| format!("Reading client key: {e}"))?
                .ok_or_else(|| "No private key in client-key file".to_string())?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| format!("{e}"))?
        }
        None => builder.with_no_client_auth(),
    };
    Ok(TlsConfiguration::Rustls(Arc::new(config)))
}

#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: rustls::crypto::CryptoProvider,
}

impl AcceptAnyServerCert {
    fn new() -> AcceptAnyServerCert {
        AcceptAnyServerCert {
            provider: rustls::crypto::ring::default_provider(),
        }
    }
}

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
