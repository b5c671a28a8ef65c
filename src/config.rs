// Configuration file parsing.
//
// The file is a simple INI: `#` comments, `[section]` headers, `name = value`
// settings with optional quotes around the value.  There is at most one
// [global] and one [debug] section, and one [endpoint] section per configured
// destination.
//
// An invalid [endpoint] section disables that destination only: the error is
// recorded on the returned Ini and the daemon logs it once the logger is up,
// but other destinations proceed.  Errors in [global]/[debug] or in the file
// syntax itself are fatal to the parse.

use crate::buffer;

use std::io::BufRead;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8883;
pub const DEFAULT_TOPIC: &str = "collectd";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Dur {
    Hours(u64),
    Minutes(u64),
    Seconds(u64),
}

impl Dur {
    pub fn to_seconds(self) -> u64 {
        match self {
            Dur::Hours(n) => n * 60 * 60,
            Dur::Minutes(n) => n * 60,
            Dur::Seconds(n) => n,
        }
    }

    pub fn to_duration(self) -> Duration {
        Duration::from_secs(self.to_seconds())
    }
}

pub struct GlobalIni {
    // How often the daemon triggers a flush across all endpoints.
    pub flush_cadence: Dur,
    // Staleness threshold passed to those flushes; None means flush
    // unconditionally every tick.
    pub flush_timeout: Option<Dur>,
}

pub struct DebugIni {
    pub verbose: bool,
}

#[derive(Clone, Debug)]
pub struct EndpointIni {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub ca_path: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    pub insecure: bool,
    pub qos: u8,
    pub topic: String,
    pub store_rates: bool,
    pub buffer_size: usize,
}

pub struct Ini {
    pub global: GlobalIni,
    pub debug: DebugIni,
    pub endpoints: Vec<EndpointIni>,
    // Per-endpoint configuration errors, for the daemon to log after the
    // logger has been installed.
    pub errors: Vec<String>,
}

// Settings of an [endpoint] section as read, before validation.
#[derive(Default)]
struct EndpointBuilder {
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    client_id: Option<String>,
    ca_path: Option<String>,
    client_cert: Option<String>,
    client_key: Option<String>,
    insecure: bool,
    qos: u8,
    topic: Option<String>,
    store_rates: bool,
    buffer_size: Option<usize>,
    errors: Vec<String>,
}

impl EndpointBuilder {
    fn context(&self) -> String {
        match &self.name {
            Some(n) => format!("endpoint `{n}`"),
            None => "unnamed endpoint".to_string(),
        }
    }

    fn finish(mut self, ini: &mut Ini) {
        if self.name.is_none() {
            self.errors.push("Missing endpoint.name setting".to_string());
        }
        if self.host.is_none() {
            self.errors.push("Missing endpoint.host setting".to_string());
        }
        match (&self.client_cert, &self.client_key) {
            (Some(_), None) | (None, Some(_)) => {
                self.errors
                    .push("client-cert and client-key must be given together".to_string());
            }
            (Some(_), Some(_)) if self.ca_path.is_none() => {
                self.errors
                    .push("client-cert and client-key require ca-path".to_string());
            }
            _ => {}
        }
        if self.insecure && self.ca_path.is_none() {
            self.errors
                .push("insecure is meaningless without ca-path".to_string());
        }
        if let Some(ref name) = self.name {
            if ini.endpoints.iter().any(|e| &e.name == name) {
                self.errors.push(format!("Duplicate endpoint name `{name}`"));
            }
        }
        if !self.errors.is_empty() {
            let ctx = self.context();
            for e in self.errors {
                ini.errors.push(format!("{ctx}: {e}"));
            }
            return;
        }
        let (Some(name), Some(host)) = (self.name, self.host) else {
            return;
        };
        ini.endpoints.push(EndpointIni {
            name,
            host,
            port: self.port.unwrap_or(DEFAULT_PORT),
            client_id: self.client_id.unwrap_or_else(process_hostname),
            ca_path: self.ca_path,
            client_cert: self.client_cert,
            client_key: self.client_key,
            insecure: self.insecure,
            qos: self.qos,
            topic: self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            store_rates: self.store_rates,
            buffer_size: self.buffer_size.unwrap_or(buffer::MAX_BUFFER_SIZE),
        });
    }
}

pub fn parse_config(config_file: &str) -> Result<Ini, String> {
    let mut ini = Ini {
        global: GlobalIni {
            flush_cadence: Dur::Seconds(10),
            flush_timeout: None,
        },
        debug: DebugIni { verbose: false },
        endpoints: vec![],
        errors: vec![],
    };

    enum Section {
        None,
        Global,
        Debug,
        Endpoint(EndpointBuilder),
    }
    let mut curr_section = Section::None;

    let file = match std::fs::File::open(config_file) {
        Ok(f) => f,
        Err(e) => {
            return Err(format!("{config_file}: {e}"));
        }
    };
    for l in std::io::BufReader::new(file).lines() {
        let l = match l {
            Ok(l) => l,
            Err(e) => {
                return Err(format!("{e}"));
            }
        };
        if l.starts_with('#') {
            continue;
        }
        let l = trim_ascii(&l);
        if l.len() == 0 {
            continue;
        }
        if l.starts_with('[') {
            // Entering a new section closes out any endpoint being built.
            if let Section::Endpoint(b) =
                std::mem::replace(&mut curr_section, Section::None)
            {
                b.finish(&mut ini);
            }
            curr_section = match l {
                "[global]" => Section::Global,
                "[debug]" => Section::Debug,
                "[endpoint]" => Section::Endpoint(EndpointBuilder::default()),
                _ => return Err(format!("Unknown section {l}")),
            };
            continue;
        }

        let (name, value) = parse_setting(l)?;
        match curr_section {
            Section::None => return Err("Setting outside section".to_string()),
            Section::Global => match name.as_str() {
                "flush-cadence" => {
                    ini.global.flush_cadence = parse_duration("global.flush-cadence", &value)?;
                }
                "flush-timeout" => {
                    ini.global.flush_timeout =
                        Some(parse_duration("global.flush-timeout", &value)?);
                }
                _ => return Err(format!("Invalid [global] setting name `{name}`")),
            },
            Section::Debug => match name.as_str() {
                "verbose" => {
                    ini.debug.verbose = parse_bool(&value)?;
                }
                _ => return Err(format!("Invalid [debug] setting name `{name}`")),
            },
            Section::Endpoint(ref mut b) => endpoint_setting(b, &name, &value),
        }
    }
    if let Section::Endpoint(b) = curr_section {
        b.finish(&mut ini);
    }

    Ok(ini)
}

// Endpoint setting errors are recorded on the builder, not returned: they
// disable this endpoint only.
fn endpoint_setting(b: &mut EndpointBuilder, name: &str, value: &str) {
    match name {
        "name" => {
            b.name = Some(value.to_string());
        }
        "host" => {
            b.host = Some(value.to_string());
        }
        "port" => match value.parse::<u16>() {
            Ok(p) if p > 0 => {
                b.port = Some(p);
            }
            _ => {
                b.errors.push(format!("Invalid port number `{value}`"));
            }
        },
        "client-id" => {
            b.client_id = Some(value.to_string());
        }
        "ca-path" => {
            b.ca_path = Some(value.to_string());
        }
        "client-cert" => {
            b.client_cert = Some(value.to_string());
        }
        "client-key" => {
            b.client_key = Some(value.to_string());
        }
        "insecure" => match parse_bool(value) {
            Ok(v) => {
                b.insecure = v;
            }
            Err(e) => {
                b.errors.push(e);
            }
        },
        "qos" => match value.parse::<u8>() {
            Ok(q) if q <= 1 => {
                b.qos = q;
            }
            _ => {
                b.errors
                    .push(format!("Not a valid qos setting `{value}` - 0 or 1 required"));
            }
        },
        "topic" => {
            b.topic = Some(value.to_string());
        }
        "store-rates" => match parse_bool(value) {
            Ok(v) => {
                b.store_rates = v;
            }
            Err(e) => {
                b.errors.push(e);
            }
        },
        "buffer-size" => match value.parse::<usize>() {
            Ok(n) if (buffer::MIN_BUFFER_SIZE..=buffer::MAX_BUFFER_SIZE).contains(&n) => {
                b.buffer_size = Some(n);
            }
            _ => {
                b.errors.push(format!(
                    "Not a valid buffer-size setting `{value}` - {} to {} required",
                    buffer::MIN_BUFFER_SIZE,
                    buffer::MAX_BUFFER_SIZE
                ));
            }
        },
        _ => {
            b.errors
                .push(format!("Invalid [endpoint] setting name `{name}`"));
        }
    }
}

// The default client id is the process hostname, "unknown-host" if the name
// cannot be read for some reason.
pub fn process_hostname() -> String {
    let mut buf = vec![0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "unknown-host".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).to_string()
}

fn parse_setting(l: &str) -> Result<(String, String), String> {
    if let Some((name, value)) = l.split_once('=') {
        let name = trim_ascii(name);
        for c in name.chars() {
            if !(c.is_ascii_alphanumeric() || c == '-' || c == '_') {
                return Err("Illegal character in name".to_string());
            }
        }
        let value = trim_ascii(value);
        if value == "" {
            return Err("Empty string must be quoted".to_string());
        }
        let value = trim_quotes(value)?;
        Ok((name.to_string(), value.to_string()))
    } else {
        Err("Illegal property definition".to_string())
    }
}

fn parse_bool(l: &str) -> Result<bool, String> {
    match l {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(format!("Invalid boolean value {l}")),
    }
}

fn parse_duration(context: &str, l: &str) -> Result<Dur, String> {
    if let Some(hours) = l.strip_suffix(['h', 'H']) {
        if let Ok(k) = hours.parse::<u64>() {
            if k > 0 {
                return Ok(Dur::Hours(k));
            }
        }
    } else if let Some(minutes) = l.strip_suffix(['m', 'M']) {
        if let Ok(k) = minutes.parse::<u64>() {
            if k > 0 {
                return Ok(Dur::Minutes(k));
            }
        }
    } else if let Some(seconds) = l.strip_suffix(['s', 'S']) {
        if let Ok(k) = seconds.parse::<u64>() {
            if k > 0 {
                return Ok(Dur::Seconds(k));
            }
        }
    }
    Err(format!("Bad duration in {context}"))
}

fn trim_ascii(l: &str) -> &str {
    l.trim_matches([' ', '\t'])
}

fn trim_quotes(l: &str) -> Result<&str, String> {
    // Invariant: bs.len() > 0
    let bs = l.as_bytes();
    if bs[0] == b'\'' || bs[0] == b'"' || bs[0] == b'`' {
        if bs.len() < 2 || bs[0] != bs[bs.len() - 1] {
            Err("Mismatched quotes".to_string())
        } else {
            Ok(&l[1..l.len() - 1])
        }
    } else {
        Ok(l)
    }
}

#[test]
pub fn test_setting_helpers() {
    let (a, b) = parse_setting(" flush-cadence = 10s ").unwrap();
    assert!(a == "flush-cadence");
    assert!(b == "10s");
    let (a, b) = parse_setting("topic=`a b c`").unwrap();
    assert!(a == "topic");
    assert!(b == "a b c");
    assert!(parse_setting("zappa").is_err());
    assert!(parse_setting("zappa = ").is_err());
    assert!(parse_setting("zappa = `abracadabra").is_err());
    assert!(parse_setting("zapp! = true").is_err());

    assert!(parse_bool("true") == Ok(true));
    assert!(parse_bool("false") == Ok(false));
    assert!(parse_bool("tru").is_err());

    assert!(parse_duration("", "30s").unwrap() == Dur::Seconds(30));
    assert!(parse_duration("", "10m").unwrap() == Dur::Minutes(10));
    assert!(parse_duration("", "6H").unwrap() == Dur::Hours(6));
    assert!(parse_duration("", "35").is_err());
    assert!(parse_duration("", "0s").is_err());
    assert!(parse_duration("", "12m35s").is_err());

    assert!(trim_ascii(" \t abc\t \t") == "abc");
    assert!(trim_quotes("'abc'").unwrap() == "abc");
    assert!(trim_quotes("'abc").is_err());
}

#[test]
pub fn test_parse_config() {
    let ini = parse_config("src/testdata/courier-basic.ini").unwrap();

    assert!(ini.global.flush_cadence == Dur::Seconds(30));
    assert!(ini.global.flush_timeout == Some(Dur::Minutes(1)));
    assert!(ini.debug.verbose);
    assert!(ini.errors.is_empty());

    assert!(ini.endpoints.len() == 2);
    let e = &ini.endpoints[0];
    assert!(e.name == "local");
    assert!(e.host == "localhost");
    assert!(e.port == 1883);
    assert!(e.client_id == "courier-test");
    assert!(e.ca_path.is_none());
    assert!(!e.insecure);
    assert!(e.qos == 0);
    assert!(e.topic == "collectd");
    assert!(!e.store_rates);
    assert!(e.buffer_size == buffer::MAX_BUFFER_SIZE);

    let e = &ini.endpoints[1];
    assert!(e.name == "central");
    assert!(e.host == "mqtt.example.com");
    assert!(e.port == DEFAULT_PORT);
    assert!(e.client_id != ""); // defaulted to the hostname
    assert!(e.ca_path == Some("/etc/courier/ca.pem".to_string()));
    assert!(e.client_cert == Some("/etc/courier/cert.pem".to_string()));
    assert!(e.client_key == Some("/etc/courier/key.pem".to_string()));
    assert!(e.insecure);
    assert!(e.qos == 1);
    assert!(e.topic == "metrics/prod");
    assert!(e.store_rates);
    assert!(e.buffer_size == 4096);
}

#[test]
pub fn test_parse_config_bad_endpoints() {
    // Three broken endpoints (bad qos, missing host, duplicate name) are
    // skipped with errors; the one good endpoint survives.
    let ini = parse_config("src/testdata/courier-bad-endpoints.ini").unwrap();
    assert!(ini.endpoints.len() == 1);
    assert!(ini.endpoints[0].name == "good");
    assert!(ini.errors.len() == 3);
    assert!(ini.errors.iter().any(|e| e.contains("qos")));
    assert!(ini.errors.iter().any(|e| e.contains("endpoint.host")));
    assert!(ini.errors.iter().any(|e| e.contains("Duplicate")));
}

#[test]
pub fn test_parse_config_tls_codependence() {
    let ini = parse_config("src/testdata/courier-bad-tls.ini").unwrap();
    assert!(ini.endpoints.is_empty());
    assert!(ini.errors.len() == 2);
    assert!(ini.errors.iter().any(|e| e.contains("given together")));
    assert!(ini.errors.iter().any(|e| e.contains("require ca-path")));
}

#[test]
pub fn test_parse_config_fatal() {
    assert!(parse_config("src/testdata/no-such-file.ini").is_err());
    assert!(parse_config("src/testdata/courier-bad-global.ini").is_err());
}
