// The metric sample model and the line protocol that delivers samples to the
// daemon on stdin.
//
// A sample carries a collectd-style identity (host / plugin with optional
// instance / type with optional instance), an epoch timestamp, the collection
// interval, and one or more named data sources.  Each data source is a gauge
// (a point-in-time float), a derive (a signed running total), or a counter
// (an unsigned running total that may wrap).
//
// The input protocol is one sample per line:
//
//   PUTVAL <host>/<plugin>[-<instance>]/<type>[-<instance>] <time> <interval> <ds>:<dstype>:<value> ...
//
// <time> is epoch seconds or the letter N for "now".  A gauge value of U
// means "unknown" and is carried as NaN.  Malformed lines are rejected with a
// message naming the offending part; the daemon logs and skips them.

use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Gauge(f64),
    Derive(i64),
    Counter(u64),
}

impl Value {
    pub fn dstype(&self) -> &'static str {
        match self {
            Value::Gauge(_) => "gauge",
            Value::Derive(_) => "derive",
            Value::Counter(_) => "counter",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sample {
    pub host: String,
    pub plugin: String,
    pub plugin_instance: String,
    pub type_: String,
    pub type_instance: String,
    pub time: u64,
    pub interval: u64,
    // (data source name, value) in input order.
    pub values: Vec<(String, Value)>,
}

impl Sample {
    // host/plugin[-instance]/type[-instance], the collectd identifier form.
    pub fn identifier(&self) -> String {
        let mut s = self.host.clone();
        s.push('/');
        s += &self.plugin;
        if self.plugin_instance != "" {
            s.push('-');
            s += &self.plugin_instance;
        }
        s.push('/');
        s += &self.type_;
        if self.type_instance != "" {
            s.push('-');
            s += &self.type_instance;
        }
        s
    }
}

pub fn unix_now() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs(),
        Err(_) => 0,
    }
}

pub fn parse_putval(line: &str) -> Result<Sample, String> {
    let mut fields = line.split_ascii_whitespace();
    match fields.next() {
        Some("PUTVAL") => {}
        _ => return Err("Expected PUTVAL".to_string()),
    }
    let identifier = fields.next().ok_or("Missing identifier")?;
    let (host, plugin, plugin_instance, type_, type_instance) = parse_identifier(identifier)?;
    let time = match fields.next() {
        Some("N") => unix_now(),
        Some(t) => t
            .parse::<u64>()
            .map_err(|_| format!("Bad timestamp `{t}`"))?,
        None => return Err("Missing timestamp".to_string()),
    };
    let interval = match fields.next() {
        Some(i) => i
            .parse::<u64>()
            .map_err(|_| format!("Bad interval `{i}`"))?,
        None => return Err("Missing interval".to_string()),
    };
    let mut values = vec![];
    for v in fields {
        values.push(parse_value(v)?);
    }
    if values.is_empty() {
        return Err("No values".to_string());
    }
    Ok(Sample {
        host,
        plugin,
        plugin_instance,
        type_,
        type_instance,
        time,
        interval,
        values,
    })
}

fn parse_identifier(s: &str) -> Result<(String, String, String, String, String), String> {
    let parts = s.split('/').collect::<Vec<&str>>();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(format!("Bad identifier `{s}` - host/plugin/type required"));
    }
    let (plugin, plugin_instance) = split_instance(parts[1]);
    let (type_, type_instance) = split_instance(parts[2]);
    Ok((
        parts[0].to_string(),
        plugin,
        plugin_instance,
        type_,
        type_instance,
    ))
}

// The instance, if any, follows the first '-'; the instance itself may
// contain further dashes.
fn split_instance(s: &str) -> (String, String) {
    match s.split_once('-') {
        Some((name, instance)) => (name.to_string(), instance.to_string()),
        None => (s.to_string(), "".to_string()),
    }
}

fn parse_value(s: &str) -> Result<(String, Value), String> {
    let parts = s.split(':').collect::<Vec<&str>>();
    if parts.len() != 3 {
        return Err(format!("Bad value `{s}` - name:dstype:value required"));
    }
    let name = parts[0];
    if name.is_empty() {
        return Err(format!("Bad value `{s}` - empty data source name"));
    }
    let v = match parts[1] {
        "gauge" => {
            if parts[2] == "U" {
                Value::Gauge(f64::NAN)
            } else {
                Value::Gauge(
                    parts[2]
                        .parse::<f64>()
                        .map_err(|_| format!("Bad gauge value `{}`", parts[2]))?,
                )
            }
        }
        "derive" => Value::Derive(
            parts[2]
                .parse::<i64>()
                .map_err(|_| format!("Bad derive value `{}`", parts[2]))?,
        ),
        "counter" => Value::Counter(
            parts[2]
                .parse::<u64>()
                .map_err(|_| format!("Bad counter value `{}`", parts[2]))?,
        ),
        t => return Err(format!("Bad dstype `{t}`")),
    };
    Ok((name.to_string(), v))
}

#[test]
pub fn test_parse_putval() {
    let s =
        parse_putval("PUTVAL web1/cpu-0/cpu-idle 1756400000 10 value:derive:12345").unwrap();
    assert!(s.host == "web1");
    assert!(s.plugin == "cpu");
    assert!(s.plugin_instance == "0");
    assert!(s.type_ == "cpu");
    assert!(s.type_instance == "idle");
    assert!(s.time == 1756400000);
    assert!(s.interval == 10);
    assert!(s.values.len() == 1);
    assert!(s.values[0].0 == "value");
    assert!(s.values[0].1 == Value::Derive(12345));
    assert!(s.identifier() == "web1/cpu-0/cpu-idle");

    let s = parse_putval(
        "PUTVAL db9/interface-eth0/if_octets N 10 rx:counter:100 tx:counter:200",
    )
    .unwrap();
    assert!(s.type_instance == "");
    assert!(s.values.len() == 2);
    assert!(s.time > 0);
    assert!(s.identifier() == "db9/interface-eth0/if_octets");

    let s = parse_putval("PUTVAL h/load/load 1 60 shortterm:gauge:U").unwrap();
    if let Value::Gauge(g) = s.values[0].1 {
        assert!(g.is_nan());
    } else {
        panic!("Not a gauge");
    }
}

#[test]
pub fn test_parse_putval_rejects() {
    assert!(parse_putval("").is_err());
    assert!(parse_putval("GETVAL a/b/c 1 1 v:gauge:1").is_err());
    assert!(parse_putval("PUTVAL a/b 1 1 v:gauge:1").is_err());
    assert!(parse_putval("PUTVAL a//c 1 1 v:gauge:1").is_err());
    assert!(parse_putval("PUTVAL a/b/c x 1 v:gauge:1").is_err());
    assert!(parse_putval("PUTVAL a/b/c 1 x v:gauge:1").is_err());
    assert!(parse_putval("PUTVAL a/b/c 1 1").is_err());
    assert!(parse_putval("PUTVAL a/b/c 1 1 v:gauge").is_err());
    assert!(parse_putval("PUTVAL a/b/c 1 1 v:blob:1").is_err());
    assert!(parse_putval("PUTVAL a/b/c 1 1 :gauge:1").is_err());
    assert!(parse_putval("PUTVAL a/b/c 1 1 v:counter:-1").is_err());
}
