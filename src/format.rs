// Serialize one sample as a JSON object with the
// collectd write-plugin field set: values, dstypes, dsnames, time, interval,
// host, plugin, plugin_instance, type, type_instance.
//
// When store-rates is on, derive and counter data sources are converted to
// per-second rates against the previous observation of the same data source.
// A data source seen for the first time (or with a non-advancing clock) has
// no rate and serializes as null, the same convention used for NaN gauges.

#[cfg(test)]
use crate::buffer::SendBuffer;
use crate::json::{self, Array, Object, Value};
use crate::sample::{self, Sample};

use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
enum Raw {
    D(i64),
    C(u64),
}

struct Prev {
    time: u64,
    value: Raw,
}

pub struct RateCache {
    prev: HashMap<String, Prev>,
}

impl RateCache {
    pub fn new() -> RateCache {
        RateCache {
            prev: HashMap::new(),
        }
    }

    // Compute the per-second rate for one data source observation, then
    // remember the observation.  None when no rate can be computed yet.
    fn rate(&mut self, key: String, time: u64, raw: Raw) -> Option<f64> {
        let computed = match self.prev.get(&key) {
            Some(p) if time > p.time => {
                let dt = (time - p.time) as f64;
                match (p.value, raw) {
                    // Widened so that extreme jumps cannot overflow i64.
                    (Raw::D(prev), Raw::D(cur)) => {
                        Some((cur as i128 - prev as i128) as f64 / dt)
                    }
                    (Raw::C(prev), Raw::C(cur)) => Some(counter_diff(prev, cur) as f64 / dt),
                    // The data source changed type under us; start over.
                    _ => None,
                }
            }
            _ => None,
        };
        self.prev.insert(key, Prev { time, value: raw });
        computed
    }
}

// Counters are running totals that may wrap.  A counter that appears to run
// backwards is assumed to have wrapped at 32 or 64 bits, whichever bound the
// previous value was under.
fn counter_diff(prev: u64, cur: u64) -> u64 {
    if cur >= prev {
        cur - prev
    } else if prev <= u32::MAX as u64 {
        (u32::MAX as u64 - prev) + cur + 1
    } else {
        (u64::MAX - prev) + cur + 1
    }
}

// Rendering is separate from insertion so that a record that would not fit
// can be retried against a freshly flushed buffer without recomputing rates.
pub fn render_sample(s: &Sample, store_rates: bool, rates: &mut RateCache) -> Vec<u8> {
    let mut values = Array::new();
    let mut dstypes = Array::new();
    let mut dsnames = Array::new();
    for (name, v) in &s.values {
        dstypes.push_s(v.dstype().to_string());
        dsnames.push_s(name.clone());
        match *v {
            sample::Value::Gauge(g) => {
                if g.is_finite() {
                    values.push_f(g);
                } else {
                    values.push_null();
                }
            }
            sample::Value::Derive(d) => {
                if store_rates {
                    push_rate(&mut values, rates, s, name, Raw::D(d));
                } else {
                    values.push_i(d);
                }
            }
            sample::Value::Counter(c) => {
                if store_rates {
                    push_rate(&mut values, rates, s, name, Raw::C(c));
                } else {
                    values.push_u(c);
                }
            }
        }
    }

    let mut rec = Object::new();
    rec.push_a("values", values);
    rec.push_a("dstypes", dstypes);
    rec.push_a("dsnames", dsnames);
    rec.push_u("time", s.time);
    rec.push_u("interval", s.interval);
    rec.push_s("host", s.host.clone());
    rec.push_s("plugin", s.plugin.clone());
    rec.push_s("plugin_instance", s.plugin_instance.clone());
    rec.push_s("type", s.type_.clone());
    rec.push_s("type_instance", s.type_instance.clone());

    json::to_vec(&Value::O(rec))
}

fn push_rate(values: &mut Array, rates: &mut RateCache, s: &Sample, name: &str, raw: Raw) {
    let key = s.identifier() + "/" + name;
    match rates.rate(key, s.time, raw) {
        Some(r) if r.is_finite() => values.push_f(r),
        _ => values.push_null(),
    }
}

#[cfg(test)]
fn test_sample(time: u64, values: Vec<(String, sample::Value)>) -> Sample {
    Sample {
        host: "h".to_string(),
        plugin: "p".to_string(),
        plugin_instance: "".to_string(),
        type_: "t".to_string(),
        type_instance: "".to_string(),
        time,
        interval: 10,
        values,
    }
}

#[test]
pub fn test_record_fields() {
    let mut b = SendBuffer::new(crate::buffer::MIN_BUFFER_SIZE);
    let mut rates = RateCache::new();
    let s = test_sample(
        100,
        vec![
            ("v".to_string(), sample::Value::Gauge(1.5)),
            ("d".to_string(), sample::Value::Derive(-7)),
            ("c".to_string(), sample::Value::Counter(42)),
        ],
    );
    b.try_append(&render_sample(&s, false, &mut rates)).unwrap();
    let doc = String::from_utf8(b.finalize().unwrap()).unwrap();
    let expect = concat!(
        r#"[{"values":[1.5,-7,42],"dstypes":["gauge","derive","counter"],"#,
        r#""dsnames":["v","d","c"],"time":100,"interval":10,"#,
        r#""host":"h","plugin":"p","plugin_instance":"","type":"t","type_instance":""}]"#,
    );
    assert!(doc == expect);
}

#[test]
pub fn test_nan_gauge_is_null() {
    let mut b = SendBuffer::new(crate::buffer::MIN_BUFFER_SIZE);
    let mut rates = RateCache::new();
    let s = test_sample(100, vec![("v".to_string(), sample::Value::Gauge(f64::NAN))]);
    b.try_append(&render_sample(&s, false, &mut rates)).unwrap();
    let doc = String::from_utf8(b.finalize().unwrap()).unwrap();
    assert!(doc.starts_with(r#"[{"values":[null]"#));
}

#[test]
pub fn test_store_rates() {
    let mut b = SendBuffer::new(crate::buffer::MIN_BUFFER_SIZE);
    let mut rates = RateCache::new();

    // First sight: no rate, null.
    let s = test_sample(100, vec![("d".to_string(), sample::Value::Derive(1000))]);
    b.try_append(&render_sample(&s, true, &mut rates)).unwrap();
    let doc = String::from_utf8(b.finalize().unwrap()).unwrap();
    assert!(doc.starts_with(r#"[{"values":[null]"#));
    b.reset();

    // Ten seconds and 500 units later: 50/s.
    let s = test_sample(110, vec![("d".to_string(), sample::Value::Derive(1500))]);
    b.try_append(&render_sample(&s, true, &mut rates)).unwrap();
    let doc = String::from_utf8(b.finalize().unwrap()).unwrap();
    assert!(doc.starts_with(r#"[{"values":[50]"#));
}

#[test]
pub fn test_counter_wrap() {
    // 32-bit wrap: prev near the 32-bit bound, cur small again.
    assert!(counter_diff(u32::MAX as u64 - 1, 3) == 5);
    // 64-bit wrap.
    assert!(counter_diff(u64::MAX - 1, 3) == 5);
    // No wrap.
    assert!(counter_diff(10, 17) == 7);

    let mut rates = RateCache::new();
    assert!(rates
        .rate("k".to_string(), 100, Raw::C(u32::MAX as u64 - 1))
        .is_none());
    let r = rates.rate("k".to_string(), 110, Raw::C(3)).unwrap();
    assert!(r == 0.5);
}

#[test]
pub fn test_derive_rate_extreme_jump() {
    // A derive that leaps across nearly the whole i64 range must yield a
    // finite rate, not overflow.
    let mut rates = RateCache::new();
    assert!(rates.rate("k".to_string(), 100, Raw::D(i64::MIN)).is_none());
    let r = rates.rate("k".to_string(), 101, Raw::D(i64::MAX)).unwrap();
    assert!(r.is_finite());
    assert!(r == u64::MAX as f64);

    // And the same going down.
    let r = rates.rate("k".to_string(), 102, Raw::D(i64::MIN)).unwrap();
    assert!(r == -(u64::MAX as f64));
}

#[test]
pub fn test_rate_needs_advancing_clock() {
    let mut rates = RateCache::new();
    assert!(rates.rate("k".to_string(), 100, Raw::D(1)).is_none());
    // Same timestamp: no rate.
    assert!(rates.rate("k".to_string(), 100, Raw::D(2)).is_none());
}
