// A small JSON value tree and serializer.  Sample records are built as a tree
// of objects and arrays and then serialized in one go, so a record either fits
// in the send buffer in its entirety or is not added at all.
//
// Output follows the JSON standard; NaN and infinite floats must be mapped to
// Value::N (null) by the caller before they get here.

#[derive(Debug)]
pub enum Value {
    A(Array),
    O(Object),
    S(String),
    U(u64),
    I(i64),
    F(f64),
    N(), // null
}

#[derive(Debug)]
struct Field {
    tag: String,
    value: Value,
}

#[derive(Debug)]
pub struct Object {
    fields: Vec<Field>,
}

#[allow(dead_code)]
impl Object {
    pub fn new() -> Object {
        Object { fields: vec![] }
    }

    pub fn push(&mut self, tag: &str, value: Value) {
        self.fields.push(Field {
            tag: tag.to_string(),
            value,
        })
    }

    pub fn push_o(&mut self, tag: &str, o: Object) {
        self.push(tag, Value::O(o));
    }

    pub fn push_a(&mut self, tag: &str, a: Array) {
        self.push(tag, Value::A(a));
    }

    pub fn push_s(&mut self, tag: &str, s: String) {
        self.push(tag, Value::S(s));
    }

    pub fn push_u(&mut self, tag: &str, u: u64) {
        self.push(tag, Value::U(u));
    }

    pub fn push_i(&mut self, tag: &str, i: i64) {
        self.push(tag, Value::I(i));
    }

    pub fn push_f(&mut self, tag: &str, f: f64) {
        self.push(tag, Value::F(f));
    }
}

#[derive(Debug)]
pub struct Array {
    elements: Vec<Value>,
}

#[allow(dead_code)]
impl Array {
    pub fn new() -> Array {
        Array { elements: vec![] }
    }

    pub fn push(&mut self, value: Value) {
        self.elements.push(value)
    }

    pub fn push_s(&mut self, s: String) {
        self.push(Value::S(s));
    }

    pub fn push_u(&mut self, u: u64) {
        self.push(Value::U(u));
    }

    pub fn push_i(&mut self, i: i64) {
        self.push(Value::I(i));
    }

    pub fn push_f(&mut self, f: f64) {
        self.push(Value::F(f));
    }

    pub fn push_null(&mut self) {
        self.push(Value::N());
    }
}

// Serialize a value into a fresh byte vector, no trailing newline.

pub fn to_vec(v: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(&mut out, v);
    out
}

fn write_value(out: &mut Vec<u8>, v: &Value) {
    match v {
        Value::A(a) => write_array(out, a),
        Value::O(o) => write_object(out, o),
        Value::S(s) => write_string(out, s),
        Value::U(u) => out.extend_from_slice(format!("{u}").as_bytes()),
        Value::I(i) => out.extend_from_slice(format!("{i}").as_bytes()),
        Value::F(f) => out.extend_from_slice(format!("{f}").as_bytes()),
        Value::N() => out.extend_from_slice(b"null"),
    }
}

fn write_array(out: &mut Vec<u8>, a: &Array) {
    out.push(b'[');
    let mut first = true;
    for elt in &a.elements {
        if !first {
            out.push(b',');
        }
        write_value(out, elt);
        first = false;
    }
    out.push(b']');
}

fn write_object(out: &mut Vec<u8>, o: &Object) {
    out.push(b'{');
    let mut first = true;
    for fld in &o.fields {
        if !first {
            out.push(b',');
        }
        write_string(out, &fld.tag);
        out.push(b':');
        write_value(out, &fld.value);
        first = false;
    }
    out.push(b'}');
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.push(b'"');
    out.extend_from_slice(json_quote(s).as_bytes());
    out.push(b'"');
}

// Insert \ before " and \
// Insert escape sequences for well-known control chars.
// Translate all other control chars to spaces (it's possible to do better).
pub fn json_quote(s: &str) -> String {
    let mut t = "".to_string();
    for c in s.chars() {
        match c {
            '"' | '\\' => {
                t.push('\\');
                t.push(c);
            }
            '\n' => {
                t.push_str("\\n");
            }
            '\r' => {
                t.push_str("\\r");
            }
            '\t' => {
                t.push_str("\\t");
            }
            _ctl if c < ' ' => {
                t.push(' ');
            }
            _ => {
                t.push(c);
            }
        }
    }
    t
}

#[test]
pub fn test_json_quote() {
    assert!(&json_quote("abcde") == "abcde");
    assert!(&json_quote(r#"abc\de"#) == r#"abc\\de"#);
    assert!(&json_quote(r#"abc"de"#) == r#"abc\"de"#);
    assert!(&json_quote("abc\nde") == r#"abc\nde"#);
    assert!(&json_quote("abc\rde") == r#"abc\rde"#);
    assert!(&json_quote("abc	de") == r#"abc\tde"#);
    assert!(&json_quote("abc\u{0008}de") == r#"abc de"#);
}

#[test]
pub fn test_json_output() {
    let mut a = Array::new();
    let mut o = Object::new();
    o.push_o("o", Object::new());
    o.push_a("a", Array::new());
    o.push_s("s", r#"hello, "sir""#.to_string());
    o.push_u("u", 123);
    o.push_i("i", -12);
    o.push_f("f", 12.5);
    o.push("n", Value::N());
    a.push(Value::O(o));
    a.push_s(r#"stri\ng"#.to_string());
    let expect =
        r#"[{"o":{},"a":[],"s":"hello, \"sir\"","u":123,"i":-12,"f":12.5,"n":null},"stri\\ng"]"#;
    let got = to_vec(&Value::A(a));
    assert!(expect.as_bytes() == got.as_slice());
}
