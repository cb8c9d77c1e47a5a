/// Raw query-string parameters in arrival order. Values are `None` when the
/// key was present without a usable value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, Option<String>)>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: Option<String>) {
        self.0.push((key.into(), value));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Accepts a JSON object (`{"search": "math"}`) or an ordered array of
    /// `[key, value]` pairs. Numbers keep their decimal text (`{"page": 2}`);
    /// other non-string values count as absent.
    pub fn from_json(v: &serde_json::Value) -> Self {
        let mut out = Self::new();
        match v {
            serde_json::Value::Object(map) => {
                for (k, val) in map {
                    out.push(k.clone(), json_str(val));
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    let Some(pair) = item.as_array() else {
                        continue;
                    };
                    let Some(key) = pair.first().and_then(|k| k.as_str()) else {
                        continue;
                    };
                    out.push(key, pair.get(1).and_then(json_str));
                }
            }
            _ => {}
        }
        out
    }
}

fn json_str(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl<K: Into<String>> FromIterator<(K, Option<String>)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, Option<String>)>>(iter: I) -> Self {
        let mut out = Self::new();
        for (k, v) in iter {
            out.push(k, v);
        }
        out
    }
}

pub const PAGE_KEY: &str = "page";

/// Splits `page` off the parameters. Missing or malformed page values fall
/// back to page 1; the last `page` entry wins when repeated.
pub fn normalize(params: &QueryParams) -> (u32, QueryParams) {
    let mut page = 1;
    let mut rest = QueryParams::new();
    for (k, v) in params.iter() {
        if k == PAGE_KEY {
            page = v.map(parse_page).unwrap_or(1);
        } else {
            rest.push(k, v.map(|s| s.to_string()));
        }
    }
    (page, rest)
}

/// Integer-prefix parse: `" 2"`, `"+2"` and `"2abc"` are page 2; anything
/// without leading digits, zero, or out of range is page 1.
pub fn parse_page(raw: &str) -> u32 {
    let t = raw.trim();
    let t = t.strip_prefix('+').unwrap_or(t);
    let end = t
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(t.len());
    match t[..end].parse::<u32>() {
        Ok(n) if n >= 1 => n,
        _ => 1,
    }
}
