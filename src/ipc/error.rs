use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Error carried out of a handler body and rendered once at the edge.
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        tracing::warn!(code = self.code, message = %self.message, "request failed");
        err(id, self.code, self.message, self.details)
    }
}

impl From<crate::query::QueryError> for HandlerErr {
    fn from(e: crate::query::QueryError) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

/// Renders a handler result as a response envelope.
pub fn respond(id: &str, res: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match res {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}
