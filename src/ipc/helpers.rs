use crate::ipc::error::err;
use crate::ipc::types::Request;

/// Required string param: present, string-typed, non-blank after trimming.
pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let Some(v) = req.params.get(key) else {
        return Err(err(&req.id, "bad_params", format!("missing {}", key), None));
    };
    let Some(s) = v.as_str() else {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a string", key),
            None,
        ));
    };
    let s = s.trim();
    if s.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be empty", key),
            None,
        ));
    }
    Ok(s.to_string())
}

/// Optional string param; blank is treated as absent.
pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn optional_bool(req: &Request, key: &str, default: bool) -> bool {
    req.params
        .get(key)
        .and_then(|v| v.as_bool())
        .unwrap_or(default)
}
