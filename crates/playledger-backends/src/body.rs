use serde_json::Value;
use tracing::debug;

/// Form fields that carry a JSON payload: Emby's `data`, Plex's `payload`.
const FORM_FIELDS: [&str; 2] = ["data", "payload"];

/// Decode a webhook request body into JSON.
///
/// Accepts raw JSON, url-encoded forms and multipart forms whose `data` or
/// `payload` field holds the JSON document. Returns `None` when there is no
/// usable payload.
pub fn parse_request_body(body: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(body).ok()?.trim();
    if text.is_empty() {
        return None;
    }

    if text.starts_with('{') {
        return serde_json::from_str(text).ok();
    }

    let field = form_field(text).or_else(|| multipart_field(text))?;
    match serde_json::from_str(&field) {
        Ok(json) => Some(json),
        Err(e) => {
            debug!("Form payload is not valid JSON: {}", e);
            None
        }
    }
}

fn form_field(text: &str) -> Option<String> {
    text.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if !FORM_FIELDS.contains(&key) {
            return None;
        }
        urlencoding::decode(&value.replace('+', " ")).ok().map(|v| v.into_owned())
    })
}

fn multipart_field(text: &str) -> Option<String> {
    let boundary = text.lines().next()?.trim();
    if !boundary.starts_with("--") {
        return None;
    }

    text.split(boundary).find_map(|part| {
        let (headers, content) = part.split_once("\r\n\r\n").or_else(|| part.split_once("\n\n"))?;
        let named = FORM_FIELDS
            .iter()
            .any(|field| headers.contains(&format!("name=\"{}\"", field)));
        named.then(|| content.trim().to_string())
    })
}
