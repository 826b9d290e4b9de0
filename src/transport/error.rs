//! Readable messages for failed API responses.

/// Extract a short message from an agent platform error body.
///
/// Handles the shapes the platform returns:
/// - `[{"message": "...", "errorCode": "..."}]` (REST API)
/// - `{"message": "..."}`
/// - `{"error": "...", "error_description": "..."}` (OAuth)
///
/// Anything else is returned unchanged.
#[must_use]
pub fn format_api_error(body: &str) -> String {
    let trimmed = body.trim();
    serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|json| extract_error_message(&json))
        .unwrap_or_else(|| trimmed.to_string())
}

fn extract_error_message(json: &serde_json::Value) -> Option<String> {
    // REST errors arrive as an array; report the first entry
    if let Some(first) = json.as_array().and_then(|items| items.first()) {
        return extract_error_message(first);
    }

    if let Some(msg) = json.get("message").and_then(|v| v.as_str()) {
        let code = json
            .get("errorCode")
            .or_else(|| json.get("code"))
            .and_then(|v| v.as_str());
        return Some(match code {
            Some(code) => format!("{msg} (code: {code})"),
            None => msg.to_string(),
        });
    }

    if let Some(error) = json.get("error").and_then(|v| v.as_str()) {
        return Some(match json.get("error_description").and_then(|v| v.as_str()) {
            Some(description) => format!("{error}: {description}"),
            None => error.to_string(),
        });
    }

    None
}
