use reqwest::header::HeaderMap;

use crate::error::LlmError;

/// Map a non-2xx response into an [`LlmError`] carrying the right retry class.
///
/// 401/403 become authentication errors. Everything else stays an
/// `ApiError` with the status, so 429 and 5xx remain retryable and other
/// 4xx terminal. The provider's error message is extracted from the usual
/// `{"error": {"message": ...}}` envelope when present.
pub fn classify_http_error(
    provider_id: &str,
    status: u16,
    body_text: &str,
    headers: &HeaderMap,
) -> LlmError {
    let request_id = ["x-request-id", "request-id", "x-openai-request-id"]
        .iter()
        .find_map(|k| headers.get(*k).and_then(|v| v.to_str().ok()))
        .map(|v| format!(" request_id={v}"))
        .unwrap_or_default();
    let body_sample = body_text.chars().take(200).collect::<String>();
    let parsed = serde_json::from_str::<serde_json::Value>(body_text).ok();
    let message = parsed
        .as_ref()
        .and_then(extract_error_message)
        .unwrap_or_else(|| {
            if body_sample.trim().is_empty() {
                "api error".to_string()
            } else {
                body_sample.clone()
            }
        });

    if status == 401 || status == 403 {
        return LlmError::AuthenticationError(format!(
            "provider={provider_id} http={status}{request_id} {message}"
        ));
    }

    if status == 429 {
        let retry_after = headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(|v| format!(" retry_after={v}"))
            .unwrap_or_default();
        return LlmError::api_error(429, format!("rate limited{retry_after}: {message}"));
    }

    match parsed {
        Some(details) => LlmError::api_error_with_details(
            status,
            message,
            serde_json::json!({
                "provider": provider_id,
                "status": status,
                "body": details,
            }),
        ),
        None => LlmError::api_error(status, message),
    }
}

fn extract_error_message(body: &serde_json::Value) -> Option<String> {
    let error = body.get("error")?;
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
}
