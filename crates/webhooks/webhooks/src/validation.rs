//! Input validation for subscriptions.

use url::Url;

use crate::error::{WebhookError, WebhookResult};

/// Checks that `url` parses, uses http or https, and has a host.
pub fn validate_url(url: &str) -> WebhookResult<()> {
    let parsed =
        Url::parse(url).map_err(|e| WebhookError::validation(format!("Invalid URL: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(WebhookError::validation(
            "URL must use http or https scheme",
        ));
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(WebhookError::validation("URL must have a host"));
    }

    Ok(())
}

/// Returns true for `{domain}.{action}` names such as `order.created`.
///
/// Each side starts with a lowercase letter and continues with lowercase
/// letters, digits or underscores.
pub fn is_valid_event_type(event_type: &str) -> bool {
    let Some((domain, action)) = event_type.split_once('.') else {
        return false;
    };
    is_segment(domain) && is_segment(action)
}

fn is_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Checks a non-empty list of well-formed event types.
pub fn validate_event_types(event_types: &[String]) -> WebhookResult<()> {
    if event_types.is_empty() {
        return Err(WebhookError::validation(
            "At least one event type is required",
        ));
    }

    if let Some(invalid) = event_types.iter().find(|t| !is_valid_event_type(t)) {
        return Err(WebhookError::validation(format!(
            "Invalid event type '{invalid}': expected format domain.action"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_format() {
        assert!(is_valid_event_type("order.created"));
        assert!(is_valid_event_type("invoice.payment_failed"));
        assert!(is_valid_event_type("stock2.low"));

        assert!(!is_valid_event_type("ordercreated"));
        assert!(!is_valid_event_type("order.created.v2"));
        assert!(!is_valid_event_type("Order.created"));
        assert!(!is_valid_event_type("order."));
        assert!(!is_valid_event_type(".created"));
        assert!(!is_valid_event_type("1order.created"));
        assert!(!is_valid_event_type("order.created-now"));
    }

    #[test]
    fn test_event_types_must_not_be_empty() {
        assert!(validate_event_types(&[]).is_err());
        assert!(validate_event_types(&["order.created".to_string()]).is_ok());
        assert!(validate_event_types(&["order.created".to_string(), "bad".to_string()]).is_err());
    }

    #[test]
    fn test_url_validation() {
        assert!(validate_url("https://hooks.example.com/franchise").is_ok());
        assert!(validate_url("http://localhost:8080/hook").is_ok());

        assert!(validate_url("not a url").is_err());
        assert!(validate_url("ftp://example.com/hook").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
    }
}
