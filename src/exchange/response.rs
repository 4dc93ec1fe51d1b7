use serde::{Deserialize, Serialize};

use super::traits::RawResponse;

/// Classified exchange response. Every consumer works from this variant;
/// nobody else inspects status codes or sniffs response bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeOutcome {
    /// 2xx with a demonstrable order id or definitive success status
    Accepted { order_id: String },
    /// 403 with an upstream-block signature in the body
    UpstreamBlocked { correlation_id: Option<String> },
    /// 401
    Unauthorized,
    /// 400 with a balance/allowance keyword in the body
    InsufficientBalance { reason: String },
    /// Anything else, including a 2xx without explicit confirmation
    Rejected { status: u16, reason: String },
}

/// Signatures and limits used by `classify_response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseClassifierConfig {
    /// Case-insensitive substrings that mark a 403 as an upstream block
    pub block_signatures: Vec<String>,
    /// Case-insensitive substrings that mark a 400 as a funds problem
    pub balance_keywords: Vec<String>,
    /// Reason strings are truncated to this many characters
    pub max_reason_len: usize,
}

impl Default for ResponseClassifierConfig {
    fn default() -> Self {
        Self {
            block_signatures: vec![
                "cloudflare".to_string(),
                "attention required".to_string(),
                "just a moment".to_string(),
                "access denied".to_string(),
            ],
            balance_keywords: vec![
                "balance".to_string(),
                "allowance".to_string(),
                "insufficient".to_string(),
            ],
            max_reason_len: 200,
        }
    }
}

/// Collapse whitespace and cap the length so log lines stay readable even
/// when the exchange returns a full HTML error page.
fn normalize_reason(body: &str, max_len: usize) -> String {
    let collapsed: String = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "(empty body)".to_string();
    }
    collapsed.chars().take(max_len).collect()
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|n| lower.contains(&n.to_lowercase()))
}

/// Byte offset of an ASCII needle in the original haystack, matched
/// case-insensitively. Offsets stay valid for slicing even when the body
/// contains multi-byte characters whose lowercase form changes length.
fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

/// Correlation id for a blocked request, from the `cf-ray` header or a
/// "ray id" marker in the body. Used to deduplicate block logging.
fn extract_correlation_id(response: &RawResponse) -> Option<String> {
    if let Some(ray) = response.header("cf-ray") {
        return Some(ray.to_string());
    }
    let idx = find_ignore_ascii_case(&response.body, "ray id:")?;
    let tail = &response.body[idx + "ray id:".len()..];
    let id: String = tail
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Order id from a 2xx body. Accepts only explicit evidence: an order id
/// field, or a success flag paired with a definitive status.
fn extract_order_id(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    for key in ["orderID", "orderId", "order_id", "id"] {
        if let Some(id) = value.get(key).and_then(|v| v.as_str()) {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    let success = value.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
    let status = value.get("status").and_then(|v| v.as_str()).unwrap_or("");
    if success && matches!(status, "live" | "matched" | "delayed") {
        return Some(format!("status:{status}"));
    }
    None
}

/// The single place raw exchange responses are interpreted.
pub fn classify_response(
    response: &RawResponse,
    config: &ResponseClassifierConfig,
) -> ExchangeOutcome {
    match response.status {
        200..=299 => match extract_order_id(&response.body) {
            Some(order_id) => ExchangeOutcome::Accepted { order_id },
            None => ExchangeOutcome::Rejected {
                status: response.status,
                reason: format!(
                    "2xx without order confirmation: {}",
                    normalize_reason(&response.body, config.max_reason_len)
                ),
            },
        },
        401 => ExchangeOutcome::Unauthorized,
        403 if contains_any(&response.body, &config.block_signatures) => {
            ExchangeOutcome::UpstreamBlocked {
                correlation_id: extract_correlation_id(response),
            }
        }
        400 if contains_any(&response.body, &config.balance_keywords) => {
            ExchangeOutcome::InsufficientBalance {
                reason: normalize_reason(&response.body, config.max_reason_len),
            }
        }
        status => ExchangeOutcome::Rejected {
            status,
            reason: normalize_reason(&response.body, config.max_reason_len),
        },
    }
}
