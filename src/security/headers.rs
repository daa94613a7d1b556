//! Client identity from request headers.
//!
//! # Responsibilities
//! - Derive the identifier that buckets rate-limit state
//!
//! # Design Decisions
//! - Priority: first `X-Forwarded-For` entry, then `X-Real-IP`, then `CF-Connecting-IP`
//! - Anything unidentifiable maps to the literal `"unknown"` and is limited like any
//!   other key, so stripping headers cannot bypass limits. All such clients share one
//!   bucket; that is a known limitation.

use axum::http::HeaderMap;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";
pub const CF_CONNECTING_IP: &str = "cf-connecting-ip";

/// Key used for clients with no usable address.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Extract the client identifier from request headers.
pub fn client_identifier(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header(X_FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }

    header(X_REAL_IP)
        .or_else(|| header(CF_CONNECTING_IP))
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

/// Normalize an identifier handed to a limiter directly.
pub fn normalize_identifier(identifier: &str) -> &str {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        UNKNOWN_CLIENT
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_forwarded_for_first_entry_wins() {
        let h = headers(&[
            (X_FORWARDED_FOR, " 203.0.113.7 , 10.0.0.1"),
            (X_REAL_IP, "198.51.100.2"),
        ]);
        assert_eq!(client_identifier(&h), "203.0.113.7");
    }

    #[test]
    fn test_fallback_order() {
        let h = headers(&[(X_REAL_IP, "198.51.100.2"), (CF_CONNECTING_IP, "192.0.2.9")]);
        assert_eq!(client_identifier(&h), "198.51.100.2");

        let h = headers(&[(CF_CONNECTING_IP, "192.0.2.9")]);
        assert_eq!(client_identifier(&h), "192.0.2.9");
    }

    #[test]
    fn test_empty_forwarded_for_falls_through() {
        let h = headers(&[(X_FORWARDED_FOR, " , 10.0.0.1"), (X_REAL_IP, "198.51.100.2")]);
        assert_eq!(client_identifier(&h), "198.51.100.2");
    }

    #[test]
    fn test_no_headers_is_unknown() {
        assert_eq!(client_identifier(&HeaderMap::new()), UNKNOWN_CLIENT);
        assert_eq!(normalize_identifier("   "), UNKNOWN_CLIENT);
        assert_eq!(normalize_identifier(" 1.2.3.4 "), "1.2.3.4");
    }
}
