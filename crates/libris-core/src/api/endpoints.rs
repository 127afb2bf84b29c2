//! Public/protected endpoint classification.
//!
//! Public endpoints never receive a bearer token. Protected override segments
//! win over the public allow-list, so a broad public prefix can never expose
//! user-scoped or admin data.

use reqwest::Method;

/// Reachable without credentials for any method
const PUBLIC_PATHS: &[&str] = &[
    "/login",
    "/register",
    "/refresh",
    "/verify-email",
    "/resend-verification",
    "/request-password-reset",
    "/reset-password",
];

/// Anonymous catalog reads: listings and details, GET only
const PUBLIC_READ_PATHS: &[&str] = &["/books", "/authors"];

/// Any path containing one of these segments is protected
const PROTECTED_SEGMENTS: &[&str] = &[
    "me",
    "my",
    "user",
    "users",
    "collection",
    "collections",
    "admin",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Public,
    Protected,
}

impl EndpointKind {
    pub fn classify(method: &Method, path: &str) -> Self {
        let path = normalize(path);

        if path
            .split('/')
            .any(|segment| PROTECTED_SEGMENTS.iter().any(|p| segment.eq_ignore_ascii_case(p)))
        {
            return EndpointKind::Protected;
        }

        let public = PUBLIC_PATHS.iter().any(|prefix| matches_prefix(path, prefix))
            || (*method == Method::GET
                && PUBLIC_READ_PATHS.iter().any(|prefix| matches_prefix(path, prefix)));

        if public {
            EndpointKind::Public
        } else {
            EndpointKind::Protected
        }
    }

    pub fn is_protected(self) -> bool {
        self == EndpointKind::Protected
    }
}

/// Strip the query string, trailing slashes and an optional `/api` mount.
fn normalize(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let path = match path.strip_prefix("/api") {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    };
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// `prefix` matches on a segment boundary: `/books` matches `/books/12` but
/// not `/bookshelf`.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
