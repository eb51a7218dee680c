//! Session expiry hooks.
//!
//! When a request outside the sign-in/sign-up endpoints comes back 401, the
//! client clears the token store and then calls out to the host: the
//! [`SessionHandler`] drops whatever session-derived state the host keeps, and
//! the [`Navigator`] sends the user to the sign-in screen.

use async_trait::async_trait;
use std::fmt::Write;

/// Paths whose 401 responses mean "wrong credentials", not "session expired".
const AUTH_ENDPOINTS: [&str; 2] = ["/auths/signin", "/auths/signup"];

pub const SIGN_IN_PATH: &str = "/signin";

/// Host-side teardown of session-derived state.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    async fn session_expired(&self);
}

/// Host navigation, if there is any.
pub trait Navigator: Send + Sync {
    /// Current location as path, query and fragment, or `None` when there is
    /// nothing to navigate (headless hosts).
    fn current_location(&self) -> Option<String>;

    /// Replace the current location without adding a history entry.
    fn replace(&self, location: &str);
}

pub(crate) fn is_auth_endpoint(path: &str) -> bool {
    AUTH_ENDPOINTS.iter().any(|endpoint| path.contains(endpoint))
}

/// Sign-in location that returns to `location` afterwards.
///
/// ```
/// use moim_http::session::sign_in_redirect;
///
/// assert_eq!(sign_in_redirect("/my?tab=1#top"), "/signin?redirect=%2Fmy%3Ftab%3D1%23top");
/// ```
pub fn sign_in_redirect(location: &str) -> String {
    format!("{SIGN_IN_PATH}?redirect={}", encode_uri_component(location))
}

/// Percent-encode everything except `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
pub fn encode_uri_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')' => {
                out.push(b as char);
            },
            _ => {
                let _ = write!(out, "%{b:02X}");
            },
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/auths/signin", true)]
    #[case("/auths/signup", true)]
    #[case("/auths/signout", false)]
    #[case("/auths/user", false)]
    #[case("/gatherings/joined", false)]
    fn test_auth_endpoints(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(is_auth_endpoint(path), expected);
    }

    #[rstest]
    #[case("abc", "abc")]
    #[case("a b", "a%20b")]
    #[case("!~*'()", "!~*'()")]
    #[case("/?&=#+", "%2F%3F%26%3D%23%2B")]
    #[case("모임", "%EB%AA%A8%EC%9E%84")]
    fn test_encode_uri_component(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(encode_uri_component(input), expected);
    }
}
