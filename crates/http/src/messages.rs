//! User-facing error messages.
//!
//! Priority: a message for a known error code, then the server's own message
//! (client errors only; server-side failure text isn't meant for users), then
//! a generic message for the status.

/// Message for a known server error code.
pub fn for_code(code: &str) -> Option<&'static str> {
    Some(match code {
        "INVALID_CREDENTIALS" => "The email or password is incorrect.",
        "USER_NOT_FOUND" => "No account exists for that email.",
        "EMAIL_EXISTS" => "That email is already in use.",
        "VALIDATION_ERROR" => "Please check your input and try again.",
        "TOKEN_EXPIRED" => "Your session has expired. Please sign in again.",
        _ => return None,
    })
}

/// Generic message derived from the status alone.
pub fn for_status(status: u16) -> &'static str {
    match status {
        400 => "The request was invalid. Please check your input.",
        401 => "Please sign in to continue.",
        403 => "You don't have permission to do that.",
        404 => "The requested resource could not be found.",
        409 => "That conflicts with existing data.",
        429 => "Too many requests. Please try again shortly.",
        500..=599 => "The server ran into a problem. Please try again later.",
        _ => "The request could not be processed. Please try again later.",
    }
}

pub fn user_message(status: u16, code: Option<&str>, server_message: Option<&str>) -> String {
    if let Some(message) = code.and_then(for_code) {
        return message.to_string();
    }
    match server_message.map(str::trim) {
        Some(message) if status < 500 && !message.is_empty() => message.to_string(),
        _ => for_status(status).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::known_code(401, Some("INVALID_CREDENTIALS"), Some("bad login"), "The email or password is incorrect.")]
    #[case::server_message(400, Some("UNKNOWN_CODE"), Some("Name is too long"), "Name is too long")]
    #[case::server_message_no_code(404, None, Some("Gathering not found"), "Gathering not found")]
    #[case::hide_server_failures(500, None, Some("NullPointerException"), "The server ran into a problem. Please try again later.")]
    #[case::blank_message(403, None, Some("  "), "You don't have permission to do that.")]
    #[case::status_only(409, None, None, "That conflicts with existing data.")]
    #[case::unknown_status(418, None, None, "The request could not be processed. Please try again later.")]
    fn test_user_message(
        #[case] status: u16,
        #[case] code: Option<&str>,
        #[case] server: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(user_message(status, code, server), expected);
    }
}
