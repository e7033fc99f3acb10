//! ============================================================================
//! Routes - Navigation surface of the verification flow
//! ============================================================================
//! - /verify/{id} opens the form for a request ID
//! - /thank-you is the acknowledgement after a confirmed delivery
//! - anything else redirects to the form for the default request ID
//! ============================================================================

use std::fmt;

use tracing::debug;

pub const VERIFY_PREFIX: &str = "/verify/";
pub const THANK_YOU_PATH: &str = "/thank-you";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Verification form keyed by request ID
    Verify(String),
    /// Terminal acknowledgement after a confirmed delivery
    ThankYou,
}

impl Route {
    /// Resolve a path. Unknown paths (including `/`) redirect to the form
    /// for `default_request_id`.
    pub fn resolve(path: &str, default_request_id: &str) -> Route {
        let path = path.trim();
        let path = path.split(['?', '#']).next().unwrap_or_default();

        if path.trim_end_matches('/') == THANK_YOU_PATH {
            return Route::ThankYou;
        }

        if let Some(rest) = path.strip_prefix(VERIFY_PREFIX) {
            let request_id = rest.trim_end_matches('/').trim();
            if !request_id.is_empty() && !request_id.contains('/') {
                return Route::Verify(request_id.to_string());
            }
        }

        debug!("Redirecting '{}' to {}{}", path, VERIFY_PREFIX, default_request_id);
        Route::Verify(default_request_id.to_string())
    }

    pub fn path(&self) -> String {
        match self {
            Route::Verify(id) => format!("{}{}", VERIFY_PREFIX, id),
            Route::ThankYou => THANK_YOU_PATH.to_string(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
