//! Request classification for the page cache.

use axum::http::{HeaderMap, header};

use super::controller::RequestClass;

const DEFAULT_ADMIN_PATH_PREFIX: &str = "/admin";
const DEFAULT_SESSION_COOKIE_PREFIX: &str = "session";

/// Decides whether a request is administrative, authenticated or public.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeRules {
    pub admin_path_prefixes: Vec<String>,
    pub session_cookie_prefixes: Vec<String>,
}

impl Default for PrivilegeRules {
    fn default() -> Self {
        Self {
            admin_path_prefixes: vec![DEFAULT_ADMIN_PATH_PREFIX.to_string()],
            session_cookie_prefixes: vec![DEFAULT_SESSION_COOKIE_PREFIX.to_string()],
        }
    }
}

impl PrivilegeRules {
    pub fn classify(&self, path: &str, headers: &HeaderMap) -> RequestClass {
        if self
            .admin_path_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return RequestClass::Administrative;
        }

        if headers.contains_key(header::AUTHORIZATION) || self.has_session_cookie(headers) {
            return RequestClass::Session;
        }

        RequestClass::Public
    }

    fn has_session_cookie(&self, headers: &HeaderMap) -> bool {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.split_once('=').map(|(name, _)| name.trim()))
            .any(|name| {
                self.session_cookie_prefixes
                    .iter()
                    .any(|prefix| name.starts_with(prefix.as_str()))
            })
    }
}
