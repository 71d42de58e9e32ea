//! User-Agent strings for outbound requests.
//!
//! Several upstreams (SEC EDGAR among them) reject anonymous traffic, so every
//! session identifies itself. The built-in default carries a placeholder
//! contact address; operators are expected to replace it, and a placeholder
//! in use is reported once per process.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

/// Domain marking a contact address as not yet configured.
const PLACEHOLDER_DOMAIN: &str = "example.com";

static PLACEHOLDER_WARNED: AtomicBool = AtomicBool::new(false);

/// Default User-Agent (identifies the tool with a placeholder contact).
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("newswatch/{version} (contact: ops@{PLACEHOLDER_DOMAIN})")
}

/// Returns true when `user_agent` still carries a placeholder contact.
#[must_use]
pub fn is_placeholder(user_agent: &str) -> bool {
    user_agent.trim().is_empty() || user_agent.to_lowercase().contains(PLACEHOLDER_DOMAIN)
}

/// Logs a warning the first time a placeholder User-Agent is used in this
/// process. Returns whether this call emitted the warning.
pub fn warn_if_placeholder(user_agent: &str) -> bool {
    if !is_placeholder(user_agent) {
        return false;
    }
    if PLACEHOLDER_WARNED.swap(true, Ordering::SeqCst) {
        return false;
    }
    warn!(
        user_agent,
        "User-Agent contains a placeholder contact; set a real one with --user-agent or <PREFIX>_USER_AGENT"
    );
    true
}
