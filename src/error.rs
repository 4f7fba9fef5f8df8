//! Internal error taxonomy.
//!
//! [`crate::Server::process`] is the only place that catches these: every `EvalError`
//! that reaches it originates from a DNS lookup, so it always folds into `TempError`.
//! Syntax errors, processing-limit overruns and include/redirect loops are raised
//! directly as `SpfResult { PermError, .. }` at their point of origin (`mechanism.rs`,
//! `record.rs`, `server.rs::count_dns_interactive_term`) rather than through this type.

use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum EvalError {
    #[error("dns lookup for {0} timed out")]
    DnsTimeout(String),

    #[error("dns error resolving {0}: {1}")]
    DnsError(String, String),
}

impl From<crate::dns::DnsError> for EvalError {
    fn from(err: crate::dns::DnsError) -> Self {
        match err {
            crate::dns::DnsError::Timeout(name) => EvalError::DnsTimeout(name),
            crate::dns::DnsError::Failed(name, detail) => EvalError::DnsError(name, detail),
        }
    }
}
