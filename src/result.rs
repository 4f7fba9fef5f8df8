//! The public outcome of an SPF check.

use std::fmt;

use crate::record::Qualifier;

/// The seven dispositions defined by RFC 4408 §2.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpfDisposition {
    /// No syntactically valid domain could be extracted, or no SPF record was
    /// published for the authority domain.
    None,

    /// The ADMD has explicitly declined to assert whether the client IP is authorized.
    Neutral,

    /// An explicit statement that the client is authorized to use the identity.
    Pass,

    /// An explicit statement that the client is not authorized to use the identity.
    Fail,

    /// A weak statement that the client is probably not authorized; the ADMD has not
    /// published a stronger policy leading to `Fail`.
    SoftFail,

    /// The verifier hit a transient (generally DNS) error. A retry may succeed
    /// without operator intervention.
    TempError,

    /// The domain's published records could not be correctly interpreted; this
    /// requires DNS operator intervention to resolve.
    PermError,
}

impl SpfDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Neutral => "neutral",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::SoftFail => "softfail",
            Self::TempError => "temperror",
            Self::PermError => "permerror",
        }
    }
}

impl fmt::Display for SpfDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Qualifier> for SpfDisposition {
    fn from(qualifier: Qualifier) -> Self {
        match qualifier {
            Qualifier::Pass => Self::Pass,
            Qualifier::Fail => Self::Fail,
            Qualifier::SoftFail => Self::SoftFail,
            Qualifier::Neutral => Self::Neutral,
        }
    }
}

/// The outcome of [`crate::Server::process`]: a disposition plus free-text context.
/// For `Fail`, `context` is the macro-expanded `exp` explanation (or the default
/// explanation) per RFC 4408 §6.2; for every other disposition it is diagnostic text
/// only (the matching mechanism, a DNS error detail, a parse failure) and is not part
/// of the wire-visible result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpfResult {
    pub disposition: SpfDisposition,
    pub context: String,
}

impl SpfResult {
    pub(crate) fn new(disposition: SpfDisposition, context: impl Into<String>) -> Self {
        Self {
            disposition,
            context: context.into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn disposition_strings() {
        assert_eq!(SpfDisposition::SoftFail.as_str(), "softfail");
        assert_eq!(SpfDisposition::PermError.to_string(), "permerror");
    }
}
