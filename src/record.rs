//! A parsed `v=spf1` record: an ordered list of qualified mechanisms plus at most one
//! `redirect` and one `exp` modifier.

use std::fmt;

use crate::macros::MacroString;
use crate::mechanism::Mechanism;
use crate::modifier::Modifier;
use crate::request::Request;
use crate::result::{SpfDisposition, SpfResult};
use crate::server::Server;

const VERSION_TAG: &str = "v=spf1";

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Qualifier {
    #[default]
    Pass,
    Fail,
    SoftFail,
    Neutral,
}

impl Qualifier {
    fn parse(c: char) -> Option<Self> {
        Some(match c {
            '+' => Self::Pass,
            '-' => Self::Fail,
            '~' => Self::SoftFail,
            '?' => Self::Neutral,
            _ => return None,
        })
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "+",
            Self::Fail => "-",
            Self::SoftFail => "~",
            Self::Neutral => "?",
        }
    }
}

#[derive(Debug)]
struct Directive {
    qualifier: Qualifier,
    mechanism: Mechanism,
}

impl Directive {
    fn parse(s: &str) -> Result<Self, String> {
        let mut qualifier = Qualifier::default();
        let s = match Qualifier::parse(s.chars().next().ok_or("empty directive")?) {
            Some(q) => {
                qualifier = q;
                &s[1..]
            }
            None => s,
        };
        Ok(Self {
            qualifier,
            mechanism: Mechanism::parse(s)?,
        })
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.qualifier != Qualifier::Pass {
            write!(f, "{}", self.qualifier.as_str())?;
        }
        write!(f, "{}", self.mechanism)
    }
}

/// `spec.md`'s "record" component: version tag (implicit — only `v=spf1` is
/// recognized, per the reference implementation), ordered mechanisms, and the two
/// significant modifiers.
#[derive(Debug, Default)]
pub(crate) struct Record {
    directives: Vec<Directive>,
    redirect: Option<MacroString>,
    explanation: Option<MacroString>,
}

impl Record {
    /// Whether `txt` looks like an SPF policy record at all (used to pick candidate
    /// TXT answers out of a domain's unrelated TXT records before parsing).
    pub(crate) fn is_spf_record(txt: &str) -> bool {
        txt == VERSION_TAG || txt.starts_with("v=spf1 ")
    }

    pub(crate) fn parse(s: &str) -> Result<Self, String> {
        let mut tokens = s.split(' ').filter(|t| !t.is_empty());
        let version = tokens.next().ok_or_else(|| format!("expected version in {s}"))?;
        if version != "v=spf1" {
            return Err(format!("expected SPF version 1 in {s}"));
        }

        let mut record = Self::default();
        for t in tokens {
            if let Ok(directive) = Directive::parse(t) {
                record.directives.push(directive);
                continue;
            }

            if let Ok(modifier) = Modifier::parse(t) {
                match modifier {
                    Modifier::Redirect(spec) => match record.redirect {
                        Some(_) => return Err("duplicate redirect modifier".to_owned()),
                        None => record.redirect = Some(spec),
                    },
                    Modifier::Explanation(spec) => match record.explanation {
                        Some(_) => return Err("duplicate exp modifier".to_owned()),
                        None => record.explanation = Some(spec),
                    },
                    // "Unrecognized modifiers MUST be ignored"
                    Modifier::Unknown => {}
                }
                continue;
            }

            return Err(format!("invalid token '{t}'"));
        }

        Ok(record)
    }

    /// Walks directives in declaration order, returning the first match; falls back
    /// to `redirect`, then the default `Neutral` result, per RFC 4408 §4.6/§6.1.
    ///
    /// This record's own `exp=` modifier, if it resolves, is bound to the request
    /// *before* the directive walk: a `fail` match anywhere in this record, or in a
    /// `redirect` target reached from it, captures whichever explanation is
    /// currently bound (RFC 4408 §6.2) rather than one computed after the fact.
    pub(crate) async fn evaluate(&self, server: &Server, request: &Request) -> SpfResult {
        self.resolve_own_explanation(server, request).await;

        for directive in &self.directives {
            match directive.mechanism.matches(server, request).await {
                Ok(true) => {
                    let disposition = SpfDisposition::from(directive.qualifier);
                    let context = format!("matched '{directive}' directive");
                    if disposition == SpfDisposition::Fail {
                        let context = self.bound_explanation_text(server, request, context).await;
                        return SpfResult::new(disposition, context);
                    }
                    return SpfResult::new(disposition, context);
                }
                Ok(false) => continue,
                Err(result) => return result,
            }
        }

        if let Some(redirect) = &self.redirect {
            if let Err(result) = server.count_dns_interactive_term(request) {
                return result;
            }
            let domain = match request.domain_for_spec(server, Some(redirect)).await {
                Ok(domain) => domain,
                Err(result) => return result,
            };
            let nested = request.with_domain(domain);
            let result = Box::pin(server.process(&nested)).await;
            return match result.disposition {
                // RFC 4408 §6.1: a "none" result composed via redirect becomes permerror.
                SpfDisposition::None => SpfResult::new(
                    SpfDisposition::PermError,
                    format!("redirect target has no SPF record: {}", result.context),
                ),
                _ => result,
            };
        }

        SpfResult::new(SpfDisposition::Neutral, "default result (no directive matched)")
    }

    /// Resolves this record's `exp=` target (if any) and rebinds the request's
    /// explanation to it. Any failure — DNS error, wrong answer count, malformed
    /// macro string — is silently ignored per RFC 4408 §6.2: the previously bound
    /// explanation (an ancestor's `exp=`, or the server's default) stays in force.
    async fn resolve_own_explanation(&self, server: &Server, request: &Request) {
        let Some(exp) = &self.explanation else {
            return;
        };

        let Ok(domain) = request.domain_for_spec(server, Some(exp)).await else {
            return;
        };

        let Ok(texts) = server.lookup_txt(&domain).await else {
            return;
        };
        if texts.len() != 1 {
            return;
        }

        if let Ok(spec) = MacroString::parse(&texts[0]) {
            request.bind_explanation(spec);
        }
    }

    /// Expands the currently bound explanation for a `fail` match, falling back to
    /// `context` (a terse description of which directive matched) if nothing is
    /// bound or expansion fails.
    async fn bound_explanation_text(&self, server: &Server, request: &Request, context: String) -> String {
        match request.bound_explanation() {
            Some(spec) => request.expand(server, &spec, true).await.unwrap_or(context),
            None => context,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{VERSION_TAG}")?;
        for directive in &self.directives {
            write!(f, " {directive}")?;
        }
        if let Some(redirect) = &self.redirect {
            write!(f, " redirect={redirect}")?;
        }
        if let Some(exp) = &self.explanation {
            write!(f, " exp={exp}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_non_spf1_version() {
        assert!(Record::parse("v=spf2.0").is_err());
    }

    #[test]
    fn parses_mechanisms_and_modifiers() {
        let record = Record::parse("v=spf1 a mx -all").unwrap();
        assert_eq!(record.directives.len(), 3);
        assert!(record.redirect.is_none());
    }

    #[test]
    fn rejects_duplicate_redirect() {
        let err = Record::parse("v=spf1 redirect=_spf.a.com redirect=_spf.b.com").unwrap_err();
        assert!(err.contains("duplicate redirect"));
    }

    #[test]
    fn round_trips_through_display() {
        let record = Record::parse("v=spf1 +a -all").unwrap();
        assert_eq!(record.to_string(), "v=spf1 a -all");
    }

    #[test]
    fn unknown_modifier_is_ignored() {
        assert!(Record::parse("v=spf1 all op=1").is_ok());
    }

    #[test]
    fn is_spf_record_detection() {
        assert!(Record::is_spf_record("v=spf1 -all"));
        assert!(Record::is_spf_record("v=spf1"));
        assert!(!Record::is_spf_record("v=DKIM1; k=rsa"));
    }
}
