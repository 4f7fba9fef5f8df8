//! The DNS resolver collaborator contract.
//!
//! `spec.md` §6 describes the resolver as a single operation,
//! `send(name, rrtype) -> packet | error`, with `packet.header.rcode` exposed and a
//! distinguishable timeout error. We express that directly with `hickory-proto`'s wire
//! types so mechanism code can use its typed rdata accessors instead of re-parsing text.

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{Record, RecordType};
use thiserror::Error;

/// A successful DNS answer: the response code and the answer records. `NOERROR` and
/// `NXDOMAIN` both reach here as a successful packet — `spec.md` §4.1 treats `NXDOMAIN`
/// as an empty answer, not an error.
#[derive(Debug, Clone)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub answers: Vec<Record>,
}

#[derive(Debug, Clone, Copy)]
pub struct DnsHeader {
    pub rcode: ResponseCode,
}

impl DnsPacket {
    pub fn empty() -> Self {
        Self {
            header: DnsHeader {
                rcode: ResponseCode::NXDomain,
            },
            answers: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.header.rcode, ResponseCode::NoError | ResponseCode::NXDomain)
    }
}

/// Errors the resolver collaborator may report. `Timeout` is distinguished from other
/// failures because `Server::process` silently treats a timed-out `SPF`-type query as
/// empty (many resolvers are broken on that RR type) while other DNS errors become
/// `temperror`.
#[derive(Debug, Error, Clone)]
pub enum DnsError {
    #[error("dns lookup for {0} timed out")]
    Timeout(String),

    #[error("dns lookup for {0} failed: {1}")]
    Failed(String, String),
}

/// A single `lookup(name, rrtype) -> packet | error` operation, implemented by whatever
/// resolver the host application wires in. The engine never caches or retries on its
/// own behalf — that is the resolver's job, per `spec.md` §1's "DNS cache policy ...
/// is assumed to be a collaborator".
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup(&self, name: &str, rrtype: RecordType) -> Result<DnsPacket, DnsError>;
}

/// Lower-cases `name`, strips a trailing dot, and truncates leading labels while the
/// remainder exceeds 253 bytes, per `spec.md` §4.1's `dnsLookup` normalization step.
pub(crate) fn normalize_name(name: &str) -> String {
    let mut s = name.to_ascii_lowercase();
    if s.ends_with('.') {
        s.pop();
    }
    while s.len() > 253 {
        match s.split_once('.') {
            Some((_, rest)) => s = rest.to_string(),
            None => break,
        }
    }
    s
}

/// Extracts the concatenated text of each TXT/SPF character-string answer, per
/// `spec.md` §6: "A record is one or more character-strings which are concatenated
/// (without added separators) to form the policy text."
pub(crate) fn txt_strings(packet: &DnsPacket) -> Vec<String> {
    use hickory_proto::rr::RData;

    packet
        .answers
        .iter()
        .filter_map(|r| match r.data() {
            Some(RData::TXT(txt)) => Some(
                txt.iter()
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                    .collect::<String>(),
            ),
            _ => None,
        })
        .collect()
}

#[cfg(feature = "live-dns")]
pub mod live {
    //! A `Resolver` backed by a real `hickory-resolver` async DNS client, for
    //! applications that want to talk to the internet rather than a test fixture.

    use super::*;
    use hickory_resolver::config::{ResolverConfig, ResolverOpts};
    use hickory_resolver::error::ResolveErrorKind;
    use hickory_resolver::TokioAsyncResolver;

    pub struct HickoryResolver {
        inner: TokioAsyncResolver,
    }

    impl HickoryResolver {
        pub fn new() -> Result<Self, DnsError> {
            Ok(Self {
                inner: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
            })
        }

        pub fn with_inner(inner: TokioAsyncResolver) -> Self {
            Self { inner }
        }
    }

    #[async_trait]
    impl Resolver for HickoryResolver {
        async fn lookup(&self, name: &str, rrtype: RecordType) -> Result<DnsPacket, DnsError> {
            match self.inner.lookup(name, rrtype).await {
                Ok(lookup) => Ok(DnsPacket {
                    header: DnsHeader {
                        rcode: ResponseCode::NoError,
                    },
                    answers: lookup.record_iter().cloned().collect(),
                }),
                Err(err) => match err.kind() {
                    ResolveErrorKind::NoRecordsFound { .. } => Ok(DnsPacket::empty()),
                    ResolveErrorKind::Timeout => Err(DnsError::Timeout(name.to_owned())),
                    other => Err(DnsError::Failed(name.to_owned(), other.to_string())),
                },
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalizes_case_and_trailing_dot() {
        assert_eq!(normalize_name("Example.COM."), "example.com");
    }

    #[test]
    fn truncates_overlong_names() {
        let label = "a".repeat(60);
        let long = format!("{label}.{label}.{label}.{label}.{label}.com");
        assert!(long.len() > 253);
        let normalized = normalize_name(&long);
        assert!(normalized.len() <= 253);
        assert!(long.ends_with(&normalized));
    }
}
