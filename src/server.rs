//! The policy engine: retrieves a domain's SPF record, selects the record to use when
//! more than one qualifying TXT answer exists, and evaluates it against a [`Request`].

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{Name, RData, RecordType};
use tracing::{debug, warn};

use crate::dns::{self, DnsPacket, Resolver};
use crate::error::EvalError;
use crate::macros::MacroString;
use crate::record::Record;
use crate::request::Request;
use crate::result::{SpfDisposition, SpfResult};

/// Tunables from `spec.md`'s external-interface configuration surface, all with the
/// RFC 4408 §10.1-mandated defaults.
#[derive(Clone)]
pub struct ServerConfig {
    pub max_dns_interactive_terms: u32,
    pub max_name_lookups_per_term: u32,
    pub max_name_lookups_per_mx_mech: u32,
    pub max_name_lookups_per_ptr_mech: u32,
    pub default_explanation: MacroString,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_dns_interactive_terms: 10,
            max_name_lookups_per_term: 10,
            max_name_lookups_per_mx_mech: 10,
            max_name_lookups_per_ptr_mech: 10,
            default_explanation: MacroString::parse(
                "Please see http://www.openspf.org/why.html?sender=%{S}&ip=%{I}&receiver=%{R}",
            )
            .expect("default explanation is a valid macro string"),
        }
    }
}

pub struct ServerBuilder {
    resolver: Arc<dyn Resolver>,
    config: ServerConfig,
}

impl ServerBuilder {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self {
            resolver,
            config: ServerConfig::default(),
        }
    }

    pub fn max_dns_interactive_terms(mut self, n: u32) -> Self {
        self.config.max_dns_interactive_terms = n;
        self
    }

    pub fn max_name_lookups_per_term(mut self, n: u32) -> Self {
        self.config.max_name_lookups_per_term = n;
        self
    }

    pub fn max_name_lookups_per_mx_mech(mut self, n: u32) -> Self {
        self.config.max_name_lookups_per_mx_mech = n;
        self
    }

    pub fn max_name_lookups_per_ptr_mech(mut self, n: u32) -> Self {
        self.config.max_name_lookups_per_ptr_mech = n;
        self
    }

    pub fn default_explanation(mut self, spec: &str) -> Result<Self, String> {
        self.config.default_explanation = MacroString::parse(spec)?;
        Ok(self)
    }

    pub fn build(self) -> Server {
        Server {
            resolver: self.resolver,
            config: self.config,
        }
    }
}

/// The SPF policy engine. Holds a shared resolver and the processing-limit
/// configuration; carries no per-request state (that lives in [`crate::request::EvalState`]).
pub struct Server {
    resolver: Arc<dyn Resolver>,
    config: ServerConfig,
}

impl Server {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        ServerBuilder::new(resolver).build()
    }

    pub fn builder(resolver: Arc<dyn Resolver>) -> ServerBuilder {
        ServerBuilder::new(resolver)
    }

    /// Retrieves and evaluates `request.domain()`'s SPF policy, returning exactly one
    /// of the seven RFC 4408 dispositions. This is the only place [`EvalError`] (and a
    /// mechanism's `Err(SpfResult)` short-circuit) is caught; everything downstream
    /// propagates with `?`.
    pub async fn process(&self, request: &Request) -> SpfResult {
        if request.bound_explanation().is_none() {
            request.bind_explanation(self.config.default_explanation.clone());
        }

        let texts = match self.lookup_txt(request.domain()).await {
            Ok(texts) => texts,
            Err(err) => {
                warn!(domain = request.domain(), error = %err, "dns error retrieving SPF record");
                return SpfResult::new(SpfDisposition::TempError, err.to_string());
            }
        };

        let candidates: Vec<&String> = texts.iter().filter(|t| Record::is_spf_record(t)).collect();

        match candidates.len() {
            0 => SpfResult::new(
                SpfDisposition::None,
                format!("no SPF record published for {}", request.domain()),
            ),
            1 => match Record::parse(candidates[0]) {
                Ok(record) => {
                    debug!(domain = request.domain(), "evaluating SPF record");
                    record.evaluate(self, request).await
                }
                Err(err) => SpfResult::new(
                    SpfDisposition::PermError,
                    format!("failed to parse SPF record: {err}"),
                ),
            },
            _ => SpfResult::new(
                SpfDisposition::PermError,
                format!("{} is publishing more than one SPF record", request.domain()),
            ),
        }
    }

    pub(crate) fn count_dns_interactive_term(&self, request: &Request) -> Result<(), SpfResult> {
        request
            .count_dns_interactive_term(self.config.max_dns_interactive_terms)
            .map_err(|err| SpfResult::new(SpfDisposition::PermError, err))
    }

    pub(crate) async fn lookup_txt(&self, domain: &str) -> Result<Vec<String>, EvalError> {
        // RFC 4408 §4.5 originally preferred the dedicated SPF RR type; almost no
        // authoritative server implements it, so a timeout or failure there is
        // treated as "no answer" rather than a processing error, and the TXT lookup
        // carries the result.
        let spf_rr = match self.dns_lookup(domain, RecordType::Unknown(99)).await {
            Ok(packet) => dns::txt_strings(&packet),
            Err(EvalError::DnsTimeout(_)) => Vec::new(),
            Err(_) => Vec::new(),
        };

        let txt_rr = dns::txt_strings(&self.dns_lookup(domain, RecordType::TXT).await?);

        let mut merged = spf_rr;
        for text in txt_rr {
            if !merged.contains(&text) {
                merged.push(text);
            }
        }
        Ok(merged)
    }

    pub(crate) async fn dns_lookup(&self, name: &str, rrtype: RecordType) -> Result<DnsPacket, EvalError> {
        let normalized = dns::normalize_name(name);
        let packet = self.resolver.lookup(&normalized, rrtype).await?;
        if packet.is_success() {
            Ok(packet)
        } else {
            Err(EvalError::DnsError(
                normalized,
                format!("{:?}", packet.header.rcode),
            ))
        }
    }

    pub(crate) async fn resolve_address(
        &self,
        request: &Request,
        domain: &str,
    ) -> Result<Vec<IpAddr>, SpfResult> {
        let mut ips = Vec::new();

        let a = self.dns_lookup(domain, RecordType::A).await.map_err(to_temperror(domain))?;
        for record in &a.answers {
            if let Some(RData::A(A(addr))) = record.data() {
                ips.push(IpAddr::V4(*addr));
            }
        }

        let aaaa = self
            .dns_lookup(domain, RecordType::AAAA)
            .await
            .map_err(to_temperror(domain))?;
        for record in &aaaa.answers {
            if let Some(RData::AAAA(AAAA(addr))) = record.data() {
                ips.push(IpAddr::V6(*addr));
            }
        }

        let _ = request;
        Ok(ips)
    }

    /// Resolves up to `max_name_lookups_per_mx_mech` exchanges, in MX preference order
    /// (lowest priority value first). Per `spec.md` §4.3, exceeding the cap terminates
    /// the mechanism without a match rather than raising an error.
    pub(crate) async fn resolve_mx(&self, request: &Request, domain: &str) -> Result<Vec<String>, SpfResult> {
        let packet = self.dns_lookup(domain, RecordType::MX).await.map_err(to_temperror(domain))?;
        let mut exchanges: Vec<(u16, String)> = packet
            .answers
            .iter()
            .filter_map(|r| match r.data() {
                Some(RData::MX(mx)) => Some((mx.preference(), mx.exchange().to_string())),
                _ => None,
            })
            .collect();
        exchanges.sort_by_key(|(preference, _)| *preference);

        let _ = request;
        Ok(exchanges
            .into_iter()
            .map(|(_, exchange)| exchange)
            .take(self.config.max_name_lookups_per_mx_mech as usize)
            .collect())
    }

    /// RFC 4408 §10.2's validated-PTR procedure: resolve PTR names for the client IP,
    /// keep only those whose forward A/AAAA lookup maps back to the client IP, capped
    /// at `max_name_lookups_per_ptr_mech`.
    pub(crate) async fn resolve_validated_ptr_names(&self, request: &Request) -> Result<Vec<Name>, SpfResult> {
        let ptr_query = crate::ip::reverse_dns_name(request.client_ip());
        let packet = self
            .dns_lookup(&ptr_query, RecordType::PTR)
            .await
            .map_err(to_temperror(&ptr_query))?;

        let candidates: Vec<String> = packet
            .answers
            .iter()
            .filter_map(|r| match r.data() {
                Some(RData::PTR(name)) => Some(name.0.to_string()),
                _ => None,
            })
            .take(self.config.max_name_lookups_per_ptr_mech as usize)
            .collect();

        let mut validated = Vec::new();
        for candidate in candidates {
            let ips = self.resolve_address(request, &candidate).await?;
            if ips.contains(&request.client_ip()) {
                if let Ok(name) = Name::from_str(&candidate) {
                    validated.push(name);
                }
            }
        }
        Ok(validated)
    }
}

fn to_temperror(domain: &str) -> impl Fn(EvalError) -> SpfResult + '_ {
    move |err| SpfResult::new(SpfDisposition::TempError, format!("error resolving {domain}: {err}"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_rfc_limits() {
        let config = ServerConfig::default();
        assert_eq!(config.max_dns_interactive_terms, 10);
        assert_eq!(config.max_name_lookups_per_mx_mech, 10);
        assert_eq!(config.max_name_lookups_per_ptr_mech, 10);
    }
}
