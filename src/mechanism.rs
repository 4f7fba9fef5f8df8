//! The eight mechanisms of RFC 4408 §4.6.3, plus the `ptr`-validation routine shared
//! with the `%{p}` macro letter.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use hickory_proto::rr::Name;

use crate::ip::{self, DualCidrLen};
use crate::macros::MacroString;
use crate::request::Request;
use crate::result::{SpfDisposition, SpfResult};
use crate::server::Server;

fn starts_with_ident<'a>(s: &'a str, ident: &str) -> Option<&'a str> {
    if s.len() < ident.len() {
        return None;
    }
    if s[0..ident.len()].eq_ignore_ascii_case(ident) {
        Some(&s[ident.len()..])
    } else {
        None
    }
}

impl DualCidrLen {
    fn parse_from_end(s: &str) -> Result<(&str, Self), String> {
        match s.rsplit_once('/') {
            Some((left, right)) => {
                let right_cidr: u8 = right
                    .parse()
                    .map_err(|err| format!("invalid dual-cidr-length in {s}: {err}"))?;

                if let Some(stripped) = left.strip_suffix('/') {
                    if let Some((prefix, v4cidr)) = stripped.rsplit_once('/') {
                        let left_cidr: u8 = v4cidr.parse().map_err(|err| {
                            format!("invalid dual-cidr-length in {s}: v4 portion: {err}")
                        })?;
                        return Ok((
                            prefix,
                            Self {
                                v4: left_cidr,
                                v6: right_cidr,
                            },
                        ));
                    }
                }
                Ok((
                    left,
                    Self {
                        v4: right_cidr,
                        ..Self::default()
                    },
                ))
            }
            None => Ok((s, Self::default())),
        }
    }
}

impl fmt::Display for DualCidrLen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.v4 == 32 && self.v6 == 128 {
            return Ok(());
        }
        write!(f, "/{}", self.v4)?;
        if self.v6 != 128 {
            write!(f, "/{}", self.v6)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) enum Mechanism {
    All,
    Include { domain: MacroString },
    A { domain: Option<MacroString>, cidr_len: DualCidrLen },
    Mx { domain: Option<MacroString>, cidr_len: DualCidrLen },
    Ptr { domain: Option<MacroString> },
    Ip4 { network: Ipv4Addr, cidr_len: u8 },
    Ip6 { network: Ipv6Addr, cidr_len: u8 },
    Exists { domain: MacroString },
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Include { domain } => write!(f, "include:{domain}"),
            Self::A { domain, cidr_len } => {
                write!(f, "a")?;
                if let Some(domain) = domain {
                    write!(f, ":{domain}")?;
                }
                write!(f, "{cidr_len}")
            }
            Self::Mx { domain, cidr_len } => {
                write!(f, "mx")?;
                if let Some(domain) = domain {
                    write!(f, ":{domain}")?;
                }
                write!(f, "{cidr_len}")
            }
            Self::Ptr { domain } => {
                write!(f, "ptr")?;
                if let Some(domain) = domain {
                    write!(f, ":{domain}")?;
                }
                Ok(())
            }
            Self::Ip4 { network, cidr_len } => write!(f, "ip4:{network}/{cidr_len}"),
            Self::Ip6 { network, cidr_len } => write!(f, "ip6:{network}/{cidr_len}"),
            Self::Exists { domain } => write!(f, "exists:{domain}"),
        }
    }
}

impl Mechanism {
    pub(crate) fn parse(s: &str) -> Result<Self, String> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }

        if let Some(spec) = starts_with_ident(s, "include:") {
            return Ok(Self::Include {
                domain: MacroString::parse(spec)?,
            });
        }

        if let Some(remain) = starts_with_ident(s, "a") {
            let (remain, cidr_len) = DualCidrLen::parse_from_end(remain)?;
            let domain = parse_optional_domain(s, remain, "a")?;
            return Ok(Self::A { domain, cidr_len });
        }

        if let Some(remain) = starts_with_ident(s, "mx") {
            let (remain, cidr_len) = DualCidrLen::parse_from_end(remain)?;
            let domain = parse_optional_domain(s, remain, "mx")?;
            return Ok(Self::Mx { domain, cidr_len });
        }

        if let Some(remain) = starts_with_ident(s, "ptr") {
            let domain = parse_optional_domain(s, remain, "ptr")?;
            return Ok(Self::Ptr { domain });
        }

        if let Some(remain) = starts_with_ident(s, "ip4:") {
            let (addr, len) = remain
                .split_once('/')
                .ok_or_else(|| format!("invalid 'ip4' mechanism: {s}"))?;
            let network = addr
                .parse()
                .map_err(|err| format!("invalid 'ip4' mechanism: {s}: {err}"))?;
            let cidr_len = len
                .parse()
                .map_err(|err| format!("invalid 'ip4' mechanism: {s}: {err}"))?;
            return Ok(Self::Ip4 { network, cidr_len });
        }

        if let Some(remain) = starts_with_ident(s, "ip6:") {
            let (addr, len) = remain
                .split_once('/')
                .ok_or_else(|| format!("invalid 'ip6' mechanism: {s}"))?;
            let network = addr
                .parse()
                .map_err(|err| format!("invalid 'ip6' mechanism: {s}: {err}"))?;
            let cidr_len = len
                .parse()
                .map_err(|err| format!("invalid 'ip6' mechanism: {s}: {err}"))?;
            return Ok(Self::Ip6 { network, cidr_len });
        }

        if let Some(spec) = starts_with_ident(s, "exists:") {
            return Ok(Self::Exists {
                domain: MacroString::parse(spec)?,
            });
        }

        Err(format!("invalid mechanism '{s}'"))
    }

    /// Evaluates this mechanism against `request`, returning whether it matches.
    /// DNS-interactive mechanisms (everything but `all`/`ip4`/`ip6`) first consult
    /// `server`'s processing-limit counters via `request`.
    pub(crate) async fn matches(
        &self,
        server: &Server,
        request: &Request,
    ) -> Result<bool, SpfResult> {
        match self {
            Self::All => Ok(true),

            Self::Ip4 { network, cidr_len } => Ok(ip::prefix_contains(
                IpAddr::V4(*network),
                *cidr_len,
                request.client_ip(),
            )),

            Self::Ip6 { network, cidr_len } => Ok(ip::prefix_contains(
                IpAddr::V6(*network),
                *cidr_len,
                request.client_ip(),
            )),

            Self::A { domain, cidr_len } => {
                server.count_dns_interactive_term(request)?;
                let domain = request.domain_for_spec(server, domain.as_ref()).await?;
                let ips = server.resolve_address(request, &domain).await?;
                Ok(ips
                    .into_iter()
                    .any(|addr| matches_dual(*cidr_len, request.client_ip(), addr)))
            }

            Self::Mx { domain, cidr_len } => {
                server.count_dns_interactive_term(request)?;
                let domain = request.domain_for_spec(server, domain.as_ref()).await?;
                let exchanges = server.resolve_mx(request, &domain).await?;
                for exchange in exchanges {
                    let ips = server.resolve_address(request, &exchange).await?;
                    if ips
                        .into_iter()
                        .any(|addr| matches_dual(*cidr_len, request.client_ip(), addr))
                    {
                        return Ok(true);
                    }
                }
                Ok(false)
            }

            Self::Ptr { domain } => {
                server.count_dns_interactive_term(request)?;
                let domain = request.domain_for_spec(server, domain.as_ref()).await?;
                let zone = Name::from_str(&format!("{domain}.")).map_err(|err| SpfResult {
                    disposition: SpfDisposition::PermError,
                    context: format!("invalid domain for ptr mechanism: {err}"),
                })?;
                let names = server.resolve_validated_ptr_names(request).await?;
                Ok(names.iter().any(|name| zone_contains(&zone, name)))
            }

            Self::Exists { domain } => {
                server.count_dns_interactive_term(request)?;
                let domain = request.domain_for_spec(server, Some(domain)).await?;
                let ips = server.resolve_address(request, &domain).await?;
                Ok(ips.iter().any(|ip| ip.is_ipv4()))
            }

            Self::Include { domain } => {
                server.count_dns_interactive_term(request)?;
                let domain = request.domain_for_spec(server, Some(domain)).await?;
                if !request.enter_domain(&domain) {
                    return Err(SpfResult {
                        disposition: SpfDisposition::PermError,
                        context: format!("include loop detected at {domain}"),
                    });
                }
                let sub = request.with_domain(domain.clone());
                let result = Box::pin(server.process(&sub)).await;
                match result.disposition {
                    SpfDisposition::Pass => Ok(true),
                    SpfDisposition::Fail | SpfDisposition::SoftFail | SpfDisposition::Neutral => {
                        Ok(false)
                    }
                    SpfDisposition::TempError => Err(SpfResult {
                        disposition: SpfDisposition::TempError,
                        context: format!(
                            "temperror while evaluating include:{domain}: {}",
                            result.context
                        ),
                    }),
                    disp @ (SpfDisposition::PermError | SpfDisposition::None) => Err(SpfResult {
                        disposition: SpfDisposition::PermError,
                        context: format!(
                            "{disp} while evaluating include:{domain}: {}",
                            result.context
                        ),
                    }),
                }
            }
        }
    }
}

fn parse_optional_domain(full: &str, remain: &str, name: &str) -> Result<Option<MacroString>, String> {
    if let Some(spec) = remain.strip_prefix(':') {
        Ok(Some(MacroString::parse(spec)?))
    } else if remain.is_empty() {
        Ok(None)
    } else {
        Err(format!("invalid '{name}' mechanism: {full}"))
    }
}

fn matches_dual(cidr_len: DualCidrLen, observed: IpAddr, specified: IpAddr) -> bool {
    match specified {
        IpAddr::V4(_) => ip::prefix_contains(specified, cidr_len.v4, observed),
        IpAddr::V6(_) => ip::prefix_contains(specified, cidr_len.v6, observed),
    }
}

fn zone_contains(zone: &Name, candidate: &Name) -> bool {
    zone.zone_of(candidate)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_all() {
        assert!(matches!(Mechanism::parse("all").unwrap(), Mechanism::All));
    }

    #[test]
    fn parses_ip4_with_cidr() {
        match Mechanism::parse("ip4:192.0.2.0/24").unwrap() {
            Mechanism::Ip4 { network, cidr_len } => {
                assert_eq!(network, Ipv4Addr::new(192, 0, 2, 0));
                assert_eq!(cidr_len, 24);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_dual_cidr_a_mechanism() {
        match Mechanism::parse("a:example.com/24//64").unwrap() {
            Mechanism::A { domain, cidr_len } => {
                assert!(domain.is_some());
                assert_eq!(cidr_len.v4, 24);
                assert_eq!(cidr_len.v6, 64);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bare_a_mechanism_has_no_domain() {
        match Mechanism::parse("a").unwrap() {
            Mechanism::A { domain, cidr_len } => {
                assert!(domain.is_none());
                assert_eq!(cidr_len, DualCidrLen::default());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_mechanism() {
        assert!(Mechanism::parse("bogus-mechanism").is_err());
    }

    #[test]
    fn display_round_trip() {
        let m = Mechanism::parse("ip4:192.0.2.0/24").unwrap();
        assert_eq!(m.to_string(), "ip4:192.0.2.0/24");
    }
}
