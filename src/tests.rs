//! End-to-end scenarios driven against an in-memory zone fixture, one per testable
//! property of the engine.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::{A, MX, PTR, TXT};
use hickory_proto::rr::{Name, RData, Record as RrRecord, RecordType};

use crate::dns::{DnsError, DnsPacket};
use crate::{Request, Resolver, Scope, Server, SpfDisposition};

#[derive(Default)]
struct TestResolver {
    zones: HashMap<(String, RecordType), Vec<RrRecord>>,
}

impl TestResolver {
    fn key(name: &str, rrtype: RecordType) -> (String, RecordType) {
        (crate::dns::normalize_name(name), rrtype)
    }

    fn insert(&mut self, name: &str, rrtype: RecordType, rdata: RData) {
        let fqdn = Name::from_str(&format!("{}.", crate::dns::normalize_name(name))).unwrap();
        self.zones
            .entry(Self::key(name, rrtype))
            .or_default()
            .push(RrRecord::from_rdata(fqdn, 300, rdata));
    }

    fn with_txt(mut self, name: &str, text: &str) -> Self {
        self.insert(name, RecordType::TXT, RData::TXT(TXT::new(vec![text.to_owned()])));
        self
    }

    fn with_spf(self, domain: &str, policy: &str) -> Self {
        self.with_txt(domain, policy)
    }

    fn with_a(mut self, name: &str, ip: Ipv4Addr) -> Self {
        self.insert(name, RecordType::A, RData::A(A(ip)));
        self
    }

    fn with_mx(mut self, name: &str, exchange: &str) -> Self {
        let exchange_name = Name::from_str(&format!("{}.", crate::dns::normalize_name(exchange))).unwrap();
        self.insert(name, RecordType::MX, RData::MX(MX::new(10, exchange_name)));
        self
    }

    fn with_ptr(mut self, ip_arpa_name: &str, points_to: &str) -> Self {
        let target = Name::from_str(&format!("{}.", crate::dns::normalize_name(points_to))).unwrap();
        self.insert(ip_arpa_name, RecordType::PTR, RData::PTR(PTR(target)));
        self
    }
}

#[async_trait]
impl Resolver for TestResolver {
    async fn lookup(&self, name: &str, rrtype: RecordType) -> Result<DnsPacket, DnsError> {
        match self.zones.get(&Self::key(name, rrtype)) {
            Some(records) => Ok(DnsPacket {
                header: crate::dns::DnsHeader { rcode: ResponseCode::NoError },
                answers: records.clone(),
            }),
            None => Ok(DnsPacket::empty()),
        }
    }
}

fn client(ip: &str) -> IpAddr {
    ip.parse().unwrap()
}

/// https://www.rfc-editor.org/rfc/rfc7208#appendix-A.1
#[tokio::test]
async fn explicit_pass() {
    let resolver = TestResolver::default().with_spf("example.com", "v=spf1 +all");
    let server = Server::new(Arc::new(resolver));
    let request = Request::new(Scope::MFrom, "sender@example.com", "example.com", client("192.0.2.1")).unwrap();
    let result = server.process(&request).await;
    k9::assert_equal!(result.disposition, SpfDisposition::Pass, "{:?}", result.context);
}

#[tokio::test]
async fn explicit_fail_with_explanation() {
    let resolver = TestResolver::default()
        .with_spf("example.com", "v=spf1 -all exp=explain.example.com")
        .with_txt("explain.example.com", "%{i} is not one of %{d}'s allowed senders");
    let server = Server::new(Arc::new(resolver));
    let request = Request::new(Scope::MFrom, "sender@example.com", "example.com", client("192.0.2.1")).unwrap();
    let result = server.process(&request).await;
    k9::assert_equal!(result.disposition, SpfDisposition::Fail);
    k9::assert_equal!(
        &result.context,
        "192.0.2.1 is not one of example.com's allowed senders"
    );
}

#[tokio::test]
async fn include_softfail() {
    let resolver = TestResolver::default()
        .with_spf("example.com", "v=spf1 include:_spf.example.net ~all")
        .with_spf("_spf.example.net", "v=spf1 -all");
    let server = Server::new(Arc::new(resolver));
    let request = Request::new(Scope::MFrom, "sender@example.com", "example.com", client("192.0.2.1")).unwrap();
    let result = server.process(&request).await;
    k9::assert_equal!(result.disposition, SpfDisposition::SoftFail);
}

#[tokio::test]
async fn redirect_follows_to_target_record() {
    let resolver = TestResolver::default()
        .with_spf("example.com", "v=spf1 redirect=_spf.example.net")
        .with_spf("_spf.example.net", "v=spf1 +all");
    let server = Server::new(Arc::new(resolver));
    let request = Request::new(Scope::MFrom, "sender@example.com", "example.com", client("192.0.2.1")).unwrap();
    let result = server.process(&request).await;
    k9::assert_equal!(result.disposition, SpfDisposition::Pass);
}

#[tokio::test]
async fn processing_limit_exceeded() {
    let mut resolver = TestResolver::default();
    let mut top = "v=spf1".to_string();
    for n in 0..11 {
        let child = format!("l{n}.example.com");
        top.push_str(&format!(" include:{child}"));
        resolver = resolver.with_spf(&child, "v=spf1 -all");
    }
    top.push_str(" -all");
    resolver = resolver.with_spf("example.com", &top);

    let server = Server::new(Arc::new(resolver));
    let request = Request::new(Scope::MFrom, "sender@example.com", "example.com", client("192.0.2.1")).unwrap();
    let result = server.process(&request).await;
    k9::assert_equal!(result.disposition, SpfDisposition::PermError);
}

#[tokio::test]
async fn no_record_published() {
    let resolver = TestResolver::default();
    let server = Server::new(Arc::new(resolver));
    let request = Request::new(Scope::MFrom, "sender@example.com", "example.com", client("192.0.2.1")).unwrap();
    let result = server.process(&request).await;
    k9::assert_equal!(result.disposition, SpfDisposition::None);
}

#[tokio::test]
async fn redundant_records_are_permerror() {
    let resolver = TestResolver::default()
        .with_txt("example.com", "v=spf1 +all")
        .with_txt("example.com", "v=spf1 -all");
    let server = Server::new(Arc::new(resolver));
    let request = Request::new(Scope::MFrom, "sender@example.com", "example.com", client("192.0.2.1")).unwrap();
    let result = server.process(&request).await;
    k9::assert_equal!(result.disposition, SpfDisposition::PermError);
}

#[tokio::test]
async fn a_mechanism_matches_address() {
    let resolver = TestResolver::default()
        .with_spf("example.com", "v=spf1 a -all")
        .with_a("example.com", Ipv4Addr::new(192, 0, 2, 10));
    let server = Server::new(Arc::new(resolver));

    let request = Request::new(Scope::MFrom, "sender@example.com", "example.com", client("192.0.2.10")).unwrap();
    k9::assert_equal!(server.process(&request).await.disposition, SpfDisposition::Pass);

    let request = Request::new(Scope::MFrom, "sender@example.com", "example.com", client("192.0.2.99")).unwrap();
    k9::assert_equal!(server.process(&request).await.disposition, SpfDisposition::Fail);
}

#[tokio::test]
async fn mx_mechanism_matches_exchange_address() {
    let resolver = TestResolver::default()
        .with_spf("example.com", "v=spf1 mx -all")
        .with_mx("example.com", "mail.example.com")
        .with_a("mail.example.com", Ipv4Addr::new(192, 0, 2, 129));
    let server = Server::new(Arc::new(resolver));
    let request = Request::new(Scope::MFrom, "sender@example.com", "example.com", client("192.0.2.129")).unwrap();
    k9::assert_equal!(server.process(&request).await.disposition, SpfDisposition::Pass);
}

#[tokio::test]
async fn ip4_mechanism_containment() {
    let resolver = TestResolver::default().with_spf("example.com", "v=spf1 ip4:192.0.2.0/24 -all");
    let server = Server::new(Arc::new(resolver));
    let request = Request::new(Scope::MFrom, "sender@example.com", "example.com", client("192.0.2.200")).unwrap();
    k9::assert_equal!(server.process(&request).await.disposition, SpfDisposition::Pass);
}

#[tokio::test]
async fn ptr_mechanism_validates_forward_lookup() {
    let resolver = TestResolver::default()
        .with_spf("example.com", "v=spf1 ptr:example.com -all")
        .with_ptr("1.2.0.192.in-addr.arpa", "mail.example.com")
        .with_a("mail.example.com", Ipv4Addr::new(192, 0, 2, 1));
    let server = Server::new(Arc::new(resolver));
    let request = Request::new(Scope::MFrom, "sender@example.com", "example.com", client("192.0.2.1")).unwrap();
    k9::assert_equal!(server.process(&request).await.disposition, SpfDisposition::Pass);
}

#[tokio::test]
async fn malformed_record_is_permerror() {
    let resolver = TestResolver::default().with_spf("example.com", "v=spf1 bogus-mechanism -all");
    let server = Server::new(Arc::new(resolver));
    let request = Request::new(Scope::MFrom, "sender@example.com", "example.com", client("192.0.2.1")).unwrap();
    k9::assert_equal!(server.process(&request).await.disposition, SpfDisposition::PermError);
}
