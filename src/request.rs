//! The inbound check request and the mutable state shared across a root request and
//! the sub-requests `include`/`redirect` spawn for it.

use std::cell::RefCell;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::rc::Rc;

use crate::ip;
use crate::macros::{ExpandContext, MacroString};
use crate::result::{SpfDisposition, SpfResult};
use crate::server::Server;

/// Which identity is being checked: the `MAIL FROM` address, the `HELO`/`EHLO`
/// argument, or (legacy, Sender ID) the Purported Responsible Address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Helo,
    MFrom,
    Pra,
}

impl Scope {
    pub(crate) fn record_scope_token(self) -> &'static str {
        match self {
            Scope::Helo => "mfrom", // HELO checks still select an mfrom-scoped v=spf1 record
            Scope::MFrom => "mfrom",
            Scope::Pra => "pra",
        }
    }
}

/// State that must stay global across a `Request` and every sub-request spawned for
/// it by `include`/`redirect`: the DNS-interactive term counter (RFC 4408 §10.1's
/// 10-lookup ceiling applies to the whole evaluation, not per included record), the
/// domain stack used to detect `include`/`redirect` cycles, and whichever `exp`
/// modifier's macro string is currently bound for a `fail` explanation.
///
/// `Rc<RefCell<..>>` rather than `Arc<Mutex<..>>`: a single request is never
/// evaluated from more than one task concurrently, so there is nothing to protect
/// against beyond single-threaded aliasing.
#[derive(Debug, Default)]
pub(crate) struct EvalState {
    dns_interactive_terms: u32,
    visited_domains: Vec<String>,
    bound_explanation: Option<MacroString>,
}

impl EvalState {
    pub(crate) fn bind_explanation(&mut self, exp: MacroString) {
        self.bound_explanation = Some(exp);
    }

    pub(crate) fn bound_explanation(&self) -> Option<&MacroString> {
        self.bound_explanation.as_ref()
    }
}

/// An SPF check request: the envelope sender, the authority domain currently being
/// evaluated, the connecting client's IP, and the optional HELO identity.
///
/// `domain` changes across `include`/`redirect` sub-requests (see [`Request::with_domain`]);
/// `sender`, `local_part`, `sender_domain`, `client_ip` and `helo_domain` never do.
#[derive(Clone)]
pub struct Request {
    sender: String,
    local_part: String,
    sender_domain: String,
    pub(crate) domain: String,
    pub(crate) client_ip: IpAddr,
    helo_domain: Option<String>,
    scope: Scope,
    state: Rc<RefCell<EvalState>>,
}

impl Request {
    /// `sender` is the `MAIL FROM` (or, for a `Helo`-scope check, the HELO identity
    /// used as a stand-in local-part-less address) identity under test; `domain` is
    /// the domain whose SPF policy will be retrieved first.
    pub fn new(scope: Scope, sender: &str, domain: &str, client_ip: IpAddr) -> Result<Self, SpfResult> {
        let (local_part, sender_domain) = match sender.split_once('@') {
            Some((local, dom)) => (local.to_owned(), dom.to_owned()),
            // RFC 4408 §2.4: if the <sender> has no local-part, "postmaster" is used.
            None => ("postmaster".to_owned(), sender.to_owned()),
        };

        if sender_domain.is_empty() || domain.is_empty() {
            return Err(SpfResult {
                disposition: SpfDisposition::None,
                context: "sender or domain is empty".to_owned(),
            });
        }

        Ok(Self {
            sender: sender.to_owned(),
            local_part,
            sender_domain,
            domain: domain.to_owned(),
            client_ip,
            helo_domain: None,
            scope,
            state: Rc::new(RefCell::new(EvalState::default())),
        })
    }

    pub fn with_helo_domain(mut self, helo: impl Into<String>) -> Self {
        self.helo_domain = Some(helo.into());
        self
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub(crate) fn dual_stack(&self) -> (Option<Ipv4Addr>, Option<Ipv6Addr>) {
        ip::dual_stack(self.client_ip)
    }

    /// A sub-request scoped to `domain` for `include`/`redirect`/mechanism recursion,
    /// sharing this request's [`EvalState`] by `Rc` clone so limits stay global.
    pub(crate) fn with_domain(&self, domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..self.clone()
        }
    }

    pub(crate) fn state(&self) -> Rc<RefCell<EvalState>> {
        Rc::clone(&self.state)
    }

    /// Binds `exp` as the explanation a `fail` match captures, per RFC 4408 §6.2.
    /// Shared via `EvalState` so a `redirect` target inherits its predecessor's `exp`.
    pub(crate) fn bind_explanation(&self, exp: MacroString) {
        self.state.borrow_mut().bind_explanation(exp);
    }

    pub(crate) fn bound_explanation(&self) -> Option<MacroString> {
        self.state.borrow().bound_explanation().cloned()
    }

    /// Marks entry into `domain` for cycle detection; returns `false` if it is
    /// already on the include/redirect stack.
    pub(crate) fn enter_domain(&self, domain: &str) -> bool {
        let mut state = self.state.borrow_mut();
        if state.visited_domains.iter().any(|d| d == domain) {
            return false;
        }
        state.visited_domains.push(domain.to_owned());
        true
    }

    pub(crate) fn count_dns_interactive_term(&self, max: u32) -> Result<(), String> {
        let mut state = self.state.borrow_mut();
        state.dns_interactive_terms += 1;
        if state.dns_interactive_terms > max {
            return Err(format!("exceeded {max} DNS-interactive terms"));
        }
        Ok(())
    }

    /// Expands `spec` against this request. `%{p}` (if present) is resolved first via
    /// the same validated-PTR search the `ptr` mechanism uses; this is the only reason
    /// expansion needs `server` and is async at all.
    pub(crate) async fn expand(
        &self,
        server: &Server,
        spec: &MacroString,
        is_explanation: bool,
    ) -> Result<String, String> {
        use std::time::{SystemTime, UNIX_EPOCH};

        let now_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let validated_ptr_name = if spec.needs_validated_ptr() {
            Some(self.validated_ptr_name(server).await)
        } else {
            None
        };

        let cx = ExpandContext {
            sender: &self.sender,
            local_part: &self.local_part,
            sender_domain: &self.sender_domain,
            domain: &self.domain,
            client_ip: self.client_ip,
            helo_domain: self.helo_domain.as_deref(),
            // RFC 4408 §8.1: "unknown" when the receiving host has no name of its own.
            relaying_host_name: "unknown",
            now_unix,
            is_explanation,
            validated_ptr_name: validated_ptr_name.as_deref(),
        };
        spec.expand(&cx)
    }

    /// `%{p}`'s value: the first validated PTR name, or `None` (expanded to the
    /// literal `unknown`) if none validates or the lookup fails. RFC 4408 discourages
    /// `p` but requires it to degrade gracefully rather than error out.
    async fn validated_ptr_name(&self, server: &Server) -> String {
        match server.resolve_validated_ptr_names(self).await {
            Ok(names) if !names.is_empty() => names[0].to_string().trim_end_matches('.').to_owned(),
            _ => "unknown".to_owned(),
        }
    }

    pub(crate) async fn domain_for_spec(
        &self,
        server: &Server,
        spec: Option<&MacroString>,
    ) -> Result<String, SpfResult> {
        let Some(spec) = spec else {
            return Ok(self.domain.clone());
        };
        self.expand(server, spec, false).await.map_err(|err| SpfResult {
            disposition: SpfDisposition::PermError,
            context: format!("error evaluating domain-spec: {err}"),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_local_part_is_postmaster() {
        let req = Request::new(Scope::MFrom, "example.com", "example.com", "192.0.2.1".parse().unwrap())
            .unwrap();
        assert_eq!(req.local_part, "postmaster");
    }

    #[test]
    fn sub_request_shares_state() {
        let req = Request::new(
            Scope::MFrom,
            "strong-bad@email.example.com",
            "email.example.com",
            "192.0.2.1".parse().unwrap(),
        )
        .unwrap();
        assert!(req.count_dns_interactive_term(1).is_ok());
        let sub = req.with_domain("included.example.com");
        assert!(sub.count_dns_interactive_term(1).is_err());
    }

    #[test]
    fn cycle_detection() {
        let req = Request::new(Scope::MFrom, "a@example.com", "example.com", "192.0.2.1".parse().unwrap())
            .unwrap();
        assert!(req.enter_domain("example.com"));
        assert!(!req.enter_domain("example.com"));
    }
}
