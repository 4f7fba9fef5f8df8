//! An RFC 4408 Sender Policy Framework implementation: given an envelope sender, the
//! connecting client's IP address and an optional HELO identity, retrieves and
//! evaluates the authoritative domain's `v=spf1` policy and returns a disposition.
//!
//! ```no_run
//! use std::net::IpAddr;
//! use std::sync::Arc;
//! use spf_engine::{Request, Scope, Server};
//!
//! # async fn example(resolver: Arc<dyn spf_engine::Resolver>) {
//! let server = Server::new(resolver);
//! let request = Request::new(
//!     Scope::MFrom,
//!     "sender@example.com",
//!     "example.com",
//!     "192.0.2.1".parse::<IpAddr>().unwrap(),
//! )
//! .unwrap();
//! let result = server.process(&request).await;
//! println!("{}: {}", result.disposition, result.context);
//! # }
//! ```

mod dns;
mod error;
mod ip;
mod macros;
mod mechanism;
mod modifier;
mod record;
mod request;
mod result;
mod server;

#[cfg(test)]
mod tests;

pub use dns::{DnsError, DnsPacket, Resolver};
pub use hickory_proto::rr::RecordType;
pub use request::{Request, Scope};
pub use result::{SpfDisposition, SpfResult};
pub use server::{Server, ServerBuilder, ServerConfig};

#[cfg(feature = "live-dns")]
pub use dns::live::HickoryResolver;
