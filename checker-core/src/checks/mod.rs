//! The check catalogue.
//!
//! One module per probe variant, each normalizing its configuration on
//! construction and implementing the [`Check`](crate::check::Check) contract.

pub mod conn;
pub mod dns;
pub mod grpc;
pub mod http;
pub mod k8s;
pub mod k8s_ping;
pub mod kstatus;
pub mod tls;
mod util;

pub use conn::ConnChecker;
pub use dns::DnsChecker;
pub use grpc::GrpcChecker;
pub use http::HttpChecker;
pub use k8s::K8sChecker;
pub use k8s_ping::K8sPinger;
pub use tls::TlsChecker;
