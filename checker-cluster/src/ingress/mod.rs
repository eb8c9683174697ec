//! Ingress-driven check reconciliation.
//!
//! Watches `networking.k8s.io/v1` Ingress resources and derives a set of
//! DNS, connectivity and HTTP checks for every observed ingress. Check
//! lifecycle is tied to the ingress through a finalizer so cleanup runs
//! before deletion completes.

mod reconciler;

pub use reconciler::run_ingress_watcher;

pub(crate) const FINALIZER: &str = "synthetic-checker/finalizer";
pub(crate) const SKIP_ANNOTATION: &str = "synthetic-checker/skip";
pub(crate) const TLS_ANNOTATION: &str = "synthetic-checker/TLS";
pub(crate) const NO_TLS_ANNOTATION: &str = "synthetic-checker/noTLS";
pub(crate) const PORTS_ANNOTATION: &str = "synthetic-checker/ports";
pub(crate) const INTERVAL_ANNOTATION: &str = "synthetic-checker/interval";
pub(crate) const ENDPOINTS_ANNOTATION: &str = "synthetic-checker/endpoints";
pub(crate) const CONFIG_FROM_ANNOTATION: &str = "synthetic-checker/configFrom";

/// Annotations whose values contribute additional host names.
pub(crate) const ADDITIONAL_HOSTS_ANNOTATIONS: [&str; 5] = [
    "nginx.ingress.kubernetes.io/server-alias",
    "external-dns.alpha.kubernetes.io/hostname",
    "external-dns.alpha.kubernetes.io/internal-hostname",
    "dns.alpha.kubernetes.io/external",
    "dns.alpha.kubernetes.io/internal",
];
