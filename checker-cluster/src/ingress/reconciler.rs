use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use checker_core::checks::{ConnChecker, DnsChecker, HttpChecker, TlsChecker};
use checker_core::config::{BaseCheck, ConnCheck, DnsCheck, HttpCheck, TlsCheck};
use checker_core::Runner;

use crate::error::{Error, Result};

use super::{
    ADDITIONAL_HOSTS_ANNOTATIONS, CONFIG_FROM_ANNOTATION, ENDPOINTS_ANNOTATION, FINALIZER,
    INTERVAL_ANNOTATION, NO_TLS_ANNOTATION, PORTS_ANNOTATION, SKIP_ANNOTATION, TLS_ANNOTATION,
};

const DEFAULT_LB_PORT: &str = ":443";
/// Successful reconciles requeue on this period for periodic self-healing.
const REQUEUE_PERIOD: Duration = Duration::from_secs(3600);
const ERROR_REQUEUE_PERIOD: Duration = Duration::from_secs(5);

struct Context {
    client: Client,
    runner: Arc<Runner>,
    /// Last observed generation/annotations per ingress, used to filter
    /// events that change neither.
    seen: Mutex<HashMap<String, Observed>>,
}

#[derive(Clone)]
struct Observed {
    generation: Option<i64>,
    annotations: BTreeMap<String, String>,
    reconciled_at: Instant,
}

/// Watch Ingress resources and reconcile checks for them until the token is
/// cancelled.
pub async fn run_ingress_watcher(client: Client, runner: Arc<Runner>, token: CancellationToken) {
    let api: Api<Ingress> = Api::all(client.clone());
    let context = Arc::new(Context {
        client,
        runner,
        seen: Mutex::new(HashMap::new()),
    });

    info!("starting ingress watcher");
    Controller::new(api, watcher::Config::default())
        .graceful_shutdown_on(token.cancelled_owned())
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((ingress, _)) => debug!(ingress = %ingress.name, "reconciled ingress"),
                Err(e) => warn!(error = %e, "failed to reconcile ingress"),
            }
        })
        .await;
    info!("ingress watcher stopped");
}

async fn reconcile(ingress: Arc<Ingress>, ctx: Arc<Context>) -> Result<Action> {
    let name = ingress
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::Kubernetes("ingress without a name".to_string()))?;
    let namespace = ingress.metadata.namespace.clone().unwrap_or_default();
    let api: Api<Ingress> = Api::namespaced(ctx.client.clone(), &namespace);

    let cache_key = ingress
        .metadata
        .uid
        .clone()
        .unwrap_or_else(|| format!("{namespace}/{name}"));

    if ingress.metadata.deletion_timestamp.is_some() {
        // The object is being deleted; cleanup is gated on our finalizer.
        if has_finalizer(&ingress) {
            cleanup(&ingress, &ctx.runner).await;
            set_finalizers(&api, &name, without_finalizer(&ingress)).await?;
        }
        ctx.seen.lock().unwrap().remove(&cache_key);
        return Ok(Action::await_change());
    }

    // Admit only events that changed the generation or the annotations
    // (modulo the skip rules), plus the periodic self-healing pass. This
    // also filters the update caused by attaching the finalizer below.
    if !ctx.admit(&cache_key, &ingress) {
        return Ok(Action::requeue(REQUEUE_PERIOD));
    }

    if !has_finalizer(&ingress) {
        set_finalizers(&api, &name, with_finalizer(&ingress)).await?;
    }

    if annotation_bool(annotations(&ingress), SKIP_ANNOTATION) {
        // The skip annotation was added or flipped to true.
        cleanup(&ingress, &ctx.runner).await;
        ctx.record(&cache_key, &ingress);
        return Ok(Action::await_change());
    }

    info!(ingress = %name, namespace = %namespace, "setting up checks for ingress");
    let http_cfg = http_config_from_secret(&ctx, &ingress).await?;
    apply_checks(&ingress, &ctx.runner, http_cfg).await?;
    ctx.record(&cache_key, &ingress);

    Ok(Action::requeue(REQUEUE_PERIOD))
}

impl Context {
    /// Whether this event should be reconciled.
    fn admit(&self, cache_key: &str, ingress: &Ingress) -> bool {
        let seen = self.seen.lock().unwrap();
        match seen.get(cache_key) {
            Some(observed) => {
                event_admitted(
                    Some((observed.generation, &observed.annotations)),
                    ingress.metadata.generation,
                    annotations(ingress),
                ) || observed.reconciled_at.elapsed() >= REQUEUE_PERIOD
            }
            None => event_admitted(None, ingress.metadata.generation, annotations(ingress)),
        }
    }

    fn record(&self, cache_key: &str, ingress: &Ingress) {
        self.seen.lock().unwrap().insert(
            cache_key.to_string(),
            Observed {
                generation: ingress.metadata.generation,
                annotations: annotations(ingress).clone(),
                reconciled_at: Instant::now(),
            },
        );
    }
}

/// The event admission rule: admit iff the generation or annotations
/// changed AND the object is not skip-annotated after the change, except
/// that a transition into skip is still admitted so cleanup can run. A
/// first observation counts as a create event.
fn event_admitted(
    old: Option<(Option<i64>, &BTreeMap<String, String>)>,
    generation: Option<i64>,
    annotations: &BTreeMap<String, String>,
) -> bool {
    let skip = annotation_bool(annotations, SKIP_ANNOTATION);

    let Some((old_generation, old_annotations)) = old else {
        return !skip;
    };

    if old_generation == generation && old_annotations == annotations {
        return false;
    }
    if !skip {
        return true;
    }
    // Became skipped: admit once for cleanup.
    !annotation_bool(old_annotations, SKIP_ANNOTATION)
}

fn error_policy(_ingress: Arc<Ingress>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(error = %error, "reconcile error, requeueing");
    Action::requeue(ERROR_REQUEUE_PERIOD)
}

fn annotations(ingress: &Ingress) -> &BTreeMap<String, String> {
    static EMPTY: BTreeMap<String, String> = BTreeMap::new();
    ingress.metadata.annotations.as_ref().unwrap_or(&EMPTY)
}

fn annotation_bool(annotations: &BTreeMap<String, String>, key: &str) -> bool {
    annotations
        .get(key)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn has_finalizer(ingress: &Ingress) -> bool {
    ingress
        .metadata
        .finalizers
        .as_ref()
        .map(|f| f.iter().any(|name| name == FINALIZER))
        .unwrap_or(false)
}

fn with_finalizer(ingress: &Ingress) -> Vec<String> {
    let mut finalizers = ingress.metadata.finalizers.clone().unwrap_or_default();
    finalizers.push(FINALIZER.to_string());
    finalizers
}

fn without_finalizer(ingress: &Ingress) -> Vec<String> {
    let mut finalizers = ingress.metadata.finalizers.clone().unwrap_or_default();
    finalizers.retain(|name| name != FINALIZER);
    finalizers
}

async fn set_finalizers(api: &Api<Ingress>, name: &str, finalizers: Vec<String>) -> Result<()> {
    let patch = serde_json::json!({"metadata": {"finalizers": finalizers}});
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Merge the HTTP check template from the `configFrom` secret: `method` and
/// `body` map to their fields, every other key becomes a header.
async fn http_config_from_secret(ctx: &Context, ingress: &Ingress) -> Result<HttpCheck> {
    let mut cfg = HttpCheck::default();
    let Some(secret_name) = annotations(ingress).get(CONFIG_FROM_ANNOTATION) else {
        return Ok(cfg);
    };

    let namespace = ingress.metadata.namespace.clone().unwrap_or_default();
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), &namespace);
    let secret = api.get(secret_name).await?;

    for (key, value) in secret.data.unwrap_or_default() {
        let value = String::from_utf8(value.0).unwrap_or_default();
        match key.as_str() {
            "body" => cfg.body = value,
            "method" => cfg.method = value,
            _ => {
                cfg.headers.insert(key, value);
            }
        }
    }
    Ok(cfg)
}

/// Derive and upsert the check set for an ingress.
pub(crate) async fn apply_checks(
    ingress: &Ingress,
    runner: &Arc<Runner>,
    http_cfg: HttpCheck,
) -> Result<()> {
    let annotations = annotations(ingress);
    let interval = parse_interval(annotations);
    let hosts = get_hosts(ingress);
    let ports = get_ports(annotations);

    // DNS checks for every hostname, staggered so they don't fire at once.
    for (i, host) in hosts.iter().enumerate() {
        let config = DnsCheck {
            host: host.clone(),
            base: staggered_base(i, interval),
            ..DnsCheck::default()
        };
        let check = DnsChecker::new(host, config)?;
        runner
            .add_check(format!("{host}-dns"), Arc::new(check), true)
            .await;
    }

    // Connectivity checks for every load balancer and port.
    let lbs = get_lbs(ingress);
    let tls = annotation_bool(annotations, TLS_ANNOTATION);
    let no_tls = annotation_bool(annotations, NO_TLS_ANNOTATION);
    for (i, lb) in lbs.iter().enumerate() {
        for port in &ports {
            let address = format!("{lb}{port}");
            if use_tls_probe(port, tls, no_tls) {
                let config = TlsCheck {
                    address: address.clone(),
                    host_names: hosts.clone(),
                    insecure_skip_verify: true,
                    skip_chain_validation: true,
                    base: staggered_base(i, interval),
                    ..TlsCheck::default()
                };
                let check = TlsChecker::new(&address, config)?;
                runner
                    .add_check(format!("{address}-tls"), Arc::new(check), true)
                    .await;
            } else {
                let config = ConnCheck {
                    address: address.clone(),
                    base: staggered_base(i, interval),
                    ..ConnCheck::default()
                };
                let check = ConnChecker::new(&address, config)?;
                runner
                    .add_check(format!("{address}-conn"), Arc::new(check), true)
                    .await;
            }
        }
    }

    // HTTP checks for every host, port and endpoint. With no endpoints
    // configured a single root check is emitted only when the configFrom
    // secret contributed content.
    let mut endpoints = get_endpoints(annotations);
    if endpoints.is_empty() {
        if http_cfg.headers.is_empty() && http_cfg.body.is_empty() && http_cfg.method.is_empty() {
            return Ok(());
        }
        endpoints.push(String::new());
    }

    for (i, host) in hosts.iter().enumerate() {
        for port in &ports {
            for endpoint in &endpoints {
                let url = http_url(host, port, endpoint);
                let config = HttpCheck {
                    url: url.clone(),
                    method: http_cfg.method.clone(),
                    headers: http_cfg.headers.clone(),
                    body: http_cfg.body.clone(),
                    base: staggered_base(i, interval),
                    ..HttpCheck::default()
                };
                let check = HttpChecker::new(&url, config)?;
                runner
                    .add_check(format!("{url}-http"), Arc::new(check), true)
                    .await;
            }
        }
    }

    Ok(())
}

/// Remove every check that [`apply_checks`] may have installed for this
/// ingress. Deleting unknown keys is a no-op, so cleanup does not need the
/// configFrom secret to invert the empty-endpoint case.
pub(crate) async fn cleanup(ingress: &Ingress, runner: &Arc<Runner>) {
    for key in derived_keys(ingress) {
        runner.del_check(&key).await;
    }
}

/// All check keys the derivation can produce for this ingress.
pub(crate) fn derived_keys(ingress: &Ingress) -> Vec<String> {
    let annotations = annotations(ingress);
    let hosts = get_hosts(ingress);
    let ports = get_ports(annotations);
    let tls = annotation_bool(annotations, TLS_ANNOTATION);
    let no_tls = annotation_bool(annotations, NO_TLS_ANNOTATION);

    let mut keys = Vec::new();

    for host in &hosts {
        keys.push(format!("{host}-dns"));
    }

    for lb in get_lbs(ingress) {
        for port in &ports {
            let kind = if use_tls_probe(port, tls, no_tls) {
                "tls"
            } else {
                "conn"
            };
            keys.push(format!("{lb}{port}-{kind}"));
        }
    }

    let mut endpoints = get_endpoints(annotations);
    if endpoints.is_empty() {
        endpoints.push(String::new());
    }
    for host in &hosts {
        for port in &ports {
            for endpoint in &endpoints {
                keys.push(format!("{}-http", http_url(host, port, endpoint)));
            }
        }
    }

    keys
}

fn use_tls_probe(port: &str, tls: bool, no_tls: bool) -> bool {
    !no_tls && (port == DEFAULT_LB_PORT || tls)
}

fn staggered_base(index: usize, interval: Option<Duration>) -> BaseCheck {
    BaseCheck {
        initial_delay: Some(Duration::from_secs(index as u64 + 1)),
        interval,
        ..BaseCheck::default()
    }
}

fn parse_interval(annotations: &BTreeMap<String, String>) -> Option<Duration> {
    annotations
        .get(INTERVAL_ANNOTATION)
        .and_then(|raw| humantime::parse_duration(raw).ok())
}

fn http_url(host: &str, port: &str, endpoint: &str) -> String {
    let scheme = if port.starts_with(":80") {
        "http://"
    } else {
        "https://"
    };
    format!("{scheme}{}{port}{endpoint}", host.replace('*', "check"))
}

/// Hosts from the spec rules plus the alias annotations, deduplicated with
/// order preserved.
fn get_hosts(ingress: &Ingress) -> Vec<String> {
    let mut hosts = Vec::new();
    let mut seen = std::collections::HashSet::new();

    if let Some(spec) = &ingress.spec {
        for rule in spec.rules.as_deref().unwrap_or_default() {
            if let Some(host) = rule.host.as_deref() {
                if !host.is_empty() && seen.insert(host.to_string()) {
                    hosts.push(host.to_string());
                }
            }
        }
    }

    let annotations = annotations(ingress);
    for annotation in ADDITIONAL_HOSTS_ANNOTATIONS {
        if let Some(aliases) = annotations.get(annotation) {
            for host in aliases.split(',') {
                let host = host.trim();
                if !host.is_empty() && seen.insert(host.to_string()) {
                    hosts.push(host.to_string());
                }
            }
        }
    }

    hosts
}

/// Load-balancer hostnames from the ingress status, deduplicated.
fn get_lbs(ingress: &Ingress) -> Vec<String> {
    let mut lbs = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let entries = ingress
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_deref())
        .unwrap_or_default();
    for entry in entries {
        if let Some(hostname) = entry.hostname.as_deref() {
            if !hostname.is_empty() && seen.insert(hostname.to_string()) {
                lbs.push(hostname.to_string());
            }
        }
    }

    lbs
}

/// Ports from the annotation, normalized to a leading colon; `:443` when
/// none are configured.
fn get_ports(annotations: &BTreeMap<String, String>) -> Vec<String> {
    let mut ports = Vec::new();
    if let Some(raw) = annotations.get(PORTS_ANNOTATION) {
        for port in raw.split(',') {
            let port = port.trim();
            if port.is_empty() {
                continue;
            }
            if port.starts_with(':') {
                ports.push(port.to_string());
            } else {
                ports.push(format!(":{port}"));
            }
        }
    }
    if ports.is_empty() {
        ports.push(DEFAULT_LB_PORT.to_string());
    }
    ports
}

/// Endpoints from the annotation, normalized to a leading slash.
fn get_endpoints(annotations: &BTreeMap<String, String>) -> Vec<String> {
    let mut endpoints = Vec::new();
    if let Some(raw) = annotations.get(ENDPOINTS_ANNOTATION) {
        for endpoint in raw.split(',') {
            let endpoint = endpoint.trim();
            if endpoint.is_empty() {
                continue;
            }
            if endpoint.starts_with('/') {
                endpoints.push(endpoint.to_string());
            } else {
                endpoints.push(format!("/{endpoint}"));
            }
        }
    }
    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use checker_core::config::CheckersConfig;

    fn ingress_fixture() -> Ingress {
        serde_yaml::from_str(
            r#"
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: web
  namespace: default
  annotations:
    synthetic-checker/ports: "443,8080"
    synthetic-checker/endpoints: "healthz,/ready"
    nginx.ingress.kubernetes.io/server-alias: "alias.example.com, web.example.com"
spec:
  rules:
    - host: web.example.com
      http:
        paths:
          - path: /
            pathType: Prefix
            backend:
              service:
                name: web
                port:
                  number: 443
status:
  loadBalancer:
    ingress:
      - hostname: lb-1.elb.example.com
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_get_hosts_dedups_and_keeps_order() {
        let hosts = get_hosts(&ingress_fixture());
        assert_eq!(hosts, vec!["web.example.com", "alias.example.com"]);
    }

    #[test]
    fn test_get_ports_normalizes() {
        let ingress = ingress_fixture();
        let ports = get_ports(annotations(&ingress));
        assert_eq!(ports, vec![":443", ":8080"]);

        let empty = BTreeMap::new();
        assert_eq!(get_ports(&empty), vec![":443"]);
    }

    #[test]
    fn test_get_endpoints_normalizes() {
        let ingress = ingress_fixture();
        let endpoints = get_endpoints(annotations(&ingress));
        assert_eq!(endpoints, vec!["/healthz", "/ready"]);
    }

    #[test]
    fn test_get_lbs() {
        assert_eq!(get_lbs(&ingress_fixture()), vec!["lb-1.elb.example.com"]);
    }

    #[test]
    fn test_http_url() {
        assert_eq!(
            http_url("web.example.com", ":443", "/healthz"),
            "https://web.example.com:443/healthz"
        );
        assert_eq!(
            http_url("*.example.com", ":8080", ""),
            "https://check.example.com:8080"
        );
        assert_eq!(
            http_url("web.example.com", ":80", "/"),
            "http://web.example.com:80/"
        );
    }

    #[test]
    fn test_use_tls_probe() {
        assert!(use_tls_probe(":443", false, false));
        assert!(!use_tls_probe(":8080", false, false));
        assert!(use_tls_probe(":8080", true, false));
        assert!(!use_tls_probe(":443", false, true));
        assert!(!use_tls_probe(":443", true, true));
    }

    fn skip_annotations(value: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(SKIP_ANNOTATION.to_string(), value.to_string())])
    }

    #[test]
    fn test_event_admitted_create() {
        let empty = BTreeMap::new();
        // Create events are admitted unless skip-annotated.
        assert!(event_admitted(None, Some(1), &empty));
        assert!(event_admitted(None, Some(1), &skip_annotations("false")));
        assert!(!event_admitted(None, Some(1), &skip_annotations("true")));
    }

    #[test]
    fn test_event_admitted_update() {
        let empty = BTreeMap::new();
        let skipped = skip_annotations("true");
        let not_skipped = skip_annotations("false");

        // No change at all: filtered (status and resource-version churn).
        assert!(!event_admitted(Some((Some(1), &empty)), Some(1), &empty));
        // Generation bumped: admitted.
        assert!(event_admitted(Some((Some(1), &empty)), Some(2), &empty));
        // Annotations changed, still not skipped: admitted.
        assert!(event_admitted(
            Some((Some(1), &empty)),
            Some(1),
            &not_skipped
        ));
        // Flipped into skip: admitted once so cleanup can run.
        assert!(event_admitted(
            Some((Some(1), &not_skipped)),
            Some(1),
            &skipped
        ));
        // Flipped out of skip: admitted.
        assert!(event_admitted(
            Some((Some(1), &skipped)),
            Some(1),
            &not_skipped
        ));
        // Still skipped, even with a generation change: filtered.
        assert!(!event_admitted(Some((Some(1), &skipped)), Some(2), &skipped));
        // Unchanged skip state: filtered.
        assert!(!event_admitted(Some((Some(1), &skipped)), Some(1), &skipped));
    }

    #[test]
    fn test_derived_keys() {
        let keys = derived_keys(&ingress_fixture());
        assert!(keys.contains(&"web.example.com-dns".to_string()));
        assert!(keys.contains(&"alias.example.com-dns".to_string()));
        assert!(keys.contains(&"lb-1.elb.example.com:443-tls".to_string()));
        assert!(keys.contains(&"lb-1.elb.example.com:8080-conn".to_string()));
        assert!(keys.contains(&"https://web.example.com:443/healthz-http".to_string()));
        assert!(keys.contains(&"https://alias.example.com:8080/ready-http".to_string()));
    }

    #[tokio::test]
    async fn test_apply_then_cleanup_restores_key_set() {
        let runner = Runner::new_from_config(&CheckersConfig::default(), false)
            .await
            .unwrap();
        let before = runner.check_keys().await;

        let ingress = ingress_fixture();
        apply_checks(&ingress, &runner, HttpCheck::default())
            .await
            .unwrap();
        let applied = runner.check_keys().await;
        assert!(!applied.is_empty());
        for key in derived_keys(&ingress) {
            assert!(applied.contains(&key), "missing derived key {key}");
        }

        cleanup(&ingress, &runner).await;
        assert_eq!(runner.check_keys().await, before);
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_apply_without_endpoints_emits_no_http_checks() {
        let runner = Runner::new_from_config(&CheckersConfig::default(), false)
            .await
            .unwrap();

        let ingress: Ingress = serde_yaml::from_str(
            r#"
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: bare
  namespace: default
spec:
  rules:
    - host: bare.example.com
"#,
        )
        .unwrap();

        apply_checks(&ingress, &runner, HttpCheck::default())
            .await
            .unwrap();
        let keys = runner.check_keys().await;
        assert_eq!(keys, vec!["bare.example.com-dns"]);
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_config_from_secret_content_emits_root_http_check() {
        let runner = Runner::new_from_config(&CheckersConfig::default(), false)
            .await
            .unwrap();

        let ingress: Ingress = serde_yaml::from_str(
            r#"
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: bare
  namespace: default
spec:
  rules:
    - host: bare.example.com
"#,
        )
        .unwrap();

        let http_cfg = HttpCheck {
            method: "POST".to_string(),
            ..HttpCheck::default()
        };
        apply_checks(&ingress, &runner, http_cfg).await.unwrap();
        let keys = runner.check_keys().await;
        assert!(keys.contains(&"https://bare.example.com:443-http".to_string()));
        runner.stop().await;
    }
}
