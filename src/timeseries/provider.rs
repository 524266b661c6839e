//! Time-series query façade (C6): domain queries over a Prometheus-like
//! backend, with a provider abstraction so tests never touch the network.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Settings;
use crate::error::{OpsGuardError, OpsGuardResult};
use crate::timeseries::types::TimeSeriesSample;

/// Provider-abstracted client over a Prometheus-compatible query API.
#[async_trait]
pub trait TimeSeriesProvider: Send + Sync {
    async fn query(&self, promql: &str) -> OpsGuardResult<Vec<TimeSeriesSample>>;
    async fn query_range(
        &self,
        promql: &str,
        start: i64,
        end: i64,
        step: i64,
    ) -> OpsGuardResult<Vec<TimeSeriesSample>>;

    async fn pod_restarts(&self, namespace: Option<&str>) -> OpsGuardResult<Vec<TimeSeriesSample>> {
        self.query(&promql::pod_restarts(namespace)).await
    }

    async fn crash_loop_pods(&self, namespace: Option<&str>) -> OpsGuardResult<Vec<TimeSeriesSample>> {
        self.query(&promql::crash_loop_pods(namespace)).await
    }

    async fn oom_killed_pods(&self, namespace: Option<&str>) -> OpsGuardResult<Vec<TimeSeriesSample>> {
        self.query(&promql::oom_killed_pods(namespace)).await
    }

    async fn node_conditions(&self, condition: Option<&str>) -> OpsGuardResult<Vec<TimeSeriesSample>> {
        self.query(&promql::node_conditions(condition)).await
    }

    async fn high_cpu_pods(
        &self,
        namespace: &str,
        threshold: f64,
    ) -> OpsGuardResult<Vec<TimeSeriesSample>> {
        self.query(&promql::high_cpu_pods(namespace, threshold)).await
    }

    async fn high_memory_pods(
        &self,
        namespace: &str,
        threshold: f64,
    ) -> OpsGuardResult<Vec<TimeSeriesSample>> {
        self.query(&promql::high_memory_pods(namespace, threshold)).await
    }
}

/// PromQL string construction, kept out of sight of callers of the domain methods.
mod promql {
    pub fn pod_restarts(namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => format!("kube_pod_container_status_restarts_total{{namespace=\"{ns}\"}}"),
            None => "kube_pod_container_status_restarts_total".to_string(),
        }
    }

    pub fn crash_loop_pods(namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => {
                format!("kube_pod_container_status_waiting_reason{{namespace=\"{ns}\",reason=\"CrashLoopBackOff\"}}")
            }
            None => "kube_pod_container_status_waiting_reason{reason=\"CrashLoopBackOff\"}".to_string(),
        }
    }

    pub fn oom_killed_pods(namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => {
                format!("kube_pod_container_status_last_terminated_reason{{namespace=\"{ns}\",reason=\"OOMKilled\"}}")
            }
            None => "kube_pod_container_status_last_terminated_reason{reason=\"OOMKilled\"}".to_string(),
        }
    }

    pub fn node_conditions(condition: Option<&str>) -> String {
        match condition {
            Some(c) => format!("kube_node_status_condition{{condition=\"{c}\",status=\"true\"}}"),
            None => "kube_node_status_condition{status=\"true\"}".to_string(),
        }
    }

    pub fn high_cpu_pods(namespace: &str, threshold: f64) -> String {
        format!(
            "(rate(container_cpu_usage_seconds_total{{namespace=\"{namespace}\"}}[5m]) / container_spec_cpu_quota) > {threshold}"
        )
    }

    pub fn high_memory_pods(namespace: &str, threshold: f64) -> String {
        format!(
            "(container_memory_working_set_bytes{{namespace=\"{namespace}\"}} / container_spec_memory_limit_bytes) > {threshold}"
        )
    }
}

/// One fixture/injected pod observation.
#[derive(Clone, Debug)]
struct FixturePod {
    namespace: String,
    pod: String,
    restarts: f64,
    crash_loop: bool,
    oom_killed: bool,
    cpu_ratio: f64,
    memory_ratio: f64,
}

/// Deterministic in-process provider. Seeds a small fixture so queries return
/// non-empty results even with nothing injected, and exposes `inject_anomaly`
/// for scenario-driven tests.
pub struct MockProvider {
    pods: Mutex<Vec<FixturePod>>,
    node_pressure: Mutex<bool>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        let pods = vec![
            FixturePod {
                namespace: "default".to_string(),
                pod: "api-0".to_string(),
                restarts: 0.0,
                crash_loop: false,
                oom_killed: false,
                cpu_ratio: 0.3,
                memory_ratio: 0.4,
            },
            FixturePod {
                namespace: "default".to_string(),
                pod: "api-1".to_string(),
                restarts: 2.0,
                crash_loop: false,
                oom_killed: false,
                cpu_ratio: 0.5,
                memory_ratio: 0.6,
            },
            FixturePod {
                namespace: "kube-system".to_string(),
                pod: "coredns-0".to_string(),
                restarts: 1.0,
                crash_loop: false,
                oom_killed: false,
                cpu_ratio: 0.2,
                memory_ratio: 0.3,
            },
        ];
        Self {
            pods: Mutex::new(pods),
            node_pressure: Mutex::new(true),
        }
    }

    /// Inject a scenario into the fixture so the next matching query surfaces it.
    pub fn inject_anomaly(&self, anomaly_type: &str, labels: &BTreeMap<String, String>) {
        let namespace = labels.get("namespace").cloned().unwrap_or_else(|| "default".to_string());
        let pod = labels.get("pod").cloned().unwrap_or_else(|| "injected-pod".to_string());
        let mut pods = self.pods.lock().expect("mock provider mutex poisoned");

        let entry = pods.iter_mut().find(|p| p.namespace == namespace && p.pod == pod);
        let target = match entry {
            Some(p) => p,
            None => {
                pods.push(FixturePod {
                    namespace: namespace.clone(),
                    pod: pod.clone(),
                    restarts: 0.0,
                    crash_loop: false,
                    oom_killed: false,
                    cpu_ratio: 0.0,
                    memory_ratio: 0.0,
                });
                pods.last_mut().unwrap()
            }
        };

        match anomaly_type {
            "crash_loop" => target.crash_loop = true,
            "oom_killed" => target.oom_killed = true,
            "high_cpu" => target.cpu_ratio = 0.95,
            "high_memory" => target.memory_ratio = 0.95,
            "pod_restarts" => target.restarts = 12.0,
            _ => {}
        }
    }

    fn sample(namespace: &str, pod: &str, metric: &str, value: f64) -> TimeSeriesSample {
        let mut labels = BTreeMap::new();
        labels.insert("namespace".to_string(), namespace.to_string());
        labels.insert("pod".to_string(), pod.to_string());
        TimeSeriesSample::new(metric, labels, vec![(0, value)])
    }
}

#[async_trait]
impl TimeSeriesProvider for MockProvider {
    async fn query(&self, promql: &str) -> OpsGuardResult<Vec<TimeSeriesSample>> {
        if promql.contains("kube_node_status_condition") {
            let pressure = *self.node_pressure.lock().expect("mock provider mutex poisoned");
            if !pressure {
                return Ok(Vec::new());
            }
            let mut labels = BTreeMap::new();
            labels.insert("node".to_string(), "node-0".to_string());
            labels.insert("condition".to_string(), "MemoryPressure".to_string());
            return Ok(vec![TimeSeriesSample::new("kube_node_status_condition", labels, vec![(0, 1.0)])]);
        }

        let pods = self.pods.lock().expect("mock provider mutex poisoned");
        let mut out = Vec::new();

        for p in pods.iter() {
            if promql.contains("restarts_total") {
                out.push(Self::sample(&p.namespace, &p.pod, "kube_pod_container_status_restarts_total", p.restarts));
            } else if promql.contains("CrashLoopBackOff") && p.crash_loop {
                out.push(Self::sample(&p.namespace, &p.pod, "kube_pod_container_status_waiting_reason", 1.0));
            } else if promql.contains("OOMKilled") && p.oom_killed {
                out.push(Self::sample(&p.namespace, &p.pod, "kube_pod_container_status_last_terminated_reason", 1.0));
            } else if promql.contains("container_cpu_usage_seconds_total") {
                out.push(Self::sample(&p.namespace, &p.pod, "high_cpu", p.cpu_ratio));
            } else if promql.contains("container_memory_working_set_bytes") {
                out.push(Self::sample(&p.namespace, &p.pod, "high_memory", p.memory_ratio));
            }
        }

        if let Some(after) = promql.split("namespace=\"").nth(1) {
            if let Some(ns) = after.split('"').next() {
                out.retain(|s| s.label("namespace") == Some(ns));
            }
        }
        if promql.contains('>') {
            if let Some(threshold_str) = promql.rsplit("> ").next() {
                if let Ok(threshold) = threshold_str.trim().parse::<f64>() {
                    out.retain(|s| s.latest().unwrap_or(0.0) > threshold);
                }
            }
        }

        Ok(out)
    }

    async fn query_range(
        &self,
        promql: &str,
        start: i64,
        end: i64,
        step: i64,
    ) -> OpsGuardResult<Vec<TimeSeriesSample>> {
        if step <= 0 {
            return Err(OpsGuardError::Validation {
                field: "step".to_string(),
                detail: "must be positive".to_string(),
            });
        }
        let points = self.query(promql).await?;
        Ok(points
            .into_iter()
            .map(|s| {
                let value = s.latest().unwrap_or(0.0);
                let mut ts = start;
                let mut resampled = Vec::new();
                while ts <= end {
                    resampled.push((ts, value));
                    ts += step;
                }
                TimeSeriesSample {
                    metric: s.metric,
                    labels: s.labels,
                    samples: resampled,
                }
            })
            .collect())
    }
}

#[derive(Deserialize)]
struct PromResponse {
    data: PromData,
}

#[derive(Deserialize)]
struct PromData {
    result: Vec<PromResult>,
}

#[derive(Deserialize)]
struct PromResult {
    metric: BTreeMap<String, String>,
    #[serde(default)]
    value: Option<(f64, String)>,
    #[serde(default)]
    values: Option<Vec<(f64, String)>>,
}

/// HTTP client over a Prometheus-compatible query API.
pub struct RemoteProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteProvider {
    pub fn new(settings: &Settings) -> OpsGuardResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.query_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: settings.timeseries_endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn samples_from_result(metric_name: &str, results: Vec<PromResult>) -> Vec<TimeSeriesSample> {
        results
            .into_iter()
            .map(|r| {
                let samples = if let Some((ts, v)) = r.value {
                    vec![(ts as i64, v.parse().unwrap_or(0.0))]
                } else if let Some(values) = r.values {
                    values
                        .into_iter()
                        .map(|(ts, v)| (ts as i64, v.parse().unwrap_or(0.0)))
                        .collect()
                } else {
                    Vec::new()
                };
                TimeSeriesSample::new(metric_name.to_string(), r.metric, samples)
            })
            .collect()
    }
}

#[async_trait]
impl TimeSeriesProvider for RemoteProvider {
    async fn query(&self, promql: &str) -> OpsGuardResult<Vec<TimeSeriesSample>> {
        let url = format!("{}/api/v1/query", self.endpoint);
        let resp = self
            .client
            .get(&url)
            .query(&[("query", promql)])
            .send()
            .await
            .map_err(|e| OpsGuardError::BackendUnavailable(e.to_string()))?;
        let body: PromResponse = resp
            .json()
            .await
            .map_err(|e| OpsGuardError::BackendUnavailable(e.to_string()))?;
        Ok(Self::samples_from_result(promql, body.data.result))
    }

    async fn query_range(
        &self,
        promql: &str,
        start: i64,
        end: i64,
        step: i64,
    ) -> OpsGuardResult<Vec<TimeSeriesSample>> {
        let url = format!("{}/api/v1/query_range", self.endpoint);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("query", promql.to_string()),
                ("start", start.to_string()),
                ("end", end.to_string()),
                ("step", step.to_string()),
            ])
            .send()
            .await
            .map_err(|e| OpsGuardError::BackendUnavailable(e.to_string()))?;
        let body: PromResponse = resp
            .json()
            .await
            .map_err(|e| OpsGuardError::BackendUnavailable(e.to_string()))?;
        Ok(Self::samples_from_result(promql, body.data.result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_seeds_non_empty_pod_restarts() {
        let provider = MockProvider::new();
        let result = provider.pod_restarts(None).await.unwrap();
        assert!(!result.is_empty());
    }

    #[tokio::test]
    async fn mock_provider_seeds_node_pressure() {
        let provider = MockProvider::new();
        let result = provider.node_conditions(Some("MemoryPressure")).await.unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn inject_crash_loop_then_query_surfaces_it() {
        let provider = MockProvider::new();
        let mut labels = BTreeMap::new();
        labels.insert("namespace".to_string(), "prod".to_string());
        labels.insert("pod".to_string(), "worker-7".to_string());
        provider.inject_anomaly("crash_loop", &labels);

        let result = provider.crash_loop_pods(Some("prod")).await.unwrap();
        assert!(result.iter().any(|s| s.label("pod") == Some("worker-7")));

        let other_ns = provider.crash_loop_pods(Some("default")).await.unwrap();
        assert!(!other_ns.iter().any(|s| s.label("pod") == Some("worker-7")));
    }

    #[tokio::test]
    async fn query_range_resamples_across_step() {
        let provider = MockProvider::new();
        let series = provider.query_range("kube_pod_container_status_restarts_total", 0, 100, 50).await.unwrap();
        assert!(series.iter().all(|s| s.samples.len() == 3));
    }

    #[tokio::test]
    async fn query_range_rejects_non_positive_step() {
        let provider = MockProvider::new();
        let result = provider.query_range("x", 0, 100, 0).await;
        assert!(result.is_err());
    }
}
