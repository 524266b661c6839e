//! Metric injector (C7): push synthetic metrics into a pushgateway with
//! deterministic, per-scenario grouping keys.

use std::sync::Mutex;

use reqwest::{Client, StatusCode};

use crate::config::Settings;
use crate::error::{OpsGuardError, OpsGuardResult};

/// Ordered grouping-key label pairs a scenario was pushed under, used to
/// address the same group again on delete.
type GroupingKey = Vec<(String, String)>;

pub struct MetricInjector {
    client: Client,
    endpoint: String,
    pushed: Mutex<Vec<(String, GroupingKey)>>,
}

impl MetricInjector {
    pub fn new(settings: &Settings) -> OpsGuardResult<Self> {
        let client = Client::builder().timeout(settings.query_timeout).build()?;
        Ok(Self {
            client,
            endpoint: settings.pushgateway_endpoint.trim_end_matches('/').to_string(),
            pushed: Mutex::new(Vec::new()),
        })
    }

    fn group_url(&self, job: &str, key: &GroupingKey) -> String {
        let mut url = format!("{}/metrics/job/{job}", self.endpoint);
        for (k, v) in key {
            url.push('/');
            url.push_str(k);
            url.push('/');
            url.push_str(v);
        }
        url
    }

    async fn push(&self, job: &str, key: GroupingKey, body: String) -> OpsGuardResult<()> {
        let url = self.group_url(job, &key);
        let resp = self
            .client
            .post(&url)
            .body(body)
            .send()
            .await
            .map_err(|e| OpsGuardError::InjectionFailure(e.to_string()))?;
        if !matches!(resp.status(), StatusCode::OK | StatusCode::ACCEPTED) {
            return Err(OpsGuardError::InjectionFailure(format!(
                "pushgateway returned {}",
                resp.status()
            )));
        }
        self.pushed
            .lock()
            .expect("injector mutex poisoned")
            .push((job.to_string(), key));
        Ok(())
    }

    pub async fn inject_crash_loop(&self, namespace: &str, pod: &str) -> OpsGuardResult<()> {
        let body = format!(
            "kube_pod_container_status_waiting_reason{{namespace=\"{namespace}\",pod=\"{pod}\",reason=\"CrashLoopBackOff\"}} 1\n"
        );
        self.push(
            "crash_loop",
            vec![("namespace".to_string(), namespace.to_string()), ("pod".to_string(), pod.to_string())],
            body,
        )
        .await
    }

    pub async fn inject_oom_killed(&self, namespace: &str, pod: &str) -> OpsGuardResult<()> {
        let body = format!(
            "kube_pod_container_status_last_terminated_reason{{namespace=\"{namespace}\",pod=\"{pod}\",reason=\"OOMKilled\"}} 1\n"
        );
        self.push(
            "oom_killed",
            vec![("namespace".to_string(), namespace.to_string()), ("pod".to_string(), pod.to_string())],
            body,
        )
        .await
    }

    pub async fn inject_node_pressure(&self, node: &str) -> OpsGuardResult<()> {
        let body = format!(
            "kube_node_status_condition{{node=\"{node}\",condition=\"MemoryPressure\",status=\"true\"}} 1\n"
        );
        self.push("node_pressure", vec![("node".to_string(), node.to_string())], body).await
    }

    pub async fn inject_high_cpu(&self, namespace: &str, pod: &str, ratio: f64) -> OpsGuardResult<()> {
        let body = format!(
            "container_cpu_usage_seconds_total{{namespace=\"{namespace}\",pod=\"{pod}\"}} {ratio}\n"
        );
        self.push(
            "high_cpu",
            vec![("namespace".to_string(), namespace.to_string()), ("pod".to_string(), pod.to_string())],
            body,
        )
        .await
    }

    pub async fn inject_high_memory(&self, namespace: &str, pod: &str, ratio: f64) -> OpsGuardResult<()> {
        let body = format!(
            "container_memory_working_set_bytes{{namespace=\"{namespace}\",pod=\"{pod}\"}} {ratio}\n"
        );
        self.push(
            "high_memory",
            vec![("namespace".to_string(), namespace.to_string()), ("pod".to_string(), pod.to_string())],
            body,
        )
        .await
    }

    pub async fn inject_pod_restarts(&self, namespace: &str, pod: &str, count: u32) -> OpsGuardResult<()> {
        let body = format!(
            "kube_pod_container_status_restarts_total{{namespace=\"{namespace}\",pod=\"{pod}\"}} {count}\n"
        );
        self.push(
            "pod_restarts",
            vec![("namespace".to_string(), namespace.to_string()), ("pod".to_string(), pod.to_string())],
            body,
        )
        .await
    }

    /// Delete every group pushed so far. Best-effort, one attempt each; a
    /// single failed delete does not stop the rest.
    pub async fn clear_metrics(&self) -> OpsGuardResult<usize> {
        let entries: Vec<(String, GroupingKey)> = {
            let mut pushed = self.pushed.lock().expect("injector mutex poisoned");
            std::mem::take(&mut *pushed)
        };
        let mut cleared = 0;
        for (job, key) in entries {
            let url = self.group_url(&job, &key);
            if let Ok(resp) = self.client.delete(&url).send().await {
                if matches!(resp.status(), StatusCode::OK | StatusCode::ACCEPTED) {
                    cleared += 1;
                }
            }
        }
        Ok(cleared)
    }

    pub fn pending_count(&self) -> usize {
        self.pushed.lock().expect("injector mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn group_url_encodes_principal_labels_only() {
        let injector = MetricInjector::new(&settings()).unwrap();
        let url = injector.group_url(
            "crash_loop",
            &vec![("namespace".to_string(), "prod".to_string()), ("pod".to_string(), "worker-7".to_string())],
        );
        assert!(url.ends_with("/metrics/job/crash_loop/namespace/prod/pod/worker-7"));
    }

    #[test]
    fn pending_count_starts_empty() {
        let injector = MetricInjector::new(&settings()).unwrap();
        assert_eq!(injector.pending_count(), 0);
    }
}
