//! Health evaluator (C8): turn C6 query results into typed, severity-ranked
//! anomalies a caller can page someone off of.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::anomaly::Severity;
use crate::error::{OpsGuardError, OpsGuardResult};
use crate::timeseries::{TimeSeriesProvider, TimeSeriesSample};

const RESTART_CRITICAL: f64 = 10.0;
const RESTART_HIGH: f64 = 7.0;
const RESTART_MEDIUM: f64 = 4.0;

/// Which kind of cluster condition an [`Anomaly`] reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthAnomalyType {
    PodRestarts,
    CrashLoop,
    OomKilled,
    NodePressure,
    HighCpu,
    HighMemory,
}

/// One cluster-health finding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Anomaly {
    pub anomaly_type: HealthAnomalyType,
    pub severity: Severity,
    pub namespace: Option<String>,
    pub resource_name: String,
    pub resource_type: String,
    pub message: String,
    pub metrics: BTreeMap<String, f64>,
    pub labels: BTreeMap<String, String>,
}

/// Summary of a detection sweep.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionResult {
    pub anomalies: Vec<Anomaly>,
    pub critical_count: usize,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    pub namespaces_checked: Vec<String>,
    pub summary: String,
}

impl DetectionResult {
    fn from_anomalies(anomalies: Vec<Anomaly>, namespaces_checked: Vec<String>) -> Self {
        let critical_count = anomalies.iter().filter(|a| a.severity == Severity::Critical).count();
        let high_count = anomalies.iter().filter(|a| a.severity == Severity::High).count();
        let medium_count = anomalies.iter().filter(|a| a.severity == Severity::Medium).count();
        let low_count = anomalies.iter().filter(|a| a.severity == Severity::Low).count();
        let summary = format!(
            "{} anomalies across {} namespace(s): {} critical, {} high, {} medium, {} low",
            anomalies.len(),
            namespaces_checked.len(),
            critical_count,
            high_count,
            medium_count,
            low_count,
        );
        Self {
            anomalies,
            critical_count,
            high_count,
            medium_count,
            low_count,
            namespaces_checked,
            summary,
        }
    }

    pub fn has_anomalies(&self) -> bool {
        !self.anomalies.is_empty()
    }

    pub fn has_critical(&self) -> bool {
        self.critical_count > 0
    }
}

/// Aggregates C6 query results into typed anomalies, filtering out pods that
/// match a configured exclusion pattern.
pub struct HealthEvaluator {
    exclude_pods: Option<Regex>,
    cpu_threshold: f64,
    memory_threshold: f64,
}

impl HealthEvaluator {
    pub fn new(exclude_pods_pattern: Option<&str>, cpu_threshold: f64, memory_threshold: f64) -> OpsGuardResult<Self> {
        let exclude_pods = match exclude_pods_pattern {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| OpsGuardError::InvalidConfig {
                name: "HEALTH_EXCLUDE_PODS_PATTERN".to_string(),
                value: pattern.to_string(),
                detail: e.to_string(),
            })?),
            None => None,
        };
        Ok(Self {
            exclude_pods,
            cpu_threshold,
            memory_threshold,
        })
    }

    fn excluded(&self, pod: &str) -> bool {
        self.exclude_pods.as_ref().is_some_and(|re| re.is_match(pod))
    }

    pub async fn detect_all(
        &self,
        provider: &dyn TimeSeriesProvider,
        namespace: Option<&str>,
    ) -> OpsGuardResult<DetectionResult> {
        let mut anomalies = self.detect_pod_failures(provider, namespace).await?.anomalies;
        anomalies.extend(self.detect_node_pressure(provider).await?.anomalies);
        anomalies.extend(self.detect_resource_anomalies(provider, namespace).await?.anomalies);

        let namespaces_checked = namespace.map(|ns| vec![ns.to_string()]).unwrap_or_default();
        Ok(DetectionResult::from_anomalies(anomalies, namespaces_checked))
    }

    pub async fn detect_pod_failures(
        &self,
        provider: &dyn TimeSeriesProvider,
        namespace: Option<&str>,
    ) -> OpsGuardResult<DetectionResult> {
        let mut anomalies = Vec::new();

        for sample in provider.pod_restarts(namespace).await? {
            if let Some(pod) = sample.label("pod") {
                if self.excluded(pod) {
                    continue;
                }
                if let Some(restarts) = sample.latest() {
                    if let Some(severity) = restart_severity(restarts) {
                        anomalies.push(self.anomaly(
                            HealthAnomalyType::PodRestarts,
                            severity,
                            &sample,
                            format!("pod {pod} has restarted {restarts:.0} times"),
                        ));
                    }
                }
            }
        }

        for sample in provider.crash_loop_pods(namespace).await? {
            if sample.label("pod").is_some_and(|p| self.excluded(p)) {
                continue;
            }
            let pod = sample.label("pod").unwrap_or("unknown").to_string();
            anomalies.push(self.anomaly(
                HealthAnomalyType::CrashLoop,
                Severity::Critical,
                &sample,
                format!("pod {pod} is in CrashLoopBackOff"),
            ));
        }

        for sample in provider.oom_killed_pods(namespace).await? {
            if sample.label("pod").is_some_and(|p| self.excluded(p)) {
                continue;
            }
            let pod = sample.label("pod").unwrap_or("unknown").to_string();
            anomalies.push(self.anomaly(
                HealthAnomalyType::OomKilled,
                Severity::Critical,
                &sample,
                format!("pod {pod} was OOMKilled"),
            ));
        }

        let namespaces_checked = namespace.map(|ns| vec![ns.to_string()]).unwrap_or_default();
        Ok(DetectionResult::from_anomalies(anomalies, namespaces_checked))
    }

    pub async fn detect_node_pressure(&self, provider: &dyn TimeSeriesProvider) -> OpsGuardResult<DetectionResult> {
        let mut anomalies = Vec::new();
        for sample in provider.node_conditions(None).await? {
            let node = sample.label("node").unwrap_or("unknown").to_string();
            let condition = sample.label("condition").unwrap_or("unknown").to_string();
            anomalies.push(Anomaly {
                anomaly_type: HealthAnomalyType::NodePressure,
                severity: Severity::High,
                namespace: None,
                resource_name: node.clone(),
                resource_type: "node".to_string(),
                message: format!("node {node} reports {condition}"),
                metrics: sample
                    .latest()
                    .map(|v| BTreeMap::from([(sample.metric.clone(), v)]))
                    .unwrap_or_default(),
                labels: sample.labels.clone(),
            });
        }
        Ok(DetectionResult::from_anomalies(anomalies, Vec::new()))
    }

    /// CPU/memory checks require an explicit namespace (unlike the other
    /// detectors here); with none given this returns an empty result rather
    /// than querying an unscoped, meaningless `namespace=""` filter.
    pub async fn detect_resource_anomalies(
        &self,
        provider: &dyn TimeSeriesProvider,
        namespace: Option<&str>,
    ) -> OpsGuardResult<DetectionResult> {
        let Some(ns) = namespace else {
            tracing::debug!("skipping resource anomaly detection: no namespace given");
            return Ok(DetectionResult::from_anomalies(Vec::new(), Vec::new()));
        };
        let mut anomalies = Vec::new();

        for sample in provider.high_cpu_pods(ns, self.cpu_threshold).await? {
            if sample.label("pod").is_some_and(|p| self.excluded(p)) {
                continue;
            }
            if let Some(value) = sample.latest() {
                let severity = resource_severity(value, self.cpu_threshold);
                let pod = sample.label("pod").unwrap_or("unknown").to_string();
                anomalies.push(self.anomaly(
                    HealthAnomalyType::HighCpu,
                    severity,
                    &sample,
                    format!("pod {pod} CPU usage ratio {value:.2} over threshold {:.2}", self.cpu_threshold),
                ));
            }
        }

        for sample in provider.high_memory_pods(ns, self.memory_threshold).await? {
            if sample.label("pod").is_some_and(|p| self.excluded(p)) {
                continue;
            }
            if let Some(value) = sample.latest() {
                let severity = resource_severity(value, self.memory_threshold);
                let pod = sample.label("pod").unwrap_or("unknown").to_string();
                anomalies.push(self.anomaly(
                    HealthAnomalyType::HighMemory,
                    severity,
                    &sample,
                    format!("pod {pod} memory usage ratio {value:.2} over threshold {:.2}", self.memory_threshold),
                ));
            }
        }

        let namespaces_checked = namespace.map(|ns| vec![ns.to_string()]).unwrap_or_default();
        Ok(DetectionResult::from_anomalies(anomalies, namespaces_checked))
    }

    fn anomaly(
        &self,
        anomaly_type: HealthAnomalyType,
        severity: Severity,
        sample: &TimeSeriesSample,
        message: String,
    ) -> Anomaly {
        Anomaly {
            anomaly_type,
            severity,
            namespace: sample.label("namespace").map(str::to_string),
            resource_name: sample.label("pod").unwrap_or("unknown").to_string(),
            resource_type: "pod".to_string(),
            message,
            metrics: sample
                .latest()
                .map(|v| BTreeMap::from([(sample.metric.clone(), v)]))
                .unwrap_or_default(),
            labels: sample.labels.clone(),
        }
    }
}

fn restart_severity(restarts: f64) -> Option<Severity> {
    if restarts >= RESTART_CRITICAL {
        Some(Severity::Critical)
    } else if restarts >= RESTART_HIGH {
        Some(Severity::High)
    } else if restarts >= RESTART_MEDIUM {
        Some(Severity::Medium)
    } else {
        None
    }
}

fn resource_severity(value: f64, threshold: f64) -> Severity {
    if value >= threshold + 5.0 {
        Severity::Critical
    } else if value >= threshold + 3.0 {
        Severity::High
    } else {
        Severity::Medium
    }
}
