use crate::metrics::{LatencyPercentiles, MetricsWindow};
use crate::store::records::{AgentUsage, ErrorEvent, ReferrerCount, RetentionCohort, UserRecord};
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Figures for one look-back window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowMetrics {
    pub window: MetricsWindow,
    /// Window start, as sent to the datastore.
    pub since: String,
    pub visitors: u64,
    pub new_users: u64,
    pub consented: u64,
    pub invokes: u64,
    pub errors: u64,
    pub tokens: u64,
    pub cost: f64,
    /// Only collected in the extended variant.
    pub returning_users: Option<u64>,
    pub returning_rate: Option<f64>,
}

/// Result of one aggregator run.
///
/// Serializes to the flat object the dashboard reads: `h24`, `visitors24h`, `cost7d`,
/// `latencyP95` and so on.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub windows: Vec<WindowMetrics>,
    pub active_sessions: u64,
    pub latency: LatencyPercentiles,
    pub top_agents: Vec<AgentUsage>,
    pub top_referrers: Vec<ReferrerCount>,
    pub recent_errors: Vec<ErrorEvent>,
    pub recent_users: Vec<UserRecord>,
    pub retention: Option<Vec<RetentionCohort>>,
    pub generated_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    pub fn window(&self, window: MetricsWindow) -> Option<&WindowMetrics> {
        self.windows.iter().find(|w| w.window == window)
    }
}

impl Serialize for MetricsSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for w in &self.windows {
            map.serialize_entry(w.window.boundary_key(), &w.since)?;
        }
        for w in &self.windows {
            let s = w.window.suffix();
            map.serialize_entry(&format!("visitors{}", s), &w.visitors)?;
            map.serialize_entry(&format!("newUsers{}", s), &w.new_users)?;
            map.serialize_entry(&format!("consented{}", s), &w.consented)?;
            map.serialize_entry(&format!("invokes{}", s), &w.invokes)?;
            map.serialize_entry(&format!("errors{}", s), &w.errors)?;
            map.serialize_entry(&format!("tokens{}", s), &w.tokens)?;
            map.serialize_entry(&format!("cost{}", s), &w.cost)?;
            if let Some(n) = w.returning_users {
                map.serialize_entry(&format!("returningUsers{}", s), &n)?;
                map.serialize_entry(&format!("returningRate{}", s), &w.returning_rate.unwrap_or(0.0))?;
            }
        }
        map.serialize_entry("activeSessions", &self.active_sessions)?;
        map.serialize_entry("latencyP50", &self.latency.p50)?;
        map.serialize_entry("latencyP95", &self.latency.p95)?;
        map.serialize_entry("topAgents", &self.top_agents)?;
        map.serialize_entry("topReferrers", &self.top_referrers)?;
        map.serialize_entry("recentErrors", &self.recent_errors)?;
        map.serialize_entry("recentUsers", &self.recent_users)?;
        if let Some(ref retention) = self.retention {
            map.serialize_entry("retention", retention)?;
        }
        map.serialize_entry("generatedAt", &self.generated_at)?;
        map.end()
    }
}
