use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// One recorded service operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationRecord {
    pub operation: String,
    pub duration_ms: u64,
    pub result_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated timings surfaced through the statistics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct OperationStats {
    pub total_operations: u64,
    pub by_operation: HashMap<String, u64>,
    pub average_duration_ms: f64,
    pub p95_duration_ms: u64,
    pub p99_duration_ms: u64,
    pub slowest: Vec<OperationRecord>,
}

/// Records per-operation timings and counters.
///
/// Keeps the most recent thousand records; older entries are shed in
/// blocks so long-running deployments stay bounded.
pub struct MetricsCollector {
    records: Arc<RwLock<Vec<OperationRecord>>>,
    durations: Arc<RwLock<Vec<u64>>>,
    start_time: Instant,
}

const MAX_RECORDS: usize = 1000;
const DRAIN_BLOCK: usize = 100;

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            durations: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
        }
    }

    pub async fn record_operation(
        &self,
        operation: &str,
        duration: Duration,
        result_count: usize,
    ) {
        let record = OperationRecord {
            operation: operation.to_string(),
            duration_ms: duration.as_millis() as u64,
            result_count,
            timestamp: Utc::now(),
        };

        let mut records = self.records.write().await;
        records.push(record);
        if records.len() > MAX_RECORDS {
            records.drain(0..DRAIN_BLOCK);
        }
        drop(records);

        let mut durations = self.durations.write().await;
        durations.push(duration.as_millis() as u64);
        if durations.len() > MAX_RECORDS {
            durations.drain(0..DRAIN_BLOCK);
        }

        debug!(
            "{} completed in {}ms ({} results)",
            operation,
            duration.as_millis(),
            result_count
        );
    }

    pub async fn stats(&self) -> OperationStats {
        let records = self.records.read().await;
        let durations = self.durations.read().await;

        let total_operations = records.len() as u64;
        let mut by_operation: HashMap<String, u64> = HashMap::new();
        for record in records.iter() {
            *by_operation.entry(record.operation.clone()).or_default() += 1;
        }

        let average_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<u64>() as f64 / durations.len() as f64
        };

        let mut sorted = durations.clone();
        sorted.sort_unstable();

        let mut slowest: Vec<OperationRecord> = records.clone();
        slowest.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));
        slowest.truncate(10);

        OperationStats {
            total_operations,
            by_operation,
            average_duration_ms,
            p95_duration_ms: percentile(&sorted, 0.95),
            p99_duration_ms: percentile(&sorted, 0.99),
            slowest,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn percentile(sorted: &[u64], fraction: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() as f64 * fraction) as usize).min(sorted.len() - 1);
    sorted[idx]
}

/// Times one operation and records it on completion.
pub struct OperationTimer {
    start: Instant,
    collector: Arc<MetricsCollector>,
    operation: String,
}

impl OperationTimer {
    pub fn new(collector: Arc<MetricsCollector>, operation: &str) -> Self {
        Self {
            start: Instant::now(),
            collector,
            operation: operation.to_string(),
        }
    }

    pub async fn finish(self, result_count: usize) {
        let duration = self.start.elapsed();
        self.collector
            .record_operation(&self.operation, duration, result_count)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_records_aggregate_into_stats() {
        let collector = MetricsCollector::new();

        collector
            .record_operation("store_content", Duration::from_millis(50), 1)
            .await;
        collector
            .record_operation("search_content", Duration::from_millis(25), 5)
            .await;
        collector
            .record_operation("search_content", Duration::from_millis(10), 0)
            .await;

        let stats = collector.stats().await;
        assert_eq!(stats.total_operations, 3);
        assert_eq!(stats.by_operation["search_content"], 2);
        assert_eq!(stats.by_operation["store_content"], 1);
        assert!(stats.average_duration_ms > 0.0);
        assert_eq!(stats.slowest[0].operation, "store_content");
    }

    #[tokio::test]
    async fn test_empty_collector_reports_zeros() {
        let stats = MetricsCollector::new().stats().await;
        assert_eq!(stats.total_operations, 0);
        assert_eq!(stats.average_duration_ms, 0.0);
        assert_eq!(stats.p95_duration_ms, 0);
    }

    #[tokio::test]
    async fn test_record_buffer_stays_bounded() {
        let collector = MetricsCollector::new();
        for _ in 0..(MAX_RECORDS + 1) {
            collector
                .record_operation("get_content", Duration::from_millis(1), 1)
                .await;
        }

        let stats = collector.stats().await;
        assert_eq!(
            stats.total_operations,
            (MAX_RECORDS + 1 - DRAIN_BLOCK) as u64
        );
    }

    #[tokio::test]
    async fn test_operation_timer_records() {
        let collector = Arc::new(MetricsCollector::new());
        let timer = OperationTimer::new(collector.clone(), "impact_analysis");

        sleep(Duration::from_millis(10)).await;
        timer.finish(4).await;

        let stats = collector.stats().await;
        assert_eq!(stats.total_operations, 1);
        assert!(stats.average_duration_ms >= 10.0);
        assert_eq!(stats.slowest[0].result_count, 4);
    }
}
