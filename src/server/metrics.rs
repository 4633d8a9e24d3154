//! Prometheus metrics for the engine.
//!
//! Gauges are refreshed from the stats snapshots on every scrape.

use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};

use crate::cache::CacheStats;
use crate::monitor::MonitorStatus;
use crate::preload::SchedulerStats;

pub struct Metrics {
    registry: Registry,
    cache_entries: IntGauge,
    cache_bytes: IntGauge,
    cache_budget_bytes: IntGauge,
    cache_hit_rate: Gauge,
    cache_evictions: IntCounter,
    pressure_level: IntGauge,
    free_memory_bytes: IntGauge,
    latency_p50_seconds: Gauge,
    stalled_operations: IntCounter,
    queue_depth: IntGauge,
    in_flight: IntGauge,
    prefetch_failures: IntCounter,
}

fn register<C>(registry: &Registry, collector: C) -> Result<C, prometheus::Error>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

/// Bring a counter up to a cumulative total read elsewhere.
fn catch_up(counter: &IntCounter, total: u64) {
    let seen = counter.get();
    if total > seen {
        counter.inc_by(total - seen);
    }
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("photo_preload".into()), None)?;
        Ok(Self {
            cache_entries: register(
                &registry,
                IntGauge::new("cache_entries", "Decoded images resident in the cache")?,
            )?,
            cache_bytes: register(
                &registry,
                IntGauge::new("cache_bytes", "Bytes held by resident images")?,
            )?,
            cache_budget_bytes: register(
                &registry,
                IntGauge::new("cache_budget_bytes", "Current cache byte budget")?,
            )?,
            cache_hit_rate: register(
                &registry,
                Gauge::new("cache_hit_rate", "Fraction of lookups served from cache")?,
            )?,
            cache_evictions: register(
                &registry,
                IntCounter::new("cache_evictions_total", "Entries evicted from the cache")?,
            )?,
            pressure_level: register(
                &registry,
                IntGauge::new("memory_pressure_level", "0=low 1=medium 2=high 3=critical")?,
            )?,
            free_memory_bytes: register(
                &registry,
                IntGauge::new("free_memory_bytes", "Free memory at the last sample")?,
            )?,
            latency_p50_seconds: register(
                &registry,
                Gauge::new("operation_latency_p50_seconds", "Median recent operation latency")?,
            )?,
            stalled_operations: register(
                &registry,
                IntCounter::new("stalled_operations_total", "Operations over the stall threshold")?,
            )?,
            queue_depth: register(
                &registry,
                IntGauge::new("preload_queue_depth", "Prefetch tasks waiting")?,
            )?,
            in_flight: register(
                &registry,
                IntGauge::new("preload_in_flight", "Prefetch decodes running")?,
            )?,
            prefetch_failures: register(
                &registry,
                IntCounter::new("preload_failures_total", "Prefetches that failed after retry")?,
            )?,
            registry,
        })
    }

    pub fn observe(&self, cache: &CacheStats, scheduler: &SchedulerStats, monitor: &MonitorStatus) {
        self.cache_entries.set(cache.entry_count as i64);
        self.cache_bytes.set(cache.total_bytes as i64);
        self.cache_budget_bytes.set(cache.budget_bytes as i64);
        self.cache_hit_rate.set(cache.hit_rate);
        catch_up(&self.cache_evictions, cache.evictions);

        self.pressure_level.set(monitor.pressure.level() as i64);
        self.free_memory_bytes.set(monitor.free_bytes as i64);
        self.latency_p50_seconds
            .set(monitor.recent_latency_p50.as_secs_f64());
        catch_up(&self.stalled_operations, monitor.stalled_operations);

        self.queue_depth.set(scheduler.queued as i64);
        self.in_flight.set(scheduler.in_flight as i64);
        catch_up(&self.prefetch_failures, scheduler.total_failed);
    }

    /// Text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MemoryPressureLevel;

    #[test]
    fn test_render_includes_observed_values() {
        let metrics = Metrics::new().unwrap();
        let cache = CacheStats {
            entry_count: 3,
            total_bytes: 300,
            budget_bytes: 1000,
            evictions: 7,
            ..Default::default()
        };
        let scheduler = SchedulerStats {
            queued: 2,
            ..Default::default()
        };
        let monitor = MonitorStatus {
            pressure: MemoryPressureLevel::High,
            free_bytes: 10,
            total_bytes: 100,
            recent_latency_p50: std::time::Duration::from_millis(20),
            stalled_operations: 1,
            samples: 4,
            sample_failures: 0,
            transitions: 1,
        };

        metrics.observe(&cache, &scheduler, &monitor);
        metrics.observe(&cache, &scheduler, &monitor);
        let text = metrics.render().unwrap();

        assert!(text.contains("photo_preload_cache_entries 3"));
        assert!(text.contains("photo_preload_cache_evictions_total 7"));
        assert!(text.contains("photo_preload_memory_pressure_level 2"));
        assert!(text.contains("photo_preload_preload_queue_depth 2"));
    }
}
