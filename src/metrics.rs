//! Prometheus metrics registry: six counters, each labeled by `process`
//! (`"all"` plus one series per observed process name), fed once per tick
//! by `consumer::MetricsConsumer` from a Prometheus-mode Snapshot.

use prometheus::{opts, CounterVec, Encoder, Registry, TextEncoder};

use crate::error::Result;

pub struct DnsMetrics {
    registry: Registry,
    a_queries: CounterVec,
    aaaa_queries: CounterVec,
    ptr_queries: CounterVec,
    servfail_responses: CounterVec,
    nxdomain_responses: CounterVec,
    noerror_responses: CounterVec,
}

impl DnsMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let a_queries = CounterVec::new(
            opts!("a_queries", "Total number of A queries observed"),
            &["process"],
        )?;
        let aaaa_queries = CounterVec::new(
            opts!("aaaa_queries", "Total number of AAAA queries observed"),
            &["process"],
        )?;
        let ptr_queries = CounterVec::new(
            opts!("ptr_queries", "Total number of PTR queries observed"),
            &["process"],
        )?;
        let servfail_responses = CounterVec::new(
            opts!(
                "servfail_responses",
                "Total number of SERVFAIL responses observed"
            ),
            &["process"],
        )?;
        let nxdomain_responses = CounterVec::new(
            opts!(
                "nxdomain_responses",
                "Total number of NXDOMAIN responses observed"
            ),
            &["process"],
        )?;
        let noerror_responses = CounterVec::new(
            opts!(
                "noerror_responses",
                "Total number of NOERROR responses observed"
            ),
            &["process"],
        )?;

        registry.register(Box::new(a_queries.clone()))?;
        registry.register(Box::new(aaaa_queries.clone()))?;
        registry.register(Box::new(ptr_queries.clone()))?;
        registry.register(Box::new(servfail_responses.clone()))?;
        registry.register(Box::new(nxdomain_responses.clone()))?;
        registry.register(Box::new(noerror_responses.clone()))?;

        Ok(DnsMetrics {
            registry,
            a_queries,
            aaaa_queries,
            ptr_queries,
            servfail_responses,
            nxdomain_responses,
            noerror_responses,
        })
    }

    /// Adds a per-tick delta for one process label (`"all"` included by the
    /// caller as its own pseudo-process). Snapshot counts are deltas already
    /// (the Correlator clears its transaction map on every Prometheus
    /// tick), so the exported counters stay monotonically non-decreasing.
    pub fn add_delta(
        &self,
        process: &str,
        a: u64,
        aaaa: u64,
        ptr: u64,
        servfail: u64,
        nxdomain: u64,
        noerror: u64,
    ) {
        self.a_queries.with_label_values(&[process]).inc_by(a as f64);
        self.aaaa_queries
            .with_label_values(&[process])
            .inc_by(aaaa as f64);
        self.ptr_queries
            .with_label_values(&[process])
            .inc_by(ptr as f64);
        self.servfail_responses
            .with_label_values(&[process])
            .inc_by(servfail as f64);
        self.nxdomain_responses
            .with_label_values(&[process])
            .inc_by(nxdomain as f64);
        self.noerror_responses
            .with_label_values(&[process])
            .inc_by(noerror as f64);
    }

    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_deltas() {
        let metrics = DnsMetrics::new().unwrap();
        metrics.add_delta("all", 3, 0, 0, 0, 0, 3);
        metrics.add_delta("all", 2, 0, 0, 0, 0, 2);
        let text = metrics.export().unwrap();
        assert!(text.contains("a_queries{process=\"all\"} 5"));
    }

    #[test]
    fn per_process_and_all_labels_are_independent_series() {
        let metrics = DnsMetrics::new().unwrap();
        metrics.add_delta("all", 10, 0, 0, 0, 0, 0);
        metrics.add_delta("curl", 6, 0, 0, 0, 0, 0);
        metrics.add_delta("dig", 4, 0, 0, 0, 0, 0);
        let text = metrics.export().unwrap();
        assert!(text.contains("a_queries{process=\"all\"} 10"));
        assert!(text.contains("a_queries{process=\"curl\"} 6"));
        assert!(text.contains("a_queries{process=\"dig\"} 4"));
    }
}
