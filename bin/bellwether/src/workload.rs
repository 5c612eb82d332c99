use std::time::Duration;

use rand::{rngs::SmallRng, Rng as _, SeedableRng as _};
use rand_distr::{Distribution as _, Pareto};
use tallyho_aggregate::{BucketBounds, Counter, Gauge, Histogram, MetricError, Registry, UpDownCounter};
use tracing::debug;

const ENDPOINTS: &[&str] = &[
    "endpoint:/users",
    "endpoint:/carts",
    "endpoint:/checkout",
    "endpoint:/health",
];

const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// A deterministic synthetic request workload.
///
/// Simulates a small web service: request latencies drawn from a Pareto distribution land in a
/// histogram, with request/error counters, an in-flight up/down counter, and a queue depth gauge
/// alongside. The same seed and target rate always generate the same observations.
pub struct Workload {
    rng: SmallRng,
    latency: Pareto<f64>,
    observations_per_tick: u32,
    request_duration: Histogram,
    requests: Counter,
    errors: Counter,
    in_flight: UpDownCounter,
    queue_depth: Gauge,
    in_flight_level: u32,
}

impl Workload {
    /// Registers the workload's instruments and returns a runnable workload.
    ///
    /// # Errors
    ///
    /// If any instrument registration fails, an error is returned.
    pub fn register(registry: &Registry, seed: u64, target_rate: u32) -> Result<Self, MetricError> {
        // Microsecond buckets from 25ms out to ~6.4s, doubling each step.
        let bounds = BucketBounds::exponential(25_000.0, 2.0, 9)?;
        let request_duration = registry.register_histogram(
            "request_duration_us",
            "Time taken to serve a synthetic request, in microseconds.",
            bounds,
        )?;

        let requests = registry.register_counter("requests_total", "Total synthetic requests served.")?;
        let errors = registry.register_counter("request_errors_total", "Total synthetic requests that failed.")?;
        let in_flight = registry.register_up_down_counter("requests_in_flight", "Synthetic requests in flight.")?;
        let queue_depth = registry.register_gauge("accept_queue_depth", "Depth of the synthetic accept queue.")?;

        // Pareto(1, 1) scaled to microseconds gives a big hump of fast requests and a long tail of
        // slow ones.
        let latency = Pareto::new(1.0, 1.0).map_err(|_| MetricError::InvalidConfiguration {
            reason: "latency distribution parameters must be positive",
        })?;

        Ok(Self {
            rng: SmallRng::seed_from_u64(seed),
            latency,
            observations_per_tick: (target_rate / 10).max(1),
            request_duration,
            requests,
            errors,
            in_flight,
            queue_depth,
            in_flight_level: 0,
        })
    }

    /// Generates observations forever.
    ///
    /// Runs until the task driving it is dropped or aborted.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);

        loop {
            interval.tick().await;
            self.tick();
        }
    }

    fn tick(&mut self) {
        for _ in 0..self.observations_per_tick {
            let endpoint = ENDPOINTS[self.rng.random_range(0..ENDPOINTS.len())];

            let latency_us = (self.latency.sample(&mut self.rng) * 10_000.0).min(10_000_000.0);
            if let Err(e) = self.request_duration.record(latency_us, [endpoint, "env:demo"]) {
                debug!(error = %e, "Failed to record request duration.");
            }

            self.requests.increment([endpoint, "env:demo"]);

            // Roughly 2% of requests fail.
            if self.rng.random_bool(0.02) {
                self.errors.increment([endpoint, "env:demo"]);
            }
        }

        // Drift the in-flight count up and down without going negative.
        let delta: f64 = if self.in_flight_level == 0 || self.rng.random_bool(0.5) {
            self.in_flight_level += 1;
            1.0
        } else {
            self.in_flight_level -= 1;
            -1.0
        };
        if let Err(e) = self.in_flight.add(delta, ["env:demo"]) {
            debug!(error = %e, "Failed to adjust in-flight count.");
        }

        let depth = self.rng.random_range(0..128) as f64;
        if let Err(e) = self.queue_depth.set(depth, ["env:demo"]) {
            debug!(error = %e, "Failed to set queue depth.");
        }
    }
}
