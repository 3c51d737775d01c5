use actix::prelude::*;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const RETENTION: Duration = Duration::from_secs(300);

// --- Messages ---

/// End-to-end latency of one chat turn, in milliseconds.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ReportTurnLatency(pub f64);

/// Latency of one text-service call, in milliseconds.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ReportProviderLatency(pub f64);

#[derive(Message)]
#[rtype(result = "SystemHealth")]
pub struct GetSystemHealth;

// --- Data Structures ---

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct LatencyMetrics {
    pub samples: usize,
    pub p95_ms: f64,
    pub mean_ms: f64,
    pub percentage_of_turn: Option<f64>,
}

#[derive(Serialize, Clone, Debug)]
pub struct TimeWindowMetrics {
    pub turn: LatencyMetrics,
    pub provider: LatencyMetrics,
}

#[derive(Serialize, Clone, Debug)]
pub struct SystemHealth {
    pub thirty_seconds: TimeWindowMetrics,
    pub one_minute: TimeWindowMetrics,
    pub five_minutes: TimeWindowMetrics,
}

struct MetricDataPoint {
    timestamp: Instant,
    value: f64,
}

// --- Actor ---

#[derive(Default)]
pub struct HealthActor {
    turn_data: VecDeque<MetricDataPoint>,
    provider_data: VecDeque<MetricDataPoint>,
}

impl HealthActor {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(data: &mut VecDeque<MetricDataPoint>, value: f64) {
        let now = Instant::now();
        while data.front().is_some_and(|dp| now.duration_since(dp.timestamp) > RETENTION) {
            data.pop_front();
        }
        data.push_back(MetricDataPoint { timestamp: now, value });
    }

    fn calculate_window_metrics(&self, window: Duration) -> TimeWindowMetrics {
        let now = Instant::now();

        let calculate_metrics_for = |data: &VecDeque<MetricDataPoint>| -> (usize, f64, f64) {
            let mut values: Vec<f64> = data
                .iter()
                .filter(|dp| now.duration_since(dp.timestamp) < window)
                .map(|dp| dp.value)
                .collect();

            if values.is_empty() {
                return (0, 0.0, 0.0);
            }

            values.sort_by(|a, b| a.total_cmp(b));

            let p95_index = (values.len() as f64 * 0.95).floor() as usize;
            let p95 = values[p95_index.min(values.len() - 1)];
            let mean = values.iter().sum::<f64>() / values.len() as f64;

            (values.len(), p95, mean)
        };

        let (turn_samples, turn_p95, turn_mean) = calculate_metrics_for(&self.turn_data);
        let (provider_samples, provider_p95, provider_mean) = calculate_metrics_for(&self.provider_data);

        TimeWindowMetrics {
            turn: LatencyMetrics {
                samples: turn_samples,
                p95_ms: turn_p95,
                mean_ms: turn_mean,
                percentage_of_turn: None,
            },
            provider: LatencyMetrics {
                samples: provider_samples,
                p95_ms: provider_p95,
                mean_ms: provider_mean,
                percentage_of_turn: Some(if turn_mean > 0.0 {
                    (provider_mean / turn_mean) * 100.0
                } else {
                    0.0
                }),
            },
        }
    }
}

impl Actor for HealthActor {
    type Context = Context<Self>;
}

// --- Handlers ---

impl Handler<ReportTurnLatency> for HealthActor {
    type Result = ();
    fn handle(&mut self, msg: ReportTurnLatency, _ctx: &mut Context<Self>) {
        Self::record(&mut self.turn_data, msg.0);
    }
}

impl Handler<ReportProviderLatency> for HealthActor {
    type Result = ();
    fn handle(&mut self, msg: ReportProviderLatency, _ctx: &mut Context<Self>) {
        Self::record(&mut self.provider_data, msg.0);
    }
}

impl Handler<GetSystemHealth> for HealthActor {
    type Result = MessageResult<GetSystemHealth>;

    fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Context<Self>) -> Self::Result {
        MessageResult(SystemHealth {
            thirty_seconds: self.calculate_window_metrics(Duration::from_secs(30)),
            one_minute: self.calculate_window_metrics(Duration::from_secs(60)),
            five_minutes: self.calculate_window_metrics(RETENTION),
        })
    }
}
