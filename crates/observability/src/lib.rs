use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

#[derive(Debug, Default)]
pub struct AppMetrics {
    turns_total: AtomicU64,
    faq_answers_total: AtomicU64,
    flow_starts_total: AtomicU64,
    flow_steps_total: AtomicU64,
    flow_completions_total: AtomicU64,
    fallback_total: AtomicU64,
    total_latency_micros: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub turns_total: u64,
    pub faq_answers_total: u64,
    pub flow_starts_total: u64,
    pub flow_steps_total: u64,
    pub flow_completions_total: u64,
    pub fallback_total: u64,
    pub avg_latency_micros: f64,
}

impl AppMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_turn(&self) {
        self.turns_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_faq_answer(&self) {
        self.faq_answers_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_flow_start(&self) {
        self.flow_starts_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts next/back transitions that emitted a step.
    pub fn inc_flow_step(&self) {
        self.flow_steps_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_flow_completion(&self) {
        self.flow_completions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fallback(&self) {
        self.fallback_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let turns = self.turns_total.load(Ordering::Relaxed);
        let latency = self.total_latency_micros.load(Ordering::Relaxed);

        MetricsSnapshot {
            turns_total: turns,
            faq_answers_total: self.faq_answers_total.load(Ordering::Relaxed),
            flow_starts_total: self.flow_starts_total.load(Ordering::Relaxed),
            flow_steps_total: self.flow_steps_total.load(Ordering::Relaxed),
            flow_completions_total: self.flow_completions_total.load(Ordering::Relaxed),
            fallback_total: self.fallback_total.load(Ordering::Relaxed),
            avg_latency_micros: if turns == 0 {
                0.0
            } else {
                latency as f64 / turns as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,tmpa_api=info,tmpa_agents=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .init();
    });
}
