//! Background alert scans.
//!
//! One thread runs [`AlertEngine::run_all`] across every tenant on a fixed
//! cadence, once at startup and whenever [`AlertScanRunnerHandle::trigger`]
//! is called. Failures are logged and retried with bounded exponential
//! backoff; they never propagate.

use std::io;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use stockguard_core::TenantContext;
use stockguard_events::bus::EventBus;
use stockguard_events::notification::StockNotification;

use crate::alerts::AlertEngine;
use crate::config::StockConfig;
use crate::store::InventoryStore;

#[derive(Debug, Clone)]
pub struct AlertScanRunner {
    pub interval: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for AlertScanRunner {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            max_retries: 5,
            base_backoff: Duration::from_millis(250),
        }
    }
}

#[derive(Debug)]
pub struct AlertScanRunnerHandle {
    shutdown: mpsc::Sender<()>,
    trigger: mpsc::SyncSender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl AlertScanRunnerHandle {
    /// Request a scan. Triggers coalesce: while one is pending, more are
    /// no-ops.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    /// Stop the runner thread and wait for it.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl AlertScanRunner {
    pub fn from_config(config: &StockConfig) -> Self {
        Self {
            interval: config.scan_interval(),
            max_retries: config.scan_max_retries,
            base_backoff: config.scan_base_backoff(),
        }
    }

    pub fn spawn<S, B>(
        &self,
        name: &'static str,
        engine: Arc<AlertEngine<S, B>>,
    ) -> io::Result<AlertScanRunnerHandle>
    where
        S: InventoryStore + 'static,
        B: EventBus<StockNotification> + 'static,
    {
        if self.interval.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "alert scan interval must be positive",
            ));
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::sync_channel::<()>(1);

        let cfg = self.clone();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || runner_loop(name, cfg, shutdown_rx, trigger_rx, engine))?;

        Ok(AlertScanRunnerHandle {
            shutdown: shutdown_tx,
            trigger: trigger_tx,
            join: Some(join),
        })
    }
}

fn runner_loop<S, B>(
    name: &'static str,
    cfg: AlertScanRunner,
    shutdown_rx: mpsc::Receiver<()>,
    trigger_rx: mpsc::Receiver<()>,
    engine: Arc<AlertEngine<S, B>>,
) where
    S: InventoryStore,
    B: EventBus<StockNotification>,
{
    info!(runner = name, interval_secs = cfg.interval.as_secs(), "alert scan runner started");

    let mut next_tick = Instant::now() + cfg.interval;
    let mut pending = true; // run once on startup
    let mut failures: u32 = 0;
    let mut backoff_until: Option<Instant> = None;

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let now = Instant::now();
        if now >= next_tick {
            pending = true;
            while next_tick <= now {
                next_tick += cfg.interval;
            }
        }

        while trigger_rx.try_recv().is_ok() {
            pending = true;
        }

        if let Some(until) = backoff_until {
            if Instant::now() < until {
                thread::sleep(Duration::from_millis(50));
                continue;
            }
            backoff_until = None;
        }

        if !pending {
            let sleep_for = next_tick
                .saturating_duration_since(Instant::now())
                .min(Duration::from_millis(250));
            thread::sleep(sleep_for);
            continue;
        }

        pending = false;

        match engine.run_all(&TenantContext::empty(), Utc::now()) {
            Ok(report) => {
                failures = 0;
                let totals = report.totals();
                if totals.failed > 0 {
                    warn!(runner = name, failed = totals.failed, "alert scan finished with failures");
                }
            }
            Err(e) => {
                warn!(runner = name, error = %e, "alert scan failed");
                failures += 1;
                if failures <= cfg.max_retries {
                    pending = true;
                    backoff_until = Some(Instant::now() + backoff(cfg.base_backoff, failures));
                } else {
                    failures = 0;
                }
            }
        }
    }

    info!(runner = name, "alert scan runner stopped");
}

/// `base * 2^(attempt-1)`, capped at ten seconds.
fn backoff(base: Duration, attempt: u32) -> Duration {
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    let ms = base.as_millis().saturating_mul(pow as u128);
    Duration::from_millis(ms.min(10_000) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    use stockguard_core::TenantId;
    use stockguard_events::in_memory_bus::InMemoryEventBus;
    use stockguard_inventory::Product;

    use crate::store::InMemoryInventoryStore;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(250);
        assert_eq!(backoff(base, 1), Duration::from_millis(250));
        assert_eq!(backoff(base, 3), Duration::from_millis(1000));
        assert_eq!(backoff(base, 20), Duration::from_secs(10));
    }

    #[test]
    fn zero_interval_is_refused() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let engine = Arc::new(AlertEngine::new(store, Arc::new(InMemoryEventBus::<StockNotification>::new())));
        let runner = AlertScanRunner {
            interval: Duration::ZERO,
            ..AlertScanRunner::default()
        };
        let err = runner.spawn("alert-scan-zero", engine).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn scans_on_startup_and_on_trigger() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let bus = Arc::new(InMemoryEventBus::<StockNotification>::new());
        let notifications = bus.subscribe();
        let tenant = TenantId::new();
        store.insert_product(Product::new(tenant, "Salt", "SLT", 1, 5)).unwrap();

        let engine = Arc::new(AlertEngine::new(store.clone(), bus));
        let runner = AlertScanRunner {
            interval: Duration::from_secs(3600),
            ..AlertScanRunner::default()
        };
        let handle = runner.spawn("alert-scan-test", engine).unwrap();

        let first = notifications.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.tenant_id, tenant);

        let other = TenantId::new();
        store.insert_product(Product::new(other, "Sugar", "SGR", 0, 5)).unwrap();
        handle.trigger();
        let second = notifications.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(second.tenant_id, other);

        handle.shutdown();
    }
}
