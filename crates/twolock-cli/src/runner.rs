use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use twolock_queue::{ConcurrentQueue, QueueStats};

use crate::config::{ConsumerMode, StressConfig};

#[derive(Debug, Serialize)]
pub struct StressReport {
    pub producers: usize,
    pub consumers: usize,
    pub mode: ConsumerMode,
    pub expected: usize,
    pub received: usize,
    pub missing: usize,
    pub duplicates: usize,
    pub elapsed_ms: f64,
    pub items_per_sec: f64,
    pub queue: QueueStats,
    pub verified: bool,
}

#[derive(Debug, Serialize)]
pub struct SequentialReport {
    pub count: usize,
    pub popped: usize,
    pub in_order: bool,
    pub verified: bool,
}

/// Items consumer `index` pops in quota mode; the remainder goes to the
/// first consumers.
fn quota(total: usize, consumers: usize, index: usize) -> usize {
    total / consumers + usize::from(index < total % consumers)
}

/// Run producers and consumers against one shared queue and check that every
/// pushed value came out exactly once.
pub fn run_stress(config: &StressConfig) -> Result<StressReport> {
    config.validate()?;
    let total = config.total_items();
    let queue: Arc<ConcurrentQueue<usize>> = Arc::new(ConcurrentQueue::new());
    let pause = Duration::from_micros(config.pause_us);
    info!(
        producers = config.producers,
        consumers = config.consumers,
        items = total,
        mode = ?config.mode,
        "starting stress run"
    );

    let start = Instant::now();
    let consumers: Vec<_> = (0..config.consumers)
        .map(|index| {
            let queue = queue.clone();
            let mode = config.mode;
            let share = quota(total, config.consumers, index);
            thread::Builder::new()
                .name(format!("consumer-{index}"))
                .spawn(move || {
                    let mut taken = Vec::new();
                    match mode {
                        ConsumerMode::Quota => {
                            for _ in 0..share {
                                taken.push(queue.wait_and_pop());
                            }
                        }
                        ConsumerMode::Close => {
                            while let Ok(value) = queue.wait_and_pop_or_closed() {
                                taken.push(value);
                            }
                        }
                    }
                    debug!(consumer = index, taken = taken.len(), "consumer done");
                    taken
                })
                .context("Failed to spawn consumer thread")
        })
        .collect::<Result<Vec<_>>>()?;

    let items_per_producer = config.items_per_producer;
    let producers: Vec<_> = (0..config.producers)
        .map(|id| {
            let queue = queue.clone();
            thread::Builder::new()
                .name(format!("producer-{id}"))
                .spawn(move || {
                    for i in 0..items_per_producer {
                        queue.push(id * items_per_producer + i);
                        if !pause.is_zero() {
                            thread::sleep(pause);
                        }
                    }
                })
                .context("Failed to spawn producer thread")
        })
        .collect::<Result<Vec<_>>>()?;

    for handle in producers {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;
    }
    if config.mode == ConsumerMode::Close {
        queue.close();
    }

    let mut seen = HashSet::with_capacity(total);
    let mut received = 0usize;
    let mut duplicates = 0usize;
    for handle in consumers {
        let taken = handle
            .join()
            .map_err(|_| anyhow::anyhow!("consumer thread panicked"))?;
        received += taken.len();
        for value in taken {
            if !seen.insert(value) {
                duplicates += 1;
            }
        }
    }
    let elapsed = start.elapsed();

    let missing = (0..total).filter(|v| !seen.contains(v)).count();
    let verified = missing == 0 && duplicates == 0 && received == total && queue.is_empty();
    if verified {
        info!(received, elapsed_ms = elapsed.as_secs_f64() * 1e3, "stress run verified");
    } else {
        warn!(received, missing, duplicates, "stress run failed verification");
    }

    Ok(StressReport {
        producers: config.producers,
        consumers: config.consumers,
        mode: config.mode,
        expected: total,
        received,
        missing,
        duplicates,
        elapsed_ms: elapsed.as_secs_f64() * 1e3,
        items_per_sec: received as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        queue: queue.stats(),
        verified,
    })
}

/// Push `0..count` from one thread, then drain with `try_pop_into` while the
/// queue reports non-empty.
pub fn run_sequential(count: usize) -> SequentialReport {
    let queue = ConcurrentQueue::new();
    for i in 0..count {
        queue.push(i);
    }

    let mut results = Vec::with_capacity(count);
    while !queue.is_empty() {
        let mut item = 0;
        if queue.try_pop_into(&mut item) {
            results.push(item);
        }
    }

    let in_order = results.iter().copied().eq(0..count);
    SequentialReport {
        count,
        popped: results.len(),
        in_order,
        verified: in_order && results.len() == count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_splits_remainder() {
        let shares: Vec<_> = (0..3).map(|i| quota(10, 3, i)).collect();
        assert_eq!(shares, vec![4, 3, 3]);
        assert_eq!(shares.iter().sum::<usize>(), 10);
    }

    #[test]
    fn default_stress_run_verifies() {
        let report = run_stress(&StressConfig::default()).unwrap();
        assert!(report.verified);
        assert_eq!(report.received, 50);
        assert_eq!(report.queue.pushed, 50);
        assert_eq!(report.queue.popped, 50);
    }

    #[test]
    fn close_mode_with_uneven_split() {
        let config = StressConfig {
            producers: 3,
            consumers: 4,
            items_per_producer: 333,
            mode: ConsumerMode::Close,
            ..Default::default()
        };
        let report = run_stress(&config).unwrap();
        assert!(report.verified);
        assert_eq!(report.missing, 0);
        assert_eq!(report.duplicates, 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = StressConfig {
            producers: 0,
            ..Default::default()
        };
        assert!(run_stress(&config).is_err());
    }

    #[test]
    fn sequential_preserves_order() {
        let report = run_sequential(10);
        assert!(report.verified);
        assert_eq!(report.popped, 10);
    }
}
