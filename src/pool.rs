//! Bounded worker pool.

use crate::error::BatchError;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;

/// Worker count for a host with `cores` logical cores, keeping `reserved`
/// of them free. Never below one.
pub fn worker_count(cores: usize, reserved: usize) -> usize {
    cores.saturating_sub(reserved).max(1)
}

/// [`worker_count`] for the current host.
pub fn available_workers(reserved: usize) -> usize {
    worker_count(num_cpus::get(), reserved)
}

/// Fixed-size pool of worker threads.
pub struct WorkerPool {
    pool: ThreadPool,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self, BatchError> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("h265batch-worker-{}", i))
            .build()?;
        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `f` over every job, at most [`workers`](Self::workers) at a time,
    /// starting jobs in submission order.
    ///
    /// Returns one entry per job in submission order. A job that panics
    /// yields `Err` with the panic message; the remaining jobs still run.
    pub fn run<J, R, F>(&self, jobs: &[J], f: F) -> Vec<Result<R, String>>
    where
        J: Sync,
        R: Send,
        F: Fn(&J) -> R + Sync,
    {
        let (tx, rx) = mpsc::channel::<(usize, Result<R, String>)>();
        let f = &f;

        self.pool.scope_fifo(|scope| {
            for (index, job) in jobs.iter().enumerate() {
                let tx = tx.clone();
                scope.spawn_fifo(move |_| {
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| f(job))).map_err(panic_message);
                    let _ = tx.send((index, outcome));
                });
            }
        });
        drop(tx);

        let mut slots: Vec<Option<Result<R, String>>> = jobs.iter().map(|_| None).collect();
        for (index, outcome) in rx {
            slots[index] = Some(outcome);
        }
        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err("job produced no result".to_string())))
            .collect()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn worker_count_reserves_cores() {
        assert_eq!(worker_count(8, 2), 6);
        assert_eq!(worker_count(2, 2), 1);
        assert_eq!(worker_count(1, 5), 1);
        assert_eq!(worker_count(4, 0), 4);
    }

    #[test]
    fn results_follow_submission_order() {
        let pool = WorkerPool::new(3).unwrap();
        let jobs: Vec<u64> = (0..20).collect();
        let results = pool.run(&jobs, |n| {
            thread::sleep(Duration::from_millis(20 - n));
            n * 2
        });
        let values: Vec<u64> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, jobs.iter().map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn never_exceeds_worker_bound() {
        let pool = WorkerPool::new(2).unwrap();
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let jobs: Vec<usize> = (0..12).collect();

        pool.run(&jobs, |_| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(15));
            running.fetch_sub(1, Ordering::SeqCst);
        });

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn panic_is_isolated_to_its_job() {
        let pool = WorkerPool::new(2).unwrap();
        let jobs = vec!["ok", "boom", "ok"];
        let results = pool.run(&jobs, |name| {
            if *name == "boom" {
                panic!("encoder wrapper exploded");
            }
            name.len()
        });

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], Ok(2));
        assert_eq!(results[1], Err("encoder wrapper exploded".to_string()));
        assert_eq!(results[2], Ok(2));
    }

    #[test]
    fn empty_job_list() {
        let pool = WorkerPool::new(1).unwrap();
        let results: Vec<Result<(), String>> = pool.run(&Vec::<u8>::new(), |_| ());
        assert!(results.is_empty());
    }
}
