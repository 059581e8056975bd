use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder, prelude::*};
use tracing::debug;

pub const DEFAULT_WORKERS: usize = 8;

pub struct TaskPool {
    pool: ThreadPool,
    workers: usize,
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("workers", &self.workers)
            .finish()
    }
}

impl TaskPool {
    pub fn new(workers: usize) -> Result<Self, ThreadPoolBuildError> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("scorewave-synth-{index}"))
            .build()?;
        debug!(workers, "task pool started");
        Ok(Self { pool, workers })
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn map<T, R, F>(&self, jobs: &[T], job: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        match jobs {
            [] => Vec::new(),
            [single] => vec![job(single)],
            _ => self.pool.install(|| jobs.par_iter().map(&job).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_keep_submission_order() {
        let pool = TaskPool::new(4).expect("pool should build");
        let jobs: Vec<u64> = (0..257).collect();
        let results = pool.map(&jobs, |job| {
            if job % 7 == 0 {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            job * 3
        });
        assert_eq!(results, jobs.iter().map(|job| job * 3).collect::<Vec<_>>());
    }

    #[test]
    fn zero_workers_is_clamped_to_one() {
        let pool = TaskPool::new(0).expect("pool should build");
        assert_eq!(pool.workers(), 1);
        assert_eq!(pool.map(&[1, 2], |value| value + 1), vec![2, 3]);
    }
}
