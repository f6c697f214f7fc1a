use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Fixed-attempt, fixed-delay retry. Returns the first success or the last error.
#[derive(Clone)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("attempts", &self.attempts)
            .field("delay", &self.delay)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5))
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn sleeper(&self) -> Arc<dyn Sleeper> {
        self.sleeper.clone()
    }

    /// Runs `op` up to `attempts` times, sleeping only between attempts.
    /// `op` receives the zero-based attempt number.
    pub fn run<T, E, F>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 >= self.attempts => {
                    warn!(operation = label, attempts = self.attempts, error = %err, "retries exhausted");
                    return Err(err);
                }
                Err(err) => {
                    debug!(operation = label, attempt, error = %err, "attempt failed");
                    self.sleeper.sleep(self.delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CountingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl Sleeper for CountingSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.lock().push(duration);
        }
    }

    #[test]
    fn sleeps_only_between_attempts() {
        let sleeper = Arc::new(CountingSleeper::default());
        let policy = RetryPolicy::new(3, Duration::from_millis(7)).with_sleeper(sleeper.clone());
        let result: Result<(), String> = policy.run("op", |attempt| Err(format!("fail {attempt}")));
        assert_eq!(result, Err("fail 2".to_string()));
        assert_eq!(sleeper.slept.lock().len(), 2);
    }

    #[test]
    fn returns_first_success() {
        let sleeper = Arc::new(CountingSleeper::default());
        let policy = RetryPolicy::new(5, Duration::from_millis(1)).with_sleeper(sleeper.clone());
        let result: Result<u32, String> = policy.run("op", |attempt| {
            if attempt < 1 {
                Err("early".to_string())
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(1));
        assert_eq!(sleeper.slept.lock().len(), 1);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        let mut calls = 0;
        let _: Result<(), &str> = policy.run("op", |_| {
            calls += 1;
            Err("no")
        });
        assert_eq!(calls, 1);
    }
}
