use std::fmt::Display;

use tracing::{info, warn};

type Compensation<'a> = Box<dyn FnOnce() -> Result<(), String> + 'a>;

/// Ordered compensating actions for a multi-system mutation. Compensations
/// run in reverse registration order; their failures are logged, not returned.
pub struct Saga<'a> {
    name: &'static str,
    steps: Vec<(&'static str, Compensation<'a>)>,
}

impl<'a> Saga<'a> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    pub fn push<E, F>(&mut self, step: &'static str, compensation: F)
    where
        E: Display,
        F: FnOnce() -> Result<(), E> + 'a,
    {
        self.steps.push((
            step,
            Box::new(move || compensation().map_err(|err| err.to_string())),
        ));
    }

    /// Discards the compensations once every step has succeeded.
    pub fn commit(self) {}

    /// Returns the number of compensations that failed.
    pub fn compensate(self) -> usize {
        let mut failures = 0;
        for (step, compensation) in self.steps.into_iter().rev() {
            match compensation() {
                Ok(()) => info!(saga = self.name, step, "compensated"),
                Err(err) => {
                    failures += 1;
                    warn!(saga = self.name, step, error = %err, "compensation failed");
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn compensates_in_reverse_and_counts_failures() {
        let order = RefCell::new(Vec::new());
        let mut saga = Saga::new("test");
        saga.push("first", || {
            order.borrow_mut().push("first");
            Ok::<(), String>(())
        });
        saga.push("second", || {
            order.borrow_mut().push("second");
            Err("boom".to_string())
        });
        assert_eq!(saga.compensate(), 1);
        assert_eq!(*order.borrow(), vec!["second", "first"]);
    }

    #[test]
    fn commit_skips_compensations() {
        let ran = RefCell::new(false);
        let mut saga = Saga::new("test");
        saga.push("only", || {
            *ran.borrow_mut() = true;
            Ok::<(), String>(())
        });
        saga.commit();
        assert!(!*ran.borrow());
    }
}
