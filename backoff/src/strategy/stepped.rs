use std::time::Duration;

/// A Stepped strategy walks through a configured list of delays, one step per attempt. Once the
/// list is exhausted it keeps returning the last step. An empty list yields a zero delay.
///
/// `reset` moves the schedule back to the first step, typically after a successful attempt.
#[derive(Debug, Clone)]
pub struct Stepped {
    steps: Vec<Duration>,
    current_attempt: usize,
}

impl Stepped {
    /// Creates a new Stepped strategy from the given delays.
    pub fn new(steps: Vec<Duration>) -> Self {
        Self {
            steps,
            current_attempt: 0,
        }
    }

    /// Creates a Stepped strategy from delays expressed in whole seconds.
    pub fn from_secs(steps: &[u64]) -> Self {
        Self::new(steps.iter().copied().map(Duration::from_secs).collect())
    }

    /// Resets the schedule to its first step.
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    /// Returns how many delays have been handed out since the last reset.
    pub fn current_attempt(&self) -> usize {
        self.current_attempt
    }

    /// Returns the delay the next call to `next` would yield, without advancing.
    pub fn peek(&self) -> Duration {
        let idx = self.current_attempt.min(self.steps.len().saturating_sub(1));
        self.steps.get(idx).copied().unwrap_or_default()
    }
}

impl Iterator for Stepped {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let delay = self.peek();
        self.current_attempt = self.current_attempt.saturating_add(1);
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_steps_then_holds_last() {
        let mut stepped = Stepped::from_secs(&[5, 10, 30, 60, 120, 300]);
        let delays: Vec<u64> = stepped.by_ref().take(8).map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 30, 60, 120, 300, 300, 300]);
        assert_eq!(stepped.current_attempt(), 8);
    }

    #[test]
    fn reset_starts_over() {
        let mut stepped = Stepped::new(vec![Duration::from_millis(1), Duration::from_millis(2)]);
        assert_eq!(stepped.next(), Some(Duration::from_millis(1)));
        assert_eq!(stepped.next(), Some(Duration::from_millis(2)));

        stepped.reset();

        assert_eq!(stepped.current_attempt(), 0);
        assert_eq!(stepped.next(), Some(Duration::from_millis(1)));
    }

    #[test]
    fn peek_does_not_advance() {
        let mut stepped = Stepped::from_secs(&[1, 2]);
        assert_eq!(stepped.peek(), Duration::from_secs(1));
        assert_eq!(stepped.peek(), Duration::from_secs(1));
        stepped.next();
        assert_eq!(stepped.peek(), Duration::from_secs(2));
    }

    #[test]
    fn empty_schedule_never_waits() {
        let mut stepped = Stepped::new(vec![]);
        assert_eq!(stepped.next(), Some(Duration::ZERO));
        assert_eq!(stepped.next(), Some(Duration::ZERO));
    }
}
