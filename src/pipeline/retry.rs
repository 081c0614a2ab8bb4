use std::io::{self, BufRead, Write};
use std::time::Duration;

use crate::error::PipelineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Abort,
}

/// Decides what happens after a retryable chunk failure. `attempt` counts from 1.
pub trait RetryPolicy {
    fn decide(&mut self, attempt: u32, err: &PipelineError) -> RetryDecision;
}

/// Up to `max_attempts` tries per chunk, with linear backoff between them.
#[derive(Clone, Debug)]
pub struct FixedRetry {
    max_attempts: u32,
    backoff: Duration,
}

impl FixedRetry {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl RetryPolicy for FixedRetry {
    fn decide(&mut self, attempt: u32, _err: &PipelineError) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::Abort;
        }
        RetryDecision::Retry {
            delay: self.backoff.saturating_mul(attempt),
        }
    }
}

/// Asks the operator on every failure.
pub struct InteractiveRetry<R, W> {
    input: R,
    output: W,
}

impl InteractiveRetry<io::StdinLock<'static>, io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> InteractiveRetry<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> RetryPolicy for InteractiveRetry<R, W> {
    fn decide(&mut self, attempt: u32, err: &PipelineError) -> RetryDecision {
        let _ = writeln!(self.output, "Request failed (attempt {attempt}): {err}");
        let _ = write!(self.output, "Retry? (y/n): ");
        let _ = self.output.flush();

        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(n) if n > 0 => match line.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => RetryDecision::Retry {
                    delay: Duration::ZERO,
                },
                _ => RetryDecision::Abort,
            },
            _ => RetryDecision::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err() -> PipelineError {
        PipelineError::MalformedResponse("no array".to_string())
    }

    #[test]
    fn fixed_retry_backs_off_then_aborts() {
        let mut p = FixedRetry::new(3, Duration::from_millis(100));
        assert_eq!(
            p.decide(1, &err()),
            RetryDecision::Retry {
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            p.decide(2, &err()),
            RetryDecision::Retry {
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(p.decide(3, &err()), RetryDecision::Abort);
    }

    #[test]
    fn single_attempt_never_retries() {
        let mut p = FixedRetry::new(0, Duration::ZERO);
        assert_eq!(p.decide(1, &err()), RetryDecision::Abort);
    }

    #[test]
    fn interactive_answers() {
        let mut out = Vec::new();
        let mut p = InteractiveRetry::new(" Y \nyes\nn\n".as_bytes(), &mut out);
        assert!(matches!(p.decide(1, &err()), RetryDecision::Retry { .. }));
        assert!(matches!(p.decide(2, &err()), RetryDecision::Retry { .. }));
        assert_eq!(p.decide(3, &err()), RetryDecision::Abort);
        // input exhausted
        assert_eq!(p.decide(4, &err()), RetryDecision::Abort);
        drop(p);

        let shown = String::from_utf8(out).expect("utf8");
        assert!(shown.contains("Request failed (attempt 1): malformed response: no array"));
        assert_eq!(shown.matches("Retry? (y/n): ").count(), 4);
    }
}
