/*!
 * Restart Policy
 * Bounded restart decisions with unstable-run counting and backoff
 */

use super::types::{ExitEvent, HaltReason, InstanceState, RestartDecision};
use crate::config::{AppSpec, RestartPolicy};

/// Per-instance restart bookkeeping
///
/// A run shorter than `min_uptime` is unstable. Consecutive unstable runs
/// grow the backoff; once they exceed `max_restarts` the instance is errored.
/// Any run reaching `min_uptime` resets both.
#[derive(Debug, Clone)]
pub struct RestartTracker {
    policy: RestartPolicy,
    autorestart: bool,
    unstable: u32,
}

impl RestartTracker {
    pub fn new(policy: RestartPolicy, autorestart: bool) -> Self {
        Self {
            policy,
            autorestart,
            unstable: 0,
        }
    }

    pub fn for_spec(spec: &AppSpec) -> Self {
        Self::new(spec.restart.clone(), spec.autorestart)
    }

    /// Decide what happens after an exit
    pub fn on_exit(&mut self, exit: &ExitEvent) -> RestartDecision {
        if !self.autorestart {
            return RestartDecision::Halt {
                state: InstanceState::Stopped,
                reason: HaltReason::AutorestartDisabled,
            };
        }

        if let Some(code) = exit.code {
            if self.policy.stop_exit_codes.contains(&code) {
                return RestartDecision::Halt {
                    state: InstanceState::Stopped,
                    reason: HaltReason::StopExitCode { code },
                };
            }
        }

        if exit.uptime >= self.policy.min_uptime {
            self.unstable = 0;
            return RestartDecision::Restart {
                attempt: 1,
                delay: self.policy.backoff.delay_for_attempt(1),
            };
        }

        self.unstable = self.unstable.saturating_add(1);
        if self.unstable > self.policy.max_restarts {
            return RestartDecision::Halt {
                state: InstanceState::Errored,
                reason: HaltReason::RestartsExhausted {
                    unstable_restarts: self.policy.max_restarts,
                },
            };
        }

        RestartDecision::Restart {
            attempt: self.unstable,
            delay: self.policy.backoff.delay_for_attempt(self.unstable),
        }
    }

    /// Consecutive unstable restarts so far
    #[inline]
    pub fn unstable_restarts(&self) -> u32 {
        self.unstable
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backoff;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn policy(max_restarts: u32) -> RestartPolicy {
        RestartPolicy {
            max_restarts,
            min_uptime: Duration::from_secs(1),
            backoff: Backoff::Fixed {
                delay: Duration::from_millis(10),
            },
            stop_exit_codes: vec![],
        }
    }

    fn quick_crash() -> ExitEvent {
        ExitEvent::with_code(1, Duration::from_millis(5))
    }

    #[test]
    fn test_autorestart_disabled_halts() {
        let mut tracker = RestartTracker::new(policy(5), false);
        let decision = tracker.on_exit(&ExitEvent::with_code(0, Duration::ZERO));
        assert_eq!(
            decision,
            RestartDecision::Halt {
                state: InstanceState::Stopped,
                reason: HaltReason::AutorestartDisabled
            }
        );
    }

    #[test]
    fn test_bounded_unstable_restarts() {
        let mut tracker = RestartTracker::new(policy(3), true);

        for attempt in 1..=3 {
            assert_eq!(
                tracker.on_exit(&quick_crash()),
                RestartDecision::Restart {
                    attempt,
                    delay: Duration::from_millis(10)
                }
            );
        }

        // Should not allow restart after max_restarts
        assert_eq!(
            tracker.on_exit(&quick_crash()),
            RestartDecision::Halt {
                state: InstanceState::Errored,
                reason: HaltReason::RestartsExhausted {
                    unstable_restarts: 3
                }
            }
        );
    }

    #[test]
    fn test_zero_budget_errors_immediately() {
        let mut tracker = RestartTracker::new(policy(0), true);
        assert!(!tracker.on_exit(&quick_crash()).is_restart());
    }

    #[test]
    fn test_stable_run_resets_counter() {
        let mut tracker = RestartTracker::new(policy(2), true);
        tracker.on_exit(&quick_crash());
        tracker.on_exit(&quick_crash());
        assert_eq!(tracker.unstable_restarts(), 2);

        let stable = ExitEvent::with_code(1, Duration::from_secs(5));
        assert!(tracker.on_exit(&stable).is_restart());
        assert_eq!(tracker.unstable_restarts(), 0);

        // Budget is available again
        assert!(tracker.on_exit(&quick_crash()).is_restart());
    }

    #[test]
    fn test_clean_exit_still_restarts() {
        let mut tracker = RestartTracker::new(policy(2), true);
        let decision = tracker.on_exit(&ExitEvent::with_code(0, Duration::from_millis(1)));
        assert!(decision.is_restart());
    }

    #[test]
    fn test_stop_exit_code_halts() {
        let mut p = policy(5);
        p.stop_exit_codes = vec![0, 42];
        let mut tracker = RestartTracker::new(p, true);
        assert_eq!(
            tracker.on_exit(&ExitEvent::with_code(42, Duration::ZERO)),
            RestartDecision::Halt {
                state: InstanceState::Stopped,
                reason: HaltReason::StopExitCode { code: 42 }
            }
        );
        // Signals have no exit code and are always restartable
        assert!(tracker
            .on_exit(&ExitEvent::with_signal(15, Duration::ZERO))
            .is_restart());
    }

    #[test]
    fn test_exponential_delays_grow() {
        let mut p = policy(10);
        p.backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
        };
        let mut tracker = RestartTracker::new(p, true);
        let delays: Vec<Duration> = (0..3)
            .map(|_| match tracker.on_exit(&quick_crash()) {
                RestartDecision::Restart { delay, .. } => delay,
                other => panic!("unexpected decision: {other:?}"),
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(150),
                Duration::from_millis(225)
            ]
        );
    }
}
