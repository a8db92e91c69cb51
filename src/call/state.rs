//! Call lifecycle and retry policy as a pure step function.

use crate::defaults;
use serde::Serialize;
use std::time::Duration;

/// Caller-visible status of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Connecting,
    Active,
    Ending,
    /// Terminal failure, waiting for a manual retry.
    Idle,
    /// Microphone refused. Only a manual retry leaves this state.
    PermissionDenied,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Connecting => "connecting",
            CallStatus::Active => "active",
            CallStatus::Ending => "ending",
            CallStatus::Idle => "idle",
            CallStatus::PermissionDenied => "permission denied",
        }
    }

    /// States that wait for the user instead of the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Idle | CallStatus::PermissionDenied)
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Things that happen to a call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallInput {
    Opened,
    /// `connect` itself failed.
    ConnectFailed(String),
    /// The session reported an error event.
    SessionError(String),
    Closed,
    PermissionDenied(String),
    EndRequested,
    RetryRequested,
}

/// Work the controller performs, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum CallAction {
    /// Open fresh audio contexts, request microphone permission, connect.
    Connect,
    /// Start capture and the recorder.
    StartStreaming,
    /// Wait before the next action.
    Backoff(Duration),
    CloseSession,
    FinishRecording,
    /// Release every resource of the current session.
    Teardown,
    /// Hand the transcript and recording to the caller.
    EndCall,
    /// Surface a terminal failure.
    Fail(String),
}

/// Automatic reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub budget: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            budget: defaults::RETRY_BUDGET,
            backoff: Duration::from_millis(defaults::RETRY_BACKOFF_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallMachine {
    status: CallStatus,
    retries: u32,
    policy: RetryPolicy,
}

impl CallMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            status: CallStatus::Connecting,
            retries: 0,
            policy,
        }
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Actions for the very first attempt.
    pub fn begin(&self) -> Vec<CallAction> {
        vec![CallAction::Connect]
    }

    /// Advance the machine. Inputs that make no sense in the current state
    /// are ignored and produce no actions.
    pub fn step(&mut self, input: CallInput) -> Vec<CallAction> {
        use CallAction as A;
        use CallStatus as S;

        match (self.status, input) {
            (S::Connecting, CallInput::Opened) => {
                self.status = S::Active;
                self.retries = 0;
                vec![A::StartStreaming]
            }

            // Access can also be refused when capture starts after the session opened
            (S::Connecting, CallInput::PermissionDenied(message))
            | (S::Active, CallInput::PermissionDenied(message)) => {
                self.status = S::PermissionDenied;
                vec![A::Teardown, A::Fail(message)]
            }

            (S::Connecting, CallInput::ConnectFailed(cause))
            | (S::Connecting, CallInput::SessionError(cause)) => self.connect_failure(cause),
            (S::Connecting, CallInput::Closed) => {
                self.connect_failure("session closed before it opened".to_string())
            }

            (S::Active, CallInput::SessionError(cause)) => {
                self.status = S::Idle;
                vec![A::Teardown, A::Fail(cause)]
            }

            (S::Active, CallInput::Closed)
            | (S::Active, CallInput::EndRequested)
            | (S::Connecting, CallInput::EndRequested) => {
                self.status = S::Ending;
                vec![
                    A::CloseSession,
                    A::FinishRecording,
                    A::Teardown,
                    A::EndCall,
                ]
            }

            (S::Idle, CallInput::RetryRequested)
            | (S::PermissionDenied, CallInput::RetryRequested) => {
                self.status = S::Connecting;
                self.retries = 0;
                vec![A::Connect]
            }

            (status, input) => {
                tracing::trace!(%status, ?input, "Ignoring call input");
                Vec::new()
            }
        }
    }

    fn connect_failure(&mut self, cause: String) -> Vec<CallAction> {
        if self.retries < self.policy.budget {
            self.retries += 1;
            tracing::warn!(
                attempt = self.retries,
                cause = %cause,
                "Live session failed to connect, retrying"
            );
            vec![
                CallAction::Teardown,
                CallAction::Backoff(self.policy.backoff),
                CallAction::Connect,
            ]
        } else {
            self.status = CallStatus::Idle;
            vec![CallAction::Teardown, CallAction::Fail(cause)]
        }
    }
}

impl Default for CallMachine {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(s: &str) -> CallInput {
        CallInput::SessionError(s.to_string())
    }

    #[test]
    fn test_starts_connecting_and_connects() {
        let machine = CallMachine::default();
        assert_eq!(machine.status(), CallStatus::Connecting);
        assert_eq!(machine.begin(), vec![CallAction::Connect]);
    }

    #[test]
    fn test_opened_activates_and_starts_streaming() {
        let mut machine = CallMachine::default();
        assert_eq!(
            machine.step(CallInput::Opened),
            vec![CallAction::StartStreaming]
        );
        assert_eq!(machine.status(), CallStatus::Active);
    }

    #[test]
    fn test_error_while_connecting_retries_exactly_once() {
        let mut machine = CallMachine::default();

        let first = machine.step(err("boom"));
        assert_eq!(
            first,
            vec![
                CallAction::Teardown,
                CallAction::Backoff(Duration::from_secs(1)),
                CallAction::Connect,
            ]
        );
        assert_eq!(machine.status(), CallStatus::Connecting);
        assert_eq!(machine.retries(), 1);

        let second = machine.step(err("boom again"));
        assert_eq!(
            second,
            vec![
                CallAction::Teardown,
                CallAction::Fail("boom again".to_string())
            ]
        );
        assert_eq!(machine.status(), CallStatus::Idle);
        assert!(!second.contains(&CallAction::Connect));
    }

    #[test]
    fn test_connect_failure_and_early_close_count_against_budget() {
        let mut machine = CallMachine::default();
        machine.step(CallInput::ConnectFailed("refused".to_string()));
        machine.step(CallInput::Closed);
        assert_eq!(machine.status(), CallStatus::Idle);
    }

    #[test]
    fn test_opened_resets_retry_counter() {
        let mut machine = CallMachine::default();
        machine.step(err("x"));
        machine.step(CallInput::Opened);
        assert_eq!(machine.retries(), 0);
    }

    #[test]
    fn test_error_while_active_goes_idle_without_retry() {
        let mut machine = CallMachine::default();
        machine.step(CallInput::Opened);

        let actions = machine.step(err("dropped"));
        assert_eq!(machine.status(), CallStatus::Idle);
        assert!(!actions.contains(&CallAction::Connect));
    }

    #[test]
    fn test_end_from_active_finishes_recording_before_end_call() {
        let mut machine = CallMachine::default();
        machine.step(CallInput::Opened);

        let actions = machine.step(CallInput::EndRequested);
        assert_eq!(machine.status(), CallStatus::Ending);
        assert_eq!(
            actions,
            vec![
                CallAction::CloseSession,
                CallAction::FinishRecording,
                CallAction::Teardown,
                CallAction::EndCall,
            ]
        );
    }

    #[test]
    fn test_end_from_connecting() {
        let mut machine = CallMachine::default();
        let actions = machine.step(CallInput::EndRequested);
        assert_eq!(machine.status(), CallStatus::Ending);
        assert_eq!(actions.last(), Some(&CallAction::EndCall));
    }

    #[test]
    fn test_closed_while_active_ends_gracefully() {
        let mut machine = CallMachine::default();
        machine.step(CallInput::Opened);
        let actions = machine.step(CallInput::Closed);
        assert_eq!(machine.status(), CallStatus::Ending);
        assert!(actions.contains(&CallAction::EndCall));
    }

    #[test]
    fn test_permission_denied_is_terminal_and_never_connects() {
        let mut machine = CallMachine::default();
        let actions = machine.step(CallInput::PermissionDenied("NotAllowedError".to_string()));

        assert_eq!(machine.status(), CallStatus::PermissionDenied);
        assert!(!actions.contains(&CallAction::Connect));
        // Further session noise does not revive it
        assert!(machine.step(err("late")).is_empty());
        assert!(machine.step(CallInput::Opened).is_empty());
    }

    #[test]
    fn test_permission_denied_while_active_is_terminal() {
        let mut machine = CallMachine::default();
        machine.step(CallInput::Opened);
        let actions = machine.step(CallInput::PermissionDenied("device unavailable".to_string()));

        assert_eq!(machine.status(), CallStatus::PermissionDenied);
        assert_eq!(
            actions,
            vec![
                CallAction::Teardown,
                CallAction::Fail("device unavailable".to_string())
            ]
        );
        assert_eq!(
            machine.step(CallInput::RetryRequested),
            vec![CallAction::Connect]
        );
    }

    #[test]
    fn test_manual_retry_gets_fresh_budget() {
        let mut machine = CallMachine::default();
        machine.step(err("a"));
        machine.step(err("b"));
        assert_eq!(machine.status(), CallStatus::Idle);

        assert_eq!(
            machine.step(CallInput::RetryRequested),
            vec![CallAction::Connect]
        );
        assert_eq!(machine.status(), CallStatus::Connecting);
        assert_eq!(machine.retries(), 0);

        // One automatic retry is available again
        assert!(machine.step(err("c")).contains(&CallAction::Connect));
    }

    #[test]
    fn test_retry_from_permission_denied() {
        let mut machine = CallMachine::default();
        machine.step(CallInput::PermissionDenied("denied".to_string()));
        assert_eq!(
            machine.step(CallInput::RetryRequested),
            vec![CallAction::Connect]
        );
    }

    #[test]
    fn test_retry_ignored_while_active() {
        let mut machine = CallMachine::default();
        machine.step(CallInput::Opened);
        assert!(machine.step(CallInput::RetryRequested).is_empty());
        assert_eq!(machine.status(), CallStatus::Active);
    }

    #[test]
    fn test_ending_ignores_everything() {
        let mut machine = CallMachine::default();
        machine.step(CallInput::EndRequested);
        assert!(machine.step(CallInput::Closed).is_empty());
        assert!(machine.step(err("x")).is_empty());
        assert!(machine.step(CallInput::RetryRequested).is_empty());
        assert_eq!(machine.status(), CallStatus::Ending);
    }

    #[test]
    fn test_zero_budget_fails_immediately() {
        let mut machine = CallMachine::new(RetryPolicy {
            budget: 0,
            backoff: Duration::from_millis(1),
        });
        machine.step(err("x"));
        assert_eq!(machine.status(), CallStatus::Idle);
    }
}
