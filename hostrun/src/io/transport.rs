//! Transport abstraction for reaching a host.
//!
//! The [`Transport`] trait decouples the worker pool from the actual remote
//! execution backend (the system ssh client, see [`super::ssh`]). Tests use
//! scripted transports that return predetermined outcomes without spawning
//! processes.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, instrument};

use crate::core::types::{ErrorKind, HostDescriptor, HostError, RemoteOutput};

/// Runs one command on one host.
pub trait Transport: Send + Sync {
    /// Open a session to `host`, run `command`, and close the session.
    ///
    /// Returns the remote exit status and output when the command ran to
    /// completion, whatever its exit status. Connection, authentication and
    /// deadline failures are reported as [`HostError`]. Implementations should
    /// give up once `timeout` has elapsed.
    fn execute(
        &self,
        host: &HostDescriptor,
        command: &str,
        timeout: Duration,
    ) -> Result<RemoteOutput, HostError>;
}

/// Retries connection failures of an inner transport.
///
/// Authentication failures, timeouts and remote exit statuses are returned as-is.
/// All attempts share the caller's `timeout` budget.
pub struct RetryingTransport<T> {
    inner: T,
    retries: u32,
    delay: Duration,
}

impl<T: Transport> RetryingTransport<T> {
    pub fn new(inner: T, retries: u32, delay: Duration) -> Self {
        Self {
            inner,
            retries,
            delay,
        }
    }
}

impl<T: Transport> Transport for RetryingTransport<T> {
    #[instrument(skip_all, fields(host = %host, retries = self.retries))]
    fn execute(
        &self,
        host: &HostDescriptor,
        command: &str,
        timeout: Duration,
    ) -> Result<RemoteOutput, HostError> {
        let deadline = Instant::now() + timeout;
        let mut attempt = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let err = match self.inner.execute(host, command, remaining) {
                Err(err) if err.kind == ErrorKind::Connection => err,
                outcome => return outcome,
            };
            attempt += 1;
            if attempt > self.retries {
                return Err(err);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining <= self.delay {
                return Err(err);
            }
            info!(attempt, error = %err, "connection failed, retrying");
            thread::sleep(self.delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Flaky {
        outcomes: Mutex<Vec<Result<RemoteOutput, HostError>>>,
        calls: Mutex<u32>,
    }

    impl Flaky {
        fn new(mut outcomes: Vec<Result<RemoteOutput, HostError>>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().expect("lock")
        }
    }

    impl Transport for &Flaky {
        fn execute(
            &self,
            _host: &HostDescriptor,
            _command: &str,
            _timeout: Duration,
        ) -> Result<RemoteOutput, HostError> {
            *self.calls.lock().expect("lock") += 1;
            self.outcomes
                .lock()
                .expect("lock")
                .pop()
                .unwrap_or_else(|| Err(HostError::connection("exhausted")))
        }
    }

    fn host() -> HostDescriptor {
        HostDescriptor {
            address: "hostA".to_string(),
            port: 22,
            credential: "lab".to_string(),
            command: None,
        }
    }

    fn ok() -> Result<RemoteOutput, HostError> {
        Ok(RemoteOutput::default())
    }

    #[test]
    fn retries_connection_failures_until_success() {
        let flaky = Flaky::new(vec![
            Err(HostError::connection("refused")),
            Err(HostError::connection("refused")),
            ok(),
        ]);
        let transport = RetryingTransport::new(&flaky, 3, Duration::from_millis(1));
        let outcome = transport.execute(&host(), "uptime", Duration::from_secs(5));
        assert!(outcome.is_ok());
        assert_eq!(flaky.calls(), 3);
    }

    #[test]
    fn gives_up_after_configured_retries() {
        let flaky = Flaky::new(vec![
            Err(HostError::connection("refused")),
            Err(HostError::connection("refused")),
            ok(),
        ]);
        let transport = RetryingTransport::new(&flaky, 1, Duration::from_millis(1));
        let err = transport
            .execute(&host(), "uptime", Duration::from_secs(5))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Connection);
        assert_eq!(flaky.calls(), 2);
    }

    #[test]
    fn never_retries_authentication_failures() {
        let flaky = Flaky::new(vec![Err(HostError::authentication("denied")), ok()]);
        let transport = RetryingTransport::new(&flaky, 5, Duration::from_millis(1));
        let err = transport
            .execute(&host(), "uptime", Duration::from_secs(5))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert_eq!(flaky.calls(), 1);
    }

    #[test]
    fn stops_when_delay_would_exceed_budget() {
        let flaky = Flaky::new(vec![Err(HostError::connection("refused")), ok()]);
        let transport = RetryingTransport::new(&flaky, 5, Duration::from_secs(10));
        let err = transport
            .execute(&host(), "uptime", Duration::from_millis(50))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Connection);
        assert_eq!(flaky.calls(), 1);
    }
}
