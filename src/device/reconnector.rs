use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::DeviceError;
use crate::report::local_timestamp;

/// Knows how to list and open one kind of device.
pub trait Connector: Send + Sync + 'static {
    /// Identifies one device the connector can try (camera index, serial port).
    type Candidate: Clone + fmt::Display + Send + 'static;
    /// The open resource. Owned by the reconnector, lent out per operation.
    type Handle: Send + 'static;

    /// Current ordered candidate list. Called on every attempt so hot-plugged
    /// devices show up without a restart.
    fn candidates(&self) -> Vec<Self::Candidate>;

    fn open(&self, candidate: &Self::Candidate) -> Result<Self::Handle, DeviceError>;
}

/// Result of one step of the scan.
enum Opened<C: Connector> {
    Existing(C::Candidate),
    Fresh(C::Candidate, C::Handle),
}

/// Point-in-time view for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub connected: bool,
    pub current: Option<String>,
    pub last_error: Option<String>,
    pub last_connected: Option<String>,
    pub attempts: u64,
    pub connections: u64,
}

struct ReconnectorState<C: Connector> {
    handle: Option<C::Handle>,
    current: Option<C::Candidate>,
    cursor: usize,
    last_error: Option<String>,
    last_connected: Option<String>,
    attempts: u64,
    connections: u64,
}

/// Keeps trying candidates in a cyclic order until one opens.
///
/// Nothing here is fatal. A failed open rotates to the next candidate and
/// waits `backoff`; a failed operation on the lent handle drops it so the
/// next [`acquire`](Self::acquire) scans again. All handle access goes
/// through one mutex, which also serializes device writes.
///
/// A freshly opened handle is published only after `settle` has elapsed,
/// so nothing writes to a device that is still booting. After
/// [`close`](Self::close) every wait returns early and no handle is
/// published again.
pub struct DeviceReconnector<C: Connector> {
    connector: C,
    backoff: Duration,
    settle: Duration,
    closed: watch::Sender<bool>,
    state: Mutex<ReconnectorState<C>>,
}

impl<C: Connector> DeviceReconnector<C> {
    pub fn new(connector: C, backoff: Duration) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            connector,
            backoff,
            settle: Duration::ZERO,
            closed,
            state: Mutex::new(ReconnectorState {
                handle: None,
                current: None,
                cursor: 0,
                last_error: None,
                last_connected: None,
                attempts: 0,
                connections: 0,
            }),
        }
    }

    /// Hold a new handle back for `settle` after it opens.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ReconnectorState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Open the candidate under the cursor, without publishing it.
    fn open_next(&self) -> Result<Opened<C>, DeviceError> {
        let mut state = self.lock();
        if state.handle.is_some()
            && let Some(current) = &state.current
        {
            return Ok(Opened::Existing(current.clone()));
        }

        let candidates = self.connector.candidates();
        state.attempts += 1;
        if candidates.is_empty() {
            let err = DeviceError::NoCandidates;
            state.last_error = Some(err.to_string());
            return Err(err);
        }

        let index = state.cursor % candidates.len();
        let candidate = candidates[index].clone();
        match self.connector.open(&candidate) {
            Ok(handle) => {
                state.cursor = index;
                Ok(Opened::Fresh(candidate, handle))
            }
            Err(e) => {
                state.cursor = (index + 1) % candidates.len();
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Make `handle` the current one. Refused once closed.
    fn publish(&self, candidate: C::Candidate, handle: C::Handle) -> bool {
        let mut state = self.lock();
        if self.is_closed() {
            return false;
        }
        state.handle = Some(handle);
        state.current = Some(candidate);
        state.last_error = None;
        state.last_connected = Some(local_timestamp());
        state.connections += 1;
        true
    }

    /// Block until some candidate is open and return which one.
    ///
    /// Never gives up on its own: with every candidate failing this loops
    /// forever, rotating and sleeping `backoff` between attempts. Returns
    /// `None` only after [`close`](Self::close).
    pub async fn acquire(&self) -> Option<C::Candidate> {
        while !self.is_closed() {
            match self.open_next() {
                Ok(Opened::Existing(candidate)) => return Some(candidate),
                Ok(Opened::Fresh(candidate, handle)) => {
                    if !self.pause(self.settle).await {
                        break;
                    }
                    if self.publish(candidate.clone(), handle) {
                        info!(device = %candidate, "device connected");
                        return Some(candidate);
                    }
                    break;
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = self.backoff.as_millis() as u64, "device unavailable, rotating");
                }
            }
            if !self.pause(self.backoff).await {
                break;
            }
        }
        None
    }

    /// Sleep for `duration` unless closed first. Returns whether still open.
    pub async fn pause(&self, duration: Duration) -> bool {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return false;
        }
        tokio::select! {
            _ = sleep(duration) => {}
            _ = closed.changed() => {}
        }
        !self.is_closed()
    }

    /// Stop every pending and future [`acquire`](Self::acquire) and drop
    /// the handle.
    pub fn close(&self) {
        self.closed.send_replace(true);
        self.invalidate();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Lend the handle to `op`. Any error from `op` revokes the handle.
    pub fn with_handle<R>(
        &self,
        op: impl FnOnce(&mut C::Handle) -> Result<R, DeviceError>,
    ) -> Result<R, DeviceError> {
        let mut state = self.lock();
        let Some(handle) = state.handle.as_mut() else {
            return Err(DeviceError::NotConnected);
        };
        match op(handle) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(error = %e, "device operation failed, dropping handle");
                state.handle = None;
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Drop the cached handle so the next `acquire` opens a fresh one.
    pub fn invalidate(&self) {
        let mut state = self.lock();
        if state.handle.take().is_some() {
            info!("device handle invalidated");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().handle.is_some()
    }

    pub fn status(&self) -> DeviceStatus {
        let state = self.lock();
        DeviceStatus {
            connected: state.handle.is_some(),
            current: state.current.as_ref().map(ToString::to_string),
            last_error: state.last_error.clone(),
            last_connected: state.last_connected.clone(),
            attempts: state.attempts,
            connections: state.connections,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    /// Connector over named candidates. Opens fail for names in `broken`
    /// and for the first `fail_first` attempts overall.
    pub(crate) struct FakeConnector {
        pub names: Vec<String>,
        pub broken: Mutex<HashSet<String>>,
        pub fail_first: Mutex<u32>,
        pub opened: Mutex<Vec<String>>,
    }

    impl FakeConnector {
        pub(crate) fn new(names: &[&str]) -> Self {
            Self {
                names: names.iter().map(|s| s.to_string()).collect(),
                broken: Mutex::new(HashSet::new()),
                fail_first: Mutex::new(0),
                opened: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn all_broken(names: &[&str]) -> Self {
            let connector = Self::new(names);
            *connector.broken.lock().unwrap() = names.iter().map(|s| s.to_string()).collect();
            connector
        }

        pub(crate) fn opened(&self) -> Vec<String> {
            self.opened.lock().unwrap().clone()
        }
    }

    impl Connector for FakeConnector {
        type Candidate = String;
        type Handle = Vec<String>;

        fn candidates(&self) -> Vec<String> {
            self.names.clone()
        }

        fn open(&self, candidate: &String) -> Result<Vec<String>, DeviceError> {
            self.opened.lock().unwrap().push(candidate.clone());
            let mut fail_first = self.fail_first.lock().unwrap();
            if *fail_first > 0 {
                *fail_first -= 1;
                return Err(DeviceError::Open {
                    candidate: candidate.clone(),
                    message: "busy".into(),
                });
            }
            if self.broken.lock().unwrap().contains(candidate) {
                return Err(DeviceError::Open {
                    candidate: candidate.clone(),
                    message: "no such device".into(),
                });
            }
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn acquire_returns_first_working_candidate() {
        let connector = FakeConnector::new(&["cam0", "cam1"]);
        connector.broken.lock().unwrap().insert("cam0".into());
        let reconnector = DeviceReconnector::new(connector, Duration::ZERO);

        let got = reconnector.acquire().await;
        assert_eq!(got.as_deref(), Some("cam1"));
        assert_eq!(reconnector.connector().opened(), vec!["cam0", "cam1"]);
        assert!(reconnector.is_connected());
        assert!(reconnector.status().last_error.is_none());
    }

    #[tokio::test]
    async fn acquire_when_connected_does_not_reopen() {
        let reconnector = DeviceReconnector::new(FakeConnector::new(&["a"]), Duration::ZERO);
        reconnector.acquire().await;
        reconnector.acquire().await;
        assert_eq!(reconnector.connector().opened(), vec!["a"]);
        assert_eq!(reconnector.status().connections, 1);
    }

    #[tokio::test]
    async fn failing_candidates_rotate_with_wraparound() {
        let connector = FakeConnector::new(&["a", "b", "c"]);
        *connector.fail_first.lock().unwrap() = 7;
        let reconnector = DeviceReconnector::new(connector, Duration::from_millis(1));

        let got = reconnector.acquire().await;
        let opened = reconnector.connector().opened();
        assert_eq!(opened, vec!["a", "b", "c", "a", "b", "c", "a", "b"]);
        assert_eq!(got.as_deref(), Some("b"));
        assert_eq!(reconnector.status().attempts, 8);
    }

    #[tokio::test]
    async fn all_failing_never_returns_and_tries_every_candidate() {
        let reconnector = Arc::new(DeviceReconnector::new(
            FakeConnector::all_broken(&["a", "b", "c"]),
            Duration::from_millis(1),
        ));

        let task = {
            let reconnector = Arc::clone(&reconnector);
            tokio::spawn(async move { reconnector.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());
        task.abort();

        let opened: HashSet<String> = reconnector.connector().opened().into_iter().collect();
        assert_eq!(opened.len(), 3);
        let status = reconnector.status();
        assert!(!status.connected);
        assert!(status.last_error.unwrap().contains("no such device"));
    }

    #[test]
    fn empty_candidate_list_records_error() {
        let reconnector = DeviceReconnector::new(FakeConnector::new(&[]), Duration::ZERO);
        assert!(matches!(
            reconnector.open_next(),
            Err(DeviceError::NoCandidates)
        ));
        assert_eq!(
            reconnector.status().last_error.as_deref(),
            Some("no candidate devices available")
        );
    }

    #[tokio::test]
    async fn failed_operation_revokes_handle() {
        let reconnector = DeviceReconnector::new(FakeConnector::new(&["a"]), Duration::ZERO);
        reconnector.acquire().await;

        let err = reconnector
            .with_handle(|_| -> Result<(), DeviceError> {
                Err(DeviceError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "unplugged",
                )))
            })
            .unwrap_err();
        assert!(matches!(err, DeviceError::Io(_)));
        assert!(!reconnector.is_connected());
        assert!(matches!(
            reconnector.with_handle(|_| Ok(())),
            Err(DeviceError::NotConnected)
        ));

        reconnector.acquire().await;
        assert_eq!(reconnector.connector().opened(), vec!["a", "a"]);
    }

    #[tokio::test]
    async fn invalidate_forces_fresh_open() {
        let reconnector = DeviceReconnector::new(FakeConnector::new(&["a"]), Duration::ZERO);
        reconnector.acquire().await;
        reconnector.invalidate();
        assert!(!reconnector.is_connected());
        reconnector.acquire().await;
        assert_eq!(reconnector.status().connections, 2);
    }

    #[tokio::test]
    async fn new_handle_is_held_back_until_settled() {
        let reconnector = Arc::new(
            DeviceReconnector::new(FakeConnector::new(&["a"]), Duration::ZERO)
                .with_settle(Duration::from_millis(300)),
        );

        let task = {
            let reconnector = Arc::clone(&reconnector);
            tokio::spawn(async move { reconnector.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(reconnector.connector().opened(), vec!["a"]);
        assert!(!reconnector.is_connected());
        assert!(matches!(
            reconnector.with_handle(|_| Ok(())),
            Err(DeviceError::NotConnected)
        ));

        assert_eq!(task.await.unwrap().as_deref(), Some("a"));
        assert!(reconnector.is_connected());
        assert_eq!(reconnector.status().connections, 1);
    }

    #[tokio::test]
    async fn close_interrupts_pending_acquire() {
        let reconnector = Arc::new(DeviceReconnector::new(
            FakeConnector::all_broken(&["a"]),
            Duration::from_secs(60),
        ));

        let task = {
            let reconnector = Arc::clone(&reconnector);
            tokio::spawn(async move { reconnector.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        reconnector.close();

        let got = tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .unwrap()
            .unwrap();
        assert!(got.is_none());
        assert!(!reconnector.is_connected());
    }

    #[tokio::test]
    async fn device_opened_during_settle_is_dropped_after_close() {
        let reconnector = Arc::new(
            DeviceReconnector::new(FakeConnector::new(&["a"]), Duration::ZERO)
                .with_settle(Duration::from_secs(60)),
        );

        let task = {
            let reconnector = Arc::clone(&reconnector);
            tokio::spawn(async move { reconnector.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(reconnector.connector().opened(), vec!["a"]);
        reconnector.close();

        let got = tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .unwrap()
            .unwrap();
        assert!(got.is_none());
        assert!(!reconnector.is_connected());
        assert!(reconnector.acquire().await.is_none());
        assert_eq!(reconnector.connector().opened(), vec!["a"]);
    }
}
