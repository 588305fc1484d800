// In-memory matching service

use crate::backend::{BackendError, ReportDiscoveryArgs, SessionInfo, UpdateLocationArgs, WaveBackend};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::watch;

/// One call received by [`SimBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    StartSession(String),
    StopSession(String),
    ReportDiscovery(ReportDiscoveryArgs),
    UpdateLocation(UpdateLocationArgs),
}

/// Matching service that issues sequential session ids ("S1", "S2", ...) and
/// records every call. Failures and report latency can be injected.
pub struct SimBackend {
    next_session: AtomicU64,
    calls: Mutex<Vec<BackendCall>>,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    fail_location: AtomicBool,
    report_failures: AtomicUsize,
    /// Reports complete only while the gate is open
    report_gate: watch::Sender<bool>,
}

impl Default for SimBackend {
    fn default() -> Self {
        let (report_gate, _) = watch::channel(true);
        Self {
            next_session: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            fail_location: AtomicBool::new(false),
            report_failures: AtomicUsize::new(0),
            report_gate,
        }
    }
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    /// Session ids issued so far, in order
    pub fn started_sessions(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                BackendCall::StartSession(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn stopped_sessions(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                BackendCall::StopSession(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every report received, including ones still in flight or failed
    pub fn reports(&self) -> Vec<ReportDiscoveryArgs> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                BackendCall::ReportDiscovery(args) => Some(args.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn location_updates(&self) -> Vec<UpdateLocationArgs> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                BackendCall::UpdateLocation(args) => Some(args.clone()),
                _ => None,
            })
            .collect()
    }

    /// Pairs of sessions that reported each other, each pair once
    pub fn matches(&self) -> Vec<(String, String)> {
        let reported: HashSet<(String, String)> = self
            .reports()
            .into_iter()
            .map(|r| (r.session_id, r.discovered_session_id))
            .collect();

        let mut pairs: Vec<_> = reported
            .iter()
            .filter(|(a, b)| a < b && reported.contains(&(b.clone(), a.clone())))
            .cloned()
            .collect();
        pairs.sort();
        pairs
    }

    pub fn fail_start_session(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stop_session(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn fail_location_updates(&self, fail: bool) {
        self.fail_location.store(fail, Ordering::SeqCst);
    }

    /// Reject the next `count` discovery reports
    pub fn fail_next_reports(&self, count: usize) {
        self.report_failures.store(count, Ordering::SeqCst);
    }

    /// Keep reports in flight until [`SimBackend::release_reports`]
    pub fn hold_reports(&self) {
        self.report_gate.send_replace(false);
    }

    pub fn release_reports(&self) {
        self.report_gate.send_replace(true);
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().push(call);
    }
}

fn unavailable() -> BackendError {
    BackendError::Transport("simulated outage".to_string())
}

#[async_trait]
impl WaveBackend for SimBackend {
    async fn start_session(&self) -> Result<SessionInfo, BackendError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let session_id = format!("S{}", self.next_session.fetch_add(1, Ordering::SeqCst));
        self.record(BackendCall::StartSession(session_id.clone()));
        Ok(SessionInfo { session_id })
    }

    async fn stop_session(&self, session_id: &str) -> Result<(), BackendError> {
        self.record(BackendCall::StopSession(session_id.to_string()));
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }

    async fn report_discovery(&self, args: ReportDiscoveryArgs) -> Result<(), BackendError> {
        self.record(BackendCall::ReportDiscovery(args));

        let fail = self
            .report_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let mut gate = self.report_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        if fail {
            return Err(BackendError::Rejected {
                status: 503,
                message: "simulated rejection".to_string(),
            });
        }
        Ok(())
    }

    async fn update_location(&self, args: UpdateLocationArgs) -> Result<(), BackendError> {
        self.record(BackendCall::UpdateLocation(args));
        if self.fail_location.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }
}
