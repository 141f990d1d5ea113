//! In-memory collaborators for unit tests.

use crate::error::{NodeError, NodeResult};
use crate::ledger::client::{
    AddressParams, IdParams, QuotaParams, QUERY_ACCOUNT_PATH, QUERY_NODES_FOR_PLAN_PATH,
    QUERY_NODE_PATH, QUERY_QUOTA_PATH, QUERY_SUBSCRIPTION_PATH,
};
use crate::ledger::{
    Account, LedgerNode, NodeStatus, QueryTransport, Quota, SessionUsage, Settlement, Status,
    Subscription,
};
use crate::service::{CommandOutput, CommandRunner};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Default)]
struct WgState {
    /// (identity, download, upload) in backend listing order.
    peers: Vec<(String, u64, u64)>,
    fail_next_set: bool,
    absent_on_remove: bool,
    fail_show: bool,
    raw_transfer: Option<String>,
    quick_calls: Vec<String>,
    hold: Option<Arc<AddGate>>,
}

/// Handshake for pausing the fake right after a peer is provisioned.
#[derive(Default)]
pub(crate) struct AddGate {
    /// Notified once `wg set … allowed-ips` has taken effect.
    pub parked: Notify,
    /// Lets the paused command return.
    pub resume: Notify,
}

/// Stand-in for the `wg` / `wg-quick` binaries.
#[derive(Default)]
pub(crate) struct FakeWg {
    state: Mutex<WgState>,
}

impl FakeWg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_peer(&self, identity: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.peers.iter().any(|(id, _, _)| id == identity)
    }

    /// Make the next `wg set` fail.
    pub fn fail_next_set(&self) {
        self.state.lock().unwrap().fail_next_set = true;
    }

    /// Removing a peer the backend does not know fails with "not found".
    pub fn report_absent_on_remove(&self) {
        self.state.lock().unwrap().absent_on_remove = true;
    }

    pub fn fail_show(&self) {
        self.state.lock().unwrap().fail_show = true;
    }

    /// Set cumulative counters for `identity`, adding it if unknown.
    pub fn set_transfer(&self, identity: &str, download: u64, upload: u64) {
        let mut state = self.state.lock().unwrap();
        match state.peers.iter_mut().find(|(id, _, _)| id == identity) {
            Some(peer) => {
                peer.1 = download;
                peer.2 = upload;
            }
            None => state.peers.push((identity.to_string(), download, upload)),
        }
    }

    /// Replace the `wg show transfer` output verbatim.
    pub fn set_raw_transfer(&self, output: &str) {
        self.state.lock().unwrap().raw_transfer = Some(output.to_string());
    }

    pub fn quick_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().quick_calls.clone()
    }

    /// Pause the next successful `wg set … allowed-ips` before it returns.
    pub fn hold_next_add(&self) -> Arc<AddGate> {
        let gate = Arc::new(AddGate::default());
        self.state.lock().unwrap().hold = Some(gate.clone());
        gate
    }

    fn take_hold(&self) -> Option<Arc<AddGate>> {
        self.state.lock().unwrap().hold.take()
    }

    fn wg(&self, args: &[String]) -> CommandOutput {
        let mut state = self.state.lock().unwrap();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        match args.as_slice() {
            ["set", _, "peer", identity, rest @ ..] => {
                if std::mem::take(&mut state.fail_next_set) {
                    return failure("Unable to modify interface: Operation not permitted");
                }
                let known = state.peers.iter().any(|(id, _, _)| id == identity);
                match rest {
                    ["remove"] => {
                        if !known && state.absent_on_remove {
                            return failure("Peer not found");
                        }
                        state.peers.retain(|(id, _, _)| id != identity);
                    }
                    ["allowed-ips", _] => {
                        if !known {
                            state.peers.push((identity.to_string(), 0, 0));
                        }
                    }
                    _ => return failure("Invalid argument"),
                }
                success(String::new())
            }
            ["show", _, "transfer"] => {
                if state.fail_show {
                    return failure("Unable to access interface: No such device");
                }
                if let Some(raw) = &state.raw_transfer {
                    return success(raw.clone());
                }
                let listing = state
                    .peers
                    .iter()
                    .map(|(id, download, upload)| format!("{}\t{}\t{}\n", id, download, upload))
                    .collect();
                success(listing)
            }
            _ => failure("Invalid argument"),
        }
    }
}

fn success(stdout: String) -> CommandOutput {
    CommandOutput {
        success: true,
        stdout: stdout.into_bytes(),
        stderr: Vec::new(),
    }
}

fn failure(stderr: &str) -> CommandOutput {
    CommandOutput {
        success: false,
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

#[async_trait]
impl CommandRunner for FakeWg {
    async fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        match program {
            "wg" => {
                let output = self.wg(args);
                let added = output.success && args.iter().any(|a| a == "allowed-ips");
                if let Some(gate) = added.then(|| self.take_hold()).flatten() {
                    gate.parked.notify_one();
                    gate.resume.notified().await;
                }
                Ok(output)
            }
            "wg-quick" => {
                self.state.lock().unwrap().quick_calls.push(args.join(" "));
                Ok(success(String::new()))
            }
            other => Err(io::Error::new(io::ErrorKind::NotFound, other.to_string())),
        }
    }
}

/// Query transport answering from a map keyed by path and request data.
#[derive(Default)]
pub(crate) struct MemoryTransport {
    values: Mutex<HashMap<(String, Vec<u8>), Vec<u8>>>,
    failing: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn put_raw<P: Serialize>(&self, path: &str, params: &P, value: Vec<u8>) {
        let data = serde_json::to_vec(params).unwrap();
        self.values
            .lock()
            .unwrap()
            .insert((path.to_string(), data), value);
    }

    fn put<P: Serialize, R: Serialize>(&self, path: &str, params: &P, result: &R) {
        self.put_raw(path, params, serde_json::to_vec(result).unwrap());
    }

    pub fn put_account(&self, address: &str) {
        let account = Account {
            address: address.to_string(),
            account_number: 1,
            sequence: 0,
        };
        self.put(QUERY_ACCOUNT_PATH, &AddressParams { address }, &account);
    }

    pub fn put_node(&self, address: &str) {
        self.put(QUERY_NODE_PATH, &AddressParams { address }, &ledger_node(address));
    }

    pub fn put_subscription(&self, subscription: Subscription) {
        let params = IdParams { id: subscription.id };
        self.put(QUERY_SUBSCRIPTION_PATH, &params, &subscription);
    }

    pub fn put_quota(&self, id: u64, address: &str, allocated: u64, consumed: u64) {
        let quota = Quota {
            address: address.to_string(),
            allocated,
            consumed,
        };
        self.put(QUERY_QUOTA_PATH, &QuotaParams { id, address }, &quota);
    }

    pub fn put_plan_nodes(&self, plan: u64, addresses: &[&str]) {
        let nodes: Vec<LedgerNode> = addresses.iter().map(|a| ledger_node(a)).collect();
        self.put(QUERY_NODES_FOR_PLAN_PATH, &IdParams { id: plan }, &nodes);
    }
}

fn ledger_node(address: &str) -> LedgerNode {
    LedgerNode {
        address: address.to_string(),
        provider: String::new(),
        remote_url: "https://node.example:8585".to_string(),
        status: Status::Active,
    }
}

#[async_trait]
impl QueryTransport for MemoryTransport {
    async fn query(&self, path: &str, data: Vec<u8>) -> NodeResult<Option<Vec<u8>>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NodeError::oracle(format!("Query {} failed: connection refused", path)));
        }
        let values = self.values.lock().unwrap();
        Ok(values.get(&(path.to_string(), data)).cloned())
    }
}

/// Settlement that records everything it is given.
#[derive(Default)]
pub(crate) struct RecordingSettlement {
    statuses: Mutex<Vec<NodeStatus>>,
    batches: Mutex<Vec<Vec<SessionUsage>>>,
    fail_status: AtomicBool,
    fail_sessions: AtomicBool,
}

impl RecordingSettlement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_status(&self) {
        self.fail_status.store(true, Ordering::SeqCst);
    }

    pub fn fail_sessions(&self) {
        self.fail_sessions.store(true, Ordering::SeqCst);
    }

    pub fn statuses(&self) -> Vec<NodeStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn batches(&self) -> Vec<Vec<SessionUsage>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Settlement for RecordingSettlement {
    async fn update_status(&self, status: &NodeStatus) -> NodeResult<()> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(NodeError::settlement("status endpoint returned 503"));
        }
        self.statuses.lock().unwrap().push(status.clone());
        Ok(())
    }

    async fn update_sessions(&self, sessions: &[SessionUsage]) -> NodeResult<()> {
        if self.fail_sessions.load(Ordering::SeqCst) {
            return Err(NodeError::settlement("sessions endpoint returned 503"));
        }
        self.batches.lock().unwrap().push(sessions.to_vec());
        Ok(())
    }
}
