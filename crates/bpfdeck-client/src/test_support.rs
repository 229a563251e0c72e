use crate::api::ControlApi;
use crate::error::ClientError;
use async_trait::async_trait;
use bpfdeck_core::{
    LifecycleRequest, ProgramInventory, StartUserspaceBody, StreamKind, UserspaceStatus,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

/// In-memory `ControlApi` that replays scripted replies and records calls.
#[derive(Default)]
pub struct ScriptedApi {
    pub inventory: Mutex<ProgramInventory>,
    pub inventory_failure: Mutex<Option<String>>,
    pub replies: Mutex<VecDeque<Result<Option<String>, ClientError>>>,
    pub batches: Mutex<BTreeMap<StreamKind, VecDeque<Result<Vec<String>, ClientError>>>>,
    pub submitted: Mutex<Vec<LifecycleRequest>>,
    pub inventory_calls: Mutex<usize>,
    pub batch_calls: Mutex<usize>,
    pub userspace_running: Mutex<bool>,
}

impl ScriptedApi {
    pub fn with_inventory(programs: &[&str]) -> Self {
        let api = Self::default();
        *api.inventory.lock().expect("inventory lock") = ProgramInventory {
            programs: programs.iter().map(|name| name.to_string()).collect(),
            loaded: Vec::new(),
        };
        api
    }

    pub fn push_reply(&self, reply: Result<Option<String>, ClientError>) {
        self.replies.lock().expect("replies lock").push_back(reply);
    }

    pub fn push_batch(&self, stream: StreamKind, batch: Result<Vec<String>, ClientError>) {
        self.batches
            .lock()
            .expect("batches lock")
            .entry(stream)
            .or_default()
            .push_back(batch);
    }

    pub fn submitted(&self) -> Vec<LifecycleRequest> {
        self.submitted.lock().expect("submitted lock").clone()
    }

    pub fn inventory_calls(&self) -> usize {
        *self.inventory_calls.lock().expect("calls lock")
    }

    pub fn batch_calls(&self) -> usize {
        *self.batch_calls.lock().expect("calls lock")
    }

    fn next_reply(&self) -> Result<Option<String>, ClientError> {
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or(Ok(None))
    }
}

#[async_trait]
impl ControlApi for ScriptedApi {
    async fn inventory(&self) -> Result<ProgramInventory, ClientError> {
        *self.inventory_calls.lock().expect("calls lock") += 1;
        if let Some(message) = self.inventory_failure.lock().expect("failure lock").clone() {
            return Err(ClientError::Operation(message));
        }
        Ok(self.inventory.lock().expect("inventory lock").clone())
    }

    async fn submit(&self, request: &LifecycleRequest) -> Result<Option<String>, ClientError> {
        self.submitted
            .lock()
            .expect("submitted lock")
            .push(request.clone());
        self.next_reply()
    }

    async fn stream_batch(&self, stream: StreamKind) -> Result<Vec<String>, ClientError> {
        *self.batch_calls.lock().expect("calls lock") += 1;
        self.batches
            .lock()
            .expect("batches lock")
            .get_mut(&stream)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn stop_collection(&self) -> Result<Option<String>, ClientError> {
        self.next_reply()
    }

    async fn start_userspace(
        &self,
        _body: &StartUserspaceBody,
    ) -> Result<Option<String>, ClientError> {
        *self.userspace_running.lock().expect("running lock") = true;
        self.next_reply()
    }

    async fn stop_userspace(&self) -> Result<Option<String>, ClientError> {
        *self.userspace_running.lock().expect("running lock") = false;
        self.next_reply()
    }

    async fn userspace_programs(&self) -> Result<Vec<String>, ClientError> {
        Ok(vec!["exec".to_string(), "xdp_prog".to_string()])
    }

    async fn userspace_status(&self) -> Result<UserspaceStatus, ClientError> {
        Ok(UserspaceStatus {
            running: *self.userspace_running.lock().expect("running lock"),
        })
    }

    async fn dump(&self, stream: StreamKind) -> Result<Vec<u8>, ClientError> {
        Ok(format!("dump of {stream}\n").into_bytes())
    }
}
