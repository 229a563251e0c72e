use crate::api::ControlApi;
use crate::error::ClientError;
use bpfdeck_core::{
    AttachInput, LifecycleAction, LifecycleRequest, ProgramInventory, StartUserspaceBody,
    StreamKind, UserspaceStatus, ValidationError,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Progress of one lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationState {
    #[default]
    Idle,
    InFlight(LifecycleAction),
    Succeeded(LifecycleAction),
    Failed(LifecycleAction),
}

impl OperationState {
    pub fn begin(action: LifecycleAction) -> Self {
        OperationState::InFlight(action)
    }

    /// Resolves an in-flight operation; terminal and idle states stay as they are.
    pub fn finish(self, succeeded: bool) -> Self {
        match self {
            OperationState::InFlight(action) if succeeded => OperationState::Succeeded(action),
            OperationState::InFlight(action) => OperationState::Failed(action),
            other => other,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, OperationState::InFlight(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Succeeded(_) | OperationState::Failed(_)
        )
    }

    pub fn label(&self) -> String {
        match self {
            OperationState::Idle => "idle".to_string(),
            OperationState::InFlight(action) => format!("{action}…"),
            OperationState::Succeeded(action) => format!("{action} ok"),
            OperationState::Failed(action) => format!("{action} failed"),
        }
    }
}

/// Result of a successful lifecycle operation, including the inventory refresh it triggered.
#[derive(Debug)]
pub struct LifecycleOutcome {
    pub action: LifecycleAction,
    pub message: String,
    pub inventory: Result<ProgramInventory, ClientError>,
}

#[derive(Clone)]
pub struct LifecycleController {
    api: Arc<dyn ControlApi>,
    pin_root: String,
}

impl LifecycleController {
    pub fn new(api: Arc<dyn ControlApi>, pin_root: impl Into<String>) -> Self {
        Self {
            api,
            pin_root: pin_root.into(),
        }
    }

    pub fn pin_root(&self) -> &str {
        &self.pin_root
    }

    pub async fn refresh(&self) -> Result<ProgramInventory, ClientError> {
        let inventory = self.api.inventory().await?;
        info!(
            programs = inventory.programs.len(),
            loaded = inventory.loaded.len(),
            "inventory_refreshed"
        );
        Ok(inventory)
    }

    pub async fn load(
        &self,
        program: Option<&str>,
        pin_path: Option<&str>,
        prog_type: Option<&str>,
    ) -> Result<LifecycleOutcome, ClientError> {
        let request = LifecycleRequest::load(program, pin_path, prog_type)?;
        self.execute(request).await
    }

    pub async fn unload(
        &self,
        program: Option<&str>,
        pin_path: Option<&str>,
    ) -> Result<LifecycleOutcome, ClientError> {
        let request = LifecycleRequest::unload(program, pin_path)?;
        self.execute(request).await
    }

    /// Missing pin path, attach type and target are derived from `input.program`.
    pub async fn attach(&self, input: AttachInput<'_>) -> Result<LifecycleOutcome, ClientError> {
        let request = LifecycleRequest::attach(input, &self.pin_root)?;
        self.execute(request).await
    }

    pub async fn detach(
        &self,
        pin_path: Option<&str>,
        attach_type: Option<&str>,
        target: Option<&str>,
    ) -> Result<LifecycleOutcome, ClientError> {
        let request = LifecycleRequest::detach(pin_path, attach_type, target)?;
        self.execute(request).await
    }

    pub async fn execute(&self, request: LifecycleRequest) -> Result<LifecycleOutcome, ClientError> {
        let action = request.action();
        info!(%action, body = %request.body(), "lifecycle_request");
        let message = match self.api.submit(&request).await {
            Ok(message) => message.unwrap_or_else(|| action.confirmation().to_string()),
            Err(err) => {
                warn!(%action, "lifecycle_failed: {err}");
                return Err(err);
            }
        };
        info!(%action, %message, "lifecycle_succeeded");

        let inventory = self.refresh().await;
        if let Err(err) = &inventory {
            warn!(%action, "inventory_refresh_failed: {err}");
        }
        Ok(LifecycleOutcome {
            action,
            message,
            inventory,
        })
    }

    pub async fn stop_collection(&self) -> Result<String, ClientError> {
        let message = self.api.stop_collection().await?;
        Ok(message.unwrap_or_else(|| "Collector stopped".to_string()))
    }

    pub async fn start_userspace(
        &self,
        program: Option<&str>,
        args: &str,
    ) -> Result<String, ClientError> {
        let program = program
            .map(str::trim)
            .filter(|program| !program.is_empty())
            .ok_or(ValidationError::MissingUserspaceProgram)?;
        let body = StartUserspaceBody {
            program: program.to_string(),
            args: args.trim().to_string(),
        };
        info!(program = %body.program, args = %body.args, "userspace_start");
        let message = self.api.start_userspace(&body).await?;
        Ok(message.unwrap_or_else(|| "Userspace program started.".to_string()))
    }

    pub async fn stop_userspace(&self) -> Result<String, ClientError> {
        let message = self.api.stop_userspace().await?;
        Ok(message.unwrap_or_else(|| "Userspace program stopped.".to_string()))
    }

    pub async fn userspace_programs(&self) -> Result<Vec<String>, ClientError> {
        self.api.userspace_programs().await
    }

    pub async fn userspace_status(&self) -> Result<UserspaceStatus, ClientError> {
        self.api.userspace_status().await
    }

    pub async fn dump(&self, stream: StreamKind) -> Result<Vec<u8>, ClientError> {
        self.api.dump(stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedApi;
    use bpfdeck_core::lifecycle::UnloadTarget;
    use bpfdeck_core::DEFAULT_PIN_ROOT;

    fn controller(api: &Arc<ScriptedApi>) -> LifecycleController {
        LifecycleController::new(api.clone(), DEFAULT_PIN_ROOT)
    }

    #[tokio::test]
    async fn load_without_program_never_reaches_the_server() {
        let api = Arc::new(ScriptedApi::default());
        let err = controller(&api)
            .load(Some(""), None, None)
            .await
            .expect_err("validation");
        assert!(err.is_validation());
        assert!(api.submitted().is_empty());
        assert_eq!(api.inventory_calls(), 0);
    }

    #[tokio::test]
    async fn unload_without_target_never_reaches_the_server() {
        let api = Arc::new(ScriptedApi::default());
        let err = controller(&api)
            .unload(None, None)
            .await
            .expect_err("validation");
        assert!(matches!(
            err,
            ClientError::Validation(ValidationError::MissingUnloadTarget)
        ));
        assert!(api.submitted().is_empty());
    }

    #[tokio::test]
    async fn detach_without_attach_type_is_rejected() {
        let api = Arc::new(ScriptedApi::default());
        let err = controller(&api)
            .detach(Some("/sys/fs/bpf/x"), None, None)
            .await
            .expect_err("validation");
        assert!(err.is_validation());
        assert!(api.submitted().is_empty());
    }

    #[tokio::test]
    async fn success_returns_server_message_and_refreshes_inventory() {
        let api = Arc::new(ScriptedApi::with_inventory(&["xdp_filter.bpf.o"]));
        api.push_reply(Ok(Some("Program loaded at /sys/fs/bpf/xdp_filter".to_string())));
        let outcome = controller(&api)
            .load(Some("xdp_filter.bpf.o"), None, None)
            .await
            .expect("load");
        assert_eq!(outcome.action, LifecycleAction::Load);
        assert_eq!(outcome.message, "Program loaded at /sys/fs/bpf/xdp_filter");
        let inventory = outcome.inventory.expect("refreshed");
        assert_eq!(inventory.programs, vec!["xdp_filter.bpf.o".to_string()]);
        assert_eq!(api.inventory_calls(), 1);
    }

    #[tokio::test]
    async fn missing_message_falls_back_to_confirmation() {
        let api = Arc::new(ScriptedApi::default());
        api.push_reply(Ok(None));
        let outcome = controller(&api)
            .unload(Some("exec.bpf.o"), None)
            .await
            .expect("unload");
        assert_eq!(outcome.message, "Program unloaded");
        assert_eq!(
            api.submitted(),
            vec![LifecycleRequest::Unload(UnloadTarget::Program(
                "exec.bpf.o".to_string()
            ))]
        );
    }

    #[tokio::test]
    async fn failure_surfaces_server_message_without_refresh() {
        let api = Arc::new(ScriptedApi::default());
        api.push_reply(Err(ClientError::Operation(
            "Unsupported attach_type: bogus".to_string(),
        )));
        let err = controller(&api)
            .attach(AttachInput {
                pin_path: Some("/sys/fs/bpf/x"),
                attach_type: Some("bogus"),
                ..Default::default()
            })
            .await
            .expect_err("operation error");
        assert_eq!(err.to_string(), "Unsupported attach_type: bogus");
        assert_eq!(api.inventory_calls(), 0);
        assert_eq!(api.submitted().len(), 1);
    }

    #[tokio::test]
    async fn attach_sends_derived_request() {
        let api = Arc::new(ScriptedApi::default());
        controller(&api)
            .attach(AttachInput {
                program: Some("xdp_filter.bpf.o"),
                ..Default::default()
            })
            .await
            .expect("attach");
        assert_eq!(
            api.submitted(),
            vec![LifecycleRequest::Attach {
                pin_path: "/sys/fs/bpf/xdp_filter".to_string(),
                attach_type: "xdp".to_string(),
                target: Some("eth0".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn refresh_failure_after_success_is_reported_in_outcome() {
        let api = Arc::new(ScriptedApi::default());
        *api.inventory_failure.lock().expect("failure lock") = Some("bpftool missing".to_string());
        let outcome = controller(&api)
            .load(Some("exec.bpf.o"), None, None)
            .await
            .expect("load still succeeds");
        assert!(outcome.inventory.is_err());
    }

    #[tokio::test]
    async fn userspace_start_requires_program() {
        let api = Arc::new(ScriptedApi::default());
        let ctl = controller(&api);
        assert!(ctl
            .start_userspace(None, "")
            .await
            .expect_err("validation")
            .is_validation());
        assert_eq!(
            ctl.start_userspace(Some("exec"), " --verbose ")
                .await
                .expect("start"),
            "Userspace program started."
        );
        assert!(ctl.userspace_status().await.expect("status").running);
        ctl.stop_userspace().await.expect("stop");
        assert!(!ctl.userspace_status().await.expect("status").running);
    }

    #[test]
    fn operation_state_transitions_are_terminal() {
        let state = OperationState::begin(LifecycleAction::Attach);
        assert!(state.is_in_flight());
        assert!(!state.is_terminal());
        let done = state.finish(true);
        assert_eq!(done, OperationState::Succeeded(LifecycleAction::Attach));
        assert!(done.is_terminal());
        assert_eq!(done.finish(false), done);
        assert_eq!(
            OperationState::begin(LifecycleAction::Load).finish(false),
            OperationState::Failed(LifecycleAction::Load)
        );
        assert_eq!(OperationState::Idle.finish(true), OperationState::Idle);
    }
}
