use crate::config::Config;
use bpfdeck_client::{
    ClientError, ControlApi, LifecycleController, LifecycleOutcome, NotificationSink,
    OperationState, PollTick, StreamSynchronizer, TickOutcome, ToastQueue,
};
use bpfdeck_core::{
    AttachInput, LifecycleAction, LifecycleRequest, LoadedProgram, ProgramInventory, StreamKind,
    UserspaceStatus, ValidationError,
};
use bpfdeck_storage::StreamStore;
use chrono::{DateTime, Local};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const DUMP_DIR: &str = "dumps";

/// Results of background work, applied on the UI loop.
#[derive(Debug)]
pub enum AppEvent {
    Inventory(Result<ProgramInventory, ClientError>),
    Lifecycle(LifecycleAction, Result<LifecycleOutcome, ClientError>),
    CollectionStopped(Result<String, ClientError>),
    Userspace {
        context: &'static str,
        result: Result<String, ClientError>,
    },
    UserspacePrograms(Result<Vec<String>, ClientError>),
    UserspaceStatus(Result<UserspaceStatus, ClientError>),
    Dumped(StreamKind, Result<PathBuf, String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Programs,
    Loaded,
    Form,
    Collector,
    Userspace,
}

impl Focus {
    const ORDER: [Focus; 5] = [
        Focus::Programs,
        Focus::Loaded,
        Focus::Form,
        Focus::Collector,
        Focus::Userspace,
    ];

    fn step(self, delta: isize) -> Self {
        let len = Self::ORDER.len() as isize;
        let idx = Self::ORDER.iter().position(|f| *f == self).unwrap_or(0) as isize;
        Self::ORDER[(idx + delta).rem_euclid(len) as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Filter,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Action,
    Program,
    PinPath,
    ProgType,
    Target,
    UserspaceProgram,
    UserspaceArgs,
}

impl FormField {
    pub const ALL: [FormField; 7] = [
        FormField::Action,
        FormField::Program,
        FormField::PinPath,
        FormField::ProgType,
        FormField::Target,
        FormField::UserspaceProgram,
        FormField::UserspaceArgs,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FormField::Action => "Action",
            FormField::Program => "Program",
            FormField::PinPath => "Pin path",
            FormField::ProgType => "Type",
            FormField::Target => "Target",
            FormField::UserspaceProgram => "Userspace",
            FormField::UserspaceArgs => "Args",
        }
    }
}

/// Raw values of the lifecycle and userspace inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionForm {
    pub action_index: usize,
    pub field_index: usize,
    pub program: String,
    pub pin_path: String,
    /// Program type for load, attach type for attach and detach.
    pub prog_type: String,
    pub target: String,
    pub userspace_args: String,
}

impl ActionForm {
    pub fn action(&self) -> LifecycleAction {
        LifecycleAction::ALL[self.action_index % LifecycleAction::ALL.len()]
    }

    pub fn cycle_action(&mut self, delta: isize) {
        let len = LifecycleAction::ALL.len() as isize;
        self.action_index = (self.action_index as isize + delta).rem_euclid(len) as usize;
    }

    pub fn field(&self) -> FormField {
        FormField::ALL[self.field_index % FormField::ALL.len()]
    }

    pub fn move_field(&mut self, delta: isize) {
        let len = FormField::ALL.len() as isize;
        self.field_index = (self.field_index as isize + delta).rem_euclid(len) as usize;
    }

    pub fn text(&self, field: FormField) -> Option<&str> {
        match field {
            FormField::Program => Some(&self.program),
            FormField::PinPath => Some(&self.pin_path),
            FormField::ProgType => Some(&self.prog_type),
            FormField::Target => Some(&self.target),
            FormField::UserspaceArgs => Some(&self.userspace_args),
            FormField::Action | FormField::UserspaceProgram => None,
        }
    }

    fn text_mut(&mut self, field: FormField) -> Option<&mut String> {
        match field {
            FormField::Program => Some(&mut self.program),
            FormField::PinPath => Some(&mut self.pin_path),
            FormField::ProgType => Some(&mut self.prog_type),
            FormField::Target => Some(&mut self.target),
            FormField::UserspaceArgs => Some(&mut self.userspace_args),
            FormField::Action | FormField::UserspaceProgram => None,
        }
    }

    /// Builds the request for `action` from the current inputs.
    pub fn request(
        &self,
        action: LifecycleAction,
        pin_root: &str,
    ) -> Result<LifecycleRequest, ValidationError> {
        match action {
            LifecycleAction::Load => LifecycleRequest::load(
                Some(&self.program),
                Some(&self.pin_path),
                Some(&self.prog_type),
            ),
            LifecycleAction::Unload => {
                LifecycleRequest::unload(Some(&self.program), Some(&self.pin_path))
            }
            LifecycleAction::Attach => LifecycleRequest::attach(
                AttachInput {
                    pin_path: Some(&self.pin_path),
                    attach_type: Some(&self.prog_type),
                    target: Some(&self.target),
                    program: Some(&self.program),
                },
                pin_root,
            ),
            LifecycleAction::Detach => LifecycleRequest::detach(
                Some(&self.pin_path),
                Some(&self.prog_type),
                Some(&self.target),
            ),
        }
    }
}

pub struct App {
    pub config: Config,
    pub controller: LifecycleController,
    pub collector: StreamSynchronizer,
    pub userspace: StreamSynchronizer,
    pub toasts: ToastQueue,
    pub operation: OperationState,
    pub inventory: ProgramInventory,
    pub filter: String,
    pub program_selected: usize,
    pub loaded_selected: usize,
    pub form: ActionForm,
    pub userspace_programs: Vec<String>,
    pub userspace_selected: usize,
    pub userspace_running: bool,
    pub poll_errors: [Option<String>; 2],
    pub focus: Focus,
    pub input_mode: InputMode,
    pub show_charts: bool,
    pub show_help: bool,
    pub should_quit: bool,
    ticks: mpsc::Sender<PollTick>,
    events: mpsc::Sender<AppEvent>,
}

impl App {
    pub fn new(
        config: Config,
        api: Arc<dyn ControlApi>,
        store: Arc<dyn StreamStore>,
        ticks: mpsc::Sender<PollTick>,
        events: mpsc::Sender<AppEvent>,
    ) -> Self {
        let sync_config = config.sync_config();
        let collector = StreamSynchronizer::new(
            StreamKind::Collector,
            api.clone(),
            store.clone(),
            sync_config,
        );
        let userspace =
            StreamSynchronizer::new(StreamKind::Userspace, api.clone(), store, sync_config);
        let controller = LifecycleController::new(api, config.pin_root.clone());
        Self {
            config,
            controller,
            collector,
            userspace,
            toasts: ToastQueue::default(),
            operation: OperationState::Idle,
            inventory: ProgramInventory::default(),
            filter: String::new(),
            program_selected: 0,
            loaded_selected: 0,
            form: ActionForm::default(),
            userspace_programs: Vec::new(),
            userspace_selected: 0,
            userspace_running: false,
            poll_errors: [None, None],
            focus: Focus::Programs,
            input_mode: InputMode::Normal,
            show_charts: false,
            show_help: false,
            should_quit: false,
            ticks,
            events,
        }
    }

    /// Initial fetches once the event loop is up.
    pub fn bootstrap(&mut self) {
        self.refresh_inventory();
        self.refresh_userspace_programs();
        self.refresh_userspace_status();
    }

    pub fn synchronizer(&self, stream: StreamKind) -> &StreamSynchronizer {
        match stream {
            StreamKind::Collector => &self.collector,
            StreamKind::Userspace => &self.userspace,
        }
    }

    fn synchronizer_mut(&mut self, stream: StreamKind) -> &mut StreamSynchronizer {
        match stream {
            StreamKind::Collector => &mut self.collector,
            StreamKind::Userspace => &mut self.userspace,
        }
    }

    pub fn poll_error(&self, stream: StreamKind) -> Option<&str> {
        self.poll_errors[stream_slot(stream)].as_deref()
    }

    pub fn filtered_programs(&self) -> Vec<&str> {
        self.inventory.filter_programs(&self.filter)
    }

    pub fn selected_program(&self) -> Option<&str> {
        self.filtered_programs().get(self.program_selected).copied()
    }

    pub fn selected_loaded(&self) -> Option<&LoadedProgram> {
        self.inventory.loaded.get(self.loaded_selected)
    }

    pub fn selected_userspace_program(&self) -> Option<&str> {
        self.userspace_programs
            .get(self.userspace_selected)
            .map(String::as_str)
    }

    pub fn prune_toasts(&mut self, now: Instant) {
        self.toasts.prune(now);
    }

    fn spawn_task<F>(&self, task: F)
    where
        F: Future<Output = AppEvent> + Send + 'static,
    {
        let events = self.events.clone();
        tokio::spawn(async move {
            let event = task.await;
            if events.send(event).await.is_err() {
                debug!("app_event_dropped");
            }
        });
    }

    pub fn refresh_inventory(&self) {
        let controller = self.controller.clone();
        self.spawn_task(async move { AppEvent::Inventory(controller.refresh().await) });
    }

    pub fn refresh_userspace_programs(&self) {
        let controller = self.controller.clone();
        self.spawn_task(async move {
            AppEvent::UserspacePrograms(controller.userspace_programs().await)
        });
    }

    pub fn refresh_userspace_status(&self) {
        let controller = self.controller.clone();
        self.spawn_task(
            async move { AppEvent::UserspaceStatus(controller.userspace_status().await) },
        );
    }

    /// Validates locally, then sends `action` in the background.
    pub fn submit(&mut self, action: LifecycleAction) {
        let request = match self.form.request(action, &self.config.pin_root) {
            Ok(request) => request,
            Err(err) => {
                self.toasts.error(err.to_string());
                return;
            }
        };
        self.operation = OperationState::begin(action);
        let controller = self.controller.clone();
        self.spawn_task(async move {
            let result = controller.execute(request).await;
            AppEvent::Lifecycle(action, result)
        });
    }

    pub fn toggle_polling(&mut self, stream: StreamKind) {
        let ticks = self.ticks.clone();
        let sync = self.synchronizer_mut(stream);
        if sync.is_running() {
            sync.stop();
            if stream == StreamKind::Collector {
                let controller = self.controller.clone();
                self.spawn_task(async move {
                    AppEvent::CollectionStopped(controller.stop_collection().await)
                });
            } else {
                self.toasts.success("Userspace polling stopped");
            }
        } else {
            sync.start(ticks);
            self.poll_errors[stream_slot(stream)] = None;
            match stream {
                StreamKind::Collector => self.toasts.success("eBPF Collection started"),
                StreamKind::Userspace => self.toasts.success("Userspace polling started"),
            }
        }
    }

    pub fn start_userspace(&mut self) {
        let Some(program) = self.selected_userspace_program().map(str::to_string) else {
            self.toasts
                .error(ValidationError::MissingUserspaceProgram.to_string());
            return;
        };
        let args = self.form.userspace_args.clone();
        let controller = self.controller.clone();
        self.spawn_task(async move {
            AppEvent::Userspace {
                context: "Error starting userspace program",
                result: controller.start_userspace(Some(&program), &args).await,
            }
        });
    }

    pub fn stop_userspace(&mut self) {
        let controller = self.controller.clone();
        self.spawn_task(async move {
            AppEvent::Userspace {
                context: "Error stopping userspace program",
                result: controller.stop_userspace().await,
            }
        });
    }

    pub fn dump(&self, stream: StreamKind) {
        let controller = self.controller.clone();
        let dir = self.config.state_dir.join(DUMP_DIR);
        self.spawn_task(async move {
            let result = write_dump(&controller, stream, &dir).await;
            AppEvent::Dumped(stream, result)
        });
    }

    /// Shows or hides the charts; the first show seeds them with the current counts.
    pub fn toggle_charts(&mut self) {
        self.show_charts = !self.show_charts;
        if self.show_charts {
            self.collector.seed_chart();
            self.userspace.seed_chart();
        }
    }

    pub fn apply_tick(&mut self, tick: PollTick) -> TickOutcome {
        let stream = tick.stream;
        let failure = tick.result.as_ref().err().map(ToString::to_string);
        let outcome = self.synchronizer_mut(stream).apply(tick);
        match outcome {
            TickOutcome::Skipped => self.poll_errors[stream_slot(stream)] = failure,
            TickOutcome::Merged { .. } | TickOutcome::Unchanged => {
                self.poll_errors[stream_slot(stream)] = None
            }
            TickOutcome::Discarded => {}
        }
        outcome
    }

    pub fn apply_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Inventory(Ok(inventory)) => self.set_inventory(inventory),
            AppEvent::Inventory(Err(err)) => {
                self.toasts.client_error("Error fetching programs", &err);
            }
            AppEvent::Lifecycle(action, Ok(outcome)) => {
                self.operation = OperationState::begin(action).finish(true);
                self.toasts.success(outcome.message);
                match outcome.inventory {
                    Ok(inventory) => self.set_inventory(inventory),
                    Err(err) => self.toasts.client_error("Error fetching programs", &err),
                }
            }
            AppEvent::Lifecycle(action, Err(err)) => {
                self.operation = OperationState::begin(action).finish(false);
                self.toasts.client_error(failure_context(action), &err);
            }
            AppEvent::CollectionStopped(Ok(message)) => self.toasts.success(message),
            AppEvent::CollectionStopped(Err(err)) => {
                self.toasts
                    .client_error("Error stopping eBPF collector", &err);
            }
            AppEvent::Userspace { context, result } => {
                match result {
                    Ok(message) => self.toasts.success(message),
                    Err(err) => self.toasts.client_error(context, &err),
                }
                self.refresh_userspace_status();
            }
            AppEvent::UserspacePrograms(Ok(programs)) => {
                self.userspace_programs = programs;
                self.userspace_selected = clamp_index(
                    self.userspace_selected,
                    self.userspace_programs.len(),
                );
            }
            AppEvent::UserspacePrograms(Err(err)) => {
                self.toasts
                    .client_error("Error loading userspace programs", &err);
            }
            AppEvent::UserspaceStatus(Ok(status)) => self.userspace_running = status.running,
            AppEvent::UserspaceStatus(Err(err)) => {
                warn!("userspace_status_failed: {err}");
            }
            AppEvent::Dumped(stream, Ok(path)) => {
                info!(%stream, path = %path.display(), "dump_written");
                self.toasts
                    .success(format!("Saved {} to {}", stream.title(), path.display()));
            }
            AppEvent::Dumped(stream, Err(err)) => {
                self.toasts
                    .error(format!("Error dumping {}: {err}", stream.title()));
            }
        }
    }

    pub fn set_inventory(&mut self, inventory: ProgramInventory) {
        self.inventory = inventory;
        self.program_selected =
            clamp_index(self.program_selected, self.filtered_programs().len());
        self.loaded_selected = clamp_index(self.loaded_selected, self.inventory.loaded.len());
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        match self.input_mode {
            InputMode::Filter => return self.handle_filter_key(key),
            InputMode::Editing => return self.handle_edit_key(key),
            InputMode::Normal => {}
        }

        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('c') => self.should_quit = true,
                KeyCode::Char('l') => self.submit(LifecycleAction::Load),
                KeyCode::Char('u') => self.submit(LifecycleAction::Unload),
                KeyCode::Char('a') => self.submit(LifecycleAction::Attach),
                KeyCode::Char('d') => self.submit(LifecycleAction::Detach),
                _ => {}
            }
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Esc => self.show_help = false,
            KeyCode::Char('?') => self.show_help = !self.show_help,
            KeyCode::Tab => self.focus = self.focus.step(1),
            KeyCode::BackTab => self.focus = self.focus.step(-1),
            KeyCode::Char('r') => {
                self.refresh_inventory();
                self.refresh_userspace_programs();
                self.refresh_userspace_status();
            }
            KeyCode::Char('c') => self.toggle_polling(StreamKind::Collector),
            KeyCode::Char('o') => self.toggle_polling(StreamKind::Userspace),
            KeyCode::Char('v') => self.toggle_charts(),
            KeyCode::Char('s') => self.start_userspace(),
            KeyCode::Char('x') => self.stop_userspace(),
            KeyCode::Char('d') => self.dump(self.focused_stream()),
            KeyCode::Char('/') if self.focus == Focus::Programs => {
                self.input_mode = InputMode::Filter;
            }
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::Left | KeyCode::Char('h') if self.focus == Focus::Form => {
                self.cycle_choice(-1)
            }
            KeyCode::Right | KeyCode::Char('l') if self.focus == Focus::Form => {
                self.cycle_choice(1)
            }
            KeyCode::Enter => self.activate(),
            _ => {}
        }
    }

    fn focused_stream(&self) -> StreamKind {
        match self.focus {
            Focus::Userspace => StreamKind::Userspace,
            _ => StreamKind::Collector,
        }
    }

    fn move_selection(&mut self, delta: isize) {
        match self.focus {
            Focus::Programs => {
                let len = self.filtered_programs().len();
                self.program_selected = step_index(self.program_selected, len, delta);
            }
            Focus::Loaded => {
                let len = self.inventory.loaded.len();
                self.loaded_selected = step_index(self.loaded_selected, len, delta);
            }
            Focus::Form => self.form.move_field(delta),
            Focus::Collector | Focus::Userspace => {}
        }
    }

    fn cycle_choice(&mut self, delta: isize) {
        match self.form.field() {
            FormField::Action => self.form.cycle_action(delta),
            FormField::UserspaceProgram => {
                let len = self.userspace_programs.len();
                if len > 0 {
                    self.userspace_selected =
                        (self.userspace_selected as isize + delta).rem_euclid(len as isize)
                            as usize;
                }
            }
            _ => {}
        }
    }

    fn activate(&mut self) {
        match self.focus {
            Focus::Programs => {
                if let Some(program) = self.selected_program().map(str::to_string) {
                    self.form.program = program;
                }
            }
            Focus::Loaded => {
                if let Some(loaded) = self.selected_loaded() {
                    let pin_path = loaded
                        .pinned
                        .as_deref()
                        .and_then(|paths| paths.split(", ").next())
                        .unwrap_or_default()
                        .to_string();
                    let prog_type = loaded.prog_type.clone();
                    self.form.pin_path = pin_path;
                    self.form.prog_type = prog_type;
                }
            }
            Focus::Form => match self.form.field() {
                FormField::Action => self.submit(self.form.action()),
                FormField::UserspaceProgram => self.start_userspace(),
                _ => self.input_mode = InputMode::Editing,
            },
            Focus::Collector | Focus::Userspace => {}
        }
    }

    fn handle_filter_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc | KeyCode::Enter => self.input_mode = InputMode::Normal,
            KeyCode::Backspace => {
                self.filter.pop();
                self.program_selected = 0;
            }
            KeyCode::Char(ch) => {
                self.filter.push(ch);
                self.program_selected = 0;
            }
            _ => {}
        }
    }

    fn handle_edit_key(&mut self, key: KeyEvent) {
        let field = self.form.field();
        match key.code {
            KeyCode::Esc | KeyCode::Enter => self.input_mode = InputMode::Normal,
            KeyCode::Backspace => {
                if let Some(value) = self.form.text_mut(field) {
                    value.pop();
                }
            }
            KeyCode::Char(ch) => {
                if let Some(value) = self.form.text_mut(field) {
                    value.push(ch);
                }
            }
            _ => {}
        }
    }
}

fn stream_slot(stream: StreamKind) -> usize {
    match stream {
        StreamKind::Collector => 0,
        StreamKind::Userspace => 1,
    }
}

fn failure_context(action: LifecycleAction) -> &'static str {
    match action {
        LifecycleAction::Load => "Error loading program",
        LifecycleAction::Unload => "Error unloading program",
        LifecycleAction::Attach => "Error attaching program",
        LifecycleAction::Detach => "Error detaching program",
    }
}

fn clamp_index(index: usize, len: usize) -> usize {
    if len == 0 {
        0
    } else {
        index.min(len - 1)
    }
}

fn step_index(index: usize, len: usize, delta: isize) -> usize {
    if len == 0 {
        return 0;
    }
    (index as isize + delta).clamp(0, len as isize - 1) as usize
}

pub fn dump_file_name(stream: StreamKind, at: DateTime<Local>) -> String {
    format!("{}-{}.log", stream.storage_key(), at.format("%Y%m%d-%H%M%S"))
}

/// Downloads the server-side dump of `stream` into `dir`.
pub async fn write_dump(
    controller: &LifecycleController,
    stream: StreamKind,
    dir: &Path,
) -> Result<PathBuf, String> {
    let bytes = controller.dump(stream).await.map_err(|err| err.to_string())?;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|err| format!("create {}: {err}", dir.display()))?;
    let path = dir.join(dump_file_name(stream, Local::now()));
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|err| format!("write {}: {err}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpfdeck_client::{HttpControlApi, NotificationLevel};
    use bpfdeck_storage::HistoryStore;
    use chrono::TimeZone;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            server: "http://127.0.0.1:9".to_string(),
            pin_root: "/sys/fs/bpf".to_string(),
            poll_interval: Duration::from_millis(2000),
            chart_window: 15,
            request_timeout: Duration::from_secs(1),
            state_dir: std::env::temp_dir().join("bpfdeck-state-test"),
            debug: false,
        }
    }

    fn app_with_store(
        store: Arc<HistoryStore>,
    ) -> (App, mpsc::Receiver<PollTick>, mpsc::Receiver<AppEvent>) {
        let config = test_config();
        let api = Arc::new(
            HttpControlApi::new(config.server.clone(), config.request_timeout).expect("client"),
        );
        let (ticks_tx, ticks_rx) = mpsc::channel(8);
        let (events_tx, events_rx) = mpsc::channel(8);
        (
            App::new(config, api, store, ticks_tx, events_tx),
            ticks_rx,
            events_rx,
        )
    }

    fn app() -> (App, mpsc::Receiver<PollTick>, mpsc::Receiver<AppEvent>) {
        app_with_store(Arc::new(
            HistoryStore::open_in_memory("test").expect("open db"),
        ))
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(ch: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(ch), KeyModifiers::CONTROL)
    }

    fn inventory() -> ProgramInventory {
        ProgramInventory {
            programs: vec![
                "xdp_filter.bpf.o".to_string(),
                "exec.bpf.o".to_string(),
                "xdp_monitor.bpf.o".to_string(),
            ],
            loaded: vec![LoadedProgram {
                id: 9,
                name: "xdp_filter".to_string(),
                prog_type: "xdp".to_string(),
                pinned: Some("/sys/fs/bpf/xdp_filter".to_string()),
                ..Default::default()
            }],
        }
    }

    #[tokio::test]
    async fn submit_without_program_raises_error_toast() {
        let (mut app, _ticks, mut events) = app();
        app.handle_key(ctrl('l'));
        assert_eq!(app.operation, OperationState::Idle);
        let toast = app.toasts.latest().expect("toast");
        assert_eq!(toast.level, NotificationLevel::Error);
        assert_eq!(toast.message, "Please select or type a .o file name");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn submit_marks_operation_in_flight() {
        let (mut app, _ticks, _events) = app();
        app.form.program = "exec.bpf.o".to_string();
        app.handle_key(ctrl('a'));
        assert_eq!(
            app.operation,
            OperationState::InFlight(LifecycleAction::Attach)
        );
    }

    #[tokio::test]
    async fn lifecycle_results_update_state_and_toasts() {
        let (mut app, _ticks, _events) = app();
        app.apply_event(AppEvent::Lifecycle(
            LifecycleAction::Load,
            Ok(LifecycleOutcome {
                action: LifecycleAction::Load,
                message: "Program loaded".to_string(),
                inventory: Ok(inventory()),
            }),
        ));
        assert_eq!(
            app.operation,
            OperationState::Succeeded(LifecycleAction::Load)
        );
        assert_eq!(app.inventory.programs.len(), 3);

        app.apply_event(AppEvent::Lifecycle(
            LifecycleAction::Detach,
            Err(ClientError::Transport("connection refused".to_string())),
        ));
        assert_eq!(
            app.operation,
            OperationState::Failed(LifecycleAction::Detach)
        );
        assert_eq!(
            app.toasts.latest().map(|t| t.message.as_str()),
            Some("Error detaching program: transport error: connection refused")
        );
    }

    #[tokio::test]
    async fn filter_narrows_program_list() {
        let (mut app, _ticks, _events) = app();
        app.set_inventory(inventory());
        app.handle_key(key(KeyCode::Char('/')));
        assert_eq!(app.input_mode, InputMode::Filter);
        for ch in "XDP".chars() {
            app.handle_key(key(KeyCode::Char(ch)));
        }
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(
            app.filtered_programs(),
            vec!["xdp_filter.bpf.o", "xdp_monitor.bpf.o"]
        );
        app.handle_key(key(KeyCode::Down));
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(app.form.program, "xdp_monitor.bpf.o");
    }

    #[tokio::test]
    async fn selecting_loaded_program_fills_pin_path() {
        let (mut app, _ticks, _events) = app();
        app.set_inventory(inventory());
        app.handle_key(key(KeyCode::Tab));
        assert_eq!(app.focus, Focus::Loaded);
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(app.form.pin_path, "/sys/fs/bpf/xdp_filter");
        assert_eq!(app.form.prog_type, "xdp");
    }

    #[tokio::test]
    async fn picked_loaded_program_can_be_detached() {
        let (mut app, _ticks, _events) = app();
        app.set_inventory(inventory());
        app.handle_key(key(KeyCode::Tab));
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(
            app.form.request(LifecycleAction::Detach, "/sys/fs/bpf"),
            Ok(LifecycleRequest::Detach {
                pin_path: "/sys/fs/bpf/xdp_filter".to_string(),
                attach_type: "xdp".to_string(),
                target: None,
            })
        );
        app.handle_key(ctrl('d'));
        assert_eq!(
            app.operation,
            OperationState::InFlight(LifecycleAction::Detach)
        );
        assert!(app.toasts.is_empty());
    }

    #[test]
    fn typed_type_drives_attach_defaults() {
        let form = ActionForm {
            program: "exec.bpf.o".to_string(),
            prog_type: "tracepoint".to_string(),
            ..Default::default()
        };
        assert_eq!(
            form.request(LifecycleAction::Attach, "/sys/fs/bpf"),
            Ok(LifecycleRequest::Attach {
                pin_path: "/sys/fs/bpf/exec".to_string(),
                attach_type: "tracepoint".to_string(),
                target: Some("tracepoint/syscalls/sys_enter_execve".to_string()),
            })
        );
    }

    #[tokio::test]
    async fn form_editing_writes_into_current_field() {
        let (mut app, _ticks, _events) = app();
        app.focus = Focus::Form;
        app.handle_key(key(KeyCode::Down));
        assert_eq!(app.form.field(), FormField::Program);
        app.handle_key(key(KeyCode::Enter));
        for ch in "exec.bpf.oo".chars() {
            app.handle_key(key(KeyCode::Char(ch)));
        }
        app.handle_key(key(KeyCode::Backspace));
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(app.input_mode, InputMode::Normal);
        assert_eq!(app.form.program, "exec.bpf.o");

        app.handle_key(key(KeyCode::Up));
        app.handle_key(key(KeyCode::Right));
        assert_eq!(app.form.action(), LifecycleAction::Attach);
        assert_eq!(
            app.form.request(LifecycleAction::Attach, "/sys/fs/bpf"),
            Ok(LifecycleRequest::Attach {
                pin_path: "/sys/fs/bpf/exec".to_string(),
                attach_type: "xdp".to_string(),
                target: Some("eth0".to_string()),
            })
        );
    }

    #[tokio::test]
    async fn userspace_start_requires_selection() {
        let (mut app, _ticks, _events) = app();
        app.handle_key(key(KeyCode::Char('s')));
        assert_eq!(
            app.toasts.latest().map(|t| t.message.as_str()),
            Some("Please select a userspace program")
        );
        app.apply_event(AppEvent::UserspacePrograms(Ok(vec![
            "trace_exec".to_string(),
            "net_monitor".to_string(),
        ])));
        app.focus = Focus::Form;
        app.form.field_index = 5;
        app.handle_key(key(KeyCode::Left));
        assert_eq!(app.selected_userspace_program(), Some("net_monitor"));
    }

    #[tokio::test]
    async fn polling_toggle_starts_and_discards_after_stop() {
        let (mut app, _ticks, _events) = app();
        app.handle_key(key(KeyCode::Char('o')));
        assert!(app.userspace.is_running());
        let outcome = app.apply_tick(PollTick {
            stream: StreamKind::Userspace,
            generation: 1,
            result: Err(ClientError::Operation("reader offline".to_string())),
        });
        assert_eq!(outcome, TickOutcome::Skipped);
        assert_eq!(app.poll_error(StreamKind::Userspace), Some("reader offline"));

        let outcome = app.apply_tick(PollTick {
            stream: StreamKind::Userspace,
            generation: 1,
            result: Ok(vec!["started".to_string()]),
        });
        assert_eq!(outcome, TickOutcome::Merged { added: 1, total: 1 });
        assert_eq!(app.poll_error(StreamKind::Userspace), None);

        app.handle_key(key(KeyCode::Char('o')));
        assert!(!app.userspace.is_running());
        let late = app.apply_tick(PollTick {
            stream: StreamKind::Userspace,
            generation: 1,
            result: Ok(vec!["late".to_string()]),
        });
        assert_eq!(late, TickOutcome::Discarded);
    }

    #[tokio::test]
    async fn opening_charts_seeds_from_restored_history() {
        let store = Arc::new(HistoryStore::open_in_memory("test").expect("open db"));
        store
            .put(
                "collectorEvents",
                &["a".to_string(), "b".to_string(), "c".to_string()],
            )
            .expect("put");
        let (mut app, _ticks, _events) = app_with_store(store);
        app.handle_key(key(KeyCode::Char('v')));
        assert!(app.show_charts);
        assert_eq!(app.collector.visualizer().series().values(), vec![3]);
        assert!(app.userspace.visualizer().series().is_empty());
        app.handle_key(key(KeyCode::Char('v')));
        app.handle_key(key(KeyCode::Char('v')));
        assert_eq!(app.collector.visualizer().series().len(), 1);
    }

    #[test]
    fn dump_file_names_carry_stream_and_time() {
        let at = Local
            .with_ymd_and_hms(2024, 2, 27, 9, 5, 30)
            .single()
            .expect("valid time");
        assert_eq!(
            dump_file_name(StreamKind::Userspace, at),
            "userspaceOutput-20240227-090530.log"
        );
    }

    #[test]
    fn focus_cycles_both_ways() {
        assert_eq!(Focus::Userspace.step(1), Focus::Programs);
        assert_eq!(Focus::Programs.step(-1), Focus::Userspace);
    }
}
