use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_PIN_ROOT: &str = "/sys/fs/bpf";
pub const DEFAULT_ATTACH_TYPE: &str = "xdp";
pub const DEFAULT_XDP_TARGET: &str = "eth0";
pub const DEFAULT_TRACEPOINT_TARGET: &str = "tracepoint/syscalls/sys_enter_execve";

const BPF_OBJECT_SUFFIX: &str = ".bpf.o";

/// Local input rejected before any request is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please select or type a .o file name")]
    MissingProgram,
    #[error("Provide a pinPath or program name to unload")]
    MissingUnloadTarget,
    #[error("Pin path required for {0}")]
    MissingPinPath(LifecycleAction),
    #[error("attach_type required for detach")]
    MissingAttachType,
    #[error("cannot derive a pin path from program name '{0}'")]
    UnusableProgramName(String),
    #[error("Please select a userspace program")]
    MissingUserspaceProgram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleAction {
    Load,
    Unload,
    Attach,
    Detach,
}

impl LifecycleAction {
    pub const ALL: [LifecycleAction; 4] = [
        LifecycleAction::Load,
        LifecycleAction::Attach,
        LifecycleAction::Detach,
        LifecycleAction::Unload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Load => "load",
            LifecycleAction::Unload => "unload",
            LifecycleAction::Attach => "attach",
            LifecycleAction::Detach => "detach",
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            LifecycleAction::Load => "/api/programs/load",
            LifecycleAction::Unload => "/api/programs/unload",
            LifecycleAction::Attach => "/api/programs/attach",
            LifecycleAction::Detach => "/api/programs/detach",
        }
    }

    /// Shown when the server confirms without a message.
    pub fn confirmation(&self) -> &'static str {
        match self {
            LifecycleAction::Load => "Program loaded",
            LifecycleAction::Unload => "Program unloaded",
            LifecycleAction::Attach => "Program attached",
            LifecycleAction::Detach => "Program detached",
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnloadTarget {
    PinPath(String),
    Program(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleRequest {
    Load {
        program: String,
        pin_path: Option<String>,
        prog_type: Option<String>,
    },
    Unload(UnloadTarget),
    Attach {
        pin_path: String,
        attach_type: String,
        target: Option<String>,
    },
    Detach {
        pin_path: String,
        attach_type: String,
        target: Option<String>,
    },
}

/// Raw attach form values plus the program name currently entered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachInput<'a> {
    pub pin_path: Option<&'a str>,
    pub attach_type: Option<&'a str>,
    pub target: Option<&'a str>,
    pub program: Option<&'a str>,
}

impl LifecycleRequest {
    pub fn load(
        program: Option<&str>,
        pin_path: Option<&str>,
        prog_type: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let program = present(program).ok_or(ValidationError::MissingProgram)?;
        Ok(LifecycleRequest::Load {
            program,
            pin_path: present(pin_path),
            prog_type: present(prog_type),
        })
    }

    /// The pin path wins when both are given.
    pub fn unload(program: Option<&str>, pin_path: Option<&str>) -> Result<Self, ValidationError> {
        if let Some(pin_path) = present(pin_path) {
            return Ok(LifecycleRequest::Unload(UnloadTarget::PinPath(pin_path)));
        }
        if let Some(program) = present(program) {
            return Ok(LifecycleRequest::Unload(UnloadTarget::Program(program)));
        }
        Err(ValidationError::MissingUnloadTarget)
    }

    pub fn attach(input: AttachInput<'_>, pin_root: &str) -> Result<Self, ValidationError> {
        let pin_path = match present(input.pin_path) {
            Some(pin_path) => pin_path,
            None => {
                let program = present(input.program)
                    .ok_or(ValidationError::MissingPinPath(LifecycleAction::Attach))?;
                derive_pin_path(&program, pin_root)?
            }
        };
        let attach_type =
            present(input.attach_type).unwrap_or_else(|| DEFAULT_ATTACH_TYPE.to_string());
        let target = present(input.target)
            .or_else(|| default_target(&attach_type).map(str::to_string));
        Ok(LifecycleRequest::Attach {
            pin_path,
            attach_type,
            target,
        })
    }

    pub fn detach(
        pin_path: Option<&str>,
        attach_type: Option<&str>,
        target: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let pin_path =
            present(pin_path).ok_or(ValidationError::MissingPinPath(LifecycleAction::Detach))?;
        let attach_type = present(attach_type).ok_or(ValidationError::MissingAttachType)?;
        Ok(LifecycleRequest::Detach {
            pin_path,
            attach_type,
            target: present(target),
        })
    }

    pub fn action(&self) -> LifecycleAction {
        match self {
            LifecycleRequest::Load { .. } => LifecycleAction::Load,
            LifecycleRequest::Unload(_) => LifecycleAction::Unload,
            LifecycleRequest::Attach { .. } => LifecycleAction::Attach,
            LifecycleRequest::Detach { .. } => LifecycleAction::Detach,
        }
    }

    pub fn endpoint(&self) -> &'static str {
        self.action().endpoint()
    }

    /// JSON body for the action endpoint; absent optionals are left out.
    pub fn body(&self) -> Value {
        let mut body = Map::new();
        match self {
            LifecycleRequest::Load {
                program,
                pin_path,
                prog_type,
            } => {
                insert(&mut body, "program", Some(program));
                insert(&mut body, "pin_path", pin_path.as_ref());
                insert(&mut body, "type", prog_type.as_ref());
            }
            LifecycleRequest::Unload(UnloadTarget::PinPath(pin_path)) => {
                insert(&mut body, "pin_path", Some(pin_path));
            }
            LifecycleRequest::Unload(UnloadTarget::Program(program)) => {
                insert(&mut body, "program", Some(program));
            }
            LifecycleRequest::Attach {
                pin_path,
                attach_type,
                target,
            }
            | LifecycleRequest::Detach {
                pin_path,
                attach_type,
                target,
            } => {
                insert(&mut body, "pin_path", Some(pin_path));
                insert(&mut body, "attach_type", Some(attach_type));
                insert(&mut body, "target", target.as_ref());
            }
        }
        Value::Object(body)
    }
}

/// `xdp_filter.bpf.o` -> `<root>/xdp_filter`; `monitor.o` -> `<root>/monitor`.
pub fn derive_pin_path(program: &str, pin_root: &str) -> Result<String, ValidationError> {
    let program = program.trim();
    let stem = match program.strip_suffix(BPF_OBJECT_SUFFIX) {
        Some(stem) => stem,
        None => program.split('.').next().unwrap_or_default(),
    };
    if stem.is_empty() {
        return Err(ValidationError::UnusableProgramName(program.to_string()));
    }
    Ok(format!("{}/{}", pin_root.trim_end_matches('/'), stem))
}

pub fn is_tracepoint_family(attach_type: &str) -> bool {
    let normalized = attach_type.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "tp" | "raw_tracepoint" | "raw_tp")
        || normalized.starts_with("tracepoint")
}

pub fn default_target(attach_type: &str) -> Option<&'static str> {
    if attach_type.trim().eq_ignore_ascii_case("xdp") {
        Some(DEFAULT_XDP_TARGET)
    } else if is_tracepoint_family(attach_type) {
        Some(DEFAULT_TRACEPOINT_TARGET)
    } else {
        None
    }
}

fn present(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn insert(body: &mut Map<String, Value>, key: &str, value: Option<&String>) {
    if let Some(value) = value {
        body.insert(key.to_string(), Value::String(value.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_requires_program() {
        assert_eq!(
            LifecycleRequest::load(Some("   "), None, None),
            Err(ValidationError::MissingProgram)
        );
        let request =
            LifecycleRequest::load(Some("exec.bpf.o"), None, Some("tracepoint")).expect("load");
        assert_eq!(
            request.body(),
            json!({"program": "exec.bpf.o", "type": "tracepoint"})
        );
    }

    #[test]
    fn unload_prefers_pin_path() {
        let request = LifecycleRequest::unload(Some("exec.bpf.o"), Some("/sys/fs/bpf/exec"))
            .expect("unload");
        assert_eq!(request.body(), json!({"pin_path": "/sys/fs/bpf/exec"}));
        let by_program = LifecycleRequest::unload(Some("exec.bpf.o"), Some("")).expect("unload");
        assert_eq!(by_program.body(), json!({"program": "exec.bpf.o"}));
        assert_eq!(
            LifecycleRequest::unload(None, None),
            Err(ValidationError::MissingUnloadTarget)
        );
    }

    #[test]
    fn attach_derives_everything_from_program_name() {
        let request = LifecycleRequest::attach(
            AttachInput {
                program: Some("xdp_filter.bpf.o"),
                ..Default::default()
            },
            DEFAULT_PIN_ROOT,
        )
        .expect("attach");
        assert_eq!(
            request,
            LifecycleRequest::Attach {
                pin_path: "/sys/fs/bpf/xdp_filter".to_string(),
                attach_type: "xdp".to_string(),
                target: Some("eth0".to_string()),
            }
        );
    }

    #[test]
    fn attach_with_explicit_pin_and_default_type() {
        let request = LifecycleRequest::attach(
            AttachInput {
                pin_path: Some("/sys/fs/bpf/custom"),
                program: Some("ignored.bpf.o"),
                ..Default::default()
            },
            DEFAULT_PIN_ROOT,
        )
        .expect("attach");
        assert_eq!(
            request.body(),
            json!({"pin_path": "/sys/fs/bpf/custom", "attach_type": "xdp", "target": "eth0"})
        );
    }

    #[test]
    fn attach_with_derived_pin_and_explicit_type() {
        let request = LifecycleRequest::attach(
            AttachInput {
                attach_type: Some("tracepoint"),
                program: Some("exec.o"),
                ..Default::default()
            },
            DEFAULT_PIN_ROOT,
        )
        .expect("attach");
        assert_eq!(
            request.body(),
            json!({
                "pin_path": "/sys/fs/bpf/exec",
                "attach_type": "tracepoint",
                "target": DEFAULT_TRACEPOINT_TARGET,
            })
        );
    }

    #[test]
    fn attach_with_explicit_pin_and_type_leaves_unknown_target_unset() {
        let request = LifecycleRequest::attach(
            AttachInput {
                pin_path: Some("/sys/fs/bpf/probe"),
                attach_type: Some("kprobe"),
                ..Default::default()
            },
            DEFAULT_PIN_ROOT,
        )
        .expect("attach");
        assert_eq!(
            request.body(),
            json!({"pin_path": "/sys/fs/bpf/probe", "attach_type": "kprobe"})
        );
    }

    #[test]
    fn attach_without_pin_or_program_is_rejected() {
        assert_eq!(
            LifecycleRequest::attach(AttachInput::default(), DEFAULT_PIN_ROOT),
            Err(ValidationError::MissingPinPath(LifecycleAction::Attach))
        );
        assert!(matches!(
            LifecycleRequest::attach(
                AttachInput {
                    program: Some(".o"),
                    ..Default::default()
                },
                DEFAULT_PIN_ROOT,
            ),
            Err(ValidationError::UnusableProgramName(_))
        ));
    }

    #[test]
    fn detach_requires_pin_and_type() {
        assert_eq!(
            LifecycleRequest::detach(Some("/sys/fs/bpf/x"), None, None),
            Err(ValidationError::MissingAttachType)
        );
        assert_eq!(
            LifecycleRequest::detach(None, Some("xdp"), None),
            Err(ValidationError::MissingPinPath(LifecycleAction::Detach))
        );
        let request =
            LifecycleRequest::detach(Some("/sys/fs/bpf/x"), Some("xdp"), None).expect("detach");
        assert_eq!(
            request.body(),
            json!({"pin_path": "/sys/fs/bpf/x", "attach_type": "xdp"})
        );
    }

    #[test]
    fn detach_forwards_target_only_when_present() {
        let request = LifecycleRequest::detach(
            Some("/sys/fs/bpf/exec"),
            Some("tracepoint"),
            Some("tracepoint/syscalls/sys_enter_execve"),
        )
        .expect("detach");
        assert_eq!(
            request.body(),
            json!({
                "pin_path": "/sys/fs/bpf/exec",
                "attach_type": "tracepoint",
                "target": "tracepoint/syscalls/sys_enter_execve"
            })
        );
        let blank =
            LifecycleRequest::detach(Some("/sys/fs/bpf/exec"), Some("tracepoint"), Some("  "))
                .expect("detach");
        assert!(blank.body().get("target").is_none());
    }

    #[test]
    fn pin_path_derivation_rules() {
        assert_eq!(
            derive_pin_path("block_ping.bpf.o", "/sys/fs/bpf/").expect("derive"),
            "/sys/fs/bpf/block_ping"
        );
        assert_eq!(
            derive_pin_path("xdp_drop.o", "/custom/root").expect("derive"),
            "/custom/root/xdp_drop"
        );
        assert_eq!(
            derive_pin_path("multi.part.name.o", DEFAULT_PIN_ROOT).expect("derive"),
            "/sys/fs/bpf/multi"
        );
    }

    #[test]
    fn tracepoint_family_detection() {
        for kind in ["tracepoint", "Tracepoint", "tp", "raw_tracepoint", "raw_tp"] {
            assert!(is_tracepoint_family(kind), "{kind}");
        }
        assert_eq!(default_target("XDP"), Some(DEFAULT_XDP_TARGET));
        assert_eq!(default_target("cgroup_skb"), None);
    }
}
