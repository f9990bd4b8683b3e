use crate::CoreError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_VM_NAME_PREFIX: &str = "spb41tp9223-";
pub const DEFAULT_SITE: &str = "SPB41";
pub const DEFAULT_API_VERSION: &str = "v1";

/// State tag given to VMs staged locally and not yet provisioned.
pub const VM_STATE_NEW: &str = "NEW";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmType {
    Small,
    Medium,
    Large,
}

impl VmType {
    pub const ALL: [VmType; 3] = [VmType::Small, VmType::Medium, VmType::Large];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            VmType::Small => "small",
            VmType::Medium => "medium",
            VmType::Large => "large",
        }
    }

    #[must_use]
    pub fn config(self) -> VmConfig {
        match self {
            VmType::Small => VmConfig {
                cpu: 2,
                memory: 4,
                disk: 50,
            },
            VmType::Medium => VmConfig {
                cpu: 4,
                memory: 8,
                disk: 100,
            },
            VmType::Large => VmConfig {
                cpu: 8,
                memory: 16,
                disk: 200,
            },
        }
    }

    #[must_use]
    pub fn accepted() -> Vec<&'static str> {
        Self::ALL.iter().map(|t| t.as_str()).collect()
    }
}

impl FromStr for VmType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::InvalidParameter {
                parameter: "VM type",
                value: s.to_string(),
                accepted: Self::accepted(),
            })
    }
}

impl fmt::Display for VmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating system images the provisioning service can deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmOs {
    Redos73,
    Astra17Orel,
    Astra173Voronezh,
    Win10,
}

impl VmOs {
    pub const ALL: [VmOs; 4] = [
        VmOs::Redos73,
        VmOs::Astra17Orel,
        VmOs::Astra173Voronezh,
        VmOs::Win10,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            VmOs::Redos73 => "redos73",
            VmOs::Astra17Orel => "astra17orel",
            VmOs::Astra173Voronezh => "astra173voronezh",
            VmOs::Win10 => "win10",
        }
    }

    #[must_use]
    pub fn accepted() -> Vec<&'static str> {
        Self::ALL.iter().map(|os| os.as_str()).collect()
    }
}

impl FromStr for VmOs {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|os| os.as_str() == s)
            .ok_or_else(|| CoreError::InvalidParameter {
                parameter: "OS",
                value: s.to_string(),
                accepted: Self::accepted(),
            })
    }
}

impl fmt::Display for VmOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resources of a VM: CPU cores, memory in GB, disk in GB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    #[serde(rename = "CPU")]
    pub cpu: u32,
    #[serde(rename = "MEMORY")]
    pub memory: u32,
    #[serde(rename = "DISK")]
    pub disk: u32,
}

/// One machine in a pool's inventory.
///
/// The resource configuration is not stored: it is always derived from
/// `vm_type`, including when a VM is decoded from a service response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "VmWire", into = "VmWire")]
pub struct Vm {
    pub id: Option<String>,
    pub vm_type: VmType,
    pub name: String,
    pub os: VmOs,
    pub state: Option<String>,
    pub notes: Option<String>,
}

impl Vm {
    #[must_use]
    pub fn new(vm_type: VmType, os: VmOs, name: impl Into<String>) -> Self {
        Self {
            id: None,
            vm_type,
            name: name.into(),
            os,
            state: Some(VM_STATE_NEW.to_string()),
            notes: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> VmConfig {
        self.vm_type.config()
    }
}

#[derive(Serialize, Deserialize)]
struct VmWire {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    vm_type: VmType,
    name: String,
    #[serde(default)]
    config: Option<VmConfig>,
    os: VmOs,
    #[serde(default)]
    state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
}

impl From<VmWire> for Vm {
    fn from(wire: VmWire) -> Self {
        Self {
            id: wire.id,
            vm_type: wire.vm_type,
            name: wire.name,
            os: wire.os,
            state: wire.state,
            notes: wire.notes,
        }
    }
}

impl From<Vm> for VmWire {
    fn from(vm: Vm) -> Self {
        Self {
            id: vm.id,
            vm_type: vm.vm_type,
            name: vm.name,
            config: Some(vm.vm_type.config()),
            os: vm.os,
            state: vm.state,
            notes: vm.notes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PoolState {
    #[default]
    Init,
    Create,
    Created,
    Plan,
    Planned,
    Pending,
    Apply,
    Running,
    Failed,
    Failure,
    Destroy,
    Destroyed,
    Delete,
    Success,
    Started,
    Progress,
}

/// States after which the service reports no further progress for a task.
pub const TASK_FINISHED: [PoolState; 4] = [
    PoolState::Failure,
    PoolState::Success,
    PoolState::Failed,
    PoolState::Destroyed,
];

impl PoolState {
    pub const ALL: [PoolState; 16] = [
        PoolState::Init,
        PoolState::Create,
        PoolState::Created,
        PoolState::Plan,
        PoolState::Planned,
        PoolState::Pending,
        PoolState::Apply,
        PoolState::Running,
        PoolState::Failed,
        PoolState::Failure,
        PoolState::Destroy,
        PoolState::Destroyed,
        PoolState::Delete,
        PoolState::Success,
        PoolState::Started,
        PoolState::Progress,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PoolState::Init => "INIT",
            PoolState::Create => "CREATE",
            PoolState::Created => "CREATED",
            PoolState::Plan => "PLAN",
            PoolState::Planned => "PLANNED",
            PoolState::Pending => "PENDING",
            PoolState::Apply => "APPLY",
            PoolState::Running => "RUNNING",
            PoolState::Failed => "FAILED",
            PoolState::Failure => "FAILURE",
            PoolState::Destroy => "DESTROY",
            PoolState::Destroyed => "DESTROYED",
            PoolState::Delete => "DELETE",
            PoolState::Success => "SUCCESS",
            PoolState::Started => "STARTED",
            PoolState::Progress => "PROGRESS",
        }
    }

    #[must_use]
    pub fn is_task_finished(self) -> bool {
        TASK_FINISHED.contains(&self)
    }
}

impl FromStr for PoolState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| CoreError::InvalidParameter {
                parameter: "pool state",
                value: s.to_string(),
                accepted: Self::ALL.iter().map(|state| state.as_str()).collect(),
            })
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_vm_name_prefix")]
    pub vm_name_prefix: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub state: PoolState,
    #[serde(default)]
    pub state_note: Option<String>,
    #[serde(default = "default_site")]
    pub site: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<Vm>,
    pub owner: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub task_ids: Option<Vec<String>>,
}

impl Pool {
    /// An empty, unsaved pool owned by `owner`.
    #[must_use]
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            id: None,
            vm_name_prefix: default_vm_name_prefix(),
            task_id: None,
            state: PoolState::Init,
            state_note: None,
            site: default_site(),
            api_version: default_api_version(),
            items: Vec::new(),
            owner: owner.into(),
            description: None,
            name: None,
            task_ids: None,
        }
    }

    /// Name used to address the pool on the service, falling back to the VM prefix.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.vm_name_prefix)
    }

    #[must_use]
    pub fn find_vm(&self, name: &str) -> Option<&Vm> {
        self.items.iter().find(|vm| vm.name == name)
    }

    /// Merge a freshly fetched copy of this pool into the local one.
    ///
    /// Lifecycle fields are taken from `remote`. Locally staged VMs are kept;
    /// VMs known to both sides pick up the service-assigned id and state.
    pub fn absorb_status(&mut self, remote: &Pool) {
        self.id.clone_from(&remote.id);
        self.state = remote.state;
        self.state_note.clone_from(&remote.state_note);
        self.task_id.clone_from(&remote.task_id);
        self.task_ids.clone_from(&remote.task_ids);

        for vm in &mut self.items {
            if let Some(known) = remote.find_vm(&vm.name) {
                vm.id.clone_from(&known.id);
                vm.state.clone_from(&known.state);
            }
        }
    }
}

fn default_vm_name_prefix() -> String {
    DEFAULT_VM_NAME_PREFIX.to_string()
}

fn default_site() -> String {
    DEFAULT_SITE.to_string()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
