use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent persona used as the system prompt for task runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub personality: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentInput {
    pub name: String,
    #[serde(default)]
    pub personality: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,
}

fn default_temperature() -> Option<f32> {
    Some(0.7)
}

impl Agent {
    pub fn create(input: AgentInput) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: input.name,
            personality: input.personality,
            system_prompt: input.system_prompt,
            temperature: input.temperature,
            created_date: now,
            updated_date: now,
        }
    }

    pub fn apply(&mut self, input: AgentInput) {
        self.name = input.name;
        self.personality = input.personality;
        self.system_prompt = input.system_prompt;
        self.temperature = input.temperature;
        self.updated_date = Utc::now();
    }
}

/// CRM customer record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub status: Option<String>,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerInput {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default = "default_customer_status")]
    pub status: Option<String>,
}

fn default_customer_status() -> Option<String> {
    Some("lead".to_string())
}

impl Customer {
    pub fn create(input: CustomerInput) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: input.name,
            email: input.email,
            company: input.company,
            phone: input.phone,
            status: input.status,
            created_date: now,
            updated_date: now,
        }
    }

    pub fn apply(&mut self, input: CustomerInput) {
        self.name = input.name;
        self.email = input.email;
        self.company = input.company;
        self.phone = input.phone;
        self.status = input.status;
        self.updated_date = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl ScheduleType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleType::Daily => "daily",
            ScheduleType::Weekly => "weekly",
            ScheduleType::Monthly => "monthly",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(ScheduleType::Daily),
            "weekly" => Some(ScheduleType::Weekly),
            "monthly" => Some(ScheduleType::Monthly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }
}

/// Whether a status write is a legal step of the run state machine.
///
/// `running` may be entered from any state; terminal states are only reached
/// from `running`.
pub fn can_transition(from: RunStatus, to: RunStatus) -> bool {
    match to {
        RunStatus::Running => true,
        RunStatus::Success | RunStatus::Failed => from == RunStatus::Running,
        RunStatus::Pending => false,
    }
}

pub const PROMPT_WORKFLOW: &str = "prompt";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub agent_id: String,
    pub task_name: String,
    pub description: Option<String>,
    pub schedule_type: ScheduleType,
    pub schedule_time: String,
    pub schedule_day: Option<i64>,
    pub workflow_definition: String,
    pub workflow_type: String,
    pub tools_to_use: Vec<String>,
    pub webhook_trigger: bool,
    pub is_active: bool,
    pub last_run_status: RunStatus,
    pub next_run_at: Option<DateTime<Utc>>,
    pub schedule_error: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_output: Option<String>,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduledTaskInput {
    pub agent_id: String,
    pub task_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub schedule_type: ScheduleType,
    #[serde(default = "default_schedule_time")]
    pub schedule_time: String,
    #[serde(default = "default_schedule_day")]
    pub schedule_day: Option<i64>,
    pub workflow_definition: String,
    #[serde(default = "default_workflow_type")]
    pub workflow_type: String,
    #[serde(default)]
    pub tools_to_use: Vec<String>,
    #[serde(default)]
    pub webhook_trigger: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_schedule_time() -> String {
    "09:00".to_string()
}

fn default_schedule_day() -> Option<i64> {
    Some(1)
}

fn default_workflow_type() -> String {
    PROMPT_WORKFLOW.to_string()
}

fn default_active() -> bool {
    true
}

impl ScheduledTask {
    pub fn create(input: ScheduledTaskInput) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: input.agent_id,
            task_name: input.task_name,
            description: input.description,
            schedule_type: input.schedule_type,
            schedule_time: input.schedule_time,
            schedule_day: input.schedule_day,
            workflow_definition: input.workflow_definition,
            workflow_type: input.workflow_type,
            tools_to_use: input.tools_to_use,
            webhook_trigger: input.webhook_trigger,
            is_active: input.is_active,
            last_run_status: RunStatus::Pending,
            next_run_at: None,
            schedule_error: None,
            last_run_at: None,
            last_run_output: None,
            created_date: now,
            updated_date: now,
        }
    }

    /// Overwrite the user-editable fields. Run bookkeeping is left alone.
    pub fn apply(&mut self, input: ScheduledTaskInput) {
        self.agent_id = input.agent_id;
        self.task_name = input.task_name;
        self.description = input.description;
        self.schedule_type = input.schedule_type;
        self.schedule_time = input.schedule_time;
        self.schedule_day = input.schedule_day;
        self.workflow_definition = input.workflow_definition;
        self.workflow_type = input.workflow_type;
        self.tools_to_use = input.tools_to_use;
        self.webhook_trigger = input.webhook_trigger;
        self.is_active = input.is_active;
        self.updated_date = Utc::now();
    }

    /// True when two versions of a task need different scheduler registrations.
    pub fn schedule_differs(&self, other: &ScheduledTask) -> bool {
        self.is_active != other.is_active
            || self.schedule_type != other.schedule_type
            || self.schedule_time != other.schedule_time
            || self.schedule_day != other.schedule_day
    }

    pub fn is_prompt_workflow(&self) -> bool {
        self.workflow_type.trim().eq_ignore_ascii_case(PROMPT_WORKFLOW)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
}

/// A completed task run, listed newest first by `GET /activities`.
#[derive(Debug, Clone, Serialize)]
pub struct Activity {
    pub id: String,
    pub activity_type: String,
    pub task_id: String,
    pub task_name: String,
    pub agent_id: String,
    pub trigger: RunTrigger,
    pub status: RunStatus,
    pub summary: String,
    pub created_date: DateTime<Utc>,
}
