use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistOutcome {
    pub action: PersistAction,
    /// Whether the store file existed before this write.
    pub existed_before: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillOutcome {
    Killed,
    AlreadyGone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Best available explanation of a failed command.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.status_code {
            Some(code) => format!("command exited with status {code}"),
            None => "command terminated by signal".to_string(),
        }
    }
}

/// What a user needs to connect a debugger by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualConnect {
    pub target: String,
    pub host_port: u16,
    pub configuration_name: Option<String>,
}

impl ManualConnect {
    pub fn instructions(&self) -> String {
        match &self.configuration_name {
            Some(name) => format!(
                "Debug server listening on {}. Start the '{}' launch configuration or connect with `target remote {}`.",
                self.target, name, self.target
            ),
            None => format!(
                "Debug server listening on {}. Connect with `target remote {}`.",
                self.target, self.target
            ),
        }
    }
}
