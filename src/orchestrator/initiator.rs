use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::InitiationConfig;
use crate::errors::{PilotError, PilotResult};

/// Dial code that opens the registration dialog for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UssdCode(String);

impl UssdCode {
    /// `PREFIX*SUBCODE*<phone>*SUBCODE*<secret>#`
    pub fn build(cfg: &InitiationConfig, phone: &str, secret: &str) -> Self {
        Self(format!(
            "{prefix}*{sub}*{phone}*{sub}*{secret}#",
            prefix = cfg.prefix,
            sub = cfg.subcode,
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `tel:` URI with `#` percent-encoded.
    pub fn tel_uri(&self) -> String {
        format!("tel:{}", self.0.replace('#', "%23"))
    }
}

impl std::fmt::Display for UssdCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Starts the external dialog flow. Success means the request was handed
/// off, not that any dialog appeared.
#[async_trait]
pub trait FlowInitiator: Send + Sync {
    async fn initiate(&self, code: &UssdCode) -> PilotResult<()>;
}

/// Runs a configured program, e.g. `adb shell am start -a
/// android.intent.action.CALL -d {code_uri}`.
pub struct CommandInitiator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandInitiator {
    pub fn from_config(cfg: &InitiationConfig) -> Option<Self> {
        let program = cfg.command.as_deref()?.trim();
        if program.is_empty() {
            return None;
        }
        Some(Self {
            program: program.to_string(),
            args: cfg.args.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs.max(1)),
        })
    }

    fn render_args(&self, code: &UssdCode) -> Vec<String> {
        let uri = code.tel_uri();
        self.args
            .iter()
            .map(|a| a.replace("{code_uri}", &uri).replace("{code}", code.as_str()))
            .collect()
    }
}

#[async_trait]
impl FlowInitiator for CommandInitiator {
    async fn initiate(&self, code: &UssdCode) -> PilotResult<()> {
        let args = self.render_args(code);
        tracing::debug!(program = %self.program, ?args, "launching initiator");

        let mut cmd = Command::new(&self.program);
        cmd.args(&args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                PilotError::Initiation(format!(
                    "'{}' timed out after {}s",
                    self.program,
                    self.timeout.as_secs()
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PilotError::Initiation(format!(
                "'{}' exited with {:?}: {}",
                self.program,
                output.status.code(),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Stand-in when no command is configured; every initiation fails.
pub struct UnconfiguredInitiator;

#[async_trait]
impl FlowInitiator for UnconfiguredInitiator {
    async fn initiate(&self, code: &UssdCode) -> PilotResult<()> {
        Err(PilotError::Initiation(format!(
            "no initiation command configured for {code}"
        )))
    }
}
