use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};
use crate::executor::policy::FillFallbackPolicy;
use crate::flow_engine::state::AckResetPolicy;
use crate::orchestrator::completion::CompletionPolicy;

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV: &str = "USSDPILOT_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub flow: FlowConfig,
    #[serde(default)]
    pub keywords: KeywordConfig,
    #[serde(default)]
    pub surfaces: SurfaceConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub initiation: InitiationConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub journal: JournalConfig,
}

// ── Reactive flow ───────────────────────────────────────────────────────────

/// Tunables of the reactive handler. The two handler variants that shipped in
/// the field differed only in these values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Fill attempts per input step before the step is skipped.
    pub max_input_attempts: u32,
    /// How many times the same dialog text may be reprocessed. Must exceed
    /// `max_input_attempts` for the forced skip to be reachable on a static dialog.
    pub max_same_text_retries: u32,
    pub min_action_interval_ms: u64,
    /// Wait before filling, so the dialog can finish rendering.
    pub fill_settle_ms: u64,
    /// Wait between a successful fill and the send click.
    pub send_delay_ms: u64,
    pub dismiss_delay_ms: u64,
    pub reset_grace_ms: u64,
    pub click_settle_ms: u64,
    pub tap_retry_delay_ms: u64,
    pub message_max_len: usize,
    pub min_dialog_text_len: usize,
    pub fill_fallback: FillFallbackPolicy,
    pub ack_reset: AckResetPolicy,
    /// Persist COMPLETED when an unrecognised acknowledgement dialog shows up
    /// after both inputs were accepted.
    pub optimistic_ack_completion: bool,
    pub already_registered_requires_fill: bool,
    /// Bound of the handler inbox; notifications beyond it are dropped.
    pub inbox_capacity: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_input_attempts: 5,
            max_same_text_retries: 6,
            min_action_interval_ms: 200,
            fill_settle_ms: 150,
            send_delay_ms: 250,
            dismiss_delay_ms: 150,
            reset_grace_ms: 100,
            click_settle_ms: 100,
            tap_retry_delay_ms: 150,
            message_max_len: 200,
            min_dialog_text_len: 3,
            fill_fallback: FillFallbackPolicy::AssumeSuccess,
            ack_reset: AckResetPolicy::Never,
            optimistic_ack_completion: true,
            already_registered_requires_fill: false,
            inbox_capacity: 64,
        }
    }
}

impl FlowConfig {
    pub fn min_action_interval(&self) -> Duration {
        Duration::from_millis(self.min_action_interval_ms)
    }
    pub fn fill_settle(&self) -> Duration {
        Duration::from_millis(self.fill_settle_ms)
    }
    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }
    pub fn dismiss_delay(&self) -> Duration {
        Duration::from_millis(self.dismiss_delay_ms)
    }
    pub fn reset_grace(&self) -> Duration {
        Duration::from_millis(self.reset_grace_ms)
    }
    pub fn click_settle(&self) -> Duration {
        Duration::from_millis(self.click_settle_ms)
    }
    pub fn tap_retry_delay(&self) -> Duration {
        Duration::from_millis(self.tap_retry_delay_ms)
    }
}

// ── Keywords ────────────────────────────────────────────────────────────────

/// Curated keyword lists (English + French). Matching is a lowercase
/// substring test, so entries must be lowercase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    pub name: Vec<String>,
    pub id: Vec<String>,
    /// Compound id rule: one verb AND one noun.
    pub id_verbs: Vec<String>,
    pub id_nouns: Vec<String>,
    pub success: Vec<String>,
    pub already_registered: Vec<String>,
    pub error: Vec<String>,
    /// Labels that make a dialog count as an acknowledgement dialog.
    pub ack_buttons: Vec<String>,
    /// Broad set used to get rid of error dialogs.
    pub dismiss_buttons: Vec<String>,
    pub positive_buttons: Vec<String>,
    pub positive_ids: Vec<String>,
    pub send_buttons: Vec<String>,
    /// View-id fragments that mark a node as a button even when it is not
    /// flagged clickable.
    pub button_ids: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            name: words(&[
                "name", "nom", "full name", "enter name", "prenom", "prénom", "saisir nom",
                "votre nom",
            ]),
            id: words(&[
                "cne", "cin", "carte", "identit", "c.i.n", "c.n.e", "numero", "numéro",
                "national", "id number", "identity", "saisir c",
            ]),
            id_verbs: words(&["enter", "type", "saisir", "entrez", "tapez"]),
            id_nouns: words(&["number", "id", "code", "numero", "numéro"]),
            success: words(&[
                "success", "completed", "confirmé", "confirme", "réussi", "reussi", "merci",
                "thank", "effectué", "effectue", "enregistré", "enregistre", "terminé",
                "termine", "bienvenue", "welcome",
            ]),
            already_registered: words(&[
                "already registered", "already exist", "duplicate", "déjà enregistré",
                "deja enregistre", "existe déjà", "existe deja", "déjà inscrit", "deja inscrit",
                "doublon",
            ]),
            error: words(&[
                "error", "failed", "erreur", "échec", "echec", "invalid", "invalide",
                "impossible", "problem",
            ]),
            ack_buttons: words(&["ok", "close", "fermer", "dismiss", "terminer"]),
            dismiss_buttons: words(&["ok", "close", "fermer", "dismiss", "annuler", "cancel"]),
            positive_buttons: words(&[
                "envoyer", "send", "ok", "valider", "oui", "yes", "submit", "confirm",
            ]),
            positive_ids: words(&[
                "button1", "positive", "ok", "send", "submit", "alertdialogprobutton",
            ]),
            send_buttons: words(&["envoyer", "ok", "send", "valider", "submit", "oui", "yes"]),
            button_ids: words(&["button", "positive", "negative", "ok", "send", "submit"]),
        }
    }
}

// ── Surfaces ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Exact surface identifiers (package names) of telephony dialogs.
    pub allow: Vec<String>,
    /// Looser fragments; any surface containing one of them is accepted.
    pub allow_fragments: Vec<String>,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            allow: words(&[
                "com.android.phone",
                "com.android.server.telecom",
                "com.samsung.android.phone",
                "com.sec.android.app.servicemodeapp",
                "com.android.stk",
                "com.android.systemui",
            ]),
            allow_fragments: words(&["phone", "telecom", "ussd", "stk", "dialer", "call", "sim"]),
        }
    }
}

// ── Orchestrator ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub poll_interval_ms: u64,
    pub max_wait_ms: u64,
    /// Extra wait once both inputs are filled, giving the final dialog a chance.
    pub both_filled_grace_ms: u64,
    /// Polls with an unchanged status before partial progress is accepted.
    pub stale_poll_limit: u32,
    pub terminal_settle_ms: u64,
    pub cooldown_ms: u64,
    pub error_cooldown_ms: u64,
    pub busy_retry_ms: u64,
    pub pre_initiate_delay_ms: u64,
    #[serde(default)]
    pub completion: CompletionPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_wait_ms: 20_000,
            both_filled_grace_ms: 3_000,
            stale_poll_limit: 10,
            terminal_settle_ms: 300,
            cooldown_ms: 500,
            error_cooldown_ms: 1_000,
            busy_retry_ms: 1_000,
            pre_initiate_delay_ms: 500,
            completion: CompletionPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
    pub fn both_filled_grace(&self) -> Duration {
        Duration::from_millis(self.both_filled_grace_ms)
    }
    pub fn terminal_settle(&self) -> Duration {
        Duration::from_millis(self.terminal_settle_ms)
    }
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
    pub fn error_cooldown(&self) -> Duration {
        Duration::from_millis(self.error_cooldown_ms)
    }
    pub fn busy_retry(&self) -> Duration {
        Duration::from_millis(self.busy_retry_ms)
    }
    pub fn pre_initiate_delay(&self) -> Duration {
        Duration::from_millis(self.pre_initiate_delay_ms)
    }
}

// ── Initiation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InitiationConfig {
    pub prefix: String,
    pub subcode: String,
    /// Program launched by the command initiator, e.g. `adb`.
    pub command: Option<String>,
    /// Arguments; `{code}` and `{code_uri}` are substituted.
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for InitiationConfig {
    fn default() -> Self {
        Self {
            prefix: "#555".into(),
            subcode: "1".into(),
            command: None,
            args: Vec::new(),
            timeout_secs: 10,
        }
    }
}

// ── Persistence ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// SQLite file; defaults to `<data dir>/ussdpilot/work_items.db`.
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| data_dir_or_cwd().join("work_items.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

/// `<local data dir>/ussdpilot`, falling back to the working directory.
pub fn data_dir_or_cwd() -> PathBuf {
    if let Some(base) = dirs::data_local_dir() {
        let d = base.join("ussdpilot");
        if std::fs::create_dir_all(&d).is_ok() {
            return d;
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn resolve_config_path() -> PilotResult<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV) {
        let candidate = PathBuf::from(explicit);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config taken from {CONFIG_ENV}");
            return Ok(candidate);
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(PilotError::Config(
        "config.toml not found via USSDPILOT_CONFIG, next to executable or in working directory"
            .into(),
    ))
}

pub fn parse_config(content: &str) -> PilotResult<AppConfig> {
    let config: AppConfig = toml::from_str(content)?;
    if config.flow.max_same_text_retries <= config.flow.max_input_attempts {
        tracing::warn!(
            retries = config.flow.max_same_text_retries,
            attempts = config.flow.max_input_attempts,
            "max_same_text_retries does not exceed max_input_attempts; a static prompt will be debounced before it is skipped"
        );
    }
    Ok(config)
}

pub fn load_config() -> PilotResult<AppConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), prefix = %config.initiation.prefix, "config loaded");
    Ok(config)
}

pub fn save_config(config: &AppConfig) -> PilotResult<()> {
    let path = resolve_config_path()?;
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = parse_config(
            r#"
            [flow]
            max_input_attempts = 3
            fill_fallback = "strict"

            [initiation]
            prefix = "*123"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.flow.max_input_attempts, 3);
        assert_eq!(cfg.flow.fill_fallback, FillFallbackPolicy::Strict);
        assert_eq!(cfg.flow.max_same_text_retries, 6);
        assert_eq!(cfg.initiation.prefix, "*123");
        assert_eq!(cfg.initiation.subcode, "1");
        assert_eq!(cfg.orchestrator.stale_poll_limit, 10);
        assert!(cfg.keywords.error.iter().any(|k| k == "erreur"));
    }

    #[test]
    fn empty_file_is_the_default_config() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.flow.max_input_attempts, 5);
        assert_eq!(cfg.orchestrator.max_wait(), Duration::from_secs(20));
        assert_eq!(cfg.flow.ack_reset, AckResetPolicy::Never);
        assert!(cfg.orchestrator.completion.force_when_both_filled);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let cfg = AppConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let back = parse_config(&text).unwrap();
        assert_eq!(back.keywords.name, cfg.keywords.name);
        assert_eq!(back.surfaces.allow, cfg.surfaces.allow);
    }
}
