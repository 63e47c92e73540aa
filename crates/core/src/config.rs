use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hard ceiling on tasks per run, regardless of configuration.
pub const MAX_PER_RUN_CEILING: usize = 1000;

/// Highest run number a send can target; markers advance up to run 9.
pub const LAST_SENDABLE_RUN: u8 = 8;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_i32(profile: &str, key: &str, default: i32) -> i32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
        None => default,
    }
}

/// Positive integer or the fallback (zero counts as unset).
fn profiled_env_nonzero(profile: &str, key: &str) -> Option<usize> {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n > 0)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub dispatch: DispatchConfig,
    pub webhook: WebhookStoreConfig,
    pub portal: PortalConfig,
    pub schedule: ScheduleConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CALLRUN_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CALLRUN_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
            dispatch: DispatchConfig::from_env_profiled(p),
            webhook: WebhookStoreConfig::from_env_profiled(p),
            portal: PortalConfig::from_env_profiled(p),
            schedule: ScheduleConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:    {}:{}", self.server.host, self.server.port);
        tracing::info!("  storage:   data_dir={}", self.storage.data_dir.display());
        tracing::info!(
            "  dispatch:  url={}, max_per_run={}, runs_configured={:?}",
            self.dispatch.url,
            self.dispatch.max_per_run,
            self.dispatch.configured_runs()
        );
        tracing::info!(
            "  webhook:   bucket={}, path={}",
            self.webhook.bucket.as_deref().unwrap_or("(local)"),
            self.webhook.results_path
        );
        tracing::info!(
            "  schedule:  utc_offset_min={}, call_window={}..{} (enforced={})",
            self.schedule.utc_offset_minutes,
            self.schedule.call_start_hour,
            self.schedule.call_end_hour,
            self.schedule.enforce_call_window
        );
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "storage": { "data_dir": self.storage.data_dir },
            "dispatch": {
                "url": self.dispatch.url,
                "max_per_run": self.dispatch.max_per_run,
                "configured": self.dispatch.is_configured(),
                "runs": self.dispatch.configured_runs(),
            },
            "webhook": {
                "bucket": self.webhook.bucket,
                "results_path": self.webhook.results_path,
                "remote": self.webhook.is_remote(),
            },
            "portal": {
                "client_token_set": self.portal.client_token.is_some(),
                "send_cooldown_minutes": self.portal.send_cooldown_minutes,
                "ingest_cooldown_minutes": self.portal.ingest_cooldown_minutes,
            },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 3001),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for the workbook directories and session file.
    pub data_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
        }
    }

    pub fn outbound_dir(&self) -> PathBuf {
        self.data_dir.join("outbound")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.data_dir.join("results")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archive")
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.data_dir.join("dispatch-sessions.json")
    }
}

// ── Dispatch endpoint & batching ──────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub api_key: Option<String>,
    pub url: String,
    /// Agent id per run number; index 0 is run 1.
    pub agents: Vec<Option<String>>,
    /// Caller id per run number; index 0 is run 1.
    pub from_numbers: Vec<Option<String>>,
    /// Row cap per run, never above [`MAX_PER_RUN_CEILING`].
    pub max_per_run: usize,
    pub default_run_limit: usize,
    pub batch_size_full: usize,
    pub batch_size_reduced: usize,
    pub batch_size_min: usize,
    /// Host execution ceiling a single tick must fit within.
    pub tick_budget_secs: u64,
    pub reschedule_delay_secs: u64,
    pub first_tick_delay_ms: u64,
    /// Running sessions without progress for this long are reaped at start.
    pub stale_session_minutes: u64,
}

impl DispatchConfig {
    fn from_env_profiled(p: &str) -> Self {
        let per_run = |prefix: &str| -> Vec<Option<String>> {
            (1..=LAST_SENDABLE_RUN)
                .map(|n| profiled_env_opt(p, &format!("{prefix}_{n}")))
                .collect()
        };
        let max_per_run = profiled_env_nonzero(p, "MAX_PER_RUN")
            .unwrap_or(MAX_PER_RUN_CEILING)
            .min(MAX_PER_RUN_CEILING);
        let default_run_limit = profiled_env_nonzero(p, "DEFAULT_RUN_LIMIT").unwrap_or(max_per_run);
        Self {
            api_key: profiled_env_opt(p, "DISPATCH_API_KEY"),
            url: profiled_env_or(p, "DISPATCH_URL", "https://api.retellai.com/create-batch-call"),
            agents: per_run("AGENT_RUN"),
            from_numbers: per_run("FROM_RUN"),
            max_per_run,
            default_run_limit,
            batch_size_full: profiled_env_nonzero(p, "BATCH_SIZE_FULL").unwrap_or(100),
            batch_size_reduced: profiled_env_nonzero(p, "BATCH_SIZE_REDUCED").unwrap_or(50),
            batch_size_min: profiled_env_nonzero(p, "BATCH_SIZE_MIN").unwrap_or(20),
            tick_budget_secs: profiled_env_u64(p, "TICK_BUDGET_SECS", 300),
            reschedule_delay_secs: profiled_env_u64(p, "RESCHEDULE_DELAY_SECS", 60),
            first_tick_delay_ms: profiled_env_u64(p, "FIRST_TICK_DELAY_MS", 100),
            stale_session_minutes: profiled_env_u64(p, "STALE_SESSION_MINUTES", 30),
        }
    }

    pub fn agent_for(&self, run: u8) -> Option<&str> {
        run.checked_sub(1)
            .and_then(|i| self.agents.get(i as usize))
            .and_then(|a| a.as_deref())
    }

    pub fn from_number_for(&self, run: u8) -> Option<&str> {
        run.checked_sub(1)
            .and_then(|i| self.from_numbers.get(i as usize))
            .and_then(|a| a.as_deref())
    }

    /// Run numbers that have both an agent and a caller id.
    pub fn configured_runs(&self) -> Vec<u8> {
        (1..=LAST_SENDABLE_RUN)
            .filter(|n| self.agent_for(*n).is_some() && self.from_number_for(*n).is_some())
            .collect()
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() && !self.configured_runs().is_empty()
    }

    pub fn tick_budget(&self) -> Duration {
        Duration::from_secs(self.tick_budget_secs)
    }

    pub fn reschedule_delay(&self) -> Duration {
        Duration::from_secs(self.reschedule_delay_secs)
    }

    pub fn first_tick_delay(&self) -> Duration {
        Duration::from_millis(self.first_tick_delay_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: "https://api.retellai.com/create-batch-call".to_string(),
            agents: vec![None; LAST_SENDABLE_RUN as usize],
            from_numbers: vec![None; LAST_SENDABLE_RUN as usize],
            max_per_run: MAX_PER_RUN_CEILING,
            default_run_limit: MAX_PER_RUN_CEILING,
            batch_size_full: 100,
            batch_size_reduced: 50,
            batch_size_min: 20,
            tick_budget_secs: 300,
            reschedule_delay_secs: 60,
            first_tick_delay_ms: 100,
            stale_session_minutes: 30,
        }
    }
}

// ── Webhook drop zone (object storage) ────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookStoreConfig {
    /// S3 bucket; when unset the drop zone is a local directory.
    pub bucket: Option<String>,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub local_dir: PathBuf,
    /// Object key of the pending outcome batch.
    pub results_path: String,
}

impl WebhookStoreConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            bucket: profiled_env_opt(p, "WEBHOOK_BUCKET"),
            region: profiled_env_or(p, "AWS_REGION", "us-east-1"),
            access_key_id: profiled_env_opt(p, "AWS_ACCESS_KEY_ID"),
            secret_access_key: profiled_env_opt(p, "AWS_SECRET_ACCESS_KEY"),
            endpoint_url: profiled_env_opt(p, "AWS_ENDPOINT_URL"),
            local_dir: PathBuf::from(profiled_env_or(p, "WEBHOOK_LOCAL_DIR", "data/webhook")),
            results_path: profiled_env_or(p, "WEBHOOK_RESULTS_PATH", "raw_leads/inbound_webhook.csv"),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.bucket.is_some()
    }
}

// ── Client portal / control surface ───────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    pub client_token: Option<String>,
    pub portal_password: Option<String>,
    pub send_cooldown_minutes: u64,
    pub ingest_cooldown_minutes: u64,
}

impl PortalConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            client_token: profiled_env_opt(p, "CLIENT_TOKEN"),
            portal_password: profiled_env_opt(p, "PORTAL_PASSWORD"),
            send_cooldown_minutes: profiled_env_u64(p, "SEND_COOLDOWN_MIN", 21),
            ingest_cooldown_minutes: profiled_env_u64(p, "INGEST_COOLDOWN_MIN", 20),
        }
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            client_token: None,
            portal_password: None,
            send_cooldown_minutes: 21,
            ingest_cooldown_minutes: 20,
        }
    }
}

// ── Time & background schedules ───────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Offset of the campaign's local time from UTC, in minutes.
    pub utc_offset_minutes: i32,
    pub call_start_hour: u32,
    pub call_end_hour: u32,
    pub enforce_call_window: bool,
    pub ingest_poll_interval_secs: u64,
    pub ingest_lease_minutes: u64,
    /// Cron expression (5 or 6 fields) for the recall sweep.
    pub recall_sweep_cron: String,
}

impl ScheduleConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            utc_offset_minutes: profiled_env_i32(p, "UTC_OFFSET_MINUTES", -360),
            call_start_hour: profiled_env_u64(p, "CALL_START_HOUR", 7) as u32,
            call_end_hour: profiled_env_u64(p, "CALL_END_HOUR", 20) as u32,
            enforce_call_window: profiled_env_bool(p, "ENFORCE_CALL_WINDOW", false),
            ingest_poll_interval_secs: profiled_env_u64(p, "INGEST_POLL_INTERVAL_SECS", 300),
            ingest_lease_minutes: profiled_env_u64(p, "INGEST_LEASE_MINUTES", 90),
            recall_sweep_cron: profiled_env_or(p, "RECALL_SWEEP_CRON", "0 6 * * *"),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: -360,
            call_start_hour: 7,
            call_end_hour: 20,
            enforce_call_window: false,
            ingest_poll_interval_secs: 300,
            ingest_lease_minutes: 90,
            recall_sweep_cron: "0 6 * * *".to_string(),
        }
    }
}
