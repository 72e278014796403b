use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CLEAR_PAUSE_MS: u64 = 100;
const HARD_MAX_CLEAR_PAUSE_MS: u64 = 5_000;
const DEFAULT_COMPACTION_RETRY_MS: u64 = 2_000;
const HARD_MAX_COMPACTION_RETRY_MS: u64 = 60_000;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 3_600;
const MIN_COMMAND_TIMEOUT_SECS: u64 = 5;
const HARD_MAX_COMMAND_TIMEOUT_SECS: u64 = 24 * 3_600;

/// Tunables for restore/export runs.
///
/// Values come from `GALLERYVAULT_*` environment variables and are clamped to
/// sane ranges; anything unparsable falls back to the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Pause between successive table deletes in the clear phase.
    pub clear_pause: Duration,
    /// Pause before the single compaction retry.
    pub compaction_retry_pause: Duration,
    /// Busy timeout applied to store connections.
    pub command_timeout: Duration,
    /// Directory holding gallery assets (watermark images etc).
    pub asset_root: Option<PathBuf>,
    /// Rebuild `Album` without its self-reference during the load.
    pub drop_self_reference_constraint: bool,
    /// Run `VACUUM` once the restore transaction has committed.
    pub compact_after_restore: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            clear_pause: Duration::from_millis(DEFAULT_CLEAR_PAUSE_MS),
            compaction_retry_pause: Duration::from_millis(DEFAULT_COMPACTION_RETRY_MS),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            asset_root: None,
            drop_self_reference_constraint: true,
            compact_after_restore: true,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let clear_pause = env::var("GALLERYVAULT_CLEAR_PAUSE_MS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(|value| value.min(HARD_MAX_CLEAR_PAUSE_MS))
            .map(Duration::from_millis)
            .unwrap_or(defaults.clear_pause);

        let compaction_retry_pause = env::var("GALLERYVAULT_COMPACTION_RETRY_MS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(|value| value.min(HARD_MAX_COMPACTION_RETRY_MS))
            .map(Duration::from_millis)
            .unwrap_or(defaults.compaction_retry_pause);

        let command_timeout = env::var("GALLERYVAULT_COMMAND_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(|value| value.clamp(MIN_COMMAND_TIMEOUT_SECS, HARD_MAX_COMMAND_TIMEOUT_SECS))
            .map(Duration::from_secs)
            .unwrap_or(defaults.command_timeout);

        let asset_root = env::var_os("GALLERYVAULT_ASSET_ROOT")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        Self {
            clear_pause,
            compaction_retry_pause,
            command_timeout,
            asset_root,
            drop_self_reference_constraint: env_flag("GALLERYVAULT_DROP_SELF_FK")
                .unwrap_or(defaults.drop_self_reference_constraint),
            compact_after_restore: env_flag("GALLERYVAULT_COMPACT")
                .unwrap_or(defaults.compact_after_restore),
        }
    }

    /// Config with no deliberate pauses, for tests and scripted runs.
    pub fn without_pauses() -> Self {
        Self {
            clear_pause: Duration::ZERO,
            compaction_retry_pause: Duration::ZERO,
            ..Self::default()
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    let raw = env::var(key).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
