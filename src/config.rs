//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default shared-memory base name.
pub const DEFAULT_IPC_NAME: &str = "mira_ipc";

/// Default segment size per direction (200 MiB).
pub const DEFAULT_SEGMENT_SIZE: usize = 200 * 1024 * 1024;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Suspended flows older than this are discarded on the next turn.
    pub suspend_ttl: Duration,
    /// Re-prompts a single flow step may issue before the flow gives up.
    pub max_input_retries: u32,
    /// Step transitions allowed within one turn.
    pub max_transitions_per_turn: usize,
    /// System prompt used when the request does not carry one.
    pub default_system_prompt: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            suspend_ttl: Duration::from_secs(3600), // 1 hour
            max_input_retries: 3,
            max_transitions_per_turn: 64,
            default_system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl DispatcherConfig {
    /// Build from `MIRA_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            suspend_ttl: env_parse::<u64>("MIRA_SUSPEND_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.suspend_ttl),
            max_input_retries: env_parse("MIRA_MAX_INPUT_RETRIES")?
                .unwrap_or(defaults.max_input_retries),
            max_transitions_per_turn: defaults.max_transitions_per_turn,
            default_system_prompt: std::env::var("MIRA_SYSTEM_PROMPT")
                .unwrap_or(defaults.default_system_prompt),
        })
    }
}

/// Shared-memory transport configuration.
#[derive(Debug, Clone)]
pub struct IpcConfig {
    /// Base name; segments are `{name}_req` and `{name}_resp`.
    pub name: String,
    /// Directory holding the segment files.
    pub shm_dir: PathBuf,
    /// Size in bytes of each segment (used by the creating side).
    pub segment_size: usize,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_IPC_NAME.to_string(),
            shm_dir: default_shm_dir(),
            segment_size: DEFAULT_SEGMENT_SIZE,
        }
    }
}

impl IpcConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            name: std::env::var("MIRA_IPC_NAME").unwrap_or(defaults.name),
            shm_dir: std::env::var("MIRA_SHM_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.shm_dir),
            segment_size: env_parse("MIRA_SEGMENT_SIZE")?.unwrap_or(defaults.segment_size),
        })
    }
}

/// Backend service loop configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Sleep between polls of an empty request queue.
    pub poll_interval: Duration,
    /// Attempts for a response write that hits a full segment.
    pub send_retries: u32,
    /// Attempts to attach to segments the front end has not created yet.
    pub attach_retries: u32,
    /// Delay between attach attempts.
    pub attach_delay: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            send_retries: 5,
            attach_retries: 10,
            attach_delay: Duration::from_secs(1),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            poll_interval: env_parse::<u64>("MIRA_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            send_retries: env_parse("MIRA_SEND_RETRIES")?.unwrap_or(defaults.send_retries),
            ..defaults
        })
    }
}

/// Default system prompt for free chat.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are Mira, a warm personal beauty assistant. You can create a user profile, \
analyze skin from a short face video, analyze products against the user's profile, \
and guide skincare or makeup routines step by step. Keep replies short and kind.";

/// `/dev/shm` where it exists (Linux), otherwise the system temp directory.
pub fn default_shm_dir() -> PathBuf {
    let shm = PathBuf::from("/dev/shm");
    if shm.is_dir() {
        shm
    } else {
        std::env::temp_dir()
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        Err(_) => Ok(None),
    }
}
