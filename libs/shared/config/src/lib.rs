use std::env;

use chrono::NaiveTime;
use chrono_tz::Tz;
use tracing::warn;

pub const DEFAULT_CLINIC_TIMEZONE: Tz = chrono_tz::America::Sao_Paulo;
pub const DEFAULT_SUGGESTED_SLOTS_LIMIT: usize = 5;
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgrest,
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: Option<String>,
    pub clinic_timezone: Tz,
    pub working_hours_start: NaiveTime,
    pub working_hours_end: NaiveTime,
    pub suggested_slots_limit: usize,
    pub storage_backend: StorageBackend,
    pub bind_address: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_service_role_key: None,
            clinic_timezone: DEFAULT_CLINIC_TIMEZONE,
            working_hours_start: default_working_hours_start(),
            working_hours_end: default_working_hours_end(),
            suggested_slots_limit: DEFAULT_SUGGESTED_SLOTS_LIMIT,
            storage_backend: StorageBackend::Memory,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY").ok(),
            clinic_timezone: env::var("CLINIC_TIMEZONE")
                .ok()
                .map(|value| parse_timezone(&value))
                .unwrap_or(DEFAULT_CLINIC_TIMEZONE),
            working_hours_start: env::var("WORKING_HOURS_START")
                .ok()
                .map(|value| parse_hours_var("WORKING_HOURS_START", &value, default_working_hours_start()))
                .unwrap_or_else(default_working_hours_start),
            working_hours_end: env::var("WORKING_HOURS_END")
                .ok()
                .map(|value| parse_hours_var("WORKING_HOURS_END", &value, default_working_hours_end()))
                .unwrap_or_else(default_working_hours_end),
            suggested_slots_limit: env::var("SUGGESTED_SLOTS_LIMIT")
                .ok()
                .and_then(|value| match value.parse::<usize>() {
                    Ok(limit) => Some(limit),
                    Err(_) => {
                        warn!("SUGGESTED_SLOTS_LIMIT '{}' is not a number, using default", value);
                        None
                    }
                })
                .unwrap_or(DEFAULT_SUGGESTED_SLOTS_LIMIT),
            storage_backend: StorageBackend::Memory,
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string()),
        };

        if config.working_hours_start >= config.working_hours_end {
            warn!(
                "Working hours {}-{} are empty, falling back to defaults",
                config.working_hours_start, config.working_hours_end
            );
            config.working_hours_start = default_working_hours_start();
            config.working_hours_end = default_working_hours_end();
        }

        config.storage_backend = match env::var("STORAGE_BACKEND").ok().as_deref() {
            Some("memory") => StorageBackend::Memory,
            Some("postgrest") => StorageBackend::Postgrest,
            Some(other) => {
                warn!("Unknown STORAGE_BACKEND '{}', choosing from configuration", other);
                config.default_backend()
            }
            None => config.default_backend(),
        };

        if config.storage_backend == StorageBackend::Postgrest && !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }

    /// Key sent as the bearer token; the service role bypasses row level
    /// security, so it is preferred for server-side access when present.
    pub fn api_key(&self) -> &str {
        self.supabase_service_role_key
            .as_deref()
            .unwrap_or(&self.supabase_anon_key)
    }

    fn default_backend(&self) -> StorageBackend {
        if self.is_configured() {
            StorageBackend::Postgrest
        } else {
            StorageBackend::Memory
        }
    }
}

pub fn default_working_hours_start() -> NaiveTime {
    NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default()
}

pub fn default_working_hours_end() -> NaiveTime {
    NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default()
}

fn parse_timezone(value: &str) -> Tz {
    value.parse::<Tz>().unwrap_or_else(|_| {
        warn!("CLINIC_TIMEZONE '{}' is not a valid IANA timezone, using {}", value, DEFAULT_CLINIC_TIMEZONE);
        DEFAULT_CLINIC_TIMEZONE
    })
}

fn parse_hours_var(name: &str, value: &str, fallback: NaiveTime) -> NaiveTime {
    NaiveTime::parse_from_str(value, "%H:%M").unwrap_or_else(|_| {
        warn!("{} '{}' is not HH:MM, using {}", name, value, fallback.format("%H:%M"));
        fallback
    })
}
