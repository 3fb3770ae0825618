use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::stats::aggregator::ReportTimezone;
use crate::stats::fetcher::{RetryPolicy, DEFAULT_BATCH_SIZE};
use crate::stats::sampler::SamplingMode;

#[derive(Debug, Clone)]
pub struct Config {
    pub gmail: GmailConfig,
    pub sampling: SamplingConfig,
    pub fetch: FetchConfig,
    pub report: ReportConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct GmailConfig {
    /// Unset is fine for modes that only read the run history (`--serve`).
    pub credentials_path: Option<String>,
    pub token_cache_path: String,
}

#[derive(Debug, Clone)]
pub struct SamplingConfig {
    pub days: u32,
    /// 0 = no limit
    pub sample_max_ids: usize,
    pub method: SamplingMode,
    pub seed: Option<u64>,
    /// Restrict listing to these label ids (empty = whole mailbox).
    pub labels: Vec<String>,
}

/// Pacing and retry knobs for the batch fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub sleep_every_n_batches: usize,
    pub sleep_long_duration: Duration,
    pub retry: RetryPolicy,
    pub log_every: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::from_millis(250),
            sleep_every_n_batches: 50,
            sleep_long_duration: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            log_every: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub timezone: ReportTimezone,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub schedule_times: Vec<String>, // Format: "HH:MM" (e.g., ["02:00", "14:00"])
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key/value source (environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let credentials_path = get("GMAIL_CREDENTIALS_PATH");

        let batch_size: usize = parse_var("BATCH_SIZE", get("BATCH_SIZE"), DEFAULT_BATCH_SIZE)?;
        if !(1..=100).contains(&batch_size) {
            anyhow::bail!("BATCH_SIZE doit être compris entre 1 et 100 (reçu: {})", batch_size);
        }

        let max_attempts: u32 = parse_var("MAX_RETRIES", get("MAX_RETRIES"), 5)?;
        if max_attempts == 0 {
            anyhow::bail!("MAX_RETRIES doit être >= 1 (nombre total de tentatives par groupe)");
        }

        let days: u32 = parse_var("DAYS", get("DAYS"), 30)?;
        if days == 0 {
            anyhow::bail!("DAYS doit être >= 1");
        }

        let seed = match get("SAMPLE_SEED") {
            Some(raw) => Some(
                raw.parse::<u64>()
                    .with_context(|| format!("SAMPLE_SEED invalide: '{}'", raw))?,
            ),
            None => None,
        };

        let labels = get("SAMPLE_LABELS")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();

        let schedule_times = split_list(&or_default("SCHEDULER_TIMES", "02:00"));

        Ok(Config {
            gmail: GmailConfig {
                credentials_path,
                token_cache_path: or_default("GMAIL_TOKEN_CACHE_PATH", "./gmail-token-cache.json"),
            },
            sampling: SamplingConfig {
                days,
                sample_max_ids: parse_var("SAMPLE_MAX_IDS", get("SAMPLE_MAX_IDS"), 5000)?,
                method: parse_var("SAMPLING_METHOD", get("SAMPLING_METHOD"), SamplingMode::Chronological)?,
                seed,
                labels,
            },
            fetch: FetchConfig {
                batch_size,
                batch_delay: parse_seconds("BATCH_DELAY", get("BATCH_DELAY"), 0.25)?,
                sleep_every_n_batches: parse_var("SLEEP_EVERY_N_BATCHES", get("SLEEP_EVERY_N_BATCHES"), 50)?,
                sleep_long_duration: parse_seconds("SLEEP_LONG_DURATION", get("SLEEP_LONG_DURATION"), 2.0)?,
                retry: RetryPolicy {
                    max_attempts,
                    initial_delay: parse_seconds("INITIAL_RETRY_DELAY", get("INITIAL_RETRY_DELAY"), 1.0)?,
                    max_delay: parse_seconds("MAX_RETRY_DELAY", get("MAX_RETRY_DELAY"), 60.0)?,
                },
                log_every: parse_var("LOG_EVERY", get("LOG_EVERY"), 100)?,
            },
            report: ReportConfig {
                timezone: parse_var("REPORT_TIMEZONE", get("REPORT_TIMEZONE"), ReportTimezone::Local)?,
                output_dir: PathBuf::from(or_default("OUTPUT_DIR", "./out")),
            },
            database: DatabaseConfig {
                path: or_default("DB_PATH", "gmail_stats.db"),
            },
            server: ServerConfig {
                host: or_default("SERVER_HOST", "127.0.0.1"),
                port: parse_var("SERVER_PORT", get("SERVER_PORT"), 8000)?,
            },
            scheduler: SchedulerConfig {
                enabled: parse_var("SCHEDULER_ENABLED", get("SCHEDULER_ENABLED"), false)?,
                schedule_times,
            },
            log_level: or_default("LOG_LEVEL", "info").to_lowercase(),
        })
    }

    /// Search query for the configured time window.
    pub fn query(&self) -> String {
        format!("newer_than:{}d", self.sampling.days)
    }

    /// Vérifier que les variables nécessaires à l'accès Gmail sont définies.
    pub fn require_gmail(&self) -> Result<()> {
        let mut missing_vars = Vec::new();
        if self.gmail.credentials_path.is_none() {
            missing_vars.push("GMAIL_CREDENTIALS_PATH");
        }

        if !missing_vars.is_empty() {
            anyhow::bail!(
                "Variables d'environnement manquantes: {}\n\
                 \n\
                 💡 Solutions :\n\
                 1. Créer un fichier .env avec vos credentials :\n\
                    cp .env.example .env\n\
                    # Puis éditer .env avec vos valeurs\n\
                 \n\
                 2. Ou définir les variables manuellement :\n\
                    export GMAIL_CREDENTIALS_PATH=/path/to/client_credentials.json\n\
                    export GMAIL_TOKEN_CACHE_PATH=./gmail-token-cache.json\n\
                    cargo run -- --check-config",
                missing_vars.join(", ")
            );
        }

        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_var<T>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Valeur invalide pour {}: '{}' ({})", name, value, e)),
    }
}

/// Non-negative seconds, fractional values allowed.
fn parse_seconds(name: &str, raw: Option<String>, default: f64) -> Result<Duration> {
    let seconds: f64 = parse_var(name, raw, default)?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| anyhow::anyhow!("{} doit être un nombre de secondes >= 0 (reçu: {})", name, seconds))
}
