use std::{env, fs, io, time::Duration};

use splitsmart_application::{LedgerParseError, LedgerParser, LedgerProcessor, ReconcilerConfig};
use splitsmart_domain::{SettlementContext, SettlementError, services::RoundingMode};
use splitsmart_infrastructure::{InMemorySettlementStore, JsonLedgerParser};
use splitsmart_presentation::SettlementPresenter;
use tracing_subscriber::EnvFilter;

const SCALE: &str = "SPLITSMART_SCALE";
const ROUNDING: &str = "SPLITSMART_ROUNDING";
const STORE_TIMEOUT_MS: &str = "SPLITSMART_STORE_TIMEOUT_MS";
const STORE_MAX_ATTEMPTS: &str = "SPLITSMART_STORE_MAX_ATTEMPTS";
const STORE_BACKOFF_MS: &str = "SPLITSMART_STORE_BACKOFF_MS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Usage: splitsmart <ledger.json>")]
    Usage,
    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Parse(#[from] LedgerParseError),
    #[error("settlement calculation failed: {0}")]
    Settlement(#[from] SettlementError),
}

/// Runtime settings, read from the environment after loading `.env`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppConfig {
    pub context: SettlementContext,
    pub reconciler: ReconcilerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Unset keys fall back to defaults; set but unparsable keys are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut context = SettlementContext::default();
        let mut reconciler = ReconcilerConfig::default();

        if let Some(scale) = read(&lookup, SCALE, |value| value.parse::<u32>().ok())? {
            context.scale = scale;
        }
        if let Some(mode) = read(&lookup, ROUNDING, parse_rounding)? {
            context.rounding_mode = mode;
        }
        if let Some(ms) = read(&lookup, STORE_TIMEOUT_MS, parse_positive)? {
            reconciler.store_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = read(&lookup, STORE_MAX_ATTEMPTS, |value| {
            value.parse::<u32>().ok().filter(|attempts| *attempts > 0)
        })? {
            reconciler.max_attempts = attempts;
        }
        if let Some(ms) = read(&lookup, STORE_BACKOFF_MS, |value| value.parse::<u64>().ok())? {
            reconciler.initial_backoff = Duration::from_millis(ms);
        }

        context.validate()?;
        Ok(Self {
            context,
            reconciler,
        })
    }
}

fn read<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }
    parse(value).map(Some).ok_or(ConfigError::Invalid {
        key,
        value: raw.clone(),
    })
}

fn parse_rounding(value: &str) -> Option<RoundingMode> {
    match value.to_ascii_lowercase().as_str() {
        "half_up" => Some(RoundingMode::HalfUp),
        "half_even" => Some(RoundingMode::HalfEven),
        _ => None,
    }
}

fn parse_positive(value: &str) -> Option<u64> {
    value.parse::<u64>().ok().filter(|ms| *ms > 0)
}

/// Logs go to stderr so the rendered settlement on stdout stays clean.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Parses the ledger file named on the command line, settles it against an
/// in-memory store and prints the result.
pub async fn run() -> Result<(), CliError> {
    init_logging();

    let config = AppConfig::from_env()?;
    let path = env::args().nth(1).ok_or(CliError::Usage)?;
    let content = fs::read_to_string(&path).map_err(|source| CliError::Read {
        path: path.clone(),
        source,
    })?;

    let parsed = JsonLedgerParser::new(config.context.scale).parse(&content)?;
    tracing::info!(
        event_id = %parsed.ledger.event_id,
        expenses = parsed.ledger.expenses.len(),
        stored = parsed.settlements.len(),
        "Loaded ledger"
    );

    let store = InMemorySettlementStore::new();
    store.seed(parsed.settlements);
    let processor = LedgerProcessor::new(store, config.context, config.reconciler);
    let settlement = processor
        .sync_event(&parsed.ledger, &parsed.assignments)
        .await?;

    let presenter = SettlementPresenter::new(&parsed.ledger.currency, config.context);
    print!("{}", presenter.render(&settlement));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = AppConfig::from_lookup(lookup(&[])).expect("defaults are valid");

        assert_eq!(config.context, SettlementContext::default());
        assert_eq!(config.reconciler, ReconcilerConfig::default());
    }

    #[test]
    fn reads_every_setting() {
        let config = AppConfig::from_lookup(lookup(&[
            (SCALE, "0"),
            (ROUNDING, "HALF_EVEN"),
            (STORE_TIMEOUT_MS, "250"),
            (STORE_MAX_ATTEMPTS, "5"),
            (STORE_BACKOFF_MS, "0"),
        ]))
        .expect("settings are valid");

        assert_eq!(config.context.scale, 0);
        assert_eq!(config.context.rounding_mode, RoundingMode::HalfEven);
        assert_eq!(config.reconciler.store_timeout, Duration::from_millis(250));
        assert_eq!(config.reconciler.max_attempts, 5);
        assert_eq!(config.reconciler.initial_backoff, Duration::ZERO);
    }

    #[test]
    fn blank_value_falls_back_to_default() {
        let config = AppConfig::from_lookup(lookup(&[(SCALE, "  ")])).expect("blank is unset");

        assert_eq!(config.context.scale, 2);
    }

    #[rstest]
    #[case::negative_scale(SCALE, "-1")]
    #[case::unknown_rounding(ROUNDING, "up")]
    #[case::zero_timeout(STORE_TIMEOUT_MS, "0")]
    #[case::zero_attempts(STORE_MAX_ATTEMPTS, "0")]
    #[case::fractional_backoff(STORE_BACKOFF_MS, "1.5")]
    fn rejects_invalid_values(#[case] key: &'static str, #[case] value: &str) {
        let result = AppConfig::from_lookup(lookup(&[(key, value)]));

        assert!(matches!(result, Err(ConfigError::Invalid { key: k, .. }) if k == key));
    }

    #[test]
    fn rejects_unsupported_scale() {
        let result = AppConfig::from_lookup(lookup(&[(SCALE, "40")]));

        assert!(matches!(
            result,
            Err(ConfigError::Settlement(SettlementError::UnsupportedScale { scale: 40, .. }))
        ));
    }
}
