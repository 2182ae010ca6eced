//! # Service Configuration
//!
//! Loaded from environment variables. Every value has a default; a value
//! that is present but malformed fails startup with a [`ConfigError`]
//! naming the variable.
//!
//! | Variable | Default |
//! |---|---|
//! | `ESCROW_PORT` | `8080` |
//! | `DATABASE_URL` | unset (in-memory store) |
//! | `ESCROW_SWEEP_INTERVAL_SECS` | `60` |
//! | `ESCROW_MEDIATION_TIMEOUT_SECS` | `259200` (72h) |
//! | `ESCROW_REQUEST_TIMEOUT_MS` | `10000` |
//! | `ESCROW_ALLOWED_CURRENCIES` | `INR,USD,EUR,GBP,AED,SGD` |
//! | `GATEWAY_BASE_URL`, `GATEWAY_API_KEY` | unset (mock gateway) |
//! | `GATEWAY_MAX_ATTEMPTS` | `5` |
//! | `GATEWAY_BASE_DELAY_MS` | `200` |
//! | `ESCROW_LOG_FORMAT` | `text` |

use std::str::FromStr;
use std::time::Duration;

use escrow_core::Currency;
use escrow_gateway::{HttpGatewayConfig, RetryPolicy};
use escrow_state::LedgerPolicy;

const DEFAULT_CURRENCIES: &str = "INR,USD,EUR,GBP,AED,SGD";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("{present} is set but {missing} is not")]
    Incomplete {
        present: &'static str,
        missing: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected text or json, got {other:?}")),
        }
    }
}

/// Settings for the outbound settlement rail.
#[derive(Clone)]
pub struct GatewaySettings {
    pub base_url: String,
    pub api_key: String,
}

impl std::fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub sweep_interval: Duration,
    pub mediation_timeout: Duration,
    pub request_timeout: Duration,
    pub allowed_currencies: Vec<String>,
    pub gateway: Option<GatewaySettings>,
    pub gateway_max_attempts: u32,
    pub gateway_base_delay: Duration,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("sweep_interval", &self.sweep_interval)
            .field("mediation_timeout", &self.mediation_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("allowed_currencies", &self.allowed_currencies)
            .field("gateway", &self.gateway)
            .field("gateway_max_attempts", &self.gateway_max_attempts)
            .field("gateway_base_delay", &self.gateway_base_delay)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            sweep_interval: Duration::from_secs(60),
            mediation_timeout: Duration::from_secs(72 * 3600),
            request_timeout: Duration::from_millis(10_000),
            allowed_currencies: split_list(DEFAULT_CURRENCIES),
            gateway: None,
            gateway_max_attempts: 5,
            gateway_base_delay: Duration::from_millis(200),
            log_format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup`, which returns the raw value of
    /// a variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let allowed_currencies = match get("ESCROW_ALLOWED_CURRENCIES") {
            Some(raw) => {
                let codes = split_list(&raw);
                for code in &codes {
                    Currency::new(code).map_err(|e| ConfigError::Invalid {
                        var: "ESCROW_ALLOWED_CURRENCIES",
                        reason: e.to_string(),
                    })?;
                }
                if codes.is_empty() {
                    return Err(ConfigError::Invalid {
                        var: "ESCROW_ALLOWED_CURRENCIES",
                        reason: "no currency codes given".to_string(),
                    });
                }
                codes
            }
            None => defaults.allowed_currencies,
        };

        let gateway = match (get("GATEWAY_BASE_URL"), get("GATEWAY_API_KEY")) {
            (Some(base_url), Some(api_key)) => Some(GatewaySettings { base_url, api_key }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::Incomplete {
                    present: "GATEWAY_BASE_URL",
                    missing: "GATEWAY_API_KEY",
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::Incomplete {
                    present: "GATEWAY_API_KEY",
                    missing: "GATEWAY_BASE_URL",
                })
            }
        };

        let gateway_max_attempts: u32 =
            parse_var(&get, "GATEWAY_MAX_ATTEMPTS")?.unwrap_or(defaults.gateway_max_attempts);
        if gateway_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "GATEWAY_MAX_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        let sweep_secs: u64 = parse_var(&get, "ESCROW_SWEEP_INTERVAL_SECS")?
            .unwrap_or(defaults.sweep_interval.as_secs());
        if sweep_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "ESCROW_SWEEP_INTERVAL_SECS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            port: parse_var(&get, "ESCROW_PORT")?.unwrap_or(defaults.port),
            database_url: get("DATABASE_URL"),
            sweep_interval: Duration::from_secs(sweep_secs),
            mediation_timeout: parse_var(&get, "ESCROW_MEDIATION_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.mediation_timeout),
            request_timeout: parse_var(&get, "ESCROW_REQUEST_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            allowed_currencies,
            gateway,
            gateway_max_attempts,
            gateway_base_delay: parse_var(&get, "GATEWAY_BASE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.gateway_base_delay),
            log_format: parse_var(&get, "ESCROW_LOG_FORMAT")?.unwrap_or_default(),
        })
    }

    /// Ledger rules derived from this configuration.
    pub fn ledger_policy(&self) -> LedgerPolicy {
        let timeout = chrono::Duration::from_std(self.mediation_timeout)
            .unwrap_or_else(|_| chrono::Duration::hours(72));
        LedgerPolicy::default()
            .with_currencies(self.allowed_currencies.iter().cloned())
            .with_mediation_timeout(timeout)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.gateway_max_attempts, self.gateway_base_delay)
    }

    /// HTTP gateway settings, if a rail is configured.
    pub fn http_gateway(&self) -> Option<HttpGatewayConfig> {
        self.gateway
            .as_ref()
            .map(|g| HttpGatewayConfig::new(g.base_url.clone(), g.api_key.clone()))
    }
}

fn parse_var<T, G>(get: &G, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(var)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                var,
                reason: format!("{raw:?}: {e}"),
            })
        })
        .transpose()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.database_url.is_none());
        assert!(cfg.gateway.is_none());
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
        assert_eq!(cfg.mediation_timeout, Duration::from_secs(259_200));
        assert_eq!(cfg.gateway_max_attempts, 5);
        assert_eq!(cfg.log_format, LogFormat::Text);
        assert!(cfg.allowed_currencies.contains(&"INR".to_string()));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = load(&[
            ("ESCROW_PORT", "9090"),
            ("ESCROW_SWEEP_INTERVAL_SECS", "5"),
            ("ESCROW_MEDIATION_TIMEOUT_SECS", "3600"),
            ("ESCROW_ALLOWED_CURRENCIES", "inr, usd"),
            ("GATEWAY_BASE_URL", "https://rail.test"),
            ("GATEWAY_API_KEY", "k"),
            ("GATEWAY_MAX_ATTEMPTS", "3"),
            ("ESCROW_LOG_FORMAT", "JSON"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(5));
        assert_eq!(cfg.allowed_currencies, vec!["INR", "USD"]);
        assert_eq!(cfg.gateway.as_ref().unwrap().base_url, "https://rail.test");
        assert_eq!(cfg.retry_policy().max_attempts, 3);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.ledger_policy().mediation_timeout, chrono::Duration::hours(1));
    }

    #[test]
    fn malformed_value_names_the_variable() {
        let err = load(&[("ESCROW_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("ESCROW_PORT"));
    }

    #[test]
    fn bad_currency_code_is_rejected() {
        let err = load(&[("ESCROW_ALLOWED_CURRENCIES", "INR,RUPEE")]).unwrap_err();
        assert!(err.to_string().contains("ESCROW_ALLOWED_CURRENCIES"));
    }

    #[test]
    fn gateway_url_without_key_is_incomplete() {
        let err = load(&[("GATEWAY_BASE_URL", "https://rail.test")]).unwrap_err();
        assert!(matches!(err, ConfigError::Incomplete { missing: "GATEWAY_API_KEY", .. }));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        assert!(load(&[("GATEWAY_MAX_ATTEMPTS", "0")]).is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let cfg = load(&[
            ("DATABASE_URL", "postgres://u:secret@db/escrow"),
            ("GATEWAY_BASE_URL", "https://rail.test"),
            ("GATEWAY_API_KEY", "sk-live-123"),
        ])
        .unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("sk-live-123"));
    }
}
