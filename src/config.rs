//! Client configuration.
//!
//! The provider block is received as JSON. Any field left unset falls back to
//! the matching `OBSERVE_*` environment variable, then to a built-in default.
//!
//! ```
//! use observe_provider::config::ClientConfig;
//! use serde_json::json;
//!
//! let config = ClientConfig::from_value_with_env(
//!     &json!({"customer": "123456", "token": "secret"}),
//!     |_| None,
//! )
//! .unwrap();
//! assert_eq!(config.base_url(), "https://123456.observeinc.com");
//! assert_eq!(config.retry_count, 3);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::ProviderError;

/// Root domain used when none is configured.
pub const DEFAULT_DOMAIN: &str = "observeinc.com";

/// Feature flag that lets mutations run concurrently.
pub const FLAG_CONCURRENT_MUTATIONS: &str = "obs2110";

const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(3);

const ENV_CUSTOMER: &str = "OBSERVE_CUSTOMER";
const ENV_TOKEN: &str = "OBSERVE_TOKEN";
const ENV_USER_EMAIL: &str = "OBSERVE_USER_EMAIL";
const ENV_USER_PASSWORD: &str = "OBSERVE_USER_PASSWORD";
const ENV_DOMAIN: &str = "OBSERVE_DOMAIN";
const ENV_INSECURE: &str = "OBSERVE_INSECURE";

/// Settings shared by every client operation.
#[derive(Clone, PartialEq)]
pub struct ClientConfig {
    /// Customer id; the API lives at `https://<customer>.<domain>`.
    pub customer: String,
    /// API token. Mutually exclusive with user credentials.
    pub token: Option<String>,
    /// Login email, set together with `user_password`.
    pub user_email: Option<String>,
    /// Login password, set together with `user_email`.
    pub user_password: Option<String>,
    /// Root domain.
    pub domain: String,
    /// Skip TLS verification.
    pub insecure: bool,
    /// Retries on temporary network failures.
    pub retry_count: u32,
    /// Wait between retries.
    pub retry_wait: Duration,
    /// Feature flags by name.
    pub flags: HashMap<String, bool>,
    /// Stamped onto datasets and monitors as their source.
    pub source: Option<String>,
    /// Stamped onto created objects as their managing object.
    pub managing_object_id: Option<String>,
    /// Upper bound on waiting for asynchronous app changes.
    pub poll_timeout: Option<Duration>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |s: &Option<String>| s.as_ref().map(|_| "<redacted>");
        f.debug_struct("ClientConfig")
            .field("customer", &self.customer)
            .field("token", &redact(&self.token))
            .field("user_email", &self.user_email)
            .field("user_password", &redact(&self.user_password))
            .field("domain", &self.domain)
            .field("insecure", &self.insecure)
            .field("retry_count", &self.retry_count)
            .field("retry_wait", &self.retry_wait)
            .field("flags", &self.flags)
            .field("source", &self.source)
            .field("managing_object_id", &self.managing_object_id)
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    customer: Option<String>,
    token: Option<String>,
    user_email: Option<String>,
    user_password: Option<String>,
    domain: Option<String>,
    insecure: Option<bool>,
    retry_count: Option<u32>,
    retry_wait: Option<String>,
    flags: HashMap<String, bool>,
    source: Option<String>,
    managing_object_id: Option<String>,
    poll_timeout: Option<String>,
}

/// Treat empty strings as unset.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ProviderError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(ProviderError::Configuration(format!(
            "{}: expected a boolean, got {:?}",
            name, value
        ))),
    }
}

impl ClientConfig {
    /// A config for `customer` with every other setting at its default.
    pub fn new(customer: impl Into<String>) -> Self {
        Self {
            customer: customer.into(),
            token: None,
            user_email: None,
            user_password: None,
            domain: DEFAULT_DOMAIN.to_string(),
            insecure: false,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_wait: DEFAULT_RETRY_WAIT,
            flags: HashMap::new(),
            source: None,
            managing_object_id: None,
            poll_timeout: None,
        }
    }

    /// Build from the provider configuration, reading the process environment
    /// for unset fields.
    pub fn from_value(value: &Value) -> Result<Self, ProviderError> {
        Self::from_value_with_env(value, |name| std::env::var(name).ok())
    }

    /// Build from the provider configuration, looking up unset fields with `env`.
    pub fn from_value_with_env<F>(value: &Value, env: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = match value {
            Value::Null => RawConfig::default(),
            other => serde_json::from_value(other.clone())
                .map_err(|e| ProviderError::Configuration(e.to_string()))?,
        };
        let lookup = |field: Option<String>, name: &str| non_empty(field).or_else(|| non_empty(env(name)));

        let customer = lookup(raw.customer, ENV_CUSTOMER).ok_or_else(|| {
            ProviderError::Configuration(format!(
                "customer is required (or set {})",
                ENV_CUSTOMER
            ))
        })?;

        let token = lookup(raw.token, ENV_TOKEN);
        let user_email = lookup(raw.user_email, ENV_USER_EMAIL);
        let user_password = lookup(raw.user_password, ENV_USER_PASSWORD);

        if token.is_some() && (user_email.is_some() || user_password.is_some()) {
            return Err(ProviderError::Configuration(
                "token conflicts with user_email and user_password".to_string(),
            ));
        }
        if user_email.is_some() != user_password.is_some() {
            return Err(ProviderError::Configuration(
                "user_email and user_password must be set together".to_string(),
            ));
        }

        let insecure = match raw.insecure {
            Some(b) => b,
            None => match non_empty(env(ENV_INSECURE)) {
                Some(s) => parse_bool(ENV_INSECURE, &s)?,
                None => false,
            },
        };

        let retry_wait = match non_empty(raw.retry_wait) {
            Some(s) => parse_duration(&s)?,
            None => DEFAULT_RETRY_WAIT,
        };
        let poll_timeout = non_empty(raw.poll_timeout)
            .map(|s| parse_duration(&s))
            .transpose()?;

        if insecure {
            warn!("Insecure API session");
        }

        Ok(Self {
            customer,
            token,
            user_email,
            user_password,
            domain: lookup(raw.domain, ENV_DOMAIN).unwrap_or_else(|| DEFAULT_DOMAIN.to_string()),
            insecure,
            retry_count: raw.retry_count.unwrap_or(DEFAULT_RETRY_COUNT),
            retry_wait,
            flags: raw.flags,
            source: non_empty(raw.source),
            managing_object_id: non_empty(raw.managing_object_id),
            poll_timeout,
        })
    }

    /// Set a feature flag.
    pub fn with_flag(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.flags.insert(name.into(), enabled);
        self
    }

    /// Whether a feature flag is enabled. Unknown flags are disabled.
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    /// Whether mutations may bypass the mutation lock.
    pub fn allow_concurrent_mutations(&self) -> bool {
        self.flag(FLAG_CONCURRENT_MUTATIONS)
    }

    /// API base URL.
    pub fn base_url(&self) -> String {
        format!("https://{}.{}", self.customer, self.domain)
    }
}

/// Parse a duration such as `300ms`, `90s` or `1h30m`.
///
/// The text is a sequence of decimal numbers, each followed by one of the
/// units `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare `0` is also
/// accepted. Negative durations are not.
pub fn parse_duration(text: &str) -> Result<Duration, ProviderError> {
    let invalid =
        |reason: &str| ProviderError::Configuration(format!("invalid duration {:?}: {}", text, reason));

    let s = text.trim();
    if s.is_empty() {
        return Err(invalid("empty"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut rest = s;
    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid("expected a number"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| invalid("malformed number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(invalid("missing unit")),
            other => return Err(invalid(&format!("unknown unit {:?}", other))),
        };
        rest = &rest[unit_len..];

        total += Duration::from_nanos((value * nanos_per_unit).round() as u64);
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            ClientConfig::from_value_with_env(&json!({"customer": "101", "token": "t"}), no_env)
                .unwrap();

        assert_eq!(config, ClientConfig {
            token: Some("t".to_string()),
            ..ClientConfig::new("101")
        });
        assert_eq!(config.domain, DEFAULT_DOMAIN);
        assert_eq!(config.retry_wait, Duration::from_secs(3));
        assert!(!config.insecure);
        assert!(!config.allow_concurrent_mutations());
    }

    #[test]
    fn test_env_fallbacks() {
        let env = env_from(&[
            ("OBSERVE_CUSTOMER", "202"),
            ("OBSERVE_USER_EMAIL", "me@example.com"),
            ("OBSERVE_USER_PASSWORD", "hunter2"),
            ("OBSERVE_DOMAIN", "observe-eng.com"),
            ("OBSERVE_INSECURE", "true"),
        ]);

        let config = ClientConfig::from_value_with_env(&json!({}), env).unwrap();
        assert_eq!(config.customer, "202");
        assert_eq!(config.user_email.as_deref(), Some("me@example.com"));
        assert!(config.insecure);
        assert_eq!(config.base_url(), "https://202.observe-eng.com");
    }

    #[test]
    fn test_explicit_values_win_over_env() {
        let env = env_from(&[("OBSERVE_CUSTOMER", "202"), ("OBSERVE_INSECURE", "true")]);
        let config = ClientConfig::from_value_with_env(
            &json!({"customer": "303", "insecure": false, "token": "t"}),
            env,
        )
        .unwrap();
        assert_eq!(config.customer, "303");
        assert!(!config.insecure);
    }

    #[test]
    fn test_missing_customer() {
        let err = ClientConfig::from_value_with_env(&json!({"token": "t"}), no_env).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(msg) if msg.contains("customer")));

        // empty counts as unset
        let err = ClientConfig::from_value_with_env(&json!({"customer": ""}), no_env).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn test_credential_conflicts() {
        let err = ClientConfig::from_value_with_env(
            &json!({"customer": "1", "token": "t", "user_email": "a@b.c", "user_password": "p"}),
            no_env,
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(msg) if msg.contains("conflicts")));

        let err = ClientConfig::from_value_with_env(
            &json!({"customer": "1", "user_email": "a@b.c"}),
            no_env,
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(msg) if msg.contains("together")));
    }

    #[test]
    fn test_flags_and_extras() {
        let config = ClientConfig::from_value_with_env(
            &json!({
                "customer": "1",
                "token": "t",
                "flags": {"obs2110": true, "other": false},
                "retry_count": 5,
                "retry_wait": "500ms",
                "source": "terraform",
                "managing_object_id": "41000777",
                "poll_timeout": "2m"
            }),
            no_env,
        )
        .unwrap();

        assert!(config.allow_concurrent_mutations());
        assert!(!config.flag("other"));
        assert!(!config.flag("missing"));
        assert_eq!(config.retry_count, 5);
        assert_eq!(config.retry_wait, Duration::from_millis(500));
        assert_eq!(config.source.as_deref(), Some("terraform"));
        assert_eq!(config.managing_object_id.as_deref(), Some("41000777"));
        assert_eq!(config.poll_timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_invalid_values() {
        for value in [
            json!({"customer": "1", "retry_wait": "soon"}),
            json!({"customer": "1", "retry_count": -1}),
            json!({"customer": "1", "insecure": "maybe"}),
            json!("not an object"),
        ] {
            let err = ClientConfig::from_value_with_env(&value, no_env).unwrap_err();
            assert!(
                matches!(err, ProviderError::Configuration(_)),
                "expected Configuration error for {}, got {:?}",
                value,
                err
            );
        }

        let env = env_from(&[("OBSERVE_INSECURE", "yes please")]);
        let err = ClientConfig::from_value_with_env(&json!({"customer": "1"}), env).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ClientConfig {
            token: Some("super-secret".to_string()),
            ..ClientConfig::new("1")
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("10µs").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("42ns").unwrap(), Duration::from_nanos(42));
        assert_eq!(parse_duration(" 2m ").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn test_parse_duration_rejects() {
        for s in ["", "s", "10", "10d", "-1s", "1..5s", "1h 30m"] {
            assert!(
                matches!(parse_duration(s), Err(ProviderError::Configuration(_))),
                "expected {:?} to be rejected",
                s
            );
        }
    }
}
