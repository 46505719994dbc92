use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Secret used when `SECRET` is not provided; only suitable for development
pub const DEFAULT_SECRET: &str = "secretpassphrasehere";

/// Longest accepted token lifetime, ten years
pub const MAX_TOKEN_TTL_HOURS: i64 = 24 * 365 * 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `development` switches the port variable to `PORT_DEV`
    pub env: String,
    pub host: String,
    pub port: u16,
    /// Directory of static client files, served for unmatched GET paths
    pub public_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            env: "production".to_string(),
            host: "0.0.0.0".to_string(),
            port: 3000,
            public_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://greenhouse.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// bcrypt cost
    pub salt_rounds: u32,
    pub secret: String,
    pub token_ttl_hours: i64,
    /// Credentials of the administrator created on an empty user table
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            salt_rounds: 10,
            secret: DEFAULT_SECRET.to_string(),
            token_ttl_hours: 168,
            admin_email: None,
            admin_password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MyFoodConfig {
    pub api_url: String,
    pub greenhouse_id: u32,
}

impl Default for MyFoodConfig {
    fn default() -> Self {
        Self {
            api_url: "https://hub.myfood.eu/opendata".to_string(),
            greenhouse_id: 191,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmbotConfig {
    pub api_url: String,
    pub token: String,
    /// Cron expression (with seconds) of the daily sum-up
    pub sumup_schedule: String,
}

impl Default for FarmbotConfig {
    fn default() -> Self {
        Self {
            api_url: "https://my.farmbot.io/api".to_string(),
            token: String::new(),
            sumup_schedule: "0 0 18 * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    pub timeout_secs: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Start module tasks as soon as they are registered
    pub autostart: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { autostart: true }
    }
}

/// Mail settings are read but no delivery is performed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub user: Option<String>,
    pub pass: Option<String>,
    pub send: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub myfood: MyFoodConfig,
    pub farmbot: FarmbotConfig,
    pub http: HttpClientConfig,
    pub scheduler: SchedulerConfig,
    pub mail: MailConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

fn parse<T: FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value,
    })
}

fn parse_bool(key: &str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value,
        }),
    }
}

impl AppConfig {
    /// Load configuration: `.env`, then the TOML file named by
    /// `GREENHOUSE_CONFIG` (default `config.toml`) if present, then
    /// environment variables
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path =
            std::env::var("GREENHOUSE_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
        let mut cfg = Self::from_file(&path)?;
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Read a TOML file, falling back to defaults when it does not exist
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let s = fs::read_to_string(path)?;
        let cfg = toml::from_str::<AppConfig>(&s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by the variables `lookup` knows about
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        cfg.apply_overrides(lookup)?;
        Ok(cfg)
    }

    /// Override fields from variables; absent variables keep the current value
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("APP_ENV") {
            self.server.env = v;
        }
        if let Some(v) = get("HOST") {
            self.server.host = v;
        }
        let port_key = if self.is_development() { "PORT_DEV" } else { "PORT" };
        if let Some(v) = get(port_key) {
            self.server.port = parse(port_key, v)?;
        }
        if let Some(v) = get("PUBLIC_PATH") {
            self.server.public_path = Some(v);
        }

        if let Some(v) = get("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = get("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse("DATABASE_MAX_CONNECTIONS", v)?;
        }

        if let Some(v) = get("SALT_ROUNDS") {
            self.security.salt_rounds = parse("SALT_ROUNDS", v)?;
        }
        if let Some(v) = get("SECRET") {
            self.security.secret = v;
        }
        if let Some(v) = get("TOKEN_TTL_HOURS") {
            self.security.token_ttl_hours = parse("TOKEN_TTL_HOURS", v)?;
        }
        if let Some(v) = get("ADMIN_EMAIL") {
            self.security.admin_email = Some(v);
        }
        if let Some(v) = get("ADMIN_PASSWORD") {
            self.security.admin_password = Some(v);
        }

        if let Some(v) = get("MYFOOD_API_URL") {
            self.myfood.api_url = v;
        }
        if let Some(v) = get("MYFOOD_GREENHOUSE_ID") {
            self.myfood.greenhouse_id = parse("MYFOOD_GREENHOUSE_ID", v)?;
        }

        if let Some(v) = get("FARMBOT_API_URL") {
            self.farmbot.api_url = v;
        }
        if let Some(v) = get("FARMBOT_TOKEN") {
            self.farmbot.token = v;
        }
        if let Some(v) = get("FARMBOT_SUMUP_SCHEDULE") {
            self.farmbot.sumup_schedule = v;
        }

        if let Some(v) = get("HTTP_TIMEOUT_SECS") {
            self.http.timeout_secs = parse("HTTP_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = get("SCHEDULER_AUTOSTART") {
            self.scheduler.autostart = parse_bool("SCHEDULER_AUTOSTART", v)?;
        }

        // "None" is the placeholder used by existing deployments
        if let Some(v) = get("MAIL_USER").filter(|v| v != "None") {
            self.mail.user = Some(v);
        }
        if let Some(v) = get("MAIL_PASS").filter(|v| v != "None") {
            self.mail.pass = Some(v);
        }
        if let Some(v) = get("SEND_MAIL") {
            self.mail.send = parse_bool("SEND_MAIL", v)?;
        }

        self.validate()
    }

    /// Reject values that parse but cannot be used
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ttl = self.security.token_ttl_hours;
        if !(1..=MAX_TOKEN_TTL_HOURS).contains(&ttl) {
            return Err(ConfigError::Invalid {
                key: "TOKEN_TTL_HOURS".to_string(),
                value: ttl.to_string(),
            });
        }
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.server.env.eq_ignore_ascii_case("development")
    }

    /// Get HTTP bind address (default 0.0.0.0:3000)
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Whether the token secret was left to its development default
    pub fn uses_default_secret(&self) -> bool {
        self.security.secret == DEFAULT_SECRET
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:3000");
        assert_eq!(cfg.myfood.greenhouse_id, 191);
        assert_eq!(cfg.security.salt_rounds, 10);
        assert_eq!(cfg.security.token_ttl_hours, 168);
        assert_eq!(cfg.http.timeout_secs, 30);
        assert_eq!(cfg.farmbot.sumup_schedule, "0 0 18 * * *");
        assert!(cfg.scheduler.autostart);
        assert!(cfg.server.public_path.is_none());
        assert!(cfg.uses_default_secret());
    }

    #[test]
    fn port_depends_on_environment() {
        let prod = AppConfig::from_lookup(lookup(&[("PORT", "8080"), ("PORT_DEV", "4000")])).unwrap();
        assert_eq!(prod.server.port, 8080);

        let dev = AppConfig::from_lookup(lookup(&[
            ("APP_ENV", "development"),
            ("PORT", "8080"),
            ("PORT_DEV", "4000"),
        ]))
        .unwrap();
        assert!(dev.is_development());
        assert_eq!(dev.server.port, 4000);
    }

    #[test]
    fn overrides() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("MYFOOD_GREENHOUSE_ID", "29"),
            ("SECRET", "s3cr3t"),
            ("SCHEDULER_AUTOSTART", "false"),
            ("MAIL_USER", "None"),
            ("SEND_MAIL", "true"),
            ("ADMIN_EMAIL", "admin@greenhouse.local"),
        ]))
        .unwrap();

        assert_eq!(cfg.myfood.greenhouse_id, 29);
        assert!(!cfg.uses_default_secret());
        assert!(!cfg.scheduler.autostart);
        assert_eq!(cfg.mail.user, None);
        assert!(cfg.mail.send);
        assert_eq!(
            cfg.security.admin_email.as_deref(),
            Some("admin@greenhouse.local")
        );
    }

    #[test]
    fn invalid_number_is_reported() {
        let err = AppConfig::from_lookup(lookup(&[("SALT_ROUNDS", "many")])).unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for SALT_ROUNDS: many");
    }

    #[test]
    fn token_lifetime_is_bounded() {
        let err = AppConfig::from_lookup(lookup(&[("TOKEN_TTL_HOURS", "9223372036854775807")]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value for TOKEN_TTL_HOURS: 9223372036854775807"
        );
        assert!(AppConfig::from_lookup(lookup(&[("TOKEN_TTL_HOURS", "0")])).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[security]\ntoken_ttl_hours = -5").unwrap();
        assert!(AppConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn toml_file_then_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport = 5000\n\n[farmbot]\ntoken = \"abc\"\n\n[myfood]\ngreenhouse_id = 29"
        )
        .unwrap();

        let mut cfg = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.server.port, 5000);
        assert_eq!(cfg.farmbot.token, "abc");
        assert_eq!(cfg.server.host, "0.0.0.0");

        cfg.apply_overrides(lookup(&[("PORT", "6000")])).unwrap();
        assert_eq!(cfg.server.port, 6000);
        assert_eq!(cfg.myfood.greenhouse_id, 29);
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.database.max_connections, 5);
    }
}
