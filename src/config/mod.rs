use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub paystack: PaystackConfig,
    #[serde(default)]
    pub flutterwave: FlutterwaveConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// HS256 secret used to validate bearer tokens issued by the auth service.
    pub token_secret: String,
}

/// Which gateway handles payments, and the redirect targets for the browser
/// after a callback has been reconciled.
#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_success_url")]
    pub success_url: String,
    #[serde(default = "default_failure_url")]
    pub failure_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaystackConfig {
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default = "default_paystack_base_url")]
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FlutterwaveConfig {
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub public_key: String,
    /// Used by client-side card encryption only; the server never reads it.
    #[serde(default)]
    pub encryption_key: String,
    /// Value Flutterwave echoes in the `verif-hash` header. Falls back to the
    /// secret key when unset.
    #[serde(default)]
    pub secret_hash: Option<String>,
    #[serde(default = "default_flutterwave_base_url")]
    pub base_url: String,
    /// Checkout page title.
    #[serde(default = "default_checkout_title")]
    pub title: String,
}

fn default_provider() -> String {
    "paystack".to_string()
}

fn default_currency() -> String {
    "NGN".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_success_url() -> String {
    "/payments/success".to_string()
}

fn default_failure_url() -> String {
    "/payments/failed".to_string()
}

fn default_paystack_base_url() -> String {
    "https://api.paystack.co".to_string()
}

fn default_flutterwave_base_url() -> String {
    "https://api.flutterwave.com/v3".to_string()
}

fn default_checkout_title() -> String {
    "Staybook".to_string()
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            currency: default_currency(),
            timeout_secs: default_timeout_secs(),
            success_url: default_success_url(),
            failure_url: default_failure_url(),
        }
    }
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            public_key: String::new(),
            base_url: default_paystack_base_url(),
        }
    }
}

impl Default for FlutterwaveConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            public_key: String::new(),
            encryption_key: String::new(),
            secret_hash: None,
            base_url: default_flutterwave_base_url(),
            title: default_checkout_title(),
        }
    }
}

impl FlutterwaveConfig {
    pub fn webhook_hash(&self) -> &str {
        self.secret_hash
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(&self.secret_key)
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.base_url", "http://localhost:8080")?
            .set_default("database.url", "sqlite://staybook.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("auth.token_secret", "change-me-in-production")?
            .set_default("payment.provider", "paystack")?
            .set_default("payment.timeout_secs", 30)?

            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // Add environment variables (with STAYBOOK__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("STAYBOOK").separator("__"))

            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://staybook.db?mode=rwc".to_string(),
                max_connections: 10,
            },
            auth: AuthConfig {
                token_secret: "change-me-in-production".to_string(),
            },
            payment: PaymentConfig::default(),
            paystack: PaystackConfig::default(),
            flutterwave: FlutterwaveConfig::default(),
        }
    }
}
