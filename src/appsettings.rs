use std::{net::SocketAddr, time::Duration};

use config::{Config, ConfigBuilder, ConfigError, Environment, File, builder::DefaultState};
use serde::Deserialize;

use crate::{
    delivery::{DEFAULT_SMTP_PORT, SmtpConfig},
    dispatch::DispatchSettings,
    reminder::{ReferenceZone, ZoneError},
    scheduling::DEFAULT_DISPATCH_INTERVAL,
    storage::{AppwriteConfig, DEFAULT_PAGE_SIZE, DEFAULT_REQUEST_TIMEOUT},
};

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Appwrite,
    /// Process-local store, lost on restart. For local runs only.
    Memory,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub endpoint: String,
    pub project_id: String,
    pub api_key: String,
    pub database_id: String,
    pub collection_id: String,
    pub page_size: u32,
    pub request_timeout_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            endpoint: "https://cloud.appwrite.io/v1".to_owned(),
            project_id: String::new(),
            api_key: String::new(),
            database_id: "todos_db".to_owned(),
            collection_id: "reminders".to_owned(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
    pub starttls: bool,
    pub timeout_secs: u64,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: DEFAULT_SMTP_PORT,
            username: None,
            password: None,
            from_address: String::new(),
            starttls: true,
            timeout_secs: 30,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DispatchSection {
    pub interval_secs: u64,
    pub send_timeout_secs: u64,
    pub max_concurrent_sends: usize,
    pub reference_timezone: String,
}

impl Default for DispatchSection {
    fn default() -> Self {
        let defaults = DispatchSettings::default();
        Self {
            interval_secs: DEFAULT_DISPATCH_INTERVAL.as_secs(),
            send_timeout_secs: defaults.send_timeout.as_secs(),
            max_concurrent_sends: defaults.max_concurrent_sends,
            reference_timezone: ReferenceZone::default().name().to_owned(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub enabled: bool,
    pub bind: SocketAddr,
    pub api_token: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            api_token: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct AppSettings {
    pub store: StoreSettings,
    pub smtp: SmtpSettings,
    pub dispatch: DispatchSection,
    pub server: ServerSettings,
}

impl AppSettings {
    /// Reads `appsettings.toml`, then `appsettings.local.toml`, then `APP_*`
    /// environment variables, later sources winning.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("appsettings").required(false))
            .add_source(File::with_name("appsettings.local").required(false));

        Self::from_builder(builder)
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn appwrite(&self) -> AppwriteConfig {
        let store = &self.store;
        AppwriteConfig {
            endpoint: store.endpoint.clone(),
            project_id: store.project_id.clone(),
            api_key: store.api_key.clone(),
            database_id: store.database_id.clone(),
            collection_id: store.collection_id.clone(),
            page_size: store.page_size,
            request_timeout: Duration::from_secs(store.request_timeout_secs),
        }
    }

    /// Falls back to the SMTP username when no sender address is set.
    pub fn smtp(&self) -> SmtpConfig {
        let smtp = &self.smtp;
        let from_address = match smtp.username.as_deref() {
            Some(username) if smtp.from_address.trim().is_empty() => username.to_owned(),
            _ => smtp.from_address.clone(),
        };

        SmtpConfig {
            host: smtp.host.clone(),
            port: smtp.port,
            username: smtp.username.clone(),
            password: smtp.password.clone(),
            from_address,
            starttls: smtp.starttls,
            timeout: Duration::from_secs(smtp.timeout_secs),
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            send_timeout: Duration::from_secs(self.dispatch.send_timeout_secs),
            max_concurrent_sends: self.dispatch.max_concurrent_sends,
        }
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch.interval_secs.max(1))
    }

    pub fn reference_zone(&self) -> Result<ReferenceZone, ZoneError> {
        self.dispatch.reference_timezone.parse()
    }
}
