use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: GeneralSettings,
    pub network: NetworkSettings,
    pub auth: AuthSettings,
    pub content: ContentSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    pub name: String,
    pub description: String,
    pub map: String,
    pub max_players: u32,
    #[serde(rename = "private")]
    pub is_private: bool,
    /// Vehicle quota per player; a designated unicycle is exempt.
    pub max_cars: usize,
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub port: u16,
    /// Public IPv4 reported to the backend instead of the autodetected one.
    #[serde(default)]
    pub custom_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    pub key: String,
    pub send_errors: bool,
    pub send_errors_message: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSettings {
    pub resources_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: GeneralSettings {
                name: "Roadlink Server".to_string(),
                description: "A Roadlink server".to_string(),
                map: "/levels/gridmap_v2/info.json".to_string(),
                max_players: 10,
                is_private: true,
                max_cars: 1,
                debug: false,
            },
            network: NetworkSettings {
                port: 30814,
                custom_ip: None,
            },
            auth: AuthSettings {
                key: String::new(),
                send_errors: true,
                send_errors_message: true,
            },
            content: ContentSettings {
                resources_dir: "./Resources".to_string(),
            },
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            eprintln!("Failed to load config: {}, using defaults", e);
            Self::default()
        })
    }
}

/// Read-mostly settings handle. Readers take cloned snapshots; a
/// configuration reload publishes a whole new value atomically.
#[derive(Clone)]
pub struct SharedSettings(Arc<RwLock<ServerConfig>>);

impl SharedSettings {
    pub fn new(config: ServerConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    pub fn snapshot(&self) -> ServerConfig {
        self.0.read().clone()
    }

    pub fn replace(&self, config: ServerConfig) {
        *self.0.write() = config;
    }
}

/// A custom IP passed on the command line is accepted only if it contains
/// nothing but digits and dots, has exactly three dots, and is not a
/// loopback address.
pub fn is_valid_custom_ip(ip: &str) -> bool {
    ip.chars().all(|c| c == '.' || c.is_ascii_digit())
        && ip.chars().filter(|&c| c == '.').count() == 3
        && !ip.starts_with("127")
}
