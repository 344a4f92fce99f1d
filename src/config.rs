//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/roster.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:5000"
//! environment = "production"
//!
//! [defaults]
//! course = "networking"
//!
//! [seed]
//! years = ["2025"]
//! ```
//!
//! Only `[db]` and `[server]` are required.

use anyhow::{Context, Result};
use chrono::Datelike;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub defaults: StudentDefaults,
    #[serde(default)]
    pub seed: SeedConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default)]
    pub environment: Environment,
}

/// Deployment flavor. `Development` adds internal failure detail to error
/// responses.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

/// Denormalized labels given to students created without them.
#[derive(Debug, Deserialize, Clone)]
pub struct StudentDefaults {
    #[serde(default = "default_course")]
    pub course: String,
    #[serde(default = "default_month")]
    pub month: String,
    #[serde(default = "default_batch")]
    pub batch: String,
    /// Falls back to the current calendar year.
    #[serde(default)]
    pub year: Option<String>,
}

impl Default for StudentDefaults {
    fn default() -> Self {
        Self {
            course: default_course(),
            month: default_month(),
            batch: default_batch(),
            year: None,
        }
    }
}

impl StudentDefaults {
    pub fn year(&self) -> String {
        self.year
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().year().to_string())
    }
}

fn default_course() -> String {
    "networking".to_string()
}
fn default_month() -> String {
    "January".to_string()
}
fn default_batch() -> String {
    "Batch 1".to_string()
}

/// Reference data inserted by `roster seed`.
#[derive(Debug, Deserialize, Clone)]
pub struct SeedConfig {
    #[serde(default = "default_seed_courses")]
    pub courses: Vec<SeedCourse>,
    #[serde(default = "default_seed_years")]
    pub years: Vec<String>,
    #[serde(default = "default_seed_months")]
    pub months: Vec<String>,
    #[serde(default = "default_seed_batches")]
    pub batches: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedCourse {
    pub name: String,
    pub description: String,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            courses: default_seed_courses(),
            years: default_seed_years(),
            months: default_seed_months(),
            batches: default_seed_batches(),
        }
    }
}

fn default_seed_courses() -> Vec<SeedCourse> {
    vec![
        SeedCourse {
            name: "web development".to_string(),
            description: "Full stack web development course".to_string(),
        },
        SeedCourse {
            name: "data science".to_string(),
            description: "Advanced data science and machine learning".to_string(),
        },
    ]
}
fn default_seed_years() -> Vec<String> {
    (2023..=2027).map(|y| y.to_string()).collect()
}
fn default_seed_months() -> Vec<String> {
    [
        "January",
        "February",
        "March",
        "April",
        "May",
        "June",
        "July",
        "August",
        "September",
        "October",
        "November",
        "December",
    ]
    .iter()
    .map(|m| m.to_string())
    .collect()
}
fn default_seed_batches() -> Vec<String> {
    (1..=4).map(|n| format!("Batch {}", n)).collect()
}

impl Config {
    /// Configuration for a database path and bind address with every
    /// optional section defaulted.
    pub fn new(db_path: impl Into<PathBuf>, bind: impl Into<String>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            server: ServerConfig {
                bind: bind.into(),
                environment: Environment::default(),
            },
            defaults: StudentDefaults::default(),
            seed: SeedConfig::default(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.db.path.as_os_str().is_empty() {
            anyhow::bail!("db.path must not be empty");
        }
        if self.server.bind.trim().is_empty() {
            anyhow::bail!("server.bind must not be empty");
        }
        if self.seed.courses.iter().any(|c| c.name.trim().is_empty()) {
            anyhow::bail!("seed.courses entries must have a name");
        }
        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}
