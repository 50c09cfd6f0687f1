use anyhow::{Result, anyhow, bail};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub backend: Backend,
    pub http: Http,
    pub log: Log,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub auth: Auth,
}

#[derive(Deserialize)]
pub struct Backend {
    pub kind: String, // "supabase", "postgres" or "memory"
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub anon_key: String,
    #[serde(default)]
    pub service_role_key: Option<String>,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("anon_key", &redacted(&self.anon_key))
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

fn default_max_connections() -> u32 {
    5
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() { "<unset>" } else { "<redacted>" }
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub address: String,
    #[serde(default)]
    pub cert_path: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Cache {
    pub stale_secs: u64,
    pub gc_secs: u64,
    pub retry: u32,
    pub gc_interval_secs: u64,
    pub persist_interval_secs: u64,
    pub storage: String, // "file", "redis" or "memory"
    pub storage_dir: String,
    pub redis_url: Option<String>,
}

impl Default for Cache {
    fn default() -> Self {
        Cache {
            stale_secs: 5 * 60,
            gc_secs: 10 * 60,
            retry: 2,
            gc_interval_secs: 60,
            persist_interval_secs: 120,
            storage: "file".to_string(),
            storage_dir: ".kalimba".to_string(),
            redis_url: None,
        }
    }
}

impl Cache {
    pub fn stale_time(&self) -> Duration {
        Duration::from_secs(self.stale_secs)
    }

    pub fn gc_time(&self) -> Duration {
        Duration::from_secs(self.gc_secs)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Auth {
    pub flow: String, // "implicit" or "pkce"
    pub redirect_port: u16,
    pub browser_timeout_secs: u64,
    pub auto_refresh: bool,
    pub refresh_tick_secs: u64,
    pub refresh_margin_secs: i64,
}

impl Default for Auth {
    fn default() -> Self {
        Auth {
            flow: "implicit".to_string(),
            redirect_port: 54321,
            browser_timeout_secs: 300,
            auto_refresh: true,
            refresh_tick_secs: 30,
            refresh_margin_secs: 90,
        }
    }
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

const ENV_PREFIX: &str = "KALIMBA";

pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    settings.validate()?;
    Ok(settings)
}

impl Settings {
    /// Fails on settings the process cannot start with.
    pub fn validate(&self) -> Result<()> {
        match self.backend.kind.as_str() {
            "supabase" => self.require_supabase()?,
            "postgres" => {
                if self.backend.database_url.as_deref().is_none_or(str::is_empty) {
                    bail!(
                        "Missing database URL. Please set {}_BACKEND__DATABASE_URL",
                        ENV_PREFIX
                    );
                }
            }
            "memory" => {}
            other => bail!("unknown backend kind: {}", other),
        }
        match self.cache.storage.as_str() {
            "file" | "memory" => {}
            "redis" if self.cache.redis_url.is_some() => {}
            "redis" => bail!("cache storage \"redis\" needs cache.redis_url"),
            other => bail!("unknown cache storage: {}", other),
        }
        if !matches!(self.auth.flow.as_str(), "implicit" | "pkce") {
            bail!("unknown auth flow: {}", self.auth.flow);
        }
        if self.http.cert_path.is_some() != self.http.key_path.is_some() {
            bail!("http.cert_path and http.key_path must be set together");
        }
        Ok(())
    }

    /// The client side always talks to a Supabase project unless the backend
    /// is in memory.
    pub fn require_supabase(&self) -> Result<()> {
        if self.backend.kind == "memory" {
            return Ok(());
        }
        if self.backend.url.is_empty() || self.backend.anon_key.is_empty() {
            bail!(
                "Missing Supabase environment variables. Please set {0}_BACKEND__URL and {0}_BACKEND__ANON_KEY",
                ENV_PREFIX
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_settings(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    fn parse(body: &str) -> Result<Settings> {
        let file = write_settings(body);
        parse_settings(file.path().to_str())
    }

    const MEMORY: &str = r#"
[backend]
kind = "memory"

[http]
address = "127.0.0.1:3000"

[log]
filter = "debug"
"#;

    #[test]
    fn defaults_fill_optional_sections() {
        let settings = parse(MEMORY).unwrap();
        assert_eq!(settings.cache.stale_time(), Duration::from_secs(300));
        assert_eq!(settings.cache.gc_time(), Duration::from_secs(600));
        assert_eq!(settings.cache.retry, 2);
        assert_eq!(settings.cache.storage, "file");
        assert_eq!(settings.auth.flow, "implicit");
        assert!(settings.http.cert_path.is_none());
    }

    #[test]
    fn supabase_needs_url_and_key() {
        let body = MEMORY.replace(
            "kind = \"memory\"",
            "kind = \"supabase\"\nurl = \"https://demo.supabase.co\"",
        );
        let err = parse(&body).unwrap_err();
        assert!(err.to_string().contains("Missing Supabase environment variables"));

        let body = MEMORY.replace(
            "kind = \"memory\"",
            "kind = \"supabase\"\nurl = \"https://demo.supabase.co\"\nanon_key = \"anon\"",
        );
        let settings = parse(&body).unwrap();
        assert!(format!("{:?}", settings.backend).contains("<redacted>"));
    }

    #[test]
    fn postgres_needs_database_url() {
        let body = MEMORY.replace("kind = \"memory\"", "kind = \"postgres\"");
        assert!(parse(&body).is_err());
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert!(parse(&MEMORY.replace("memory", "mongo")).is_err());
        let body = format!("{}\n[auth]\nflow = \"device\"\n", MEMORY);
        assert!(parse(&body).is_err());
        let body = format!("{}\n[cache]\nstorage = \"redis\"\n", MEMORY);
        assert!(parse(&body).is_err());
    }
}
