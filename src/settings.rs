use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::Config;
use serde::Deserialize;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Runtime knobs. Layered: built-in defaults, then `harvester.toml`, then
/// `HARVESTER_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub base_url: String,
    pub index_pages: Vec<String>,
    pub sub_category_pages: Vec<String>,
    pub request_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub checkpoint_interval: usize,
    pub data_dir: PathBuf,
    pub technique_dir: PathBuf,
    pub videos_dir: PathBuf,
    pub download_timeout_secs: u64,
    pub download_delay_ms: u64,
    pub chunk_size: usize,
    pub user_agent: String,
    /// Extra request headers; each one replaces the built-in header of the
    /// same name.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::builder()?
            .add_source(config::File::with_name("harvester").required(false))
            .add_source(
                config::Environment::with_prefix("HARVESTER")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("index_pages")
                    .with_list_parse_key("sub_category_pages"),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let builder = Config::builder()
            .set_default("base_url", "https://eyecannndy.com")?
            .set_default("index_pages", vec!["/", "/techniques"])?
            .set_default("sub_category_pages", vec!["traditional", "zoom-in"])?
            .set_default("request_delay_ms", 1000)?
            .set_default("request_timeout_secs", 10)?
            .set_default("max_retries", 3)?
            .set_default("retry_delay_ms", 2000)?
            .set_default("checkpoint_interval", 5)?
            .set_default("data_dir", "data")?
            .set_default("technique_dir", "technique_files")?
            .set_default("videos_dir", "videos")?
            .set_default("download_timeout_secs", 30)?
            .set_default("download_delay_ms", 500)?
            .set_default("chunk_size", 8192)?
            .set_default("user_agent", DEFAULT_USER_AGENT)?;
        Ok(builder)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn links_path(&self) -> PathBuf {
        self.data_dir.join("technique_links.json")
    }

    pub fn raw_json_path(&self) -> PathBuf {
        self.data_dir.join("videos.json")
    }

    pub fn raw_csv_path(&self) -> PathBuf {
        self.data_dir.join("videos.csv")
    }

    pub fn scrape_progress_path(&self) -> PathBuf {
        self.data_dir.join("scrape_progress.json")
    }

    /// Absolute URL of a technique page.
    pub fn technique_url(&self, technique: &str) -> String {
        format!("{}/technique/{}", self.base_url.trim_end_matches('/'), technique)
    }

    /// Index pages are stored as paths; resolve them against `base_url`.
    pub fn index_urls(&self) -> Vec<String> {
        let base = self.base_url.trim_end_matches('/');
        self.index_pages
            .iter()
            .map(|p| {
                if p.starts_with("http://") || p.starts_with("https://") {
                    p.clone()
                } else if p == "/" {
                    base.to_string()
                } else {
                    format!("{}/{}", base, p.trim_start_matches('/'))
                }
            })
            .collect()
    }
}

#[cfg(test)]
impl Settings {
    /// Defaults only, pointed at a scratch directory.
    pub fn for_tests(root: &std::path::Path) -> Self {
        let mut s: Settings = Self::builder()
            .and_then(|b| Ok(b.build()?))
            .and_then(|c| Ok(c.try_deserialize()?))
            .unwrap();
        s.data_dir = root.join("data");
        s.technique_dir = root.join("technique_files");
        s.videos_dir = root.join("videos");
        s.request_delay_ms = 0;
        s.retry_delay_ms = 0;
        s.download_delay_ms = 0;
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::for_tests(dir.path());
        assert_eq!(s.base_url, "https://eyecannndy.com");
        assert_eq!(s.max_retries, 3);
        assert_eq!(s.chunk_size, 8192);
        assert_eq!(
            s.index_urls(),
            vec![
                "https://eyecannndy.com".to_string(),
                "https://eyecannndy.com/techniques".to_string()
            ]
        );
    }

    #[test]
    fn header_table_from_toml() {
        let toml = "request_delay_ms = 250\n[headers]\nAccept-Language = \"de-DE\"\nReferer = \"https://eyecannndy.com/\"\n";
        let s: Settings = Settings::builder()
            .unwrap()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(s.request_delay_ms, 250);
        assert_eq!(s.headers.len(), 2);
        assert!(s
            .headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("accept-language") && v == "de-DE"));
    }

    #[test]
    fn technique_url_ignores_trailing_slash() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = Settings::for_tests(dir.path());
        s.base_url = "https://example.com/".into();
        assert_eq!(s.technique_url("aerial"), "https://example.com/technique/aerial");
    }
}
