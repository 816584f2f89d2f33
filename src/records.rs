use std::fs::{self, File};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One WebP media reference found on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_url: String,
    pub page_url: String,
    pub discovered_at: DateTime<Utc>,
    pub element_tag: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub alt_text: String,
    pub css_classes: Vec<String>,
    pub dimensions: Option<String>,
    pub tags: Vec<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

impl VideoRecord {
    /// Technique part of `category`.
    pub fn technique(&self) -> &str {
        crate::registry::split_canonical(&self.category).0
    }

    pub fn sub_category(&self) -> Option<&str> {
        crate::registry::split_canonical(&self.category).1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeInfo {
    pub timestamp: DateTime<Utc>,
    pub total_videos: usize,
    pub pages_scraped: usize,
    pub status: String,
}

/// Stage-2 output: the flat record list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDump {
    pub scrape_info: ScrapeInfo,
    pub videos: Vec<VideoRecord>,
}

pub fn load_raw(path: &Path) -> Result<RawDump> {
    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {:?}", path))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))
}

const CSV_HEADER: &[&str] = &[
    "video_url",
    "page_url",
    "discovered_at",
    "element_tag",
    "title",
    "description",
    "category",
    "alt_text",
    "css_classes",
    "dimensions",
    "tags",
    "file_size",
];

/// Flat CSV mirror of the raw dump. List fields are joined with ` | `.
pub fn write_raw_csv(path: &Path, videos: &[VideoRecord]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut w = csv::Writer::from_writer(file);
    w.write_record(CSV_HEADER)?;
    for v in videos {
        let discovered_at = v.discovered_at.to_rfc3339();
        let description = v.description.replace('\n', " ");
        let classes = v.css_classes.join(" | ");
        let tags = v.tags.join(" | ");
        let file_size = v.file_size.map(|s| s.to_string()).unwrap_or_default();
        let row: [&str; 12] = [
            &v.video_url,
            &v.page_url,
            &discovered_at,
            &v.element_tag,
            &v.title,
            &description,
            &v.category,
            &v.alt_text,
            &classes,
            v.dimensions.as_deref().unwrap_or(""),
            &tags,
            &file_size,
        ];
        w.write_record(row)?;
    }
    w.flush()?;
    Ok(())
}

/// URL-only CSV with a single `video_url` column.
pub fn write_url_csv<'a>(path: &Path, urls: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut w = csv::Writer::from_writer(file);
    w.write_record(["video_url"])?;
    for url in urls {
        w.write_record([url])?;
    }
    w.flush()?;
    Ok(())
}

/// Read the `video_url` column of any CSV that has one.
pub fn read_url_csv(path: &Path) -> Result<Vec<String>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {:?}", path))?;
    let idx = rdr
        .headers()?
        .iter()
        .position(|h| h == "video_url")
        .with_context(|| format!("No video_url column in {:?}", path))?;
    let mut urls = Vec::new();
    for row in rdr.records() {
        let row = row.with_context(|| format!("Bad row in {:?}", path))?;
        if let Some(url) = row.get(idx).filter(|u| !u.is_empty()) {
            urls.push(url.to_string());
        }
    }
    Ok(urls)
}

#[cfg(test)]
pub(crate) fn sample(url: &str, category: &str) -> VideoRecord {
    VideoRecord {
        video_url: url.to_string(),
        page_url: format!("https://eyecannndy.com/technique/{}", category.split('#').next().unwrap()),
        discovered_at: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc),
        element_tag: "img".into(),
        title: "Nike - Air".into(),
        description: String::new(),
        category: category.to_string(),
        alt_text: "Nike - Air".into(),
        css_classes: vec!["lazy-img".into()],
        dimensions: Some("640x360".into()),
        tags: vec!["AERIAL".into()],
        file_size: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parts() {
        let r = sample("https://cdn/x.webp", "traditional#3d");
        assert_eq!(r.technique(), "traditional");
        assert_eq!(r.sub_category(), Some("3d"));
        let r = sample("https://cdn/y.webp", "aerial");
        assert_eq!(r.technique(), "aerial");
        assert_eq!(r.sub_category(), None);
    }

    #[test]
    fn raw_csv_keeps_one_row_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("videos.csv");
        let mut with_comma = sample("https://cdn/a.webp", "aerial");
        with_comma.description = "wide, slow\nsweep".into();
        write_raw_csv(&path, &[with_comma, sample("https://cdn/b.webp", "pan")]).unwrap();

        let urls = read_url_csv(&path).unwrap();
        assert_eq!(urls, vec!["https://cdn/a.webp", "https://cdn/b.webp"]);
    }

    #[test]
    fn url_csv_header_only_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("void.csv");
        write_url_csv(&path, std::iter::empty()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "video_url\n");
        assert!(read_url_csv(&path).unwrap().is_empty());
    }
}
