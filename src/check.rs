use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use crate::generate::{file_stem, technique_json_files, TechniqueFile};
use crate::records;
use crate::settings::Settings;

/// Findings of an audit over the generated technique files.
#[derive(Debug, Default)]
pub struct CheckReport {
    pub files: usize,
    pub total_urls: usize,
    /// `(technique, url)` pairs listed more than once in one file.
    pub duplicates_within: Vec<(String, String)>,
    /// URL → techniques that all list it.
    pub shared_across: BTreeMap<String, Vec<String>>,
    /// Techniques whose CSV and JSON disagree.
    pub inconsistent: Vec<String>,
    /// `(technique, url)` pairs in a CSV but not in the raw record list.
    pub missing_from_raw: Vec<(String, String)>,
    pub unreadable: Vec<String>,
    pub empty: Vec<String>,
}

impl CheckReport {
    pub fn problems(&self) -> usize {
        self.duplicates_within.len()
            + self.shared_across.len()
            + self.inconsistent.len()
            + self.missing_from_raw.len()
            + self.unreadable.len()
    }

    pub fn is_clean(&self) -> bool {
        self.problems() == 0
    }
}

fn repeats<'a>(urls: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|u| !seen.insert(*u))
        .map(str::to_string)
        .collect()
}

pub fn run(settings: &Settings) -> Result<CheckReport> {
    let raw_path = settings.raw_json_path();
    let raw_urls: Option<HashSet<String>> = if raw_path.exists() {
        Some(
            records::load_raw(&raw_path)?
                .videos
                .into_iter()
                .map(|v| v.video_url)
                .collect(),
        )
    } else {
        warn!("No raw records at {:?}; skipping the round-trip check", raw_path);
        None
    };
    audit(&settings.technique_dir, raw_urls.as_ref())
}

/// Audit every technique JSON/CSV pair in `dir`.
pub fn audit(dir: &Path, raw_urls: Option<&HashSet<String>>) -> Result<CheckReport> {
    let mut report = CheckReport::default();
    let mut owners: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for json_path in technique_json_files(dir)? {
        report.files += 1;
        let file = match TechniqueFile::load(&json_path) {
            Ok(f) => f,
            Err(e) => {
                warn!("{:#}", e);
                report.unreadable.push(json_path.display().to_string());
                continue;
            }
        };
        let name = file.technique_name.clone();
        let csv_path = dir.join(format!("{}.csv", file_stem(&name)));
        let csv_urls = match records::read_url_csv(&csv_path) {
            Ok(urls) => urls,
            Err(e) => {
                warn!("{}: {:#}", name, e);
                report.unreadable.push(csv_path.display().to_string());
                continue;
            }
        };
        let json_urls: Vec<&str> = file.videos().map(|v| v.video_url.as_str()).collect();
        report.total_urls += json_urls.len();

        let dupes: BTreeSet<String> = repeats(json_urls.iter().copied())
            .into_iter()
            .chain(repeats(csv_urls.iter().map(String::as_str)))
            .collect();
        for url in dupes {
            warn!("{}: {} listed more than once", name, url);
            report.duplicates_within.push((name.clone(), url));
        }

        let json_set: BTreeSet<&str> = json_urls.iter().copied().collect();
        let csv_set: BTreeSet<&str> = csv_urls.iter().map(String::as_str).collect();
        if json_set != csv_set || file.video_count != json_urls.len() {
            warn!(
                "{}: JSON has {} URLs (video_count {}), CSV has {}",
                name,
                json_set.len(),
                file.video_count,
                csv_set.len()
            );
            report.inconsistent.push(name.clone());
        }

        if let Some(raw) = raw_urls {
            for url in csv_set.iter().filter(|u| !raw.contains(**u)) {
                report.missing_from_raw.push((name.clone(), url.to_string()));
            }
        }

        if json_urls.is_empty() {
            report.empty.push(name.clone());
        }
        for url in json_set {
            owners.entry(url.to_string()).or_default().push(name.clone());
        }
    }

    report.shared_across = owners.into_iter().filter(|(_, t)| t.len() > 1).collect();
    for (url, techniques) in &report.shared_across {
        warn!("{} appears in {}", url, techniques.join(", "));
    }
    info!(
        "Checked {} technique files ({} URLs): {} problems, {} empty",
        report.files,
        report.total_urls,
        report.problems(),
        report.empty.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate;
    use crate::records::sample;
    use crate::registry::Registry;
    use std::fs;

    fn generated() -> (tempfile::TempDir, Settings) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::for_tests(dir.path());
        let videos = vec![
            sample("https://cdn/a.webp", "aerial"),
            sample("https://cdn/b.webp", "traditional#3d"),
            sample("https://cdn/c.webp", "traditional"),
        ];
        records::write_json(
            &settings.raw_json_path(),
            &records::RawDump {
                scrape_info: records::ScrapeInfo {
                    timestamp: chrono::Utc::now(),
                    total_videos: videos.len(),
                    pages_scraped: 2,
                    status: "completed".into(),
                },
                videos: videos.clone(),
            },
        )
        .unwrap();
        generate::generate(&settings, &videos, &Registry::new()).unwrap();
        (dir, settings)
    }

    #[test]
    fn generated_files_are_clean() {
        let (_dir, settings) = generated();
        let report = run(&settings).unwrap();
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(report.total_urls, 3);
        assert!(report.empty.contains(&"void".to_string()));
        assert!(!report.empty.contains(&"aerial".to_string()));
    }

    #[test]
    fn detects_tampering() {
        let (_dir, settings) = generated();
        let dir = &settings.technique_dir;
        fs::write(
            dir.join("aerial.csv"),
            "video_url\nhttps://cdn/a.webp\nhttps://cdn/a.webp\nhttps://cdn/zzz.webp\n",
        )
        .unwrap();
        fs::write(dir.join("pan.csv"), "video_url\nhttps://cdn/c.webp\n").unwrap();

        let report = run(&settings).unwrap();
        assert_eq!(
            report.duplicates_within,
            vec![("aerial".to_string(), "https://cdn/a.webp".to_string())]
        );
        assert_eq!(report.inconsistent, vec!["aerial".to_string(), "pan".to_string()]);
        assert_eq!(
            report.missing_from_raw,
            vec![("aerial".to_string(), "https://cdn/zzz.webp".to_string())]
        );
        assert!(!report.is_clean());
    }

    #[test]
    fn shared_urls_across_files() {
        let (_dir, settings) = generated();
        let dir = &settings.technique_dir;
        let mut pan = TechniqueFile::load(&dir.join("pan.json")).unwrap();
        pan.sub_categories
            .insert("general".into(), vec![sample("https://cdn/a.webp", "pan")]);
        pan.video_count = 1;
        records::write_json(&dir.join("pan.json"), &pan).unwrap();
        records::write_url_csv(&dir.join("pan.csv"), ["https://cdn/a.webp"]).unwrap();

        let report = audit(dir, None).unwrap();
        assert_eq!(
            report.shared_across.get("https://cdn/a.webp"),
            Some(&vec!["aerial".to_string(), "pan".to_string()])
        );
        assert!(report.inconsistent.is_empty());
    }
}
