use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::records::{self, VideoRecord};
use crate::registry::{Registry, SEED_TECHNIQUES};
use crate::settings::Settings;

/// Group for records without a sub-category.
pub const GENERAL_GROUP: &str = "general";
pub const SUMMARY_FILE: &str = "_summary.json";

/// Per-technique aggregate. Always regenerable from the raw records and the
/// link registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechniqueFile {
    pub technique_name: String,
    pub video_count: usize,
    pub generated_at: DateTime<Utc>,
    pub sub_categories: BTreeMap<String, Vec<VideoRecord>>,
}

impl TechniqueFile {
    pub fn videos(&self) -> impl Iterator<Item = &VideoRecord> {
        self.sub_categories.values().flatten()
    }

    pub fn videos_mut(&mut self) -> impl Iterator<Item = &mut VideoRecord> {
        self.sub_categories.values_mut().flatten()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {:?}", path))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubCategorySummary {
    pub name: String,
    pub display_text: String,
    pub url: String,
    pub video_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TechniqueSummary {
    pub video_count: usize,
    pub file_stem: String,
    pub has_data: bool,
    pub display_text: String,
    pub url: String,
    pub sub_categories: Vec<SubCategorySummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Summary {
    pub generated_at: DateTime<Utc>,
    pub total_techniques: usize,
    pub techniques_with_data: usize,
    pub techniques_without_data: usize,
    pub total_videos: usize,
    pub techniques: BTreeMap<String, TechniqueSummary>,
}

/// File stem for a technique name: `#`, `/`, `\` become `_`, anything else
/// outside `[A-Za-z0-9._-]` is dropped.
pub fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if matches!(c, '#' | '/' | '\\') { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    if stem.is_empty() {
        "unknown".to_string()
    } else {
        stem
    }
}

/// `zoom-in` → `Zoom In`.
fn display_name(name: &str) -> String {
    name.split('-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Bucket records by technique, then sub-category. A `video_url` appears at
/// most once per technique.
pub fn group_records(
    records: &[VideoRecord],
) -> BTreeMap<String, BTreeMap<String, Vec<VideoRecord>>> {
    let mut groups: BTreeMap<String, BTreeMap<String, Vec<VideoRecord>>> = BTreeMap::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for r in records {
        let technique = r.technique().to_string();
        if !seen.insert((technique.clone(), r.video_url.clone())) {
            continue;
        }
        let sub = r.sub_category().unwrap_or(GENERAL_GROUP).to_string();
        groups
            .entry(technique)
            .or_default()
            .entry(sub)
            .or_default()
            .push(r.clone());
    }
    groups
}

/// Every technique that gets a file: registry, seeds, and whatever the
/// records themselves name.
pub fn technique_universe(
    registry: &Registry,
    groups: &BTreeMap<String, BTreeMap<String, Vec<VideoRecord>>>,
) -> BTreeSet<String> {
    let mut names = registry.technique_names();
    names.extend(SEED_TECHNIQUES.iter().map(|s| s.to_string()));
    names.extend(groups.keys().cloned());
    names
}

pub struct GenerateStats {
    pub total_techniques: usize,
    pub with_data: usize,
    pub without_data: usize,
    pub total_videos: usize,
    pub output_dir: PathBuf,
}

pub fn run(settings: &Settings) -> Result<GenerateStats> {
    let raw_path = settings.raw_json_path();
    let dump = records::load_raw(&raw_path)
        .with_context(|| format!("Run `scrape` first; no usable {:?}", raw_path))?;
    let registry = Registry::load(&settings.links_path())?;
    info!("Loaded {} raw records from {:?}", dump.videos.len(), raw_path);

    generate(settings, &dump.videos, &registry)
}

pub fn generate(settings: &Settings, videos: &[VideoRecord], registry: &Registry) -> Result<GenerateStats> {
    let out = &settings.technique_dir;
    fs::create_dir_all(out).with_context(|| format!("Failed to create {:?}", out))?;

    let mut groups = group_records(videos);
    let names = technique_universe(registry, &groups);
    let now = Utc::now();

    let mut summary = Summary {
        generated_at: now,
        total_techniques: names.len(),
        techniques_with_data: 0,
        techniques_without_data: 0,
        total_videos: 0,
        techniques: BTreeMap::new(),
    };

    for name in &names {
        let sub_categories = groups.remove(name).unwrap_or_default();
        let file = TechniqueFile {
            technique_name: name.clone(),
            video_count: sub_categories.values().map(Vec::len).sum(),
            generated_at: now,
            sub_categories,
        };
        let stem = file_stem(name);

        records::write_json(&out.join(format!("{}.json", stem)), &file)?;
        records::write_url_csv(
            &out.join(format!("{}.csv", stem)),
            file.videos().map(|v| v.video_url.as_str()),
        )?;

        if file.video_count > 0 {
            summary.techniques_with_data += 1;
            info!("{} ({}): {} videos", name, stem, file.video_count);
        } else {
            summary.techniques_without_data += 1;
        }
        summary.total_videos += file.video_count;
        summary
            .techniques
            .insert(name.clone(), summarize(settings, registry, &file, stem));
    }

    records::write_json(&out.join(SUMMARY_FILE), &summary)?;
    info!("Wrote {} technique files to {:?}", names.len(), out);

    Ok(GenerateStats {
        total_techniques: summary.total_techniques,
        with_data: summary.techniques_with_data,
        without_data: summary.techniques_without_data,
        total_videos: summary.total_videos,
        output_dir: out.clone(),
    })
}

fn summarize(settings: &Settings, registry: &Registry, file: &TechniqueFile, stem: String) -> TechniqueSummary {
    let name = &file.technique_name;
    let link = registry.technique(name);
    let mut sub_categories: Vec<SubCategorySummary> = registry
        .sub_categories(name)
        .into_iter()
        .filter_map(|l| {
            let sub = l.sub_category.clone()?;
            Some(SubCategorySummary {
                video_count: file.sub_categories.get(&sub).map_or(0, Vec::len),
                display_text: if l.display_text.is_empty() {
                    display_name(&sub)
                } else {
                    l.display_text.clone()
                },
                url: l.url.clone(),
                name: sub,
            })
        })
        .collect();
    // sub-categories seen in records but never registered
    for (sub, videos) in &file.sub_categories {
        if sub != GENERAL_GROUP && !sub_categories.iter().any(|s| &s.name == sub) {
            sub_categories.push(SubCategorySummary {
                name: sub.clone(),
                display_text: display_name(sub),
                url: format!("{}#{}", settings.technique_url(name), sub),
                video_count: videos.len(),
            });
        }
    }

    TechniqueSummary {
        video_count: file.video_count,
        file_stem: stem,
        has_data: file.video_count > 0,
        display_text: link
            .map(|l| l.display_text.clone())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| display_name(name)),
        url: link
            .map(|l| l.url.clone())
            .unwrap_or_else(|| settings.technique_url(name)),
        sub_categories,
    }
}

/// Technique JSON files in `dir`, excluding the summary, sorted by name.
pub fn technique_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {:?}", dir))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|x| x == "json"))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('_'))
        })
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::sample;
    use crate::registry::link_from_url;
    use url::Url;

    #[test]
    fn stems() {
        assert_eq!(file_stem("traditional#3d"), "traditional_3d");
        assert_eq!(file_stem("worm's eye/low"), "wormseye_low");
        assert_eq!(file_stem("***"), "unknown");
        assert_eq!(display_name("over-the-shoulder"), "Over The Shoulder");
    }

    #[test]
    fn grouping_by_technique_and_sub_category() {
        let records = vec![
            sample("https://cdn/a.webp", "traditional#3d"),
            sample("https://cdn/b.webp", "traditional"),
            sample("https://cdn/c.webp", "traditional#2d"),
            sample("https://cdn/a.webp", "traditional#2d"),
            sample("https://cdn/d.webp", "aerial"),
        ];
        let groups = group_records(&records);
        let trad = &groups["traditional"];
        assert_eq!(trad.keys().collect::<Vec<_>>(), vec!["2d", "3d", GENERAL_GROUP]);
        assert_eq!(trad["3d"].len(), 1);
        // a.webp already placed under 3d
        assert_eq!(trad["2d"].len(), 1);
        assert_eq!(groups["aerial"][GENERAL_GROUP].len(), 1);
    }

    #[test]
    fn writes_files_for_every_technique() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::for_tests(dir.path());
        let mut registry = Registry::new();
        for u in [
            "https://eyecannndy.com/technique/traditional",
            "https://eyecannndy.com/technique/traditional#3d",
            "https://eyecannndy.com/technique/brand-new",
        ] {
            registry.insert(link_from_url(&Url::parse(u).unwrap(), "").unwrap());
        }
        let videos = vec![
            sample("https://cdn/a.webp", "traditional#3d"),
            sample("https://cdn/b.webp", "traditional"),
            sample("https://cdn/c.webp", "rack-focus"),
        ];

        let stats = generate(&settings, &videos, &registry).unwrap();
        // seeds + brand-new + rack-focus
        assert_eq!(stats.total_techniques, SEED_TECHNIQUES.len() + 2);
        assert_eq!(stats.with_data, 2);
        assert_eq!(stats.total_videos, 3);

        let out = &settings.technique_dir;
        let trad = TechniqueFile::load(&out.join("traditional.json")).unwrap();
        assert_eq!(trad.video_count, 2);
        assert_eq!(
            records::read_url_csv(&out.join("traditional.csv")).unwrap(),
            vec!["https://cdn/a.webp", "https://cdn/b.webp"]
        );

        let empty = TechniqueFile::load(&out.join("void.json")).unwrap();
        assert_eq!(empty.video_count, 0);
        assert_eq!(fs::read_to_string(out.join("void.csv")).unwrap(), "video_url\n");

        let summary: Summary =
            serde_json::from_str(&fs::read_to_string(out.join(SUMMARY_FILE)).unwrap()).unwrap();
        let t = &summary.techniques["traditional"];
        assert!(t.has_data);
        assert_eq!(t.sub_categories.len(), 1);
        assert_eq!(t.sub_categories[0].video_count, 1);
        assert_eq!(summary.techniques["zoom-in"].display_text, "Zoom In");

        let files = technique_json_files(out).unwrap();
        assert_eq!(files.len(), stats.total_techniques);
    }
}
