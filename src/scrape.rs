use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::http::Fetcher;
use crate::parser;
use crate::records::{self, RawDump, ScrapeInfo, VideoRecord};
use crate::registry::{link_from_url, Registry, SEED_TECHNIQUES};
use crate::settings::Settings;

/// Scrape stats returned after completion.
pub struct ScrapeStats {
    pub pages: usize,
    pub ok: usize,
    pub errors: usize,
    pub new_videos: usize,
    pub total_videos: usize,
}

pub struct ScrapeOptions {
    pub limit: Option<usize>,
    pub techniques: Vec<String>,
    pub resume: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Progress {
    completed_pages: BTreeSet<String>,
    last_updated: Option<DateTime<Utc>>,
}

impl Progress {
    fn load(path: &Path) -> Self {
        let Ok(raw) = fs::read_to_string(path) else {
            return Progress::default();
        };
        match serde_json::from_str(&raw) {
            Ok(p) => p,
            Err(e) => {
                warn!("Could not parse {:?}: {}. Starting fresh.", path, e);
                Progress::default()
            }
        }
    }
}

/// In-memory record list with set-based `video_url` dedup.
#[derive(Default)]
pub struct Accumulator {
    videos: Vec<VideoRecord>,
    seen: HashSet<String>,
}

impl Accumulator {
    pub fn from_records(records: Vec<VideoRecord>) -> Self {
        let mut acc = Accumulator::default();
        acc.extend(records);
        acc
    }

    /// Returns how many records were new.
    pub fn extend(&mut self, records: impl IntoIterator<Item = VideoRecord>) -> usize {
        let before = self.videos.len();
        for r in records {
            if self.seen.insert(r.video_url.clone()) {
                self.videos.push(r);
            }
        }
        self.videos.len() - before
    }

    pub fn videos(&self) -> &[VideoRecord] {
        &self.videos
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }
}

/// Pages to visit: registry techniques first, then seeds, without fragments
/// or repeats.
pub fn plan_pages(settings: &Settings, registry: &Registry, only: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut pages = Vec::new();
    let mut push = |url: String| {
        if seen.insert(url.clone()) {
            pages.push(url);
        }
    };

    if !only.is_empty() {
        for name in only {
            push(settings.technique_url(name));
        }
        return pages;
    }
    for link in registry.techniques() {
        push(link.url.clone());
    }
    for name in registry.technique_names() {
        push(settings.technique_url(&name));
    }
    for name in SEED_TECHNIQUES {
        push(settings.technique_url(name));
    }
    pages
}

/// Registry used for category matching: the discovered links plus every seed
/// technique, so seed pages still match by path.
pub fn matching_registry(settings: &Settings, registry: &Registry) -> Registry {
    let mut merged = registry.clone();
    for name in SEED_TECHNIQUES {
        if let Ok(url) = Url::parse(&settings.technique_url(name)) {
            if let Some(link) = link_from_url(&url, "") {
                merged.insert(link);
            }
        }
    }
    merged
}

pub fn run(settings: &Settings, opts: &ScrapeOptions) -> Result<ScrapeStats> {
    let registry = Registry::load(&settings.links_path())?;
    let matcher = matching_registry(settings, &registry);

    // The dump only grows: earlier records are always carried over.
    let raw_path = settings.raw_json_path();
    let mut acc = Accumulator::default();
    if raw_path.exists() {
        acc = Accumulator::from_records(records::load_raw(&raw_path)?.videos);
        info!("Loaded {} earlier videos from {:?}", acc.len(), raw_path);
    }
    let mut progress = Progress::load(&settings.scrape_progress_path());
    if opts.resume {
        info!("Resuming: {} pages already done", progress.completed_pages.len());
    }

    let mut pages: Vec<String> = plan_pages(settings, &registry, &opts.techniques)
        .into_iter()
        .filter(|p| !opts.resume || !progress.completed_pages.contains(p))
        .collect();
    if let Some(n) = opts.limit {
        pages.truncate(n);
    }
    if pages.is_empty() {
        info!("No pages left to scrape");
        return Ok(ScrapeStats {
            pages: 0,
            ok: 0,
            errors: 0,
            new_videos: 0,
            total_videos: acc.len(),
        });
    }

    let mut fetcher = Fetcher::for_pages(settings)?;
    let pb = ProgressBar::new(pages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let interval = settings.checkpoint_interval.max(1);
    let mut ok = 0usize;
    let mut errors = 0usize;
    let mut new_videos = 0usize;

    for (i, page_url) in pages.iter().enumerate() {
        match fetcher.fetch_text(page_url) {
            Ok(html) => {
                let found = parser::extract_page(&html, page_url, &matcher, Utc::now());
                let found_count = found.len();
                let added = acc.extend(found);
                new_videos += added;
                ok += 1;
                info!(
                    "{}: {} WebP references ({} new, {} total)",
                    page_url,
                    found_count,
                    added,
                    acc.len()
                );
                progress.completed_pages.insert(page_url.clone());
            }
            Err(e) => {
                errors += 1;
                warn!("Skipping {}: {}", page_url, e);
            }
        }
        pb.inc(1);

        if (i + 1) % interval == 0 && ok > 0 {
            checkpoint(settings, &acc, &progress, "in_progress")?;
        }
    }

    pb.finish_and_clear();
    if ok == 0 && new_videos == 0 {
        warn!("No page fetched; leaving {:?} untouched", raw_path);
    } else {
        checkpoint(settings, &acc, &progress, "completed")?;
    }
    info!("Scraped {} pages ({} ok, {} errors)", pages.len(), ok, errors);

    Ok(ScrapeStats {
        pages: pages.len(),
        ok,
        errors,
        new_videos,
        total_videos: acc.len(),
    })
}

/// Rewrite raw JSON, raw CSV and the progress file from the accumulator.
fn checkpoint(settings: &Settings, acc: &Accumulator, progress: &Progress, status: &str) -> Result<()> {
    let dump = RawDump {
        scrape_info: ScrapeInfo {
            timestamp: Utc::now(),
            total_videos: acc.len(),
            pages_scraped: progress.completed_pages.len(),
            status: status.to_string(),
        },
        videos: acc.videos().to_vec(),
    };
    records::write_json(&settings.raw_json_path(), &dump)?;
    records::write_raw_csv(&settings.raw_csv_path(), acc.videos())?;

    let progress = Progress {
        completed_pages: progress.completed_pages.clone(),
        last_updated: Some(Utc::now()),
    };
    records::write_json(&settings.scrape_progress_path(), &progress)
        .context("Failed to save scrape progress")?;
    Ok(())
}
