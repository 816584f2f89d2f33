use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::generate::{file_stem, technique_json_files, TechniqueFile};
use crate::http::{FetchError, Fetcher};
use crate::records::{self, VideoRecord};
use crate::settings::Settings;

const PROGRESS_FILE: &str = ".download_progress.json";
const TITLE_MAX_CHARS: usize = 200;

pub struct DownloadOptions {
    /// Cap on videos considered; 0 means no cap.
    pub max: usize,
    pub techniques: Vec<String>,
}

#[derive(Debug, Default)]
pub struct DownloadStats {
    pub considered: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DownloadProgress {
    downloaded_urls: BTreeSet<String>,
    last_updated: Option<DateTime<Utc>>,
}

impl DownloadProgress {
    fn load(path: &Path) -> Self {
        let Ok(raw) = fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Could not parse {:?}: {}. Starting fresh.", path, e);
            Self::default()
        })
    }

    fn record(&mut self, path: &Path, url: &str) -> Result<()> {
        self.downloaded_urls.insert(url.to_string());
        self.last_updated = Some(Utc::now());
        records::write_json(path, self).context("Failed to save download progress")
    }
}

/// 64-bit FNV-1a; stable across runs and toolchains.
fn stable_hash(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') { '_' } else { c })
        .filter(|c| !c.is_control())
        .collect();
    cleaned.trim().chars().take(TITLE_MAX_CHARS).collect::<String>().trim().to_string()
}

/// On-disk name for a record: the URL's own `.webp` basename, else the title,
/// else a hash of the URL.
pub fn file_name(record: &VideoRecord) -> String {
    let basename = Url::parse(&record.video_url).ok().and_then(|u| {
        u.path_segments()
            .and_then(|mut segs| segs.next_back().map(str::to_string))
    });
    if let Some(name) = basename.filter(|n| n.to_ascii_lowercase().ends_with(".webp")) {
        return name;
    }
    let title = sanitize_title(&record.title);
    if !title.is_empty() {
        return format!("{}.webp", title);
    }
    format!("video_{:016x}.webp", stable_hash(&record.video_url))
}

/// Destination for every record of a technique, in order. A name already
/// taken by a different URL gets a `_<hash>` suffix, so each URL owns its file.
pub fn destinations<'v>(dir: &Path, videos: impl IntoIterator<Item = &'v VideoRecord>) -> Vec<(String, PathBuf)> {
    let mut owners: HashMap<String, String> = HashMap::new();
    videos
        .into_iter()
        .map(|v| {
            let mut name = file_name(v);
            if owners.get(&name).is_some_and(|owner| *owner != v.video_url) {
                let (stem, ext) = name.rsplit_once('.').unwrap_or((name.as_str(), "webp"));
                name = format!("{}_{:08x}.{}", stem, stable_hash(&v.video_url) as u32, ext);
            }
            owners.entry(name.clone()).or_insert_with(|| v.video_url.clone());
            (v.video_url.clone(), dir.join(name))
        })
        .collect()
}

/// Stream `body` into `<dest>.tmp` in `chunk_size` pieces, check the length,
/// then move it into place. The temp file never outlives a failure.
pub fn save_stream<R: Read>(
    url: &str,
    mut body: R,
    expected: Option<u64>,
    dest: &Path,
    chunk_size: usize,
) -> Result<u64, FetchError> {
    let mut tmp = dest.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let result = write_chunks(url, &mut body, &tmp, chunk_size.max(1)).and_then(|got| match expected {
        Some(expected) if got != expected => Err(FetchError::Incomplete {
            url: url.to_string(),
            got,
            expected,
        }),
        _ => Ok(got),
    });
    let result = result.and_then(|got| {
        fs::rename(&tmp, dest).map_err(|source| FetchError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        Ok(got)
    });
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_chunks<R: Read>(url: &str, body: &mut R, tmp: &Path, chunk_size: usize) -> Result<u64, FetchError> {
    let io_err = |source| FetchError::Io {
        path: tmp.to_path_buf(),
        source,
    };
    let mut out = BufWriter::new(File::create(tmp).map_err(io_err)?);
    let mut buf = vec![0u8; chunk_size];
    let mut total = 0u64;
    loop {
        let n = body.read(&mut buf).map_err(|source| FetchError::Body {
            url: url.to_string(),
            source,
        })?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).map_err(io_err)?;
        total += n as u64;
    }
    out.flush().map_err(io_err)?;
    Ok(total)
}

fn existing_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len()).filter(|len| *len > 0)
}

pub struct Downloader<'a> {
    settings: &'a Settings,
    fetcher: Fetcher,
    progress: DownloadProgress,
    progress_path: PathBuf,
    max: usize,
    pub stats: DownloadStats,
}

impl<'a> Downloader<'a> {
    pub fn new(settings: &'a Settings, max: usize) -> Result<Self> {
        fs::create_dir_all(&settings.videos_dir)
            .with_context(|| format!("Failed to create {:?}", settings.videos_dir))?;
        let progress_path = settings.videos_dir.join(PROGRESS_FILE);
        let progress = DownloadProgress::load(&progress_path);
        if !progress.downloaded_urls.is_empty() {
            info!("{} videos already downloaded in earlier runs", progress.downloaded_urls.len());
        }
        Ok(Downloader {
            settings,
            fetcher: Fetcher::for_videos(settings)?,
            progress,
            progress_path,
            max,
            stats: DownloadStats::default(),
        })
    }

    fn exhausted(&self) -> bool {
        self.max > 0 && self.stats.considered >= self.max
    }

    /// Download every video of one technique file, then rewrite it with
    /// `file_size` filled in for each record present on disk.
    pub fn technique(&mut self, json_path: &Path) -> Result<()> {
        let mut file = TechniqueFile::load(json_path)?;
        let dir = self.settings.videos_dir.join(file_stem(&file.technique_name));
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {:?}", dir))?;

        let todo = destinations(&dir, file.videos());
        info!("{}: {} videos", file.technique_name, todo.len());

        let pb = ProgressBar::new(todo.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg:20} [{elapsed_precise}] {bar:40} {pos}/{len}")?
                .progress_chars("=> "),
        );
        pb.set_message(file.technique_name.clone());

        for (url, dest) in &todo {
            if self.exhausted() {
                break;
            }
            self.stats.considered += 1;
            pb.inc(1);

            if self.progress.downloaded_urls.contains(url) || existing_size(dest).is_some() {
                debug!("Already have {}", url);
                self.stats.skipped += 1;
                continue;
            }
            match self.fetch_one(url, dest) {
                Ok(bytes) => {
                    self.stats.downloaded += 1;
                    debug!("Saved {} ({} bytes) to {:?}", url, bytes, dest);
                    self.progress.record(&self.progress_path, url)?;
                }
                Err(e) => {
                    self.stats.failed += 1;
                    warn!("Failed to download {}: {}", url, e);
                }
            }
        }
        pb.finish_and_clear();

        let paths: HashMap<String, PathBuf> = todo.into_iter().collect();
        for v in file.videos_mut() {
            if let Some(size) = paths.get(&v.video_url).and_then(|p| existing_size(p)) {
                v.file_size = Some(size);
            }
        }
        records::write_json(json_path, &file)
    }

    fn fetch_one(&mut self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let chunk_size = self.settings.chunk_size;
        self.fetcher.with_retry(url, |fetcher| {
            let resp = fetcher.get(url)?;
            let expected = resp.content_length();
            save_stream(url, resp, expected, dest, chunk_size)
        })
    }
}

/// Technique JSON files selected by name, or all of them.
fn targets(settings: &Settings, techniques: &[String]) -> Result<Vec<PathBuf>> {
    if techniques.is_empty() {
        return technique_json_files(&settings.technique_dir);
    }
    Ok(techniques
        .iter()
        .map(|t| settings.technique_dir.join(format!("{}.json", file_stem(t))))
        .filter(|p| {
            let exists = p.exists();
            if !exists {
                warn!("No technique file {:?}; run `generate` first", p);
            }
            exists
        })
        .collect())
}

pub fn run(settings: &Settings, opts: &DownloadOptions) -> Result<DownloadStats> {
    let files = targets(settings, &opts.techniques)?;
    let mut downloader = Downloader::new(settings, opts.max)?;

    for path in &files {
        if downloader.exhausted() {
            info!("Reached the limit of {} videos", opts.max);
            break;
        }
        if let Err(e) = downloader.technique(path) {
            warn!("Skipping {:?}: {:#}", path, e);
        }
    }
    Ok(downloader.stats)
}
