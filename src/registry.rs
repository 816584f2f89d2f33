use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

/// Every technique known to exist on the site. Scraped even when discovery
/// misses them, and always given a technique file.
pub const SEED_TECHNIQUES: &[&str] = &[
    "aerial", "trip", "traditional", "anthropomorphism", "arc-movement", "architexture",
    "bolt-cam", "boomerang", "breakdown", "bullet-time", "camera-roll", "central-framing",
    "choreo", "cinemagraph", "close-up", "collage", "color-shift", "conveyor",
    "crash-transition", "cut-ins", "datamosh", "model", "distortions", "dolly-shot",
    "dolly-zoom", "double-dolly", "double-exposure", "dreamcore", "duplication",
    "dutch-angle", "dystopian", "echo-printing", "epiphany-shot", "falling",
    "undercranking", "glitch", "first-person-pov", "fisheye", "fixed-camera",
    "flash-cut", "digital-overlay", "focal-shift", "fourth-wall", "fpv-drone",
    "freeze-frame", "generative", "digital-gesture", "ground-shot", "halation",
    "shaky-cam", "hard-light", "haze", "high-angle", "infinite", "interview",
    "jump-cut", "kaleidoscope", "lazy-susan", "floating", "light-flash", "locked-on",
    "low-angle", "surrealism", "magnification", "masking", "match-cut", "match-motion",
    "match-split", "maximalism", "mixed-media", "morphing", "motion-blur",
    "night-vision", "object-portal", "as-object", "omnidirectional", "overhead",
    "over-the-shoulder", "pan", "parallax", "pass-through", "pedestal",
    "photogrammetry", "photography", "pixel-art", "probe-lens", "product",
    "profile-shot", "projections", "quick-cuts", "aspect-ratio-switch", "reflections",
    "scale-shift", "screen-in-screen", "set-transition", "shadow-box", "focal-focus",
    "silhouette", "slit-scan", "slow-motion", "snorricam", "speed-ramping",
    "split-diopter", "split-screen", "spotlight", "step-printing", "stop-motion",
    "stutter", "stylistic-suck", "tableau-shots", "thermal", "tilt", "tilt-shift",
    "tracking", "transformation", "transition", "trucking", "two-shot", "typography",
    "ultra-wide-zero-d", "underwater", "video-game", "video-portraits", "vignette",
    "vhs", "void", "voyeur", "wandering", "wierdcore", "whip-pan", "wide-shot",
    "wigglegram", "worms-eye", "x-ray", "zoetrope", "zoom-in",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechniqueLink {
    pub technique_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    pub url: String,
    #[serde(default)]
    pub display_text: String,
}

impl TechniqueLink {
    /// `traditional` or `traditional#3d`.
    pub fn canonical_name(&self) -> String {
        match &self.sub_category {
            Some(sub) => format!("{}#{}", self.technique_name, sub),
            None => self.technique_name.clone(),
        }
    }
}

/// Split `technique#sub` into its parts. An empty sub-category counts as none.
pub fn split_canonical(name: &str) -> (&str, Option<&str>) {
    match name.split_once('#') {
        Some((t, s)) if !s.is_empty() => (t, Some(s)),
        Some((t, _)) => (t, None),
        None => (name, None),
    }
}

/// Technique segment of a `/technique/<name>` URL, without query, fragment or
/// trailing slash.
pub fn technique_from_url(url: &str) -> Option<String> {
    let rest = url.split("/technique/").nth(1)?;
    let name = rest
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_matches('/');
    let name = name.split('/').next().unwrap_or_default();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Build a link from any URL pointing at a technique page. A fragment becomes
/// the sub-category.
pub fn link_from_url(url: &Url, display_text: &str) -> Option<TechniqueLink> {
    let technique_name = technique_from_url(url.as_str())?;
    let sub_category = url
        .fragment()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string);
    let mut page = url.clone();
    page.set_fragment(None);
    page.set_query(None);
    let base = page.as_str().trim_end_matches('/').to_string();
    let url = match &sub_category {
        Some(sub) => format!("{}#{}", base, sub),
        None => base,
    };
    Some(TechniqueLink {
        technique_name,
        sub_category,
        url,
        display_text: display_text.trim().to_string(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct DiscoveryInfo {
    timestamp: DateTime<Utc>,
    total_links: usize,
    total_techniques: usize,
    base_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    discovery_info: DiscoveryInfo,
    links: Vec<TechniqueLink>,
}

/// De-duplicated, insertion-ordered set of technique links.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    links: Vec<TechniqueLink>,
    seen: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the canonical name is already present.
    pub fn insert(&mut self, link: TechniqueLink) -> bool {
        let key = link.canonical_name();
        if !self.seen.insert(key) {
            return false;
        }
        self.links.push(link);
        true
    }

    /// Insert each link; returns how many were new.
    pub fn extend(&mut self, links: impl IntoIterator<Item = TechniqueLink>) -> usize {
        links.into_iter().map(|l| self.insert(l)).filter(|added| *added).count()
    }

    pub fn links(&self) -> &[TechniqueLink] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Top-level technique links, in discovery order.
    pub fn techniques(&self) -> impl Iterator<Item = &TechniqueLink> {
        self.links.iter().filter(|l| l.sub_category.is_none())
    }

    pub fn technique(&self, name: &str) -> Option<&TechniqueLink> {
        self.techniques().find(|l| l.technique_name == name)
    }

    /// Distinct technique names, including ones only seen through a
    /// sub-category link.
    pub fn technique_names(&self) -> BTreeSet<String> {
        self.links.iter().map(|l| l.technique_name.clone()).collect()
    }

    pub fn sub_categories(&self, technique: &str) -> Vec<&TechniqueLink> {
        self.links
            .iter()
            .filter(|l| l.technique_name == technique && l.sub_category.is_some())
            .collect()
    }

    /// Exact match of a URL path segment against registered technique names,
    /// last segment first.
    pub fn match_path(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
        let names = self.technique_names();
        segments
            .iter()
            .rev()
            .find(|seg| names.contains(**seg))
            .map(|seg| seg.to_string())
    }

    /// Loading a missing file yields an empty registry.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Link registry {:?} not found; continuing without it", path);
            return Ok(Self::new());
        }
        let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let file: RegistryFile =
            serde_json::from_str(&raw).with_context(|| format!("Failed to parse {:?}", path))?;
        let mut registry = Self::new();
        for link in file.links {
            registry.insert(link);
        }
        info!("Loaded {} technique links from {:?}", registry.len(), path);
        Ok(registry)
    }

    pub fn save(&self, path: &Path, base_url: &str) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        }
        let file = RegistryFile {
            discovery_info: DiscoveryInfo {
                timestamp: Utc::now(),
                total_links: self.links.len(),
                total_techniques: self.techniques().count(),
                base_url: base_url.to_string(),
            },
            links: self.links.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(url: &str) -> TechniqueLink {
        link_from_url(&Url::parse(url).unwrap(), "").unwrap()
    }

    #[test]
    fn canonical_names() {
        assert_eq!(link("https://eyecannndy.com/technique/aerial").canonical_name(), "aerial");
        assert_eq!(
            link("https://eyecannndy.com/technique/traditional#3d").canonical_name(),
            "traditional#3d"
        );
        assert_eq!(split_canonical("traditional#3d"), ("traditional", Some("3d")));
        assert_eq!(split_canonical("aerial#"), ("aerial", None));
        assert_eq!(split_canonical("aerial"), ("aerial", None));
    }

    #[test]
    fn technique_segment() {
        assert_eq!(
            technique_from_url("https://eyecannndy.com/technique/zoom-in/?ref=nav").as_deref(),
            Some("zoom-in")
        );
        assert_eq!(
            technique_from_url("https://eyecannndy.com/technique/traditional#2d").as_deref(),
            Some("traditional")
        );
        assert_eq!(technique_from_url("https://eyecannndy.com/technique/"), None);
        assert_eq!(technique_from_url("https://eyecannndy.com/about"), None);
    }

    #[test]
    fn link_urls_are_normalized() {
        let l = link("https://eyecannndy.com/technique/pan/?x=1");
        assert_eq!(l.url, "https://eyecannndy.com/technique/pan");
        assert_eq!(l.sub_category, None);
        let l = link("https://eyecannndy.com/technique/traditional#3d");
        assert_eq!(l.url, "https://eyecannndy.com/technique/traditional#3d");
        assert_eq!(l.sub_category.as_deref(), Some("3d"));
    }

    #[test]
    fn insert_dedups_by_canonical_name() {
        let mut r = Registry::new();
        assert!(r.insert(link("https://eyecannndy.com/technique/aerial")));
        assert!(!r.insert(link("https://eyecannndy.com/technique/aerial/")));
        assert!(r.insert(link("https://eyecannndy.com/technique/traditional#3d")));
        assert!(!r.insert(link("https://eyecannndy.com/technique/traditional#3d")));
        assert_eq!(r.len(), 2);
        assert_eq!(r.techniques().count(), 1);
        assert!(r.technique_names().contains("traditional"));
    }

    #[test]
    fn path_matching() {
        let mut r = Registry::new();
        r.insert(link("https://eyecannndy.com/technique/aerial"));
        r.insert(link("https://eyecannndy.com/technique/traditional#3d"));
        assert_eq!(
            r.match_path("https://eyecannndy.com/technique/aerial").as_deref(),
            Some("aerial")
        );
        assert_eq!(
            r.match_path("https://eyecannndy.com/technique/traditional").as_deref(),
            Some("traditional")
        );
        assert_eq!(r.match_path("https://eyecannndy.com/technique/unlisted"), None);
        assert_eq!(r.sub_categories("traditional").len(), 1);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/technique_links.json");
        let mut r = Registry::new();
        r.insert(link("https://eyecannndy.com/technique/aerial"));
        r.insert(link("https://eyecannndy.com/technique/traditional#3d"));
        r.save(&path, "https://eyecannndy.com").unwrap();

        let loaded = Registry::load(&path).unwrap();
        assert_eq!(loaded.links(), r.links());
        assert!(Registry::load(&dir.path().join("missing.json")).unwrap().is_empty());
    }
}
