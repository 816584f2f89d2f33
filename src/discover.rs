use anyhow::{Context, Result};
use tracing::{info, warn};
use url::Url;

use crate::http::Fetcher;
use crate::parser::links;
use crate::registry::Registry;
use crate::settings::Settings;
use crate::sitemap;

pub struct DiscoverOptions {
    /// Visit every discovered technique page for sub-categories, not just the
    /// configured ones.
    pub all_sub_categories: bool,
    pub sitemap: bool,
}

pub struct DiscoverStats {
    pub techniques: usize,
    pub sub_categories: usize,
    pub failed_pages: usize,
}

pub fn run(settings: &Settings, opts: &DiscoverOptions) -> Result<(Registry, DiscoverStats)> {
    let mut fetcher = Fetcher::for_pages(settings)?;
    let mut registry = Registry::new();
    let mut failed_pages = 0usize;

    for index_url in settings.index_urls() {
        let page = Url::parse(&index_url).with_context(|| format!("Bad index page {}", index_url))?;
        match fetcher.fetch_text(&index_url) {
            Ok(html) => {
                let found = links::technique_links(&html, &page);
                let added = registry.extend(found);
                info!("{}: {} new technique links", index_url, added);
            }
            Err(e) => {
                failed_pages += 1;
                warn!("Skipping index page {}: {}", index_url, e);
            }
        }
    }

    if opts.sitemap {
        match sitemap::fetch_technique_links(&mut fetcher, &settings.base_url) {
            Ok(found) => {
                let added = registry.extend(found);
                info!("Sitemap: {} new technique links", added);
            }
            Err(e) => {
                failed_pages += 1;
                warn!("Sitemap unavailable: {:#}", e);
            }
        }
    }

    let targets: Vec<String> = if opts.all_sub_categories {
        registry.technique_names().into_iter().collect()
    } else {
        settings.sub_category_pages.clone()
    };

    for technique in &targets {
        let url = settings.technique_url(technique);
        info!("Checking {} for sub-categories", url);
        match fetcher.fetch_text(&url) {
            Ok(html) => {
                let subs = links::sub_category_links(&html, technique, &url);
                let added = registry.extend(subs);
                if added > 0 {
                    info!("Found {} sub-categories for {}", added, technique);
                }
            }
            Err(e) => {
                failed_pages += 1;
                warn!("Skipping {}: {}", url, e);
            }
        }
    }

    registry
        .save(&settings.links_path(), &settings.base_url)
        .context("Failed to save technique links")?;

    let techniques = registry.techniques().count();
    let stats = DiscoverStats {
        techniques,
        sub_categories: registry.len() - techniques,
        failed_pages,
    };
    info!(
        "Saved {} links ({} techniques, {} sub-categories) to {:?}",
        registry.len(),
        stats.techniques,
        stats.sub_categories,
        settings.links_path()
    );
    Ok((registry, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_site_still_writes_registry() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::for_tests(dir.path());
        settings.base_url = "http://127.0.0.1:9".into();
        settings.max_retries = 1;

        let (registry, stats) = run(
            &settings,
            &DiscoverOptions {
                all_sub_categories: false,
                sitemap: true,
            },
        )
        .unwrap();
        assert!(registry.is_empty());
        // two index pages, the sitemap, two sub-category pages
        assert_eq!(stats.failed_pages, 5);
        assert!(Registry::load(&settings.links_path()).unwrap().is_empty());
    }
}
