pub mod category;
pub mod links;
pub mod media;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use scraper::Html;
use tracing::debug;
use url::Url;

use crate::records::VideoRecord;
use crate::registry::Registry;
use category::Category;

/// HTML → WebP records. Pure in its inputs: the same page, registry and
/// timestamp always give the same records in the same order.
pub fn extract_page(
    html: &str,
    page_url: &str,
    registry: &Registry,
    discovered_at: DateTime<Utc>,
) -> Vec<VideoRecord> {
    let Ok(page) = Url::parse(page_url) else {
        debug!("Unparseable page URL {}", page_url);
        return Vec::new();
    };
    let doc = Html::parse_document(html);
    let category = Category::infer(&doc, page_url, registry);
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for el in media::candidates(&doc) {
        let Some(video_url) = media::webp_url(&el, &page) else {
            debug!("Dropping <{}> without a usable WebP URL on {}", el.value().name(), page_url);
            continue;
        };
        let video_url = video_url.to_string();
        if !seen.insert(video_url.clone()) {
            continue;
        }

        let alt_text = media::alt_text(&el);
        records.push(VideoRecord {
            page_url: page_url.to_string(),
            discovered_at,
            element_tag: el.value().name().to_string(),
            title: media::title(&el),
            description: media::description(&el, &doc, &alt_text),
            category: category.for_element(&el),
            css_classes: media::css_classes(&el),
            dimensions: media::dimensions(&el),
            tags: media::tags(&el, category.technique(), &alt_text),
            alt_text,
            video_url,
            file_size: None,
        });
    }

    records
}
