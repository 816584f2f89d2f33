use std::sync::LazyLock;

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::registry::{link_from_url, TechniqueLink};

static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static SCROLL_LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("li a.scroll-link").unwrap());

/// Every anchor pointing at a `/technique/` page, in document order.
pub fn technique_links(html: &str, page_url: &Url) -> Vec<TechniqueLink> {
    let doc = Html::parse_document(html);
    doc.select(&ANCHOR_SEL)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let url = page_url.join(href.trim()).ok()?;
            if url.host_str() != page_url.host_str() {
                debug!("Skipping off-site technique link {}", url);
                return None;
            }
            link_from_url(&url, &a.text().collect::<String>())
        })
        .collect()
}

/// Sub-category anchors on a technique page: `li a.scroll-link` whose
/// `data-target` or href fragment names a section.
pub fn sub_category_links(html: &str, technique: &str, technique_url: &str) -> Vec<TechniqueLink> {
    let doc = Html::parse_document(html);
    let base = technique_url.split('#').next().unwrap_or(technique_url).trim_end_matches('/');
    doc.select(&SCROLL_LINK_SEL)
        .filter_map(|a| {
            let el = a.value();
            let target = el
                .attr("data-target")
                .or_else(|| el.attr("href").and_then(|h| h.split_once('#').map(|(_, f)| f)))?;
            let id = target.trim().trim_start_matches('#');
            if id.is_empty() {
                return None;
            }
            Some(TechniqueLink {
                technique_name: technique.to_string(),
                sub_category: Some(id.to_string()),
                url: format!("{}#{}", base, id),
                display_text: a.text().collect::<String>().trim().to_string(),
            })
        })
        .collect()
}
