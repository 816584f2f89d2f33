use anyhow::Result;
use tracing::{debug, info};
use url::Url;

use crate::http::Fetcher;
use crate::registry::{link_from_url, TechniqueLink};

/// Fetch `<base>/sitemap.xml` and return every technique page it lists.
pub fn fetch_technique_links(fetcher: &mut Fetcher, base_url: &str) -> Result<Vec<TechniqueLink>> {
    let sitemap_url = format!("{}/sitemap.xml", base_url.trim_end_matches('/'));
    info!("Fetching sitemap: {}", sitemap_url);
    let xml = fetcher.fetch_text(&sitemap_url)?;

    let links = technique_locs(&xml)?;
    info!("Technique pages in sitemap: {}", links.len());
    Ok(links)
}

/// `<urlset><url><loc>` entries that point at a technique page. Sitemap
/// indexes and non-technique pages yield nothing.
fn technique_locs(xml: &str) -> Result<Vec<TechniqueLink>> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(xml);
    let mut links = Vec::new();
    let mut in_url = false;
    let mut loc = String::new();
    let mut reading_loc = false;
    let mut skipped = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"url" => in_url = true,
                b"loc" if in_url => {
                    reading_loc = true;
                    loc.clear();
                }
                _ => {}
            },
            Event::Text(t) if reading_loc => loc.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"loc" if reading_loc => {
                    reading_loc = false;
                    match Url::parse(loc.trim()).ok().and_then(|u| link_from_url(&u, "")) {
                        Some(link) => links.push(link),
                        None => skipped += 1,
                    }
                }
                b"url" => in_url = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    debug!("Sitemap: ignored {} non-technique entries", skipped);
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_technique_locs_survive() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://eyecannndy.com/technique/aerial</loc></url>
  <url><loc>https://eyecannndy.com/about</loc><lastmod>2024-01-01</lastmod></url>
  <url><loc> https://eyecannndy.com/technique/zoom-in/ </loc></url>
  <url><loc>https://eyecannndy.com/technique/traditional#3d</loc></url>
</urlset>"#;
        let names: Vec<String> = technique_locs(xml)
            .unwrap()
            .iter()
            .map(|l| l.canonical_name())
            .collect();
        assert_eq!(names, vec!["aerial", "zoom-in", "traditional#3d"]);
    }

    #[test]
    fn sitemap_index_yields_nothing() {
        let xml = "<sitemapindex><sitemap><loc>https://x/technique/sitemap-1.xml</loc></sitemap></sitemapindex>";
        assert!(technique_locs(xml).unwrap().is_empty());
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(technique_locs("<urlset><url><loc>a</url></urlset>").is_err());
    }
}
