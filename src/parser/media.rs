use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

static CANDIDATE_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        "img[src*='.webp'], img[data-src*='.webp'], [data-video-url], video[src*='.webp'], source[src*='.webp'], .lazy-img, .video-thumbnail, .clip-item img",
    )
    .unwrap()
});
static CONTEXT_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p, div, span").unwrap());
static META_DESC_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[name='description']").unwrap());
static UPPER_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[A-Z]{2,}\b").unwrap());

const URL_ATTRS: &[&str] = &["src", "data-src", "data-video-url"];
const IGNORED_CLASSES: &[&str] = &["lazy-img", "img"];
const CHROME_WORDS: &[&str] = &["EYECANDY", "SUBMIT", "SEARCH", "LOGIN"];
const MAX_TAGS: usize = 5;
const MAX_DESCRIPTION: usize = 500;

/// Elements that may carry a WebP reference, in document order.
pub fn candidates(doc: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    doc.select(&CANDIDATE_SEL)
}

/// First of `src`, `data-src`, `data-video-url` that resolves to a `.webp`
/// URL. Lazy-loaded images often carry a placeholder in `src`.
pub fn webp_url(el: &ElementRef, page: &Url) -> Option<Url> {
    URL_ATTRS
        .iter()
        .filter_map(|attr| el.value().attr(attr))
        .map(str::trim)
        .filter(|raw| !raw.is_empty() && !raw.starts_with("data:"))
        .filter_map(|raw| page.join(raw).ok())
        .find(is_webp)
}

pub fn is_webp(url: &Url) -> bool {
    url.path().to_ascii_lowercase().ends_with(".webp")
}

pub fn css_classes(el: &ElementRef) -> Vec<String> {
    el.value()
        .attr("class")
        .map(|c| c.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// `"{width}x{height}"` when both attributes are numeric.
pub fn dimensions(el: &ElementRef) -> Option<String> {
    let dim = |name| {
        el.value()
            .attr(name)
            .map(|v| v.trim().trim_end_matches("px"))
            .filter(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()))
    };
    Some(format!("{}x{}", dim("width")?, dim("height")?))
}

pub fn alt_text(el: &ElementRef) -> String {
    el.value().attr("alt").map(str::trim).unwrap_or_default().to_string()
}

pub fn title(el: &ElementRef) -> String {
    ["alt", "title", "data-title"]
        .iter()
        .filter_map(|a| el.value().attr(a))
        .map(str::trim)
        .find(|t| !t.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn parent<'a>(el: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    el.parent().and_then(ElementRef::wrap)
}

fn squash(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Nearby descriptive text, else the page meta description.
pub fn description(el: &ElementRef, doc: &Html, alt: &str) -> String {
    if let Some(p) = parent(el) {
        let found = p
            .select(&CONTEXT_SEL)
            .map(|e| squash(&e.text().collect::<String>()))
            .find(|t| {
                let n = t.chars().count();
                n > 30 && n < MAX_DESCRIPTION && t != alt
            });
        if let Some(text) = found {
            return text;
        }
    }
    doc.select(&META_DESC_SEL)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|c| c.trim().chars().take(MAX_DESCRIPTION).collect())
        .unwrap_or_default()
}

/// Upper-case labels: technique, element classes, shouty words near the
/// element, and the brand or artist in an `"Artist - Title"` alt text.
pub fn tags(el: &ElementRef, technique: &str, alt: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let mut push = |tag: String| {
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    };

    if technique != "unknown" {
        push(technique.to_uppercase());
    }
    for class in css_classes(el) {
        if class.len() > 2 && !IGNORED_CLASSES.contains(&class.as_str()) {
            push(class.replace('-', " ").to_uppercase());
        }
    }
    if let Some(p) = parent(el) {
        let text = p.text().collect::<Vec<_>>().join(" ");
        for word in UPPER_WORD_RE.find_iter(&text).map(|m| m.as_str()).take(MAX_TAGS) {
            if !CHROME_WORDS.contains(&word) {
                push(word.to_string());
            }
        }
    }
    if let Some((brand, _)) = alt.split_once(" - ") {
        let brand = brand.trim().to_uppercase();
        if brand.chars().count() > 2 {
            push(brand);
        }
    }

    tags.truncate(MAX_TAGS);
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first(html: &str) -> (Html, Url) {
        (Html::parse_document(html), Url::parse("https://eyecannndy.com/technique/aerial").unwrap())
    }

    #[test]
    fn lazy_image_uses_data_src() {
        let (doc, page) = first(
            r#"<img class="lazy-img" src="/static/blank.gif" data-src="//cdn.eyecannndy.com/clips/a.webp">"#,
        );
        let el = candidates(&doc).next().unwrap();
        assert_eq!(
            webp_url(&el, &page).unwrap().as_str(),
            "https://cdn.eyecannndy.com/clips/a.webp"
        );
    }

    #[test]
    fn relative_and_query_urls() {
        let (doc, page) = first(r#"<div class="video-thumbnail" data-video-url="/media/b.WEBP?v=2"></div>"#);
        let el = candidates(&doc).next().unwrap();
        assert_eq!(
            webp_url(&el, &page).unwrap().as_str(),
            "https://eyecannndy.com/media/b.WEBP?v=2"
        );
    }

    #[test]
    fn non_webp_is_rejected() {
        let (doc, page) = first(r#"<div class="clip-item"><img src="/thumbs/c.jpg"></div>"#);
        let el = candidates(&doc).next().unwrap();
        assert!(webp_url(&el, &page).is_none());
    }

    #[test]
    fn dimensions_need_both() {
        let (doc, _) = first(r#"<img src="a.webp" width="640" height="360px"><img src="b.webp" width="640">"#);
        let els: Vec<_> = candidates(&doc).collect();
        assert_eq!(dimensions(&els[0]).as_deref(), Some("640x360"));
        assert_eq!(dimensions(&els[1]), None);
    }

    #[test]
    fn title_prefers_alt() {
        let (doc, _) = first(r#"<img src="a.webp" title="From title"><img src="b.webp" alt="Alt" title="T">"#);
        let els: Vec<_> = candidates(&doc).collect();
        assert_eq!(title(&els[0]), "From title");
        assert_eq!(title(&els[1]), "Alt");
    }

    #[test]
    fn description_from_context_then_meta() {
        let (doc, _) = first(
            r#"<head><meta name="description" content="Site wide blurb"></head>
            <div class="clip"><img src="a.webp" alt="x"><p>A long tracking shot over mountain ridges at dawn.</p></div>
            <div class="clip"><img src="b.webp" alt="y"><p>short</p></div>"#,
        );
        let els: Vec<_> = candidates(&doc).collect();
        assert_eq!(
            description(&els[0], &doc, "x"),
            "A long tracking shot over mountain ridges at dawn."
        );
        assert_eq!(description(&els[1], &doc, "y"), "Site wide blurb");
    }

    #[test]
    fn tag_sources_and_cap() {
        let (doc, _) = first(
            r#"<div><img class="lazy-img music-video" src="a.webp" alt="Nike - Air Max"><span>COMMERCIAL by SEARCH</span></div>"#,
        );
        let el = candidates(&doc).next().unwrap();
        let t = tags(&el, "aerial", "Nike - Air Max");
        assert_eq!(t, vec!["AERIAL", "MUSIC VIDEO", "COMMERCIAL", "NIKE"]);

        let (doc, _) = first(
            r#"<div><img class="one-a two-b three-c" src="a.webp" alt="Brand - X"><span>FOO BAR</span></div>"#,
        );
        let el = candidates(&doc).next().unwrap();
        let t = tags(&el, "pan", "Brand - X");
        assert_eq!(t.len(), MAX_TAGS);
        assert_eq!(t[0], "PAN");
    }
}
