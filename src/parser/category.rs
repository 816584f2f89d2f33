use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use crate::registry::Registry;

static BREADCRUMB_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        "nav[aria-label*='readcrumb'] a, nav[aria-label*='readcrumb'] span, .breadcrumb a, .breadcrumb li, .breadcrumbs a, .breadcrumbs li, [itemtype*='BreadcrumbList'] [itemprop='name']",
    )
    .unwrap()
});
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());

const FALLBACK: &str = "unknown";
const BREADCRUMB_SKIP: &[&str] = &["home", "eyecandy", "eyecannndy", "techniques", "technique"];

/// Page-level category decision, refined per element by [`Category::for_element`].
#[derive(Debug, Clone)]
pub enum Category {
    /// Matched a registered technique by URL path segment.
    Registered {
        technique: String,
        sub_ids: HashSet<String>,
    },
    /// Label taken from breadcrumbs or `<title>`.
    Label(String),
}

impl Category {
    pub fn infer(doc: &Html, page_url: &str, registry: &Registry) -> Self {
        if let Some(technique) = registry.match_path(page_url) {
            let sub_ids = registry
                .sub_categories(&technique)
                .into_iter()
                .filter_map(|l| l.sub_category.clone())
                .collect();
            return Category::Registered { technique, sub_ids };
        }
        let label = breadcrumb_label(doc)
            .or_else(|| title_label(doc))
            .unwrap_or_else(|| FALLBACK.to_string());
        Category::Label(label)
    }

    pub fn technique(&self) -> &str {
        match self {
            Category::Registered { technique, .. } => technique,
            Category::Label(label) => label,
        }
    }

    /// `technique#sub` when the element sits inside a registered sub-category
    /// section, else the technique.
    pub fn for_element(&self, el: &ElementRef) -> String {
        match self {
            Category::Registered { technique, sub_ids } if !sub_ids.is_empty() => el
                .ancestors()
                .filter_map(ElementRef::wrap)
                .filter_map(|a| a.value().id())
                .find(|id| sub_ids.contains(*id))
                .map(|id| format!("{}#{}", technique, id))
                .unwrap_or_else(|| technique.clone()),
            _ => self.technique().to_string(),
        }
    }
}

/// Deepest meaningful breadcrumb entry.
fn breadcrumb_label(doc: &Html) -> Option<String> {
    doc.select(&BREADCRUMB_SEL)
        .map(|e| slugify(&e.text().collect::<String>()))
        .filter(|s| !s.is_empty() && !BREADCRUMB_SKIP.contains(&s.as_str()))
        .last()
}

/// First segment of `<title>`, e.g. "Aerial | Eyecandy" → "aerial".
fn title_label(doc: &Html) -> Option<String> {
    let title = doc.select(&TITLE_SEL).next()?.text().collect::<String>();
    title
        .split(['|', '–', '—'])
        .flat_map(|part| part.split(" - "))
        .map(slugify)
        .find(|s| !s.is_empty() && !BREADCRUMB_SKIP.contains(&s.as_str()))
}

/// Lower-case, runs of non-alphanumerics collapsed to a single `-`.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn registry(urls: &[&str]) -> Registry {
        let mut r = Registry::new();
        for u in urls {
            r.insert(crate::registry::link_from_url(&Url::parse(u).unwrap(), "").unwrap());
        }
        r
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify("  Zoom In "), "zoom-in");
        assert_eq!(slugify("Worm's-Eye / View"), "worm-s-eye-view");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn registry_match_wins() {
        let doc = Html::parse_document("<title>Something Else | Eyecandy</title>");
        let r = registry(&["https://eyecannndy.com/technique/aerial"]);
        let c = Category::infer(&doc, "https://eyecannndy.com/technique/aerial", &r);
        assert_eq!(c.technique(), "aerial");
    }

    #[test]
    fn breadcrumb_fallback() {
        let doc = Html::parse_document(
            r#"<title>Ignored</title><nav aria-label="Breadcrumb"><a href="/">Home</a><a href="/technique/rack-focus">Rack Focus</a></nav>"#,
        );
        let c = Category::infer(&doc, "https://eyecannndy.com/technique/rack-focus", &Registry::new());
        assert_eq!(c.technique(), "rack-focus");
    }

    #[test]
    fn title_fallback() {
        let doc = Html::parse_document("<html><head><title>Light Leaks | Eyecandy</title></head></html>");
        let c = Category::infer(&doc, "https://eyecannndy.com/x", &Registry::new());
        assert_eq!(c.technique(), "light-leaks");

        let doc = Html::parse_document("<html><head><title>Eyecandy - Split Screen</title></head></html>");
        let c = Category::infer(&doc, "https://eyecannndy.com/x", &Registry::new());
        assert_eq!(c.technique(), "split-screen");
    }

    #[test]
    fn nothing_to_go_on() {
        let doc = Html::parse_document("<p>bare</p>");
        let c = Category::infer(&doc, "https://eyecannndy.com/x", &Registry::new());
        assert_eq!(c.technique(), "unknown");
    }
}
