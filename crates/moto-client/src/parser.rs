//! Heuristic parser for the vendor's motorcycle pages.
//!
//! Each field is read by an ordered chain of strategies; the first one that
//! yields something wins. A page with nothing recognisable parses into an
//! empty [`RawExtraction`], which is not an error.

use std::collections::HashSet;
use std::sync::LazyLock;

use moto_core::error::AppError;
use moto_core::models::{Quantity, RawExtraction};
use moto_core::traits::PageParser;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

const BRANDS: &[&str] = &[
    "suzuki", "yamaha", "honda", "kawasaki", "ducati", "bmw", "triumph", "harley",
];

/// Substrings marking decorative images (matched case-insensitively).
const IMAGE_BLOCKLIST: &[&str] = &[
    "logo",
    "icon",
    "vite.svg",
    "favicon",
    "sprite",
    "placeholder",
    "search-banner",
];

/// Image attributes in preference order.
const IMAGE_ATTRS: &[&str] = &["src", "data-src", "data-lazy-src"];

/// Name length bounds, exclusive, in characters.
const NAME_MIN_CHARS: usize = 5;
const NAME_MAX_CHARS: usize = 100;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static regex")
}

static STYLED_NAME: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        "div[class*='styles_text'][class*='styles_weight--semi-bold']",
        "div[class*='styles_text__'][class*='styles_weight--semi-bold']",
        "div[class*='styles_text'][class*='uppercase']",
    ]
    .into_iter()
    .map(selector)
    .collect()
});
static HEADING: LazyLock<Selector> = LazyLock::new(|| selector("h1, h2"));
static BODY: LazyLock<Selector> = LazyLock::new(|| selector("body"));
static IMG: LazyLock<Selector> = LazyLock::new(|| selector("img"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| regex(r"\s+"));
/// Brand and model split by markup noise such as `<!-- -->`.
static RAW_NAME: LazyLock<Regex> = LazyLock::new(|| {
    regex(
        r"(Suzuki|Yamaha|Honda|Kawasaki|Ducati|BMW|Triumph|Harley-Davidson|Harley)(?:<!--\s*-->)?\s*(?:<!--\s*-->)?\s*([A-Z0-9]+)",
    )
});
static YEAR: LazyLock<Regex> = LazyLock::new(|| regex(r"Год:\s*(\d{4})"));
static MILEAGE: LazyLock<Regex> = LazyLock::new(|| regex(r"Пробег:\s*(\d+)\s*(км)"));
static DISPLACEMENT: LazyLock<Regex> = LazyLock::new(|| regex(r"Объ[её]м:\s*(\d+)\s*(сс|cc)"));
static FRAME: LazyLock<Regex> = LazyLock::new(|| regex(r"Номер рамы:\s*([A-Z0-9-]+)"));

/// A parsed document plus the two flat views the regex strategies read.
struct Page {
    doc: Html,
    body_text: String,
    body_html: String,
}

impl Page {
    fn new(html: &str) -> Self {
        let doc = Html::parse_document(html);
        let (body_text, body_html) = match doc.select(&BODY).next() {
            // Text nodes are space-separated so a value never runs into the next cell.
            Some(body) => (body.text().collect::<Vec<_>>().join(" "), body.inner_html()),
            None => (String::new(), String::new()),
        };
        Self {
            doc,
            body_text,
            body_html,
        }
    }
}

type NameStrategy = fn(&Page) -> Option<String>;

const NAME_STRATEGIES: &[NameStrategy] = &[styled_text_name, heading_name, raw_html_name];

fn styled_text_name(page: &Page) -> Option<String> {
    STYLED_NAME
        .iter()
        .find_map(|sel| page.doc.select(sel).find_map(brand_name))
}

fn heading_name(page: &Page) -> Option<String> {
    page.doc.select(&HEADING).find_map(brand_name)
}

fn raw_html_name(page: &Page) -> Option<String> {
    let caps = RAW_NAME.captures(&page.body_html)?;
    Some(format!("{} {}", &caps[1], &caps[2]))
}

/// Element text, whitespace collapsed, if it has a plausible length and
/// mentions a known brand.
fn brand_name(element: ElementRef<'_>) -> Option<String> {
    let text: String = element.text().collect();
    let text = WHITESPACE.replace_all(text.trim(), " ").into_owned();
    let len = text.chars().count();
    if len <= NAME_MIN_CHARS || len >= NAME_MAX_CHARS {
        return None;
    }
    let lower = text.to_lowercase();
    BRANDS
        .iter()
        .any(|brand| lower.contains(brand))
        .then_some(text)
}

fn quantity(re: &Regex, text: &str) -> Option<Quantity> {
    let caps = re.captures(text)?;
    let value = caps[1].parse().ok()?;
    Some(Quantity::new(value, &caps[2]))
}

/// Parser for pages of one vendor site.
#[derive(Debug, Clone)]
pub struct VendorPageParser {
    origin: String,
}

impl VendorPageParser {
    /// `origin` is used to absolutise relative image paths.
    pub fn new(origin: impl Into<String>) -> Self {
        let origin = origin.into().trim_end_matches('/').to_string();
        Self { origin }
    }

    /// Make an image attribute value absolute.
    pub fn normalize_image_url(&self, src: &str) -> String {
        if let Some(rest) = src.strip_prefix("//") {
            format!("https://{rest}")
        } else if src.starts_with('/') {
            format!("{}{src}", self.origin)
        } else if is_absolute(src) {
            src.to_string()
        } else {
            format!("{}/{src}", self.origin)
        }
    }

    fn images(&self, page: &Page) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut images = Vec::new();

        for img in page.doc.select(&IMG) {
            for attr in IMAGE_ATTRS {
                let Some(src) = img.value().attr(attr).map(str::trim) else {
                    continue;
                };
                if src.is_empty() || src.starts_with("data:") || is_noise(src) {
                    continue;
                }
                let url = self.normalize_image_url(src);
                if seen.insert(url.clone()) {
                    images.push(url);
                }
            }
        }
        images
    }
}

impl Default for VendorPageParser {
    fn default() -> Self {
        Self::new("https://jmmoto.ru")
    }
}

fn is_absolute(src: &str) -> bool {
    let lower = src.get(..8).unwrap_or(src).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn is_noise(src: &str) -> bool {
    let lower = src.to_lowercase();
    IMAGE_BLOCKLIST.iter().any(|term| lower.contains(term))
}

impl PageParser for VendorPageParser {
    fn parse(&self, html: &str) -> Result<RawExtraction, AppError> {
        if html.trim().is_empty() {
            return Err(AppError::ParseError("empty document".into()));
        }
        let page = Page::new(html);

        let name = NAME_STRATEGIES
            .iter()
            .find_map(|strategy| strategy(&page))
            .unwrap_or_default();
        let year = YEAR
            .captures(&page.body_text)
            .and_then(|caps| caps[1].parse().ok());

        Ok(RawExtraction {
            name,
            year,
            mileage: quantity(&MILEAGE, &page.body_text),
            displacement: quantity(&DISPLACEMENT, &page.body_text),
            frame_number: FRAME
                .captures(&page.body_text)
                .map(|caps| caps[1].to_string()),
            images: self.images(&page),
        })
    }
}
