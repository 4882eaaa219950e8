use std::path::Path;

use anyhow::Context as _;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

/// Discovery strategy for one source site: how chapters and page images are
/// found in its markup, and which static headers it expects.
pub trait Site: Send + Sync {
    fn name(&self) -> &str;

    fn referer(&self) -> &str;

    fn extra_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// `(label, url)` pairs in listing order, one per distinct label.
    fn chapter_links(&self, listing_url: &Url, html: &str) -> Vec<(String, String)>;

    /// Absolute image URLs in reading order.
    fn page_links(&self, chapter_url: &Url, html: &str) -> Vec<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteProfile {
    pub name: String,
    pub referer: String,
    #[serde(default = "SiteProfile::default_chapter_link_selector")]
    pub chapter_link_selector: String,
    #[serde(default = "SiteProfile::default_chapter_label_prefix")]
    pub chapter_label_prefix: String,
    pub page_image_selector: String,
    #[serde(default = "SiteProfile::default_image_attr")]
    pub image_attr: String,
    #[serde(default)]
    pub extra_headers: Vec<(String, String)>,
}

impl SiteProfile {
    fn default_chapter_link_selector() -> String {
        "a".to_owned()
    }

    fn default_chapter_label_prefix() -> String {
        "Chapter".to_owned()
    }

    fn default_image_attr() -> String {
        "src".to_owned()
    }

    pub fn nelomanga() -> Self {
        Self {
            name: "nelomanga".to_owned(),
            referer: "https://www.nelomanga.net/".to_owned(),
            chapter_link_selector: Self::default_chapter_link_selector(),
            chapter_label_prefix: Self::default_chapter_label_prefix(),
            page_image_selector: "div.container-chapter-reader img".to_owned(),
            image_attr: Self::default_image_attr(),
            extra_headers: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("read site profile: {}", path.display()))?;
        let profile: Self = serde_yaml::from_str(&yaml)
            .with_context(|| format!("parse site profile: {}", path.display()))?;
        Ok(profile)
    }
}

/// [`Site`] driven by the CSS selectors of a [`SiteProfile`].
#[derive(Debug)]
pub struct SelectorSite {
    profile: SiteProfile,
    chapter_links: Selector,
    page_images: Selector,
}

impl SelectorSite {
    pub fn new(profile: SiteProfile) -> anyhow::Result<Self> {
        let chapter_links = parse_selector(&profile.chapter_link_selector)?;
        let page_images = parse_selector(&profile.page_image_selector)?;
        Ok(Self {
            profile,
            chapter_links,
            page_images,
        })
    }
}

fn parse_selector(selector: &str) -> anyhow::Result<Selector> {
    Selector::parse(selector).map_err(|err| anyhow::anyhow!("parse selector {selector:?}: {err}"))
}

impl Site for SelectorSite {
    fn name(&self) -> &str {
        &self.profile.name
    }

    fn referer(&self) -> &str {
        &self.profile.referer
    }

    fn extra_headers(&self) -> Vec<(String, String)> {
        self.profile.extra_headers.clone()
    }

    fn chapter_links(&self, listing_url: &Url, html: &str) -> Vec<(String, String)> {
        let document = Html::parse_document(html);
        let listing = listing_url.as_str();
        let mut links: Vec<(String, String)> = Vec::new();

        for anchor in document.select(&self.chapter_links) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Ok(resolved) = listing_url.join(href) else {
                continue;
            };
            let resolved = resolved.to_string();
            if !resolved.contains(listing) {
                continue;
            }

            let label = anchor.text().collect::<String>().trim().to_owned();
            if !label.starts_with(&self.profile.chapter_label_prefix) {
                continue;
            }

            match links.iter_mut().find(|(existing, _)| *existing == label) {
                Some(entry) => entry.1 = resolved,
                None => links.push((label, resolved)),
            }
        }

        links
    }

    fn page_links(&self, chapter_url: &Url, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        document
            .select(&self.page_images)
            .filter_map(|img| img.value().attr(&self.profile.image_attr))
            .map(str::trim)
            .filter(|src| !src.is_empty())
            .filter_map(|src| chapter_url.join(src).ok())
            .map(|url| url.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<!doctype html>
<html><body>
  <a href="https://example.com/manga/abc/chapter-2">Chapter 2</a>
  <a href="https://example.com/manga/abc/chapter-10"> Chapter 10 </a>
  <a href="/manga/abc/chapter-1">Chapter 1</a>
  <a href="https://example.com/manga/abc/chapter-2-dup">Chapter 2</a>
  <a href="https://example.com/manga/other/chapter-3">Chapter 3</a>
  <a href="https://example.com/manga/abc/vol-1">Volume 1</a>
  <a>Chapter 99</a>
</body></html>"#;

    const READER: &str = r#"<!doctype html>
<html><body>
  <img src="/logo.png">
  <div class="container-chapter-reader">
    <img src="https://cdn.example.com/1.jpg">
    <img src="img/2.jpg">
    <img src="">
    <img src=" https://cdn.example.com/3.jpg ">
  </div>
</body></html>"#;

    fn site() -> SelectorSite {
        SelectorSite::new(SiteProfile::nelomanga()).expect("builtin profile")
    }

    #[test]
    fn chapter_links_filter_and_dedupe() -> anyhow::Result<()> {
        let listing = Url::parse("https://example.com/manga/abc")?;
        let links = site().chapter_links(&listing, LISTING);
        assert_eq!(
            links,
            vec![
                (
                    "Chapter 2".to_owned(),
                    "https://example.com/manga/abc/chapter-2-dup".to_owned()
                ),
                (
                    "Chapter 10".to_owned(),
                    "https://example.com/manga/abc/chapter-10".to_owned()
                ),
                (
                    "Chapter 1".to_owned(),
                    "https://example.com/manga/abc/chapter-1".to_owned()
                ),
            ]
        );
        Ok(())
    }

    #[test]
    fn page_links_come_from_reader_container_in_order() -> anyhow::Result<()> {
        let chapter = Url::parse("https://example.com/manga/abc/chapter-1/")?;
        let links = site().page_links(&chapter, READER);
        assert_eq!(
            links,
            vec![
                "https://cdn.example.com/1.jpg",
                "https://example.com/manga/abc/chapter-1/img/2.jpg",
                "https://cdn.example.com/3.jpg",
            ]
        );
        Ok(())
    }

    #[test]
    fn profile_loads_from_yaml_with_defaults() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("site.yaml");
        std::fs::write(
            &path,
            "name: mirror\nreferer: https://mirror.example/\npage_image_selector: \"#reader img\"\nimage_attr: data-src\n",
        )?;
        let profile = SiteProfile::load(&path)?;
        assert_eq!(profile.chapter_link_selector, "a");
        assert_eq!(profile.chapter_label_prefix, "Chapter");
        assert_eq!(profile.image_attr, "data-src");
        assert!(SelectorSite::new(profile).is_ok());
        Ok(())
    }

    #[test]
    fn bad_selector_is_rejected() {
        let mut profile = SiteProfile::nelomanga();
        profile.page_image_selector = "div[".to_owned();
        assert!(SelectorSite::new(profile).is_err());
    }
}
