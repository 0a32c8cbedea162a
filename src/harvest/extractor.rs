//! Content extraction
//!
//! This module turns fetched page content into:
//! - Records, on detail pages (one per page or one per item container)
//! - New frontier entries, on index pages (detail links and the next page)
//! - Image URLs for artifact harvesting
//!
//! Extraction is pure: no I/O happens here.

use crate::config::{compile_selector, ExtractConfig, FieldRule};
use crate::harvest::FrontierEntry;
use crate::sink::{FieldValue, Record};
use crate::state::PageLabel;
use crate::url::resolve_link;
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use std::borrow::Cow;
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

/// Reasons page content cannot be extracted
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("content has no decodable text")]
    Undecodable,

    #[error("content is empty")]
    Empty,

    #[error("source URL '{0}' cannot be used as a base")]
    SourceUrl(String),
}

/// Everything extracted from one page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub records: Vec<Record>,
    pub entries: Vec<FrontierEntry>,

    /// Matched hrefs that did not resolve to an http(s) URL
    pub rejected_links: Vec<String>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.entries.is_empty() && self.rejected_links.is_empty()
    }
}

#[derive(Debug, Clone)]
struct FieldExtractor {
    name: String,
    selector: Selector,
    attribute: Option<String>,
    multiple: bool,
    separator: String,
    number: bool,
}

#[derive(Debug, Clone)]
struct ImageExtractor {
    selector: Selector,
    attribute: String,
    max_per_page: usize,
}

/// Compiled extraction rules
///
/// Built once per run; selectors are parsed up front so a bad selector is a
/// configuration error rather than a per-page failure.
#[derive(Debug, Clone)]
pub struct Extractor {
    link_selector: Selector,
    next_page_selector: Option<Selector>,
    item_selector: Option<Selector>,
    fields: Vec<FieldExtractor>,
    images: Option<ImageExtractor>,
}

impl Extractor {
    /// Compiles the extraction rules
    ///
    /// # Arguments
    ///
    /// * `config` - The extract section of the configuration
    ///
    /// # Returns
    ///
    /// * `Ok(Extractor)` - All selectors compiled
    /// * `Err(ConfigError)` - A selector failed to parse
    pub fn new(config: &ExtractConfig) -> Result<Self, ConfigError> {
        let fields = config
            .fields
            .iter()
            .map(compile_field)
            .collect::<Result<Vec<_>, _>>()?;

        let images = match &config.images {
            Some(rule) => Some(ImageExtractor {
                selector: compile_selector(&rule.selector)?,
                attribute: rule.attribute.clone(),
                max_per_page: rule.max_per_page,
            }),
            None => None,
        };

        Ok(Self {
            link_selector: compile_selector(&config.link_selector)?,
            next_page_selector: config
                .next_page_selector
                .as_deref()
                .map(compile_selector)
                .transpose()?,
            item_selector: config
                .item_selector
                .as_deref()
                .map(compile_selector)
                .transpose()?,
            fields,
            images,
        })
    }

    pub fn harvests_images(&self) -> bool {
        self.images.is_some()
    }

    /// Extracts records and frontier entries, treating malformed content as empty
    ///
    /// Failures are logged and yield an empty extraction.
    pub fn extract(&self, content: &[u8], source: &FrontierEntry) -> Extraction {
        match self.try_extract(content, source) {
            Ok(extraction) => extraction,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", source.url, e);
                Extraction::default()
            }
        }
    }

    /// Extracts records and frontier entries from page content
    ///
    /// Index pages yield zero records and one detail entry per matched link,
    /// plus an index entry for the next page when a pagination selector is
    /// configured. Detail pages yield records and no entries. New entries sit
    /// one level deeper than `source`.
    ///
    /// # Arguments
    ///
    /// * `content` - Raw response body
    /// * `source` - The frontier entry the content was fetched for
    ///
    /// # Returns
    ///
    /// * `Ok(Extraction)` - Extracted records and entries
    /// * `Err(ExtractError)` - Content is blank or undecodable, or the source URL is unusable
    pub fn try_extract(
        &self,
        content: &[u8],
        source: &FrontierEntry,
    ) -> Result<Extraction, ExtractError> {
        let text = decode_body(content, &source.url);
        if text.trim().is_empty() {
            return Err(ExtractError::Empty);
        }
        if !text.chars().any(is_text_char) {
            return Err(ExtractError::Undecodable);
        }

        let base = Url::parse(&source.url).map_err(|_| ExtractError::SourceUrl(source.url.clone()))?;
        let document = Html::parse_document(&text);

        let extraction = match source.label {
            PageLabel::Index => {
                self.extract_index(&document, &base, source.depth.saturating_add(1))
            }
            PageLabel::Detail => Extraction {
                records: self.detail_records(&document, &source.url),
                ..Extraction::default()
            },
        };

        Ok(extraction)
    }

    /// Lists absolute image URLs found on a page, up to the per-page limit
    ///
    /// Returns nothing when image harvesting is not configured or the content
    /// cannot be parsed.
    pub fn image_sources(&self, content: &[u8], source_url: &str) -> Vec<Url> {
        let Some(images) = &self.images else {
            return Vec::new();
        };
        let Ok(base) = Url::parse(source_url) else {
            return Vec::new();
        };

        let document = Html::parse_document(&decode_body(content, source_url));
        let mut seen = HashSet::new();

        document
            .select(&images.selector)
            .filter_map(|el| el.value().attr(&images.attribute))
            .filter_map(|src| resolve_link(src, &base).ok().flatten())
            .filter(|url| seen.insert(url.as_str().to_string()))
            .take(images.max_per_page)
            .collect()
    }

    fn extract_index(&self, document: &Html, base: &Url, depth: u32) -> Extraction {
        let mut extraction = Extraction::default();
        let mut seen = HashSet::new();

        // The next page goes first so a broad link selector cannot claim it as a detail page
        if let Some(next_selector) = &self.next_page_selector {
            let hrefs = document
                .select(next_selector)
                .filter_map(|el| el.value().attr("href"));

            for href in hrefs {
                match resolve_link(href, base) {
                    Ok(Some(url)) => {
                        seen.insert(url.as_str().to_string());
                        extraction
                            .entries
                            .push(FrontierEntry::new(url.as_str(), PageLabel::Index, depth));
                        break;
                    }
                    Ok(None) => {}
                    Err(_) => extraction.rejected_links.push(href.to_string()),
                }
            }
        }

        for href in document
            .select(&self.link_selector)
            .filter_map(|el| el.value().attr("href"))
        {
            match resolve_link(href, base) {
                Ok(Some(url)) => {
                    if seen.insert(url.as_str().to_string()) {
                        extraction
                            .entries
                            .push(FrontierEntry::new(url.as_str(), PageLabel::Detail, depth));
                    }
                }
                Ok(None) => {}
                Err(_) => extraction.rejected_links.push(href.to_string()),
            }
        }

        extraction
    }

    fn detail_records(&self, document: &Html, source_url: &str) -> Vec<Record> {
        match &self.item_selector {
            Some(item_selector) => document
                .select(item_selector)
                .map(|item| self.record_from(item, source_url))
                .collect(),
            None => vec![self.record_from(document.root_element(), source_url)],
        }
    }

    fn record_from(&self, scope: ElementRef<'_>, source_url: &str) -> Record {
        let mut record = Record::new(source_url);
        for field in &self.fields {
            record
                .fields
                .insert(field.name.clone(), read_field(scope, field));
        }
        record
    }
}

fn compile_field(rule: &FieldRule) -> Result<FieldExtractor, ConfigError> {
    Ok(FieldExtractor {
        name: rule.name.clone(),
        selector: compile_selector(&rule.selector)?,
        attribute: rule.attribute.clone(),
        multiple: rule.multiple,
        separator: rule.separator.clone(),
        number: rule.number,
    })
}

/// Reads one field inside `scope`; no match means null
fn read_field(scope: ElementRef<'_>, field: &FieldExtractor) -> FieldValue {
    let mut values = scope
        .select(&field.selector)
        .filter_map(|el| element_value(el, field.attribute.as_deref()))
        .filter(|v| !v.is_empty());

    let raw = if field.multiple {
        let all: Vec<String> = values.collect();
        if all.is_empty() {
            None
        } else {
            Some(all.join(&field.separator))
        }
    } else {
        values.next()
    };

    match raw {
        Some(text) if field.number => parse_number(&text).map_or(FieldValue::Null, FieldValue::Number),
        Some(text) => FieldValue::Text(text),
        None => FieldValue::Null,
    }
}

/// Attribute value, or the element's whitespace-collapsed text
fn element_value(element: ElementRef<'_>, attribute: Option<&str>) -> Option<String> {
    match attribute {
        Some(name) => element.value().attr(name).map(|v| v.trim().to_string()),
        None => {
            let text = element.text().collect::<Vec<_>>().join(" ");
            Some(text.split_whitespace().collect::<Vec<_>>().join(" "))
        }
    }
}

/// Parses the first number in display text
///
/// Thousands separators are dropped: `"$1,234"` is 1234, `"1.5 ba"` is 1.5.
/// Text without digits yields `None`.
/// Decodes a page body as UTF-8, replacing invalid sequences
///
/// Pages in legacy charsets keep their ASCII markup and most of their text,
/// so a stray byte costs one character instead of the whole page.
fn decode_body<'a>(content: &'a [u8], source_url: &str) -> Cow<'a, str> {
    match std::str::from_utf8(content) {
        Ok(text) => Cow::Borrowed(text),
        Err(e) => {
            tracing::debug!("{} is not valid UTF-8 ({}), decoding lossily", source_url, e);
            String::from_utf8_lossy(content)
        }
    }
}

fn is_text_char(c: char) -> bool {
    c != char::REPLACEMENT_CHARACTER && !c.is_control() && !c.is_whitespace()
}

pub fn parse_number(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let negative = text[..start].ends_with('-');

    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .filter(|c| *c != ',')
        .collect();
    let digits = digits.trim_end_matches('.');

    let value: f64 = digits.parse().ok()?;
    Some(if negative { -value } else { value })
}
