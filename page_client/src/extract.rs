//! Content extraction from a rendered document

use crate::error::{Error, Result};
use crate::locator::{element_text, Locator};
use scraper::{Html, Selector};

/// Text pulled from a document by a locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Matched texts joined by newlines
    pub content: String,
    pub title: Option<String>,
    pub matched: usize,
}

/// Collapse every whitespace run to a single space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse `html` and extract the text selected by `locator`.
///
/// `selector` is only used for the error message.
pub fn extract(html: &str, locator: &Locator, selector: &str) -> Result<Extraction> {
    let doc = Html::parse_document(html);
    let texts = locator.select_text(&doc);

    if texts.is_empty() {
        return Err(Error::SelectorNotFound(selector.to_string()));
    }

    Ok(Extraction {
        content: texts.join("\n"),
        title: page_title(&doc),
        matched: texts.len(),
    })
}

fn page_title(doc: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    doc.select(&selector)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a\n\t b   c  "), "a b c");
        assert_eq!(normalize_whitespace(" \n "), "");
    }

    #[test]
    fn test_extract_joins_matches_and_reads_title() {
        let html = "<html><head><title> Board </title></head><body>\
                    <p>one</p><p>  two\n words </p><p>   </p></body></html>";
        let locator = Locator::parse("//p").unwrap();
        let extraction = extract(html, &locator, "//p").unwrap();

        assert_eq!(extraction.content, "one\ntwo words");
        assert_eq!(extraction.matched, 2);
        assert_eq!(extraction.title.as_deref(), Some("Board"));
    }

    #[test]
    fn test_extract_without_match_is_selector_not_found() {
        let locator = Locator::parse("//table").unwrap();
        let err = extract("<html><body><p>x</p></body></html>", &locator, "//table").unwrap_err();
        assert!(matches!(err, Error::SelectorNotFound(s) if s == "//table"));
    }

    #[test]
    fn test_whitespace_only_differences_extract_identically() {
        let locator = Locator::parse("//div").unwrap();
        let a = extract("<div>price:  10 </div>", &locator, "//div").unwrap();
        let b = extract("<div>\n price:\n10\n</div>", &locator, "//div").unwrap();
        assert_eq!(a.content, b.content);
    }
}
