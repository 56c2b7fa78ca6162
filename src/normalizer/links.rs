use std::sync::LazyLock;

use regex::{Captures, Regex};
use scraper::Html;
use url::Url;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(a|img)\b[^>]*>").expect("valid tag regex"));

static HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)(\shref\s*=\s*)(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).expect("valid href regex")
});

static SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)(\ssrc\s*=\s*)(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).expect("valid src regex")
});

/// Rewrite `a[href]` and `img[src]` to absolute URLs against `base`.
/// All other bytes of the markup are left as they were.
pub fn absolutize(html: &str, base: &Url) -> String {
    TAG_RE
        .replace_all(html, |tag: &Captures| {
            let attr = if tag[1].eq_ignore_ascii_case("a") {
                &*HREF_RE
            } else {
                &*SRC_RE
            };
            attr.replace(&tag[0], |c: &Captures| rewrite_attr(c, base))
                .into_owned()
        })
        .into_owned()
}

fn rewrite_attr(c: &Captures, base: &Url) -> String {
    let (value, quote) = if let Some(v) = c.get(2) {
        (v.as_str(), "\"")
    } else if let Some(v) = c.get(3) {
        (v.as_str(), "'")
    } else {
        (c.get(4).map(|m| m.as_str()).unwrap_or(""), "")
    };

    let resolved = if value.is_empty() || value.starts_with('#') {
        value.to_string()
    } else {
        let decoded = html_escape::decode_html_entities(value);
        match base.join(&decoded) {
            Ok(u) => html_escape::encode_double_quoted_attribute(u.as_str()).into_owned(),
            Err(_) => value.to_string(),
        }
    };

    format!("{}{}{}{}", &c[1], quote, resolved, quote)
}

/// Visible text of an HTML fragment.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
