//! Microformats2 parsing.
//!
//! Produces owned, `Send` structures so nothing from the HTML tree is held
//! across an `.await`. Covers `h-*` roots, `p-`/`u-`/`dt-`/`e-` properties,
//! nested roots as property values, implied `name`/`photo`/`url`, and rel
//! links. The value-class pattern is not supported.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html};
use serde_json::{Map, Value};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Text(String),
    Html { html: String, value: String },
    Item(Mf2Item),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mf2Item {
    pub types: Vec<String>,
    pub properties: BTreeMap<String, Vec<PropertyValue>>,
    pub children: Vec<Mf2Item>,
    /// Plain value when this item is itself a property of its parent.
    pub value: Option<String>,
}

impl Mf2Item {
    pub fn has_type(&self, kind: &str) -> bool {
        self.types.iter().any(|t| t == kind)
    }

    /// First property value as plain text.
    pub fn text(&self, name: &str) -> Option<String> {
        self.properties.get(name)?.iter().find_map(|v| match v {
            PropertyValue::Text(s) => Some(s.clone()),
            PropertyValue::Html { value, .. } => Some(value.clone()),
            PropertyValue::Item(item) => item.value.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Alternate {
    pub url: String,
    pub kind: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Document {
    pub items: Vec<Mf2Item>,
    pub rels: BTreeMap<String, Vec<String>>,
    pub alternates: Vec<Alternate>,
    pub title: Option<String>,
}

impl Document {
    /// All items of the given type, searching nested children too.
    pub fn find_all(&self, kind: &str) -> Vec<&Mf2Item> {
        fn walk<'a>(items: &'a [Mf2Item], kind: &str, out: &mut Vec<&'a Mf2Item>) {
            for item in items {
                if item.has_type(kind) {
                    out.push(item);
                }
                walk(&item.children, kind, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.items, kind, &mut out);
        out
    }
}

pub fn parse(html: &str, base: &Url) -> Document {
    let dom = Html::parse_document(html);
    let root = dom.root_element();

    let base = root_base(root, base);
    let mut doc = Document::default();
    collect_roots(root, &base, &mut doc.items);
    collect_rels(root, &base, &mut doc);

    doc.title = root
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "title")
        .map(text_content)
        .filter(|t| !t.is_empty());

    doc
}

/// Honour `<base href>` when present.
fn root_base(root: ElementRef, fallback: &Url) -> Url {
    root.descendants()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "base")
        .and_then(|e| e.value().attr("href"))
        .and_then(|href| fallback.join(href).ok())
        .unwrap_or_else(|| fallback.clone())
}

fn collect_roots(el: ElementRef, base: &Url, out: &mut Vec<Mf2Item>) {
    for child in el.children().filter_map(ElementRef::wrap) {
        if root_types(child).is_empty() {
            collect_roots(child, base, out);
        } else {
            out.push(parse_item(child, base));
        }
    }
}

fn collect_rels(root: ElementRef, base: &Url, doc: &mut Document) {
    for el in root.descendants().filter_map(ElementRef::wrap) {
        let name = el.value().name();
        if name != "a" && name != "link" && name != "area" {
            continue;
        }
        let (Some(rel), Some(href)) = (el.value().attr("rel"), el.value().attr("href")) else {
            continue;
        };
        let url = resolve(base, href);
        for token in rel.split_ascii_whitespace() {
            let token = token.to_ascii_lowercase();
            let urls = doc.rels.entry(token.clone()).or_default();
            if !urls.contains(&url) {
                urls.push(url.clone());
            }
            if token == "alternate" {
                doc.alternates.push(Alternate {
                    url: url.clone(),
                    kind: el.value().attr("type").map(str::to_string),
                    title: el.value().attr("title").map(str::to_string),
                });
            }
        }
    }
}

fn root_types(el: ElementRef) -> Vec<String> {
    let mut types: Vec<String> = el
        .value()
        .classes()
        .filter(|c| is_mf2_class(c, "h-"))
        .map(str::to_string)
        .collect();
    types.sort();
    types.dedup();
    types
}

fn property_classes(el: ElementRef) -> Vec<(String, String)> {
    let mut props: Vec<(String, String)> = el
        .value()
        .classes()
        .filter_map(|c| {
            ["p-", "u-", "dt-", "e-"]
                .iter()
                .find(|prefix| is_mf2_class(c, prefix))
                .map(|prefix| (prefix.to_string(), c[prefix.len()..].to_string()))
        })
        .collect();
    props.dedup();
    props
}

fn is_mf2_class(class: &str, prefix: &str) -> bool {
    class
        .strip_prefix(prefix)
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'))
}

#[derive(Default)]
struct Seen {
    p_or_e: bool,
    u: bool,
    nested: bool,
}

fn parse_item(el: ElementRef, base: &Url) -> Mf2Item {
    let mut item = Mf2Item {
        types: root_types(el),
        ..Default::default()
    };
    let mut seen = Seen::default();
    walk_properties(el, base, &mut item, &mut seen);
    imply_properties(el, base, &mut item, &seen);
    item
}

fn walk_properties(el: ElementRef, base: &Url, item: &mut Mf2Item, seen: &mut Seen) {
    for child in el.children().filter_map(ElementRef::wrap) {
        let props = property_classes(child);
        let is_root = !root_types(child).is_empty();

        if is_root {
            let mut nested = parse_item(child, base);
            if props.is_empty() {
                item.children.push(nested);
                continue;
            }
            seen.nested = true;
            for (prefix, name) in props {
                nested.value = Some(match prefix.as_str() {
                    "u-" => nested
                        .text("url")
                        .unwrap_or_else(|| url_value(child, base)),
                    _ => nested.text("name").unwrap_or_else(|| text_content(child)),
                });
                mark_seen(&prefix, seen);
                item.properties
                    .entry(name)
                    .or_default()
                    .push(PropertyValue::Item(nested.clone()));
            }
            continue;
        }

        for (prefix, name) in &props {
            mark_seen(prefix, seen);
            let value = match prefix.as_str() {
                "p-" => PropertyValue::Text(plain_value(child)),
                "u-" => PropertyValue::Text(url_value(child, base)),
                "dt-" => PropertyValue::Text(datetime_value(child)),
                _ => PropertyValue::Html {
                    html: child.inner_html().trim().to_string(),
                    value: text_content(child),
                },
            };
            item.properties.entry(name.clone()).or_default().push(value);
        }

        walk_properties(child, base, item, seen);
    }
}

fn mark_seen(prefix: &str, seen: &mut Seen) {
    match prefix {
        "p-" | "e-" => seen.p_or_e = true,
        "u-" => seen.u = true,
        _ => {}
    }
}

fn imply_properties(el: ElementRef, base: &Url, item: &mut Mf2Item, seen: &Seen) {
    if !item.properties.contains_key("name") && !seen.p_or_e && !seen.nested {
        let name = match el.value().name() {
            "img" | "area" => el.value().attr("alt").map(str::to_string),
            "abbr" => el.value().attr("title").map(str::to_string),
            _ => None,
        }
        .unwrap_or_else(|| text_content(el));
        if !name.is_empty() {
            item.properties
                .insert("name".into(), vec![PropertyValue::Text(name)]);
        }
    }

    if !item.properties.contains_key("photo") && !seen.u {
        let photo = if el.value().name() == "img" {
            el.value().attr("src").map(|s| resolve(base, s))
        } else {
            only_child_attr(el, "img", "src").map(|s| resolve(base, &s))
        };
        if let Some(photo) = photo {
            item.properties
                .insert("photo".into(), vec![PropertyValue::Text(photo)]);
        }
    }

    if !item.properties.contains_key("url") && !seen.u {
        let url = if el.value().name() == "a" {
            el.value().attr("href").map(|s| resolve(base, s))
        } else {
            only_child_attr(el, "a", "href").map(|s| resolve(base, &s))
        };
        if let Some(url) = url {
            item.properties
                .insert("url".into(), vec![PropertyValue::Text(url)]);
        }
    }
}

/// Attribute of the sole element child when it has the given tag name.
fn only_child_attr(el: ElementRef, tag: &str, attr: &str) -> Option<String> {
    let mut children = el.children().filter_map(ElementRef::wrap);
    let only = children.next()?;
    if children.next().is_some() || only.value().name() != tag {
        return None;
    }
    if !root_types(only).is_empty() {
        return None;
    }
    only.value().attr(attr).map(str::to_string)
}

fn plain_value(el: ElementRef) -> String {
    let v = el.value();
    match v.name() {
        "abbr" | "link" => v.attr("title"),
        "data" | "input" => v.attr("value"),
        "img" | "area" => v.attr("alt"),
        _ => None,
    }
    .map(str::to_string)
    .unwrap_or_else(|| text_content(el))
}

fn url_value(el: ElementRef, base: &Url) -> String {
    let v = el.value();
    let attr = match v.name() {
        "a" | "area" | "link" => v.attr("href"),
        "img" | "audio" | "source" | "iframe" => v.attr("src"),
        "video" => v.attr("src").or_else(|| v.attr("poster")),
        "object" => v.attr("data"),
        _ => None,
    };
    if let Some(attr) = attr {
        return resolve(base, attr);
    }
    match v.name() {
        "abbr" => v.attr("title").map(str::to_string),
        "data" | "input" => v.attr("value").map(str::to_string),
        _ => None,
    }
    .unwrap_or_else(|| text_content(el))
}

fn datetime_value(el: ElementRef) -> String {
    let v = el.value();
    match v.name() {
        "time" | "ins" | "del" => v.attr("datetime"),
        "abbr" => v.attr("title"),
        "data" | "input" => v.attr("value"),
        _ => None,
    }
    .map(str::to_string)
    .unwrap_or_else(|| text_content(el))
}

fn text_content(el: ElementRef) -> String {
    let mut out = String::new();
    collect_text(el, &mut out);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_text(el: ElementRef, out: &mut String) {
    for node in el.children() {
        if let Some(text) = node.value().as_text() {
            out.push_str(text);
        } else if let Some(child) = ElementRef::wrap(node) {
            match child.value().name() {
                "script" | "style" | "template" => {}
                "img" => {
                    if let Some(alt) = child.value().attr("alt") {
                        out.push(' ');
                        out.push_str(alt);
                        out.push(' ');
                    }
                }
                "br" | "p" | "div" | "li" => {
                    out.push(' ');
                    collect_text(child, out);
                    out.push(' ');
                }
                _ => collect_text(child, out),
            }
        }
    }
}

pub fn resolve(base: &Url, href: &str) -> String {
    base.join(href.trim())
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Flatten an item into a jf2-like map: `type` without the `h-` prefix,
/// single values unwrapped, nested items simplified recursively.
pub fn simplify(item: &Mf2Item) -> Map<String, Value> {
    let mut map = Map::new();
    if let Some(kind) = item.types.first() {
        map.insert(
            "type".into(),
            Value::String(kind.trim_start_matches("h-").to_string()),
        );
    }
    for (name, values) in &item.properties {
        let mut simplified: Vec<Value> = values.iter().map(simplify_value).collect();
        let value = if simplified.len() == 1 {
            simplified.remove(0)
        } else {
            Value::Array(simplified)
        };
        map.insert(name.clone(), value);
    }
    if let Some(value) = &item.value {
        map.insert("value".into(), Value::String(value.clone()));
    }
    if !item.children.is_empty() {
        map.insert(
            "children".into(),
            Value::Array(
                item.children
                    .iter()
                    .map(|c| Value::Object(simplify(c)))
                    .collect(),
            ),
        );
    }
    map
}

fn simplify_value(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Text(s) => Value::String(s.clone()),
        PropertyValue::Html { html, value } => {
            let mut m = Map::new();
            m.insert("html".into(), Value::String(html.clone()));
            m.insert("text".into(), Value::String(value.clone()));
            Value::Object(m)
        }
        PropertyValue::Item(item) => Value::Object(simplify(item)),
    }
}
