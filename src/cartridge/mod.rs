//! Portable cartridge archive: export, import, manifest and QTI codecs.
//!
//! XML is read into a small node tree. Lookups match on local names, so
//! an element found under the expected namespace prefix is also found
//! unqualified; producers are inconsistent about qualifying these files
//! and an import must tolerate both.

pub mod export;
pub mod import;
pub mod manifest;
pub mod qti;

use std::collections::BTreeMap;
use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

pub const NS_IMSCC: &str = "http://www.imsglobal.org/xsd/imsccv1p1/imscp_v1p1";
pub const NS_QTI: &str = "http://www.imsglobal.org/xsd/ims_qtiasiv1p2";
pub const NS_CANVAS: &str = "http://canvas.instructure.com/xsd/cccv1p0";
pub const NS_WEBLINK: &str = "http://www.imsglobal.org/xsd/imsccv1p1/imswl_v1p1";

pub const TYPE_WEBCONTENT: &str = "webcontent";
pub const TYPE_LEARNING_APP: &str = "associatedcontent/imscc_xmlv1p1/learning-application-resource";
pub const TYPE_ASSESSMENT: &str = "imsqti_xmlv1p2/imscc_xmlv1p1/assessment";
pub const TYPE_QUESTION_BANK: &str = "imsqti_xmlv1p2/imscc_xmlv1p1/objectbank";
pub const TYPE_WEBLINK: &str = "imswl_xmlv1p1";
pub const TYPE_COURSE_SETTINGS: &str = "course_settings";

/// Metadata flag recording whether a quiz's questions were authored
/// inline or drawn from a bank. Third-party cartridges lack it and fall
/// back to structural heuristics.
pub const INLINE_QUESTIONS_FLAG: &str = "cartwright_inline_questions";

/// One `<resource>` from the manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEntry {
    pub identifier: String,
    pub resource_type: String,
    pub href: Option<String>,
    pub files: Vec<String>,
}

impl ResourceEntry {
    fn has_file_ending(&self, suffix: &str) -> bool {
        self.files.iter().any(|f| f.ends_with(suffix))
            || self.href.as_deref().map(|h| h.ends_with(suffix)).unwrap_or(false)
    }

    fn primary(&self) -> &str {
        self.href
            .as_deref()
            .or_else(|| self.files.first().map(String::as_str))
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Page,
    Assignment,
    Quiz,
    QuestionBank,
    Link,
    Asset,
    CourseSettings,
}

/// A typed classification rule: a declared-type or companion-file
/// predicate. Rules are tried in order; first match wins.
pub struct KindMatcher {
    pub name: &'static str,
    pub kind: ResourceKind,
    matches: fn(&ResourceEntry) -> bool,
}

pub const MATCHERS: &[KindMatcher] = &[
    KindMatcher {
        name: "course-settings",
        kind: ResourceKind::CourseSettings,
        matches: |e| {
            e.resource_type == TYPE_COURSE_SETTINGS
                || e.primary().starts_with("course_settings/")
        },
    },
    KindMatcher {
        name: "assignment-companion",
        kind: ResourceKind::Assignment,
        matches: |e| {
            e.resource_type.contains("assignment")
                || e.has_file_ending("assignment_settings.xml")
        },
    },
    KindMatcher {
        name: "question-bank",
        kind: ResourceKind::QuestionBank,
        matches: |e| e.resource_type.contains("objectbank"),
    },
    KindMatcher {
        name: "assessment",
        kind: ResourceKind::Quiz,
        matches: |e| {
            e.resource_type.contains("assessment") || e.resource_type.contains("imsqti")
        },
    },
    KindMatcher {
        name: "weblink",
        kind: ResourceKind::Link,
        matches: |e| e.resource_type.contains("imswl") || e.resource_type.contains("weblink"),
    },
    KindMatcher {
        name: "web-resource",
        kind: ResourceKind::Asset,
        matches: |e| e.primary().starts_with("web_resources/"),
    },
    KindMatcher {
        name: "webcontent-page",
        kind: ResourceKind::Page,
        matches: |e| {
            e.resource_type.contains(TYPE_WEBCONTENT)
                && (e.has_file_ending(".html") || e.has_file_ending(".htm"))
        },
    },
    KindMatcher {
        name: "webcontent-other",
        kind: ResourceKind::Asset,
        matches: |e| e.resource_type.contains(TYPE_WEBCONTENT),
    },
];

/// Classify a manifest resource. `None` means nothing claimed it and the
/// resource is skipped with a report entry.
pub fn classify(entry: &ResourceEntry) -> Option<(ResourceKind, &'static str)> {
    MATCHERS
        .iter()
        .find(|m| (m.matches)(entry))
        .map(|m| (m.kind, m.name))
}

/// Minimal XML node tree. Element names are stored as local names with
/// the namespace prefix stripped.
#[derive(Debug, Clone, Default)]
pub(crate) struct XmlNode {
    pub name: String,
    pub attrs: BTreeMap<String, String>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    pub fn child(&self, local: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == local)
    }

    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == local)
    }

    pub fn descendants<'a>(&'a self, local: &str, out: &mut Vec<&'a XmlNode>) {
        for child in &self.children {
            if child.name == local {
                out.push(child);
            }
            child.descendants(local, out);
        }
    }

    pub fn find<'a>(&'a self, local: &str) -> Option<&'a XmlNode> {
        let mut found = Vec::new();
        self.descendants(local, &mut found);
        found.into_iter().next()
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Own text plus descendant text, in document order.
    pub fn text_content(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.children {
            out.push_str(&child.text_content());
        }
        out
    }
}

fn local_name(qualified: &[u8]) -> String {
    let name = String::from_utf8_lossy(qualified);
    match name.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => name.into_owned(),
    }
}

/// Parse an XML document into a node tree.
pub(crate) fn parse_xml(xml: &str) -> Result<XmlNode, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut stack: Vec<XmlNode> = vec![XmlNode::default()];
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let mut node = XmlNode {
                    name: local_name(e.name().as_ref()),
                    ..Default::default()
                };
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| e.to_string())?;
                    node.attrs.insert(
                        local_name(attr.key.as_ref()),
                        attr.unescape_value().map_err(|e| e.to_string())?.into_owned(),
                    );
                }
                stack.push(node);
            }
            Ok(Event::Empty(e)) => {
                let mut node = XmlNode {
                    name: local_name(e.name().as_ref()),
                    ..Default::default()
                };
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| e.to_string())?;
                    node.attrs.insert(
                        local_name(attr.key.as_ref()),
                        attr.unescape_value().map_err(|e| e.to_string())?.into_owned(),
                    );
                }
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(node) = stack.last_mut() {
                    node.text
                        .push_str(&t.unescape().map_err(|e| e.to_string())?);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::End(_)) => {
                let node = stack.pop().ok_or("unbalanced end tag")?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Err("unbalanced end tag".to_string()),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
    }
    let mut root = stack.pop().ok_or("empty document")?;
    if !stack.is_empty() {
        return Err("unclosed elements at end of document".to_string());
    }
    match root.children.len() {
        1 => Ok(root.children.remove(0)),
        0 => Err("empty document".to_string()),
        _ => Err("multiple root elements".to_string()),
    }
}

/// Event-writer wrapper for building cartridge XML documents.
pub(crate) struct XmlBuilder {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl XmlBuilder {
    pub fn new() -> Self {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        // Errors writing to an in-memory cursor cannot occur.
        let _ = writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)));
        Self { writer }
    }

    pub fn open(&mut self, tag: &str, attrs: &[(&str, &str)]) {
        let mut start = BytesStart::new(tag);
        for (key, value) in attrs {
            start.push_attribute((*key, *value));
        }
        let _ = self.writer.write_event(Event::Start(start));
    }

    pub fn close(&mut self, tag: &str) {
        let _ = self.writer.write_event(Event::End(BytesEnd::new(tag)));
    }

    pub fn text(&mut self, text: &str) {
        let _ = self.writer.write_event(Event::Text(BytesText::new(text)));
    }

    pub fn leaf(&mut self, tag: &str, attrs: &[(&str, &str)], text: Option<&str>) {
        match text {
            Some(text) => {
                self.open(tag, attrs);
                self.text(text);
                self.close(tag);
            }
            None => {
                let mut start = BytesStart::new(tag);
                for (key, value) in attrs {
                    start.push_attribute((*key, *value));
                }
                let _ = self.writer.write_event(Event::Empty(start));
            }
        }
    }

    pub fn finish(self) -> String {
        let bytes = self.writer.into_inner().into_inner();
        let mut out = String::from_utf8(bytes).unwrap_or_default();
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_ordered_assignment_before_webcontent() {
        let entry = ResourceEntry {
            identifier: "a1".into(),
            resource_type: TYPE_LEARNING_APP.into(),
            href: Some("a1/essay.html".into()),
            files: vec!["a1/essay.html".into(), "a1/assignment_settings.xml".into()],
        };
        let (kind, matcher) = classify(&entry).unwrap();
        assert_eq!(kind, ResourceKind::Assignment);
        assert_eq!(matcher, "assignment-companion");
    }

    #[test]
    fn webcontent_under_web_resources_is_an_asset() {
        let entry = ResourceEntry {
            identifier: "f1".into(),
            resource_type: TYPE_WEBCONTENT.into(),
            href: Some("web_resources/assets/logo.png".into()),
            files: vec!["web_resources/assets/logo.png".into()],
        };
        assert_eq!(classify(&entry).unwrap().0, ResourceKind::Asset);
    }

    #[test]
    fn html_webcontent_is_a_page() {
        let entry = ResourceEntry {
            identifier: "p1".into(),
            resource_type: TYPE_WEBCONTENT.into(),
            href: Some("wiki_content/welcome.html".into()),
            files: vec!["wiki_content/welcome.html".into()],
        };
        assert_eq!(classify(&entry).unwrap().0, ResourceKind::Page);
    }

    #[test]
    fn node_lookup_ignores_namespace_prefixes() {
        let xml = r#"<?xml version="1.0"?>
            <a:root xmlns:a="urn:x"><a:child key="v">text</a:child><plain/></a:root>"#;
        let root = parse_xml(xml).unwrap();
        assert_eq!(root.name, "root");
        let child = root.child("child").unwrap();
        assert_eq!(child.attr("key"), Some("v"));
        assert_eq!(child.text_content(), "text");
        assert!(root.child("plain").is_some());
    }

    #[test]
    fn builder_escapes_text() {
        let mut builder = XmlBuilder::new();
        builder.leaf("title", &[], Some("Fish & Chips <b>"));
        let xml = builder.finish();
        assert!(xml.contains("Fish &amp; Chips &lt;b&gt;"));
    }
}
