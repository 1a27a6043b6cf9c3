//! Bidirectional markup normalizer.
//!
//! Forward: author markdown -> platform HTML. Markdown templates are
//! concatenated around the body and converted in a single comrak pass,
//! then wrapped with raw HTML fragments. The single pass is load-bearing:
//! tags opened in the header markdown may close in the footer, and
//! converting the fragments separately would break that balance.
//!
//! Reverse: platform HTML -> author markdown, in the spirit of a staged
//! regex converter. Platform wrapper elements and template fragments are
//! stripped first (ordered strategies, explicit no-match terminal), then
//! tags are lowered to markdown, `[code]` shortcodes become fences, and
//! list nesting is written at 4 spaces per level.
//!
//! The markdown renderer requires 4 spaces per list nesting level; a
//! sub-item indented by only 2 spaces does not nest. Forward conversion
//! quantises list indentation down to whole levels so the behaviour is
//! consistent rather than renderer-dependent.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use regex::Regex;
use tracing::debug;

/// Markdown and raw-HTML fragments wrapped around every rendered body.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    pub header_md: String,
    pub footer_md: String,
    pub header_html: String,
    pub footer_html: String,
}

impl TemplateSet {
    /// Load `templates/<name>/{header,footer}.{md,html}`. Missing files
    /// are empty fragments; a missing directory is the empty set.
    pub fn load(course_root: &Path, name: &str) -> Self {
        let dir = course_root.join("templates").join(name);
        let read = |file: &str| fs::read_to_string(dir.join(file)).unwrap_or_default();
        Self {
            header_md: read("header.md"),
            footer_md: read("footer.md"),
            header_html: read("header.html"),
            footer_html: read("footer.html"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.header_md.is_empty()
            && self.footer_md.is_empty()
            && self.header_html.is_empty()
            && self.footer_html.is_empty()
    }
}

/// Collaborator supplying `{{include:name}}` bodies and `{{name}}`
/// variable values. Unresolvable placeholders are left in place.
pub trait PlaceholderSource {
    fn include(&self, name: &str) -> Option<String>;
    fn variable(&self, name: &str) -> Option<String>;
}

/// No shared content configured.
pub struct NoPlaceholders;

impl PlaceholderSource for NoPlaceholders {
    fn include(&self, _name: &str) -> Option<String> {
        None
    }
    fn variable(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Placeholders backed by the course `shared/` directory: includes from
/// `shared/<name>.md`, variables from `shared/variables.yaml`.
pub struct SharedDirPlaceholders {
    dir: std::path::PathBuf,
    variables: BTreeMap<String, String>,
}

impl SharedDirPlaceholders {
    pub fn load(course_root: &Path) -> Self {
        let dir = course_root.join("shared");
        let variables = fs::read_to_string(dir.join("variables.yaml"))
            .ok()
            .and_then(|text| serde_yaml::from_str::<BTreeMap<String, String>>(&text).ok())
            .unwrap_or_default();
        Self { dir, variables }
    }
}

impl PlaceholderSource for SharedDirPlaceholders {
    fn include(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.dir.join(format!("{name}.md"))).ok()
    }
    fn variable(&self, name: &str) -> Option<String> {
        self.variables.get(name).cloned()
    }
}

/// Collect local asset references from markdown image/link syntax.
/// Absolute URLs, anchors and mail links are not asset references.
pub fn collect_asset_refs(markdown: &str) -> Vec<String> {
    let link = Regex::new(r"!?\[[^\]]*\]\(([^)\s]+)\)").unwrap();
    let mut refs = Vec::new();
    for caps in link.captures_iter(markdown) {
        let target = &caps[1];
        if is_local_ref(target) && !refs.iter().any(|r| r == target) {
            refs.push(target.to_string());
        }
    }
    refs
}

fn is_local_ref(target: &str) -> bool {
    !(target.starts_with("http://")
        || target.starts_with("https://")
        || target.starts_with("mailto:")
        || target.starts_with('#')
        || target.starts_with("data:"))
}

/// Replace local asset references with their remote URLs. References with
/// no entry in `urls` are left untouched and reported as warnings.
pub fn rewrite_asset_refs(
    markdown: &str,
    urls: &BTreeMap<String, String>,
    warnings: &mut Vec<String>,
) -> String {
    let link = Regex::new(r"(!?\[[^\]]*\]\()([^)\s]+)(\))").unwrap();
    link.replace_all(markdown, |caps: &regex::Captures| {
        let target = &caps[2];
        if !is_local_ref(target) {
            return caps[0].to_string();
        }
        match urls.get(target) {
            Some(url) => format!("{}{}{}", &caps[1], url, &caps[3]),
            None => {
                warnings.push(format!("unresolved asset reference `{target}`"));
                caps[0].to_string()
            }
        }
    })
    .to_string()
}

/// Resolve `{{include:name}}` and `{{name}}` placeholders.
pub fn resolve_placeholders(
    markdown: &str,
    source: &dyn PlaceholderSource,
    warnings: &mut Vec<String>,
) -> String {
    let placeholder = Regex::new(r"\{\{\s*([A-Za-z0-9_:.-]+)\s*\}\}").unwrap();
    placeholder
        .replace_all(markdown, |caps: &regex::Captures| {
            let name = &caps[1];
            // Rubric row placeholders are resolved by the rubric layer.
            if let Some(stripped) = name.strip_prefix("include:") {
                match source.include(stripped) {
                    Some(body) => body,
                    None => {
                        warnings.push(format!("unresolved include `{stripped}`"));
                        caps[0].to_string()
                    }
                }
            } else if name.starts_with("rubric_row:") {
                caps[0].to_string()
            } else {
                match source.variable(name) {
                    Some(value) => value,
                    None => {
                        warnings.push(format!("unresolved variable `{name}`"));
                        caps[0].to_string()
                    }
                }
            }
        })
        .to_string()
}

fn comrak_options() -> comrak::Options<'static> {
    let mut options = comrak::Options::default();
    options.extension.table = true;
    options.extension.strikethrough = true;
    options.extension.autolink = true;
    options.render.unsafe_ = true;
    options
}

/// Forward conversion: one comrak pass over header-md + body + footer-md,
/// wrapped in the raw HTML fragments.
pub fn markdown_to_platform_html(body_md: &str, templates: &TemplateSet) -> String {
    let mut combined = String::new();
    if !templates.header_md.is_empty() {
        combined.push_str(templates.header_md.trim_end());
        combined.push_str("\n\n");
    }
    combined.push_str(&quantise_list_indent(body_md));
    if !templates.footer_md.is_empty() {
        combined.push_str("\n\n");
        combined.push_str(templates.footer_md.trim_start());
    }
    let converted = comrak::markdown_to_html(&combined, &comrak_options());
    let mut html = String::new();
    html.push_str(&templates.header_html);
    html.push_str(&converted);
    html.push_str(&templates.footer_html);
    html
}

/// Quantise list-item indentation down to whole 4-space levels, leaving
/// fenced code blocks alone. A 2-space indent is level zero: it does not
/// nest, and this pass makes that explicit instead of renderer-dependent.
fn quantise_list_indent(markdown: &str) -> String {
    let marker = Regex::new(r"^( *)([-*+]|\d+[.)])( +)(.*)$").unwrap();
    let mut in_fence = false;
    let mut out = Vec::new();
    for line in markdown.lines() {
        if line.trim_start().starts_with("```") || line.trim_start().starts_with("~~~") {
            in_fence = !in_fence;
            out.push(line.to_string());
            continue;
        }
        if in_fence {
            out.push(line.to_string());
            continue;
        }
        if let Some(caps) = marker.captures(line) {
            let level = caps[1].len() / 4;
            out.push(format!(
                "{}{}{}{}",
                " ".repeat(level * 4),
                &caps[2],
                &caps[3],
                &caps[4]
            ));
        } else {
            out.push(line.to_string());
        }
    }
    let mut joined = out.join("\n");
    if markdown.ends_with('\n') {
        joined.push('\n');
    }
    joined
}

/// Which template-stripping strategy matched, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripStrategy {
    Exact,
    WhitespaceNormalised,
    NoMatch,
}

/// Remove template header/footer fragments from platform HTML. Strategies
/// are tried in order; when none matches, the HTML is returned unchanged.
pub fn strip_templates(html: &str, templates: &TemplateSet) -> (String, StripStrategy) {
    let mut body = html.to_string();
    let mut strategy = StripStrategy::NoMatch;

    for fragment in [&templates.header_html, &templates.header_md] {
        if fragment.trim().is_empty() {
            continue;
        }
        if let Some((rest, used)) = strip_prefix_fragment(&body, fragment) {
            body = rest;
            strategy = used;
            break;
        }
    }
    for fragment in [&templates.footer_html, &templates.footer_md] {
        if fragment.trim().is_empty() {
            continue;
        }
        if let Some((rest, used)) = strip_suffix_fragment(&body, fragment) {
            body = rest;
            if strategy == StripStrategy::NoMatch {
                strategy = used;
            }
            break;
        }
    }
    debug!(?strategy, "template stripping");
    (body, strategy)
}

fn strip_prefix_fragment(html: &str, fragment: &str) -> Option<(String, StripStrategy)> {
    let trimmed = html.trim_start();
    if trimmed.starts_with(fragment.trim()) {
        return Some((
            trimmed[fragment.trim().len()..].to_string(),
            StripStrategy::Exact,
        ));
    }
    // Whitespace-insensitive: match the fragment's non-whitespace stream
    // at the front of the document, then cut at the matching offset.
    let wanted: String = fragment.chars().filter(|c| !c.is_whitespace()).collect();
    if wanted.is_empty() {
        return None;
    }
    let mut seen = String::with_capacity(wanted.len());
    for (idx, ch) in html.char_indices() {
        if !ch.is_whitespace() {
            seen.push(ch);
            if !wanted.starts_with(&seen) {
                return None;
            }
            if seen.len() == wanted.len() {
                return Some((
                    html[idx + ch.len_utf8()..].to_string(),
                    StripStrategy::WhitespaceNormalised,
                ));
            }
        }
    }
    None
}

fn strip_suffix_fragment(html: &str, fragment: &str) -> Option<(String, StripStrategy)> {
    let trimmed = html.trim_end();
    if trimmed.ends_with(fragment.trim()) {
        return Some((
            trimmed[..trimmed.len() - fragment.trim().len()].to_string(),
            StripStrategy::Exact,
        ));
    }
    let wanted: String = fragment.chars().filter(|c| !c.is_whitespace()).collect();
    if wanted.is_empty() {
        return None;
    }
    let mut seen = String::with_capacity(wanted.len());
    for (idx, ch) in html.char_indices().rev() {
        if !ch.is_whitespace() {
            seen.insert(0, ch);
            if !wanted.ends_with(&seen) {
                return None;
            }
            if seen.len() == wanted.len() {
                return Some((html[..idx].to_string(), StripStrategy::WhitespaceNormalised));
            }
        }
    }
    None
}

/// Unwrap platform wrapper elements the LMS adds around stored bodies.
pub fn strip_platform_wrappers(html: &str) -> String {
    let wrapper = Regex::new(
        r#"(?is)^\s*<div[^>]*class="[^"]*(user_content|show-content)[^"]*"[^>]*>(.*)</div>\s*$"#,
    )
    .unwrap();
    match wrapper.captures(html) {
        Some(caps) => caps[2].trim().to_string(),
        None => html.trim().to_string(),
    }
}

/// A media reference found in platform HTML.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: String,
    pub alt_text: Option<String>,
    pub remote_file_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Iframe,
    FileLink,
}

/// Extract media references (images, av sources, iframes, file links)
/// from platform HTML, parsing remote file ids out of `/files/<id>` URLs.
pub fn extract_media_references(html: &str) -> Vec<MediaRef> {
    let file_id = Regex::new(r"/files/(\d+)").unwrap();
    let parse_id = |url: &str| {
        file_id
            .captures(url)
            .and_then(|c| c[1].parse::<i64>().ok())
    };
    let mut refs = Vec::new();

    let img = Regex::new(r#"(?is)<img[^>]*src="([^"]+)"[^>]*>"#).unwrap();
    let alt = Regex::new(r#"(?is)alt="([^"]*)""#).unwrap();
    for caps in img.captures_iter(html) {
        let tag = &caps[0];
        refs.push(MediaRef {
            kind: MediaKind::Image,
            url: caps[1].to_string(),
            alt_text: alt.captures(tag).map(|a| a[1].to_string()),
            remote_file_id: parse_id(&caps[1]),
        });
    }
    for (kind, pattern) in [
        (MediaKind::Video, r#"(?is)<video[^>]*>.*?src="([^"]+)""#),
        (MediaKind::Audio, r#"(?is)<audio[^>]*>.*?src="([^"]+)""#),
        (MediaKind::Iframe, r#"(?is)<iframe[^>]*src="([^"]+)""#),
    ] {
        let re = Regex::new(pattern).unwrap();
        for caps in re.captures_iter(html) {
            refs.push(MediaRef {
                kind,
                url: caps[1].to_string(),
                alt_text: None,
                remote_file_id: parse_id(&caps[1]),
            });
        }
    }
    let link = Regex::new(r#"(?is)<a[^>]*href="([^"]*/files/\d+[^"]*)"[^>]*>"#).unwrap();
    for caps in link.captures_iter(html) {
        refs.push(MediaRef {
            kind: MediaKind::FileLink,
            url: caps[1].to_string(),
            alt_text: None,
            remote_file_id: parse_id(&caps[1]),
        });
    }
    refs
}

/// Rewrite remote `/files/<id>` URLs in markdown back to local paths via
/// the supplied lookup (normally the asset registry). Unknown ids are
/// left as remote URLs; nothing is invented.
pub fn rewrite_remote_file_links(
    markdown: &str,
    lookup: &dyn Fn(i64) -> Option<String>,
) -> String {
    let link = Regex::new(r"(!?\[[^\]]*\]\()([^)\s]*/files/(\d+)[^)\s]*)(\))").unwrap();
    link.replace_all(markdown, |caps: &regex::Captures| {
        match caps[3].parse::<i64>().ok().and_then(|id| lookup(id)) {
            Some(local) => format!("{}{}{}", &caps[1], local, &caps[4]),
            None => caps[0].to_string(),
        }
    })
    .to_string()
}

/// Reverse conversion: platform HTML to author markdown.
pub fn platform_html_to_markdown(html: &str) -> String {
    let mut text = strip_platform_wrappers(html);
    text = text.replace("\r\n", "\n");
    text = Regex::new(r"(?s)<!--.*?-->")
        .unwrap()
        .replace_all(&text, "")
        .to_string();

    text = convert_code_blocks(&text);
    text = convert_lists(&text);

    for i in (1..=6usize).rev() {
        let re = Regex::new(&format!(r"(?is)<h{i}[^>]*>(.*?)</h{i}>")).unwrap();
        let hashes = "#".repeat(i);
        text = re
            .replace_all(&text, |caps: &regex::Captures| {
                format!("\n{} {}\n", hashes, caps[1].trim())
            })
            .to_string();
    }

    text = Regex::new(r"(?is)<blockquote[^>]*>(.*?)</blockquote>")
        .unwrap()
        .replace_all(&text, |caps: &regex::Captures| {
            let inner = caps[1].trim();
            let quoted: Vec<String> = inner.lines().map(|l| format!("> {}", l.trim())).collect();
            format!("\n{}\n", quoted.join("\n"))
        })
        .to_string();

    for (pattern, open, close) in [
        (r"(?is)<(strong|b)[^>]*>(.*?)</(strong|b)>", "**", "**"),
        (r"(?is)<(em|i)[^>]*>(.*?)</(em|i)>", "*", "*"),
        (r"(?is)<code[^>]*>(.*?)</code>", "`", "`"),
    ] {
        let re = Regex::new(pattern).unwrap();
        text = re
            .replace_all(&text, |caps: &regex::Captures| {
                format!("{}{}{}", open, &caps[2], close)
            })
            .to_string();
    }

    let img = Regex::new(r#"(?is)<img[^>]*src="([^"]+)"[^>]*>"#).unwrap();
    let alt = Regex::new(r#"(?is)alt="([^"]*)""#).unwrap();
    text = img
        .replace_all(&text, |caps: &regex::Captures| {
            let alt_text = alt
                .captures(&caps[0])
                .map(|a| a[1].to_string())
                .unwrap_or_default();
            format!("![{}]({})", alt_text, &caps[1])
        })
        .to_string();

    let anchor = Regex::new(r#"(?is)<a[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#).unwrap();
    text = anchor
        .replace_all(&text, |caps: &regex::Captures| {
            format!("[{}]({})", caps[2].trim(), &caps[1])
        })
        .to_string();

    text = Regex::new(r"(?i)<br\s*/?>")
        .unwrap()
        .replace_all(&text, "\n")
        .to_string();
    text = Regex::new(r"(?i)</?p[^>]*>")
        .unwrap()
        .replace_all(&text, "\n\n")
        .to_string();
    text = Regex::new(r"(?i)</?(div|span|section|article)[^>]*>")
        .unwrap()
        .replace_all(&text, "\n")
        .to_string();

    // Anything left is noise.
    text = Regex::new(r"<[^>]+>")
        .unwrap()
        .replace_all(&text, "")
        .to_string();

    text = unescape_entities(&text);
    text = Regex::new(r"\n{3,}")
        .unwrap()
        .replace_all(&text, "\n\n")
        .to_string();
    text.trim().to_string()
}

/// `<pre><code>` blocks and `[code]…[/code]` shortcodes become fenced
/// markdown blocks with their content de-escaped verbatim.
fn convert_code_blocks(html: &str) -> String {
    let pre = Regex::new(r"(?is)<pre[^>]*>\s*(?:<code[^>]*>)?(.*?)(?:</code>)?\s*</pre>").unwrap();
    let mut text = pre
        .replace_all(html, |caps: &regex::Captures| {
            let inner = unescape_entities(&strip_tags(&caps[1]));
            format!("\n```\n{}\n```\n", inner.trim_matches('\n'))
        })
        .to_string();
    let shortcode = Regex::new(r"(?is)\[code\](.*?)\[/code\]").unwrap();
    text = shortcode
        .replace_all(&text, |caps: &regex::Captures| {
            let inner = unescape_entities(&strip_tags(&caps[1]));
            format!("\n```\n{}\n```\n", inner.trim_matches('\n'))
        })
        .to_string();
    text
}

/// Lower ul/ol/li structure to markdown with 4 spaces per nesting level.
fn convert_lists(html: &str) -> String {
    let token = Regex::new(r"(?is)<(/?)(ul|ol|li)[^>]*>").unwrap();
    if !token.is_match(html) {
        return html.to_string();
    }

    struct Frame {
        ordered: bool,
        counter: usize,
    }

    let mut out = String::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut item_buf = String::new();
    let mut in_item = false;
    let mut last = 0;

    let flush_item = |stack: &mut Vec<Frame>, item_buf: &mut String, out: &mut String| {
        if item_buf.trim().is_empty() {
            item_buf.clear();
            return;
        }
        let depth = stack.len().saturating_sub(1);
        let indent = " ".repeat(depth * 4);
        let marker = match stack.last_mut() {
            Some(frame) if frame.ordered => {
                frame.counter += 1;
                format!("{}. ", frame.counter)
            }
            _ => "- ".to_string(),
        };
        out.push_str(&format!("{}{}{}\n", indent, marker, item_buf.trim()));
        item_buf.clear();
    };

    for m in token.find_iter(html) {
        let segment = &html[last..m.start()];
        if in_item {
            item_buf.push_str(segment);
        } else if stack.is_empty() {
            out.push_str(segment);
        }
        last = m.end();

        let caps = token.captures(m.as_str()).unwrap();
        let closing = &caps[1] == "/";
        let tag = caps[2].to_ascii_lowercase();
        match (tag.as_str(), closing) {
            ("ul", false) | ("ol", false) => {
                if in_item {
                    // The item text before a nested list is its own line.
                    flush_item(&mut stack, &mut item_buf, &mut out);
                    in_item = false;
                }
                if stack.is_empty() {
                    out.push('\n');
                }
                stack.push(Frame {
                    ordered: tag == "ol",
                    counter: 0,
                });
            }
            ("ul", true) | ("ol", true) => {
                if in_item {
                    flush_item(&mut stack, &mut item_buf, &mut out);
                    in_item = false;
                }
                stack.pop();
                if stack.is_empty() {
                    out.push('\n');
                }
            }
            ("li", false) => {
                if in_item {
                    flush_item(&mut stack, &mut item_buf, &mut out);
                }
                in_item = true;
            }
            ("li", true) => {
                if in_item {
                    flush_item(&mut stack, &mut item_buf, &mut out);
                    in_item = false;
                }
            }
            _ => {}
        }
    }
    out.push_str(&html[last..]);
    out
}

fn strip_tags(html: &str) -> String {
    Regex::new(r"<[^>]+>")
        .unwrap()
        .replace_all(html, "")
        .to_string()
}

fn unescape_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_conversion_is_single_pass_across_fragments() {
        let templates = TemplateSet {
            header_md: "<div class=\"banner\">".into(),
            footer_md: "</div>".into(),
            header_html: "<div class=\"outer\">".into(),
            footer_html: "</div>".into(),
        };
        let html = markdown_to_platform_html("# Welcome\n\nBody text.", &templates);
        assert!(html.starts_with("<div class=\"outer\">"));
        assert!(html.ends_with("</div>"));
        assert!(html.contains("<div class=\"banner\">"));
        assert!(html.contains("<h1>Welcome</h1>"));
    }

    #[test]
    fn four_space_indent_nests_two_space_does_not() {
        let templates = TemplateSet::default();
        let nested = markdown_to_platform_html("- parent\n    - child\n", &templates);
        assert!(nested.matches("<ul>").count() >= 2, "html: {nested}");

        let flat = markdown_to_platform_html("- parent\n  - child\n", &templates);
        assert_eq!(flat.matches("<ul>").count(), 1, "html: {flat}");
    }

    #[test]
    fn reverse_converts_nested_lists_to_four_spaces() {
        let html = "<ul><li>parent<ul><li>child</li></ul></li><li>second</li></ul>";
        let md = platform_html_to_markdown(html);
        assert!(md.contains("- parent"), "md: {md}");
        assert!(md.contains("    - child"), "md: {md}");
        assert!(md.contains("- second"), "md: {md}");
    }

    #[test]
    fn ordered_lists_are_numbered() {
        let html = "<ol><li>first</li><li>second</li></ol>";
        let md = platform_html_to_markdown(html);
        assert!(md.contains("1. first"));
        assert!(md.contains("2. second"));
    }

    #[test]
    fn code_shortcode_becomes_fence() {
        let md = platform_html_to_markdown("[code]let x = 1;[/code]");
        assert!(md.contains("```\nlet x = 1;\n```"), "md: {md}");
    }

    #[test]
    fn pre_block_unescapes_entities() {
        let md = platform_html_to_markdown("<pre><code>a &lt; b &amp;&amp; c</code></pre>");
        assert!(md.contains("a < b && c"), "md: {md}");
    }

    #[test]
    fn wrapper_div_is_unwrapped() {
        let html = r#"<div class="user_content enhanced"><p>Hello</p></div>"#;
        assert_eq!(platform_html_to_markdown(html), "Hello");
    }

    #[test]
    fn template_strip_falls_through_to_no_match() {
        let templates = TemplateSet {
            header_html: "<div class=\"banner\">Welcome</div>".into(),
            ..Default::default()
        };
        let (out, strategy) = strip_templates("<p>No banner here</p>", &templates);
        assert_eq!(strategy, StripStrategy::NoMatch);
        assert_eq!(out, "<p>No banner here</p>");
    }

    #[test]
    fn template_strip_tolerates_whitespace_differences() {
        let templates = TemplateSet {
            header_html: "<div class=\"banner\">\n  Welcome\n</div>".into(),
            ..Default::default()
        };
        let html = "<div class=\"banner\"> Welcome </div><p>Body</p>";
        let (out, strategy) = strip_templates(html, &templates);
        assert_eq!(strategy, StripStrategy::WhitespaceNormalised);
        assert_eq!(out.trim(), "<p>Body</p>");
    }

    #[test]
    fn media_references_parse_remote_file_ids() {
        let html = r#"<img src="https://lms.example.com/courses/1/files/4242/preview" alt="diagram">
            <a href="/courses/1/files/7/download">handout</a>"#;
        let refs = extract_media_references(html);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].kind, MediaKind::Image);
        assert_eq!(refs[0].remote_file_id, Some(4242));
        assert_eq!(refs[0].alt_text.as_deref(), Some("diagram"));
        assert_eq!(refs[1].kind, MediaKind::FileLink);
        assert_eq!(refs[1].remote_file_id, Some(7));
    }

    #[test]
    fn remote_file_links_rewrite_to_local_paths() {
        let lookup = |id: i64| {
            (id == 42).then(|| "assets/images/diagram.png".to_string())
        };
        let md = "![diagram](https://lms.example.com/files/42/preview) and ![other](/files/9)";
        let out = rewrite_remote_file_links(md, &lookup);
        assert!(out.contains("![diagram](assets/images/diagram.png)"));
        assert!(out.contains("![other](/files/9)"));
    }

    #[test]
    fn asset_refs_skip_absolute_urls() {
        let refs =
            collect_asset_refs("![a](../../assets/a.png) [b](https://example.com/b) [c](notes.pdf)");
        assert_eq!(refs, vec!["../../assets/a.png".to_string(), "notes.pdf".to_string()]);
    }

    #[test]
    fn unresolved_asset_refs_warn_and_stay() {
        let mut warnings = Vec::new();
        let urls = BTreeMap::new();
        let out = rewrite_asset_refs("![a](missing.png)", &urls, &mut warnings);
        assert_eq!(out, "![a](missing.png)");
        assert_eq!(warnings.len(), 1);
    }
}
