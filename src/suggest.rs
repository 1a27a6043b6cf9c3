//! Suggest-only analysis of repeated prose across pages and assignments.
//!
//! Scans authored markdown bodies for paragraph blocks that appear
//! verbatim in multiple files and reports candidates worth extracting
//! into `shared/<slug>.md` behind an `{{include:<slug>}}` placeholder.
//! Never modifies any file.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::info;

use crate::fingerprint;
use crate::model::slugify;
use crate::source::split_frontmatter;

/// A block this long must repeat across this many files to qualify.
const MIN_CHARS_LOW: usize = 200;
const MIN_FILES_LOW: usize = 3;
/// Longer blocks qualify with fewer copies.
const MIN_CHARS_HIGH: usize = 400;
const MIN_FILES_HIGH: usize = 2;

/// One repeated prose block worth extracting into a shared include.
#[derive(Debug, Clone)]
pub struct IncludeCandidate {
    pub slug: String,
    pub text: String,
    pub chars: usize,
    /// Paths relative to the course root, sorted.
    pub files: Vec<PathBuf>,
}

/// Find repeated prose blocks meeting the include thresholds.
///
/// Candidates are ordered most-impactful first: by file count, then by
/// block length.
pub fn suggest_shared_includes(course_root: &Path) -> std::io::Result<Vec<IncludeCandidate>> {
    let mut block_text: BTreeMap<String, String> = BTreeMap::new();
    let mut block_files: BTreeMap<String, BTreeSet<PathBuf>> = BTreeMap::new();

    for path in content_files(course_root)? {
        let raw = fs::read_to_string(&path)?;
        let (_, body) = split_frontmatter(&raw);
        let relative = path
            .strip_prefix(course_root)
            .unwrap_or(&path)
            .to_path_buf();
        for block in prose_blocks(body) {
            let key = fingerprint::digest12(block.as_bytes());
            block_files.entry(key.clone()).or_default().insert(relative.clone());
            block_text.entry(key).or_insert(block);
        }
    }

    let mut candidates: Vec<IncludeCandidate> = Vec::new();
    let mut taken: BTreeSet<String> = BTreeSet::new();
    for (key, files) in &block_files {
        let text = &block_text[key];
        let chars = text.chars().count();
        let copies = files.len();
        let qualifies = (chars >= MIN_CHARS_LOW && copies >= MIN_FILES_LOW)
            || (chars >= MIN_CHARS_HIGH && copies >= MIN_FILES_HIGH);
        if !qualifies {
            continue;
        }
        candidates.push(IncludeCandidate {
            slug: unique_slug(block_slug(text), &mut taken),
            text: text.clone(),
            chars,
            files: files.iter().cloned().collect(),
        });
    }

    candidates.sort_by(|a, b| {
        b.files
            .len()
            .cmp(&a.files.len())
            .then(b.chars.cmp(&a.chars))
    });
    info!(candidates = candidates.len(), "[SUGGEST] repeated-prose scan finished");
    Ok(candidates)
}

/// `index.md` files inside `.page` and `.assignment` folders.
fn content_files(course_root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let content = course_root.join("content");
    let mut files = Vec::new();
    if !content.is_dir() {
        return Ok(files);
    }
    collect_index_files(&content, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_index_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let suffix = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        if suffix == "page" || suffix == "assignment" {
            let index = path.join("index.md");
            if index.is_file() {
                out.push(index);
            }
        } else {
            collect_index_files(&path, out)?;
        }
    }
    Ok(())
}

/// Split a markdown body into paragraph blocks worth comparing: blank-line
/// separated, trailing whitespace stripped per line, skipping lone
/// headings and existing include references.
fn prose_blocks(body: &str) -> Vec<String> {
    let heading = Regex::new(r"^#{1,6}\s").unwrap();
    Regex::new(r"\n\s*\n")
        .unwrap()
        .split(body)
        .filter_map(|raw| {
            let block: String = raw
                .trim()
                .lines()
                .map(str::trim_end)
                .collect::<Vec<_>>()
                .join("\n");
            if block.is_empty() {
                return None;
            }
            if heading.is_match(&block) && !block.contains('\n') {
                return None;
            }
            if block.contains("{{include:") {
                return None;
            }
            Some(block)
        })
        .collect()
}

/// Slug from the first line of the block, markdown formatting stripped.
fn block_slug(text: &str) -> String {
    let first = text.lines().next().unwrap_or_default();
    let clean = Regex::new(r"[*_`#>\[\]()]")
        .unwrap()
        .replace_all(first, "");
    let mut slug = slugify(clean.trim());
    slug.truncate(40);
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "shared-block".to_string()
    } else {
        slug
    }
}

fn unique_slug(base: String, taken: &mut BTreeSet<String>) -> String {
    let mut slug = base.clone();
    let mut counter = 2;
    while taken.contains(&slug) {
        slug = format!("{base}-{counter}");
        counter += 1;
    }
    taken.insert(slug.clone());
    slug
}

/// Human-readable report for the CLI. Suggest-only; states that no files
/// were touched.
pub fn render_report(candidates: &[IncludeCandidate]) -> String {
    if candidates.is_empty() {
        return format!(
            "No repeated prose blocks found meeting the include threshold.\n\
             (Thresholds: {MIN_CHARS_LOW}+ chars in {MIN_FILES_LOW}+ files, \
             or {MIN_CHARS_HIGH}+ chars in {MIN_FILES_HIGH}+ files)\n"
        );
    }
    let mut out = format!("Shared include candidates ({} found):\n", candidates.len());
    for c in candidates {
        let mut preview: String = c.text.chars().take(120).collect::<String>().replace('\n', " ");
        if c.text.chars().count() > 120 {
            preview.push('…');
        }
        out.push_str(&format!(
            "\ncandidate: {}\n  appears in {} files ({} chars)\n",
            c.slug,
            c.files.len(),
            c.chars
        ));
        for f in &c.files {
            out.push_str(&format!("    - {}\n", f.display()));
        }
        out.push_str(&format!("  preview: \"{preview}\"\n"));
        out.push_str(&format!(
            "  to extract: shared/{slug}.md -> {{{{include:{slug}}}}}\n",
            slug = c.slug
        ));
    }
    out.push_str("\nNo files were modified.\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_block(seed: &str, chars: usize) -> String {
        let mut text = format!("{seed} policy: ");
        while text.chars().count() < chars {
            text.push_str("late submissions lose ten percent per day. ");
        }
        text.trim_end().to_string()
    }

    fn write_item(root: &Path, folder: &str, body: &str) {
        let dir = root.join("content").join(folder);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("index.md"),
            format!("---\nname: {folder}\n---\n\n{body}\n"),
        )
        .unwrap();
    }

    #[test]
    fn long_block_in_two_files_is_a_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let shared = long_block("Submission", 450);
        write_item(dir.path(), "a.page", &format!("Intro A.\n\n{shared}"));
        write_item(dir.path(), "b.assignment", &format!("Intro B.\n\n{shared}"));

        let candidates = suggest_shared_includes(dir.path()).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].files.len(), 2);
        assert!(candidates[0].slug.starts_with("submission-policy"));
        assert!(candidates[0].chars >= 400);
    }

    #[test]
    fn medium_block_needs_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let shared = long_block("Grading", 250);
        write_item(dir.path(), "a.page", &shared);
        write_item(dir.path(), "b.page", &shared);
        assert!(suggest_shared_includes(dir.path()).unwrap().is_empty());

        write_item(dir.path(), "c.page", &shared);
        let candidates = suggest_shared_includes(dir.path()).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].files.len(), 3);
    }

    #[test]
    fn short_repeats_headings_and_existing_includes_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let body = "# Week 1\n\nShort repeated line.\n\n{{include:policies}}";
        write_item(dir.path(), "a.page", body);
        write_item(dir.path(), "b.page", body);
        write_item(dir.path(), "c.page", body);
        assert!(suggest_shared_includes(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn scan_never_modifies_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let shared = long_block("Lab", 500);
        write_item(dir.path(), "a.page", &shared);
        write_item(dir.path(), "b.page", &shared);
        let before = fs::read_to_string(dir.path().join("content/a.page/index.md")).unwrap();
        suggest_shared_includes(dir.path()).unwrap();
        let after = fs::read_to_string(dir.path().join("content/a.page/index.md")).unwrap();
        assert_eq!(before, after);

        let report = render_report(&suggest_shared_includes(dir.path()).unwrap());
        assert!(report.contains("lab-policy"));
        assert!(report.contains("No files were modified."));
    }
}
