//! Rubric files: loading (with shared references and row placeholders)
//! and post-import deduplication.
//!
//! Deduplication reuses the content-addressable idea from the asset
//! registry: the identity of a rubric (or a single criterion row) is a
//! structural fingerprint of its normalised JSON form, so formatting and
//! key order never defeat the dedup.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{info, warn};

use crate::fingerprint;
use crate::model::{slugify, Rubric};

/// A parsed `rubric.yaml`: inline criteria or a shared reference.
#[derive(Debug)]
pub enum LoadedRubric {
    Inline(Rubric),
    Shared(String),
}

/// Load a rubric file, resolving `use_rubric:` references and
/// `{{rubric_row:<slug>}}` placeholders against the shared directories.
pub fn load_rubric_file(path: &Path, course_root: &Path) -> Result<LoadedRubric, String> {
    let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let value: serde_yaml::Value = serde_yaml::from_str(&text).map_err(|e| e.to_string())?;
    if let Some(slug) = value.get("use_rubric").and_then(|v| v.as_str()) {
        return Ok(LoadedRubric::Shared(slug.to_string()));
    }
    let rubric = rubric_from_value(value, course_root)?;
    Ok(LoadedRubric::Inline(rubric))
}

fn rubric_from_value(
    mut value: serde_yaml::Value,
    course_root: &Path,
) -> Result<Rubric, String> {
    let placeholder = Regex::new(r"^\{\{\s*rubric_row:([A-Za-z0-9_-]+)\s*\}\}$").unwrap();
    if let Some(criteria) = value
        .get_mut("criteria")
        .and_then(|v| v.as_sequence_mut())
    {
        for entry in criteria.iter_mut() {
            let Some(text) = entry.as_str() else { continue };
            let Some(caps) = placeholder.captures(text.trim()) else {
                return Err(format!("criteria entry is not a row placeholder: `{text}`"));
            };
            let slug = &caps[1];
            let row_path = course_root
                .join("rubrics")
                .join("rows")
                .join(format!("{slug}.yaml"));
            let row_text = fs::read_to_string(&row_path)
                .map_err(|_| format!("shared rubric row `{slug}` not found"))?;
            *entry = serde_yaml::from_str(&row_text).map_err(|e| e.to_string())?;
        }
    }
    serde_yaml::from_value(value).map_err(|e| e.to_string())
}

/// Load every shared rubric under `rubrics/` (not `rubrics/rows/`).
pub fn load_shared_rubrics(course_root: &Path) -> BTreeMap<String, Rubric> {
    let dir = course_root.join("rubrics");
    let mut shared = BTreeMap::new();
    let Ok(entries) = fs::read_dir(&dir) else {
        return shared;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_yaml = path
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false);
        if !path.is_file() || !is_yaml {
            continue;
        }
        let slug = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        match load_rubric_file(&path, course_root) {
            Ok(LoadedRubric::Inline(rubric)) => {
                shared.insert(slug, rubric);
            }
            Ok(LoadedRubric::Shared(_)) => {
                warn!(path = %path.display(), "shared rubric references another rubric, skipping");
            }
            Err(reason) => {
                warn!(path = %path.display(), %reason, "unreadable shared rubric");
            }
        }
    }
    shared
}

/// Outcome of a dedup run over a written author tree.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DedupSummary {
    pub shared_rubrics: usize,
    pub shared_rows: usize,
}

/// Two-pass deduplication over `content/**/rubric.yaml` in a freshly
/// written author tree.
///
/// Pass 1: whole rubrics identical across two or more assignments move
/// to `rubrics/<slug>.yaml`, each original replaced by `use_rubric`.
/// Pass 2: criterion rows identical across two or more surviving inline
/// rubrics move to `rubrics/rows/<slug>.yaml`, each occurrence replaced
/// by a `{{rubric_row:<slug>}}` placeholder.
pub fn deduplicate_rubrics(course_dir: &Path) -> std::io::Result<DedupSummary> {
    let mut summary = DedupSummary::default();
    let mut files = Vec::new();
    collect_rubric_files(&course_dir.join("content"), &mut files);
    files.sort();

    // Pass 1: whole rubrics.
    let mut by_fp: BTreeMap<String, Vec<(PathBuf, serde_yaml::Value)>> = BTreeMap::new();
    for path in &files {
        let Some(value) = read_yaml(path) else { continue };
        if value.get("use_rubric").is_some() {
            continue;
        }
        let Ok(fp) = fingerprint::structural16(&value) else { continue };
        by_fp.entry(fp).or_default().push((path.clone(), value));
    }
    for (fp, group) in &by_fp {
        if group.len() < 2 {
            continue;
        }
        let slug = shared_slug(&group[0].1, fp);
        let shared_dir = course_dir.join("rubrics");
        fs::create_dir_all(&shared_dir)?;
        let shared_path = shared_dir.join(format!("{slug}.yaml"));
        if !shared_path.exists() {
            fs::write(&shared_path, to_yaml(&group[0].1)?)?;
        }
        for (path, _) in group {
            fs::write(path, format!("use_rubric: {slug}\n"))?;
        }
        info!(slug = %slug, copies = group.len(), "deduplicated whole rubric");
        summary.shared_rubrics += 1;
    }

    // Pass 2: criterion rows across surviving inline rubrics.
    let mut row_occurrences: BTreeMap<String, (serde_yaml::Value, Vec<PathBuf>)> = BTreeMap::new();
    for path in &files {
        let Some(value) = read_yaml(path) else { continue };
        if value.get("use_rubric").is_some() {
            continue;
        }
        let Some(criteria) = value.get("criteria").and_then(|v| v.as_sequence()) else {
            continue;
        };
        for row in criteria {
            if !row.is_mapping() {
                continue;
            }
            let Ok(fp) = fingerprint::structural16(row) else { continue };
            let entry = row_occurrences
                .entry(fp)
                .or_insert_with(|| (row.clone(), Vec::new()));
            if !entry.1.contains(path) {
                entry.1.push(path.clone());
            }
        }
    }
    for (fp, (row, paths)) in &row_occurrences {
        if paths.len() < 2 {
            continue;
        }
        let slug = row_slug(row, fp);
        let rows_dir = course_dir.join("rubrics").join("rows");
        fs::create_dir_all(&rows_dir)?;
        let row_path = rows_dir.join(format!("{slug}.yaml"));
        if !row_path.exists() {
            fs::write(&row_path, to_yaml(row)?)?;
        }
        for path in paths {
            let Some(mut value) = read_yaml(path) else { continue };
            let mut changed = false;
            if let Some(criteria) = value.get_mut("criteria").and_then(|v| v.as_sequence_mut()) {
                for entry in criteria.iter_mut() {
                    let same = fingerprint::structural16(&*entry)
                        .map(|f| &f == fp)
                        .unwrap_or(false);
                    if entry.is_mapping() && same {
                        *entry = serde_yaml::Value::String(format!("{{{{rubric_row:{slug}}}}}"));
                        changed = true;
                    }
                }
            }
            if changed {
                fs::write(path, to_yaml(&value)?)?;
            }
        }
        info!(slug = %slug, copies = paths.len(), "deduplicated rubric row");
        summary.shared_rows += 1;
    }

    Ok(summary)
}

fn collect_rubric_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rubric_files(&path, out);
        } else if path.file_name().map(|n| n == "rubric.yaml").unwrap_or(false) {
            out.push(path);
        }
    }
}

fn read_yaml(path: &Path) -> Option<serde_yaml::Value> {
    let text = fs::read_to_string(path).ok()?;
    serde_yaml::from_str(&text).ok()
}

fn to_yaml(value: &serde_yaml::Value) -> std::io::Result<String> {
    serde_yaml::to_string(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

fn shared_slug(value: &serde_yaml::Value, fp: &str) -> String {
    match value.get("title").and_then(|v| v.as_str()) {
        Some(title) => slugify(title),
        None => format!("rubric-{}", &fp[..8]),
    }
}

fn row_slug(row: &serde_yaml::Value, fp: &str) -> String {
    match row.get("description").and_then(|v| v.as_str()) {
        Some(description) => {
            let mut slug = slugify(description);
            slug.truncate(40);
            let slug = slug.trim_end_matches('-').to_string();
            format!("{}-{}", slug, &fp[..6])
        }
        None => format!("row-{}", &fp[..8]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Criterion, Rating};

    fn sample_rubric_yaml() -> &'static str {
        "title: Essay Rubric\ncriteria:\n- description: Clarity\n  points: 5\n- description: Depth\n  points: 5\n"
    }

    #[test]
    fn identical_rubrics_are_extracted_once() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.assignment", "b.assignment"] {
            let item = dir.path().join("content").join(name);
            fs::create_dir_all(&item).unwrap();
            fs::write(item.join("rubric.yaml"), sample_rubric_yaml()).unwrap();
        }
        let summary = deduplicate_rubrics(dir.path()).unwrap();
        assert_eq!(summary.shared_rubrics, 1);

        let shared = dir.path().join("rubrics/essay-rubric.yaml");
        assert!(shared.is_file());
        let a = fs::read_to_string(dir.path().join("content/a.assignment/rubric.yaml")).unwrap();
        assert_eq!(a.trim(), "use_rubric: essay-rubric");
    }

    #[test]
    fn lone_rubric_stays_inline() {
        let dir = tempfile::tempdir().unwrap();
        let item = dir.path().join("content").join("a.assignment");
        fs::create_dir_all(&item).unwrap();
        fs::write(item.join("rubric.yaml"), sample_rubric_yaml()).unwrap();
        let summary = deduplicate_rubrics(dir.path()).unwrap();
        assert_eq!(summary, DedupSummary::default());
        assert!(fs::read_to_string(item.join("rubric.yaml"))
            .unwrap()
            .contains("Clarity"));
    }

    #[test]
    fn repeated_rows_become_placeholders_that_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let row = "- description: Cites sources\n  points: 2\n";
        let a = format!("title: One\ncriteria:\n{row}- description: Unique A\n  points: 3\n");
        let b = format!("title: Two\ncriteria:\n{row}- description: Unique B\n  points: 4\n");
        for (name, text) in [("a.assignment", &a), ("b.assignment", &b)] {
            let item = dir.path().join("content").join(name);
            fs::create_dir_all(&item).unwrap();
            fs::write(item.join("rubric.yaml"), text).unwrap();
        }
        let summary = deduplicate_rubrics(dir.path()).unwrap();
        assert_eq!(summary.shared_rows, 1);

        let a_text =
            fs::read_to_string(dir.path().join("content/a.assignment/rubric.yaml")).unwrap();
        assert!(a_text.contains("{{rubric_row:"), "text: {a_text}");

        // The placeholder resolves on load.
        let loaded = load_rubric_file(
            &dir.path().join("content/a.assignment/rubric.yaml"),
            dir.path(),
        )
        .unwrap();
        match loaded {
            LoadedRubric::Inline(rubric) => {
                assert!(rubric.criteria.iter().any(|c| c.description == "Cites sources"));
            }
            LoadedRubric::Shared(_) => panic!("expected inline rubric"),
        }
    }

    #[test]
    fn rubric_points_sum_over_criteria() {
        let rubric = Rubric {
            title: None,
            criteria: vec![
                Criterion {
                    description: "Clarity".into(),
                    points: 5.0,
                    long_description: None,
                    ratings: vec![Rating {
                        description: "Full marks".into(),
                        points: 5.0,
                        long_description: None,
                    }],
                },
                Criterion {
                    description: "Depth".into(),
                    points: 7.5,
                    ..Default::default()
                },
            ],
        };
        assert!((rubric.points_possible() - 12.5).abs() < f64::EPSILON);
    }
}
