//! Author source tree: loading `content/` into the canonical model and
//! writing a model back out as an author tree.
//!
//! Loading never mutates anything under the course root. Items that fail
//! validation are skipped and reported; the rest of the course loads.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::errors::ValidationError;
use crate::model::{
    slugify, AssignmentSettings, BankRef, ContentItem, ContentKind, Course, ItemPayload,
    Membership, Module, ModuleItem, QuestionBank, QuizData, QuizSettings, RubricRef,
};
use crate::quiztext;
use crate::rubric;

/// Frontmatter as authored. Permissive: variant fields are optional and
/// only read for the matching kind.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Frontmatter {
    pub name: Option<String>,
    pub identifier: Option<String>,
    pub published: Option<bool>,
    pub modules: Vec<ModuleEntry>,
    pub position: Option<u32>,
    pub indent: Option<u32>,
    // link
    pub url: Option<String>,
    // file
    pub file: Option<String>,
    // assignment
    pub points_possible: Option<f64>,
    pub submission_types: Vec<String>,
    pub grading_type: Option<String>,
    pub due_at: Option<String>,
    pub use_rubric: Option<String>,
    // quiz
    pub quiz_type: Option<String>,
    pub time_limit: Option<u32>,
    pub allowed_attempts: Option<i32>,
    pub shuffle_answers: Option<bool>,
    pub points_per_question: Option<f64>,
    pub banks: Vec<BankRef>,
}

/// A module membership in frontmatter: either a bare module name or a
/// mapping with placement detail.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ModuleEntry {
    Name(String),
    Placed {
        name: String,
        #[serde(default)]
        position: Option<u32>,
        #[serde(default)]
        indent: u32,
    },
}

impl ModuleEntry {
    fn into_membership(self) -> Membership {
        match self {
            ModuleEntry::Name(name) => Membership {
                module: name,
                position: None,
                indent: 0,
            },
            ModuleEntry::Placed {
                name,
                position,
                indent,
            } => Membership {
                module: name,
                position,
                indent,
            },
        }
    }
}

/// Split a document into optional YAML frontmatter and the body.
pub fn split_frontmatter(text: &str) -> (Option<&str>, &str) {
    let rest = match text.strip_prefix("---\n") {
        Some(rest) => rest,
        None => return (None, text),
    };
    match rest.find("\n---") {
        Some(end) => {
            let yaml = &rest[..end];
            let mut body = &rest[end + 4..];
            body = body.strip_prefix('\n').unwrap_or(body);
            (Some(yaml), body)
        }
        None => (None, text),
    }
}

/// Load the whole course from a source root. Per-item validation errors
/// are collected, not fatal.
pub fn load_course(course_root: &Path) -> std::io::Result<(Course, Vec<ValidationError>)> {
    let mut errors = Vec::new();
    let mut course = Course {
        title: "Untitled Course".to_string(),
        ..Default::default()
    };

    if let Ok(text) = fs::read_to_string(course_root.join("course.yaml")) {
        if let Ok(value) = serde_yaml::from_str::<serde_yaml::Value>(&text) {
            if let Some(name) = value.get("course_name").and_then(|v| v.as_str()) {
                course.title = name.to_string();
            }
            if let Some(code) = value.get("course_code").and_then(|v| v.as_str()) {
                course.code = Some(code.to_string());
            }
        }
    }

    let content_dir = course_root.join("content");
    let mut item_dirs = Vec::new();
    collect_item_dirs(&content_dir, &mut item_dirs);
    item_dirs.sort();

    let mut loaded: Vec<(OrderKey, ContentItem)> = Vec::new();
    for dir in item_dirs {
        match load_item(course_root, &dir) {
            Ok(item) => {
                let key = order_key(&dir, item.position);
                loaded.push((key, item));
            }
            Err(e) => {
                warn!(error = %e, "skipping invalid content item");
                errors.push(e);
            }
        }
    }
    loaded.sort_by(|a, b| a.0.cmp(&b.0));
    course.items = loaded.into_iter().map(|(_, item)| item).collect();

    course.banks = load_banks(course_root, &mut errors);
    course.shared_rubrics = rubric::load_shared_rubrics(course_root);
    course.modules = resolve_modules(course_root, &course.items);

    info!(
        items = course.items.len(),
        modules = course.modules.len(),
        banks = course.banks.len(),
        skipped = errors.len(),
        "course source loaded"
    );
    Ok((course, errors))
}

fn collect_item_dirs(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if item_kind(&path).is_some() {
            out.push(path);
        } else {
            collect_item_dirs(&path, out);
        }
    }
}

fn item_kind(dir: &Path) -> Option<ContentKind> {
    let name = dir.file_name()?.to_str()?;
    let (_, suffix) = name.rsplit_once('.')?;
    ContentKind::from_folder_suffix(suffix)
}

/// Ordering chain: explicit frontmatter position, then a numeric folder
/// prefix like `03-`, then lexical folder name.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey(u32, String);

fn order_key(dir: &Path, explicit: Option<u32>) -> OrderKey {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let position = explicit
        .or_else(|| numeric_prefix(&name))
        .unwrap_or(u32::MAX);
    OrderKey(position, name)
}

pub fn numeric_prefix(name: &str) -> Option<u32> {
    let re = Regex::new(r"^(\d+)[-_ ]").unwrap();
    re.captures(name).and_then(|c| c[1].parse().ok())
}

fn folder_stem(dir: &Path) -> String {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(&name);
    // Strip an ordering prefix; it is placement, not identity.
    let re = Regex::new(r"^\d+[-_ ]").unwrap();
    re.replace(stem, "").into_owned()
}

fn load_item(course_root: &Path, dir: &Path) -> Result<ContentItem, ValidationError> {
    let kind = item_kind(dir).ok_or_else(|| ValidationError::UnknownKind {
        path: dir.to_path_buf(),
    })?;
    let index = dir.join("index.md");
    let text = fs::read_to_string(&index).map_err(|source| ValidationError::Unreadable {
        path: index.clone(),
        source,
    })?;
    let (yaml, body) = split_frontmatter(&text);
    let front: Frontmatter = match yaml {
        Some(yaml) => {
            serde_yaml::from_str(yaml).map_err(|e| ValidationError::Frontmatter {
                path: index.clone(),
                reason: e.to_string(),
            })?
        }
        None => Frontmatter::default(),
    };

    let stem = folder_stem(dir);
    let title = front.name.clone().unwrap_or_else(|| stem.clone());
    let identifier = front.identifier.clone().unwrap_or_else(|| slugify(&stem));

    let payload = match kind {
        ContentKind::Page => ItemPayload::Page,
        ContentKind::Link => {
            let url = front.url.clone().ok_or(ValidationError::MissingField {
                field: "url",
                path: index.clone(),
            })?;
            ItemPayload::Link { url }
        }
        ContentKind::File => {
            let path = front.file.clone().ok_or(ValidationError::MissingField {
                field: "file",
                path: index.clone(),
            })?;
            ItemPayload::File { path }
        }
        ContentKind::Assignment => {
            let rubric = load_item_rubric(course_root, dir, &front)?;
            ItemPayload::Assignment(AssignmentSettings {
                points_possible: front.points_possible,
                submission_types: front.submission_types.clone(),
                grading_type: front.grading_type.clone(),
                due_at: front.due_at.clone(),
                rubric,
            })
        }
        ContentKind::Quiz => {
            let parsed = quiztext::parse(body);
            let points = front.points_per_question.unwrap_or(1.0);
            let mut questions = parsed.questions;
            for q in &mut questions {
                q.points = points;
            }
            ItemPayload::Quiz(QuizData {
                settings: QuizSettings {
                    quiz_type: front
                        .quiz_type
                        .clone()
                        .unwrap_or_else(|| "assignment".to_string()),
                    time_limit: front.time_limit,
                    allowed_attempts: front.allowed_attempts,
                    shuffle_answers: front.shuffle_answers.unwrap_or(false),
                    points_per_question: front.points_per_question,
                },
                description: parsed.description,
                questions,
                bank_refs: front.banks,
            })
        }
    };

    // Quiz bodies are consumed by the parser; other kinds keep markdown.
    let body = match kind {
        ContentKind::Quiz => String::new(),
        _ => body.trim().to_string(),
    };

    debug!(identifier = %identifier, kind = %kind, "loaded content item");
    Ok(ContentItem {
        identifier,
        title,
        body,
        published: front.published.unwrap_or(true),
        memberships: front
            .modules
            .into_iter()
            .map(ModuleEntry::into_membership)
            .collect(),
        position: front.position,
        payload,
        source_dir: Some(dir.to_path_buf()),
    })
}

fn load_item_rubric(
    course_root: &Path,
    dir: &Path,
    front: &Frontmatter,
) -> Result<Option<RubricRef>, ValidationError> {
    if let Some(slug) = &front.use_rubric {
        return Ok(Some(RubricRef::Shared(slug.clone())));
    }
    let path = dir.join("rubric.yaml");
    if !path.is_file() {
        return Ok(None);
    }
    match rubric::load_rubric_file(&path, course_root) {
        Ok(rubric::LoadedRubric::Inline(r)) => Ok(Some(RubricRef::Inline(r))),
        Ok(rubric::LoadedRubric::Shared(slug)) => Ok(Some(RubricRef::Shared(slug))),
        Err(reason) => Err(ValidationError::Frontmatter { path, reason }),
    }
}

fn load_banks(course_root: &Path, errors: &mut Vec<ValidationError>) -> Vec<QuestionBank> {
    let dir = course_root.join("question-banks");
    let mut banks = Vec::new();
    let Ok(entries) = fs::read_dir(&dir) else {
        return banks;
    };
    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(".bank.md"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    for path in paths {
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(source) => {
                errors.push(ValidationError::Unreadable {
                    path: path.clone(),
                    source,
                });
                continue;
            }
        };
        let (yaml, body) = split_frontmatter(&text);
        let front: Frontmatter = yaml
            .and_then(|y| serde_yaml::from_str(y).ok())
            .unwrap_or_default();
        let slug = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.trim_end_matches(".bank.md").to_string())
            .unwrap_or_default();
        let parsed = quiztext::parse(body);
        banks.push(QuestionBank {
            title: front.name.unwrap_or_else(|| slug.clone()),
            slug,
            questions: parsed.questions,
        });
    }
    banks
}

/// Build module structure from memberships. Module ordering chain:
/// `modules/module_order.yaml` list, then numeric name prefix, then
/// lexical.
fn resolve_modules(course_root: &Path, items: &[ContentItem]) -> Vec<Module> {
    let mut by_name: BTreeMap<String, Vec<(Option<u32>, usize, ModuleItem)>> = BTreeMap::new();
    for (course_order, item) in items.iter().enumerate() {
        for membership in &item.memberships {
            by_name.entry(membership.module.clone()).or_default().push((
                membership.position,
                course_order,
                ModuleItem {
                    identifier: item.identifier.clone(),
                    indent: membership.indent,
                },
            ));
        }
    }

    let explicit_order: Vec<String> = fs::read_to_string(course_root.join("modules/module_order.yaml"))
        .ok()
        .and_then(|text| serde_yaml::from_str(&text).ok())
        .unwrap_or_default();

    let mut names: Vec<String> = by_name.keys().cloned().collect();
    names.sort_by(|a, b| {
        let rank = |name: &String| {
            explicit_order
                .iter()
                .position(|n| n == name)
                .map(|i| i as u32)
                .or_else(|| numeric_prefix(name))
                .unwrap_or(u32::MAX)
        };
        rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
    });

    names
        .into_iter()
        .enumerate()
        .map(|(index, name)| {
            let mut entries = by_name.remove(&name).unwrap_or_default();
            entries.sort_by(|a, b| {
                let ka = a.0.unwrap_or(u32::MAX);
                let kb = b.0.unwrap_or(u32::MAX);
                ka.cmp(&kb).then_with(|| a.1.cmp(&b.1))
            });
            Module {
                title: name,
                position: index as u32 + 1,
                items: entries.into_iter().map(|(_, _, item)| item).collect(),
            }
        })
        .collect()
}

/// Summary of a written author tree.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WriteSummary {
    pub items: usize,
    pub banks: usize,
    pub modules: usize,
}

/// Write a course model out as an author source tree. Used by both
/// importers; the sync pipeline never calls this.
pub fn write_course(course: &Course, out_dir: &Path) -> std::io::Result<WriteSummary> {
    let content_dir = out_dir.join("content");
    fs::create_dir_all(&content_dir)?;

    let mut course_yaml = serde_yaml::Mapping::new();
    course_yaml.insert("course_name".into(), course.title.clone().into());
    if let Some(code) = &course.code {
        course_yaml.insert("course_code".into(), code.clone().into());
    }
    fs::write(
        out_dir.join("course.yaml"),
        serde_yaml::to_string(&serde_yaml::Value::Mapping(course_yaml))
            .map_err(to_io_error)?,
    )?;

    let mut summary = WriteSummary::default();
    for (index, item) in course.items.iter().enumerate() {
        write_item(&content_dir, index + 1, item)?;
        summary.items += 1;
    }

    if !course.banks.is_empty() {
        let bank_dir = out_dir.join("question-banks");
        fs::create_dir_all(&bank_dir)?;
        for bank in &course.banks {
            let mut text = format!("---\nname: {}\n---\n\n", yaml_quote(&bank.title));
            text.push_str(&quiztext::render("", &bank.questions));
            text.push('\n');
            fs::write(bank_dir.join(format!("{}.bank.md", bank.slug)), text)?;
            summary.banks += 1;
        }
    }

    for (slug, shared) in &course.shared_rubrics {
        let dir = out_dir.join("rubrics");
        fs::create_dir_all(&dir)?;
        fs::write(
            dir.join(format!("{slug}.yaml")),
            serde_yaml::to_string(shared).map_err(to_io_error)?,
        )?;
    }

    if !course.modules.is_empty() {
        let dir = out_dir.join("modules");
        fs::create_dir_all(&dir)?;
        let order: Vec<&str> = course.modules.iter().map(|m| m.title.as_str()).collect();
        fs::write(
            dir.join("module_order.yaml"),
            serde_yaml::to_string(&order).map_err(to_io_error)?,
        )?;
        summary.modules = course.modules.len();
    }

    info!(
        items = summary.items,
        banks = summary.banks,
        modules = summary.modules,
        path = %out_dir.display(),
        "author tree written"
    );
    Ok(summary)
}

fn write_item(content_dir: &Path, position: usize, item: &ContentItem) -> std::io::Result<()> {
    let kind = item.kind();
    let folder = format!(
        "{:02}-{}.{}",
        position,
        slugify(&item.title),
        kind.folder_suffix()
    );
    let dir = content_dir.join(folder);
    fs::create_dir_all(&dir)?;

    let mut front = serde_yaml::Mapping::new();
    front.insert("name".into(), item.title.clone().into());
    if item.identifier != slugify(&item.title) {
        front.insert("identifier".into(), item.identifier.clone().into());
    }
    front.insert("published".into(), item.published.into());
    if !item.memberships.is_empty() {
        let modules: Vec<serde_yaml::Value> = item
            .memberships
            .iter()
            .map(|m| {
                if m.indent == 0 && m.position.is_none() {
                    m.module.clone().into()
                } else {
                    serde_yaml::to_value(m).unwrap_or_else(|_| m.module.clone().into())
                }
            })
            .collect();
        front.insert("modules".into(), modules.into());
    }

    let mut body = item.body.clone();
    match &item.payload {
        ItemPayload::Page => {}
        ItemPayload::Link { url } => {
            front.insert("url".into(), url.clone().into());
        }
        ItemPayload::File { path } => {
            front.insert("file".into(), path.clone().into());
        }
        ItemPayload::Assignment(settings) => {
            if let Some(points) = settings.points_possible {
                front.insert("points_possible".into(), points.into());
            }
            if !settings.submission_types.is_empty() {
                front.insert(
                    "submission_types".into(),
                    settings.submission_types.clone().into(),
                );
            }
            if let Some(grading) = &settings.grading_type {
                front.insert("grading_type".into(), grading.clone().into());
            }
            if let Some(due) = &settings.due_at {
                front.insert("due_at".into(), due.clone().into());
            }
            match &settings.rubric {
                Some(RubricRef::Shared(slug)) => {
                    front.insert("use_rubric".into(), slug.clone().into());
                }
                Some(RubricRef::Inline(rubric)) => {
                    fs::write(
                        dir.join("rubric.yaml"),
                        serde_yaml::to_string(rubric).map_err(to_io_error)?,
                    )?;
                }
                None => {}
            }
        }
        ItemPayload::Quiz(quiz) => {
            front.insert("quiz_type".into(), quiz.settings.quiz_type.clone().into());
            if let Some(limit) = quiz.settings.time_limit {
                front.insert("time_limit".into(), limit.into());
            }
            if let Some(attempts) = quiz.settings.allowed_attempts {
                front.insert("allowed_attempts".into(), attempts.into());
            }
            if quiz.settings.shuffle_answers {
                front.insert("shuffle_answers".into(), true.into());
            }
            if let Some(points) = quiz.settings.points_per_question {
                front.insert("points_per_question".into(), points.into());
            }
            if !quiz.bank_refs.is_empty() {
                front.insert(
                    "banks".into(),
                    serde_yaml::to_value(&quiz.bank_refs).map_err(to_io_error)?,
                );
            }
            body = quiztext::render(&quiz.description, &quiz.questions);
        }
    }

    let yaml = serde_yaml::to_string(&serde_yaml::Value::Mapping(front)).map_err(to_io_error)?;
    let mut text = format!("---\n{yaml}---\n\n");
    if !body.trim().is_empty() {
        text.push_str(body.trim_end());
        text.push('\n');
    }
    fs::write(dir.join("index.md"), text)
}

fn yaml_quote(text: &str) -> String {
    serde_yaml::to_string(text)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_else(|_| text.to_string())
}

fn to_io_error<E: std::fmt::Display>(e: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontmatter_splits_cleanly() {
        let (yaml, body) = split_frontmatter("---\nname: Intro\n---\n\n# Hello\n");
        assert_eq!(yaml, Some("name: Intro"));
        assert_eq!(body, "\n# Hello\n");
    }

    #[test]
    fn missing_frontmatter_is_all_body() {
        let (yaml, body) = split_frontmatter("# Hello\n");
        assert!(yaml.is_none());
        assert_eq!(body, "# Hello\n");
    }

    #[test]
    fn numeric_prefix_parses() {
        assert_eq!(numeric_prefix("03-intro.page"), Some(3));
        assert_eq!(numeric_prefix("intro.page"), None);
    }

    #[test]
    fn explicit_position_beats_numeric_prefix() {
        let with_front = order_key(Path::new("content/09-later.page"), Some(1));
        let by_prefix = order_key(Path::new("content/02-early.page"), None);
        assert!(with_front < by_prefix);
    }

    #[test]
    fn lexical_fallback_orders_unprefixed_items() {
        let a = order_key(Path::new("content/alpha.page"), None);
        let b = order_key(Path::new("content/beta.page"), None);
        assert!(a < b);
    }
}
