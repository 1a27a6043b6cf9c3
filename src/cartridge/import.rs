//! Cartridge import: `.imscc` archive -> author source tree.
//!
//! Runs as a state machine: Extract -> ParseManifest -> per-resource
//! Classify/Decode/Attach -> ResolveModules -> ResolveRubrics -> Done.
//! Everything up to and including module resolution happens before any
//! output is written, so an [`ArchiveFormatError`] always aborts with the
//! output directory untouched. Individual resources that fail to decode
//! are skipped and surfaced in the report.

use std::fs;
use std::io::Read;
use std::path::Path;

use regex::Regex;
use tracing::{info, warn};

use crate::errors::{ArchiveFormatError, ResourceDecodeError};
use crate::markup;
use crate::model::{
    AssignmentSettings, ContentItem, Course, Criterion, ItemPayload, Membership, Module,
    ModuleItem, QuestionBank, QuizData, QuizSettings, Rating, Rubric, RubricRef,
};
use crate::rubric;
use crate::source;

use super::manifest::{parse_manifest, Manifest};
use super::{classify, parse_xml, ResourceEntry, ResourceKind, XmlNode};

/// Per-member extraction cap.
const MEMBER_SIZE_CAP: u64 = 256 * 1024 * 1024;
/// Whole-archive extraction cap.
const ARCHIVE_SIZE_CAP: u64 = 2 * 1024 * 1024 * 1024;
/// Maximum allowed expansion of a single compressed member.
const COMPRESSION_RATIO_CAP: f64 = 200.0;

#[derive(Debug, Default)]
pub struct ImportReport {
    pub pages: usize,
    pub assignments: usize,
    pub quizzes: usize,
    pub links: usize,
    pub banks: usize,
    pub assets: usize,
    pub modules: usize,
    pub rubric_dedup: rubric::DedupSummary,
    /// Resources skipped with the reason each was skipped.
    pub skipped: Vec<ResourceDecodeError>,
}

/// Import a cartridge archive and write the author tree to `output_dir`.
pub fn import_cartridge(
    archive: &Path,
    output_dir: &Path,
) -> Result<(Course, ImportReport), ArchiveFormatError> {
    // Extract.
    let extracted = tempfile::tempdir()?;
    extract_archive(archive, extracted.path())?;

    // ParseManifest.
    let manifest_path = extracted.path().join("imsmanifest.xml");
    if !manifest_path.is_file() {
        return Err(ArchiveFormatError::MissingManifest);
    }
    let manifest = parse_manifest(&fs::read_to_string(&manifest_path)?)?;
    info!(
        title = %manifest.title,
        resources = manifest.resources.len(),
        "[IMPORT] manifest parsed"
    );

    // Classify / Decode / Attach.
    let mut course = Course {
        title: if manifest.title.is_empty() {
            "Imported Course".to_string()
        } else {
            manifest.title.clone()
        },
        ..Default::default()
    };
    let mut report = ImportReport::default();
    let mut assets: Vec<String> = Vec::new();

    for entry in &manifest.resources {
        let Some((kind, matcher)) = classify(entry) else {
            report.skipped.push(ResourceDecodeError::new(
                &entry.identifier,
                format!("no matcher claimed resource of type `{}`", entry.resource_type),
            ));
            continue;
        };
        let outcome = match kind {
            ResourceKind::Page => decode_page(extracted.path(), entry).map(Attach::Item),
            ResourceKind::Assignment => {
                decode_assignment(extracted.path(), entry).map(Attach::Item)
            }
            ResourceKind::Quiz => decode_quiz(extracted.path(), entry),
            ResourceKind::QuestionBank => decode_bank(extracted.path(), entry).map(Attach::Bank),
            ResourceKind::Link => decode_link(extracted.path(), entry).map(Attach::Item),
            ResourceKind::Asset => Ok(Attach::Assets(
                entry
                    .files
                    .iter()
                    .filter_map(|f| f.strip_prefix("web_resources/"))
                    .map(str::to_string)
                    .collect(),
            )),
            ResourceKind::CourseSettings => Ok(Attach::Nothing),
        };
        match outcome {
            Ok(Attach::Item(item)) => {
                match item.kind() {
                    crate::model::ContentKind::Page => report.pages += 1,
                    crate::model::ContentKind::Assignment => report.assignments += 1,
                    crate::model::ContentKind::Quiz => report.quizzes += 1,
                    crate::model::ContentKind::Link => report.links += 1,
                    crate::model::ContentKind::File => {}
                }
                course.items.push(item);
            }
            Ok(Attach::Bank(bank)) => {
                report.banks += 1;
                course.banks.push(bank);
            }
            Ok(Attach::Assets(paths)) => {
                report.assets += paths.len();
                assets.extend(paths);
            }
            Ok(Attach::Nothing) => {}
            Err(e) => {
                warn!(resource = %e.identifier, matcher, reason = %e.reason, "[IMPORT] skipping resource");
                report.skipped.push(e);
            }
        }
    }

    // ResolveModules.
    let module_meta = extracted.path().join("course_settings/module_meta.xml");
    let modules = if module_meta.is_file() {
        modules_from_meta(&fs::read_to_string(&module_meta)?)
    } else {
        modules_from_organization(&manifest)
    };
    apply_modules(&mut course, modules);
    report.modules = course.modules.len();

    if let Some(title) = course_title_from_settings(extracted.path()) {
        course.title = title.0;
        course.code = title.1;
    }

    // Everything decoded; only now touch the output directory.
    source::write_course(&course, output_dir)
        .map_err(ArchiveFormatError::Io)?;
    for relative in &assets {
        let from = extracted.path().join("web_resources").join(relative);
        let to = output_dir.join(relative);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        if from.is_file() {
            fs::copy(&from, &to)?;
        }
    }

    // ResolveRubrics.
    report.rubric_dedup = rubric::deduplicate_rubrics(output_dir)?;

    if !report.skipped.is_empty() {
        warn!(
            skipped = report.skipped.len(),
            "[IMPORT] finished with skipped resources"
        );
        for e in &report.skipped {
            warn!(resource = %e.identifier, reason = %e.reason, "[IMPORT] skipped");
        }
    }
    info!(
        pages = report.pages,
        assignments = report.assignments,
        quizzes = report.quizzes,
        banks = report.banks,
        assets = report.assets,
        "[IMPORT] author tree written"
    );
    Ok((course, report))
}

enum Attach {
    Item(ContentItem),
    Bank(QuestionBank),
    Assets(Vec<String>),
    Nothing,
}

/// Extract with traversal, size and compression-ratio guards.
fn extract_archive(archive: &Path, dest: &Path) -> Result<(), ArchiveFormatError> {
    let file = fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;
    let mut total: u64 = 0;
    for index in 0..zip.len() {
        let mut member = zip.by_index(index)?;
        let name = member.name().to_string();
        let Some(safe_path) = member.enclosed_name() else {
            return Err(ArchiveFormatError::UnsafeMemberPath { name });
        };
        if member.size() > MEMBER_SIZE_CAP {
            return Err(ArchiveFormatError::MemberTooLarge {
                name,
                size: member.size(),
                cap: MEMBER_SIZE_CAP,
            });
        }
        if member.compressed_size() > 0 {
            let ratio = member.size() as f64 / member.compressed_size() as f64;
            if ratio > COMPRESSION_RATIO_CAP {
                return Err(ArchiveFormatError::SuspiciousCompression { name, ratio });
            }
        }
        total += member.size();
        if total > ARCHIVE_SIZE_CAP {
            return Err(ArchiveFormatError::ArchiveTooLarge {
                total,
                cap: ARCHIVE_SIZE_CAP,
            });
        }
        let out_path = dest.join(safe_path);
        if member.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut bytes = Vec::with_capacity(member.size() as usize);
        member.read_to_end(&mut bytes)?;
        fs::write(&out_path, bytes)?;
    }
    Ok(())
}

fn read_resource_file(
    root: &Path,
    entry: &ResourceEntry,
    relative: &str,
) -> Result<String, ResourceDecodeError> {
    fs::read_to_string(root.join(relative)).map_err(|e| {
        ResourceDecodeError::new(&entry.identifier, format!("missing file `{relative}`: {e}"))
    })
}

fn decode_page(root: &Path, entry: &ResourceEntry) -> Result<ContentItem, ResourceDecodeError> {
    let href = entry
        .href
        .clone()
        .or_else(|| entry.files.first().cloned())
        .ok_or_else(|| ResourceDecodeError::new(&entry.identifier, "page without file"))?;
    let html = read_resource_file(root, entry, &href)?;

    let meta = |name: &str| {
        Regex::new(&format!(
            r#"(?is)<meta\s+name="{name}"\s+content="([^"]*)""#
        ))
        .unwrap()
        .captures(&html)
        .map(|c| c[1].to_string())
    };
    let identifier = meta("identifier").unwrap_or_else(|| entry.identifier.clone());
    let published = meta("workflow_state").map(|s| s != "unpublished").unwrap_or(true);
    let title = Regex::new(r"(?is)<title>(.*?)</title>")
        .unwrap()
        .captures(&html)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| entry.identifier.clone());
    let body_html = Regex::new(r"(?is)<body[^>]*>(.*)</body>")
        .unwrap()
        .captures(&html)
        .map(|c| c[1].to_string())
        .unwrap_or(html.clone());

    Ok(ContentItem {
        identifier,
        title,
        body: markup::platform_html_to_markdown(&body_html),
        published,
        memberships: vec![],
        position: None,
        source_dir: None,
        payload: ItemPayload::Page,
    })
}

fn decode_assignment(
    root: &Path,
    entry: &ResourceEntry,
) -> Result<ContentItem, ResourceDecodeError> {
    let settings_file = entry
        .files
        .iter()
        .find(|f| f.ends_with("assignment_settings.xml"))
        .ok_or_else(|| {
            ResourceDecodeError::new(&entry.identifier, "assignment without settings companion")
        })?;
    let settings_xml = read_resource_file(root, entry, settings_file)?;
    let node = parse_xml(&settings_xml)
        .map_err(|reason| ResourceDecodeError::new(&entry.identifier, reason))?;

    let text_of = |name: &str| node.child(name).map(|n| n.text_content().trim().to_string());
    let title = text_of("title").unwrap_or_else(|| entry.identifier.clone());
    let published = text_of("workflow_state")
        .map(|s| s != "unpublished")
        .unwrap_or(true);

    let rubric = match node.child("use_rubric") {
        Some(slug) => Some(RubricRef::Shared(slug.text_content().trim().to_string())),
        None => node.child("rubric").map(|r| RubricRef::Inline(parse_rubric_xml(r))),
    };
    let settings = AssignmentSettings {
        points_possible: text_of("points_possible").and_then(|p| p.parse().ok()),
        submission_types: text_of("submission_types")
            .map(|s| s.split(',').map(|t| t.trim().to_string()).collect())
            .unwrap_or_default(),
        grading_type: text_of("grading_type"),
        due_at: text_of("due_at"),
        rubric,
    };

    let body = entry
        .files
        .iter()
        .find(|f| f.ends_with(".html"))
        .map(|href| read_resource_file(root, entry, href))
        .transpose()?
        .map(|html| markup::platform_html_to_markdown(&html))
        .unwrap_or_default();

    Ok(ContentItem {
        identifier: node
            .attr("identifier")
            .unwrap_or(&entry.identifier)
            .to_string(),
        title,
        body,
        published,
        memberships: vec![],
        position: None,
        source_dir: None,
        payload: ItemPayload::Assignment(settings),
    })
}

pub(super) fn parse_rubric_xml(node: &XmlNode) -> Rubric {
    Rubric {
        title: node
            .child("title")
            .map(|t| t.text_content().trim().to_string()),
        criteria: node
            .children_named("criterion")
            .map(|c| Criterion {
                description: c
                    .child("description")
                    .map(|d| d.text_content().trim().to_string())
                    .unwrap_or_default(),
                long_description: c
                    .child("long_description")
                    .map(|d| d.text_content().trim().to_string()),
                points: c
                    .child("points")
                    .and_then(|p| p.text_content().trim().parse().ok())
                    .unwrap_or(0.0),
                ratings: c
                    .children_named("rating")
                    .map(|r| Rating {
                        description: r
                            .child("description")
                            .map(|d| d.text_content().trim().to_string())
                            .unwrap_or_default(),
                        points: r
                            .child("points")
                            .and_then(|p| p.text_content().trim().parse().ok())
                            .unwrap_or(0.0),
                        long_description: r
                            .child("long_description")
                            .map(|d| d.text_content().trim().to_string()),
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn decode_quiz(root: &Path, entry: &ResourceEntry) -> Result<Attach, ResourceDecodeError> {
    // Prefer the structured copy; fall back to the flat index.
    let href = entry
        .files
        .iter()
        .find(|f| f.ends_with("assessment_qti.xml"))
        .or_else(|| entry.files.iter().find(|f| f.ends_with(".xml.qti")))
        .or_else(|| entry.files.first())
        .ok_or_else(|| ResourceDecodeError::new(&entry.identifier, "quiz without QTI file"))?;
    let xml = read_resource_file(root, entry, href)?;
    let decoded = super::qti::decode_assessment(&entry.identifier, &xml)?;

    // Inline-vs-bank: trust the fidelity flag when present; otherwise a
    // structural heuristic for third-party archives.
    let treat_as_bank = match decoded.inline_flag() {
        Some(_) => false,
        None => {
            let id = entry.identifier.to_ascii_lowercase();
            let title = decoded.title.to_ascii_lowercase();
            [id, title]
                .iter()
                .any(|s| s.contains("bank") || s.contains("pool"))
        }
    };
    if treat_as_bank {
        return Ok(Attach::Bank(QuestionBank {
            slug: crate::model::slugify(&decoded.title_or_id()),
            title: decoded.title_or_id(),
            questions: decoded.questions,
        }));
    }

    // Platform importers read quizzes through the flat index only; an
    // archive missing it imports zero quizzes. Mirror that here.
    let flat = entry
        .files
        .iter()
        .find(|f| f.starts_with("non_cc_assessments/"))
        .cloned()
        .unwrap_or_else(|| format!("non_cc_assessments/{}.xml.qti", entry.identifier));
    if !root.join(&flat).is_file() {
        return Err(ResourceDecodeError::new(
            &entry.identifier,
            format!("missing flat assessment index `{flat}`"),
        ));
    }

    let settings = QuizSettings {
        quiz_type: decoded
            .metadata
            .get("quiz_type")
            .cloned()
            .unwrap_or_else(|| "assignment".to_string()),
        time_limit: decoded
            .metadata
            .get("qmd_timelimit")
            .and_then(|v| v.parse().ok()),
        allowed_attempts: decoded
            .metadata
            .get("allowed_attempts")
            .and_then(|v| v.parse().ok()),
        shuffle_answers: decoded
            .metadata
            .get("shuffle_answers")
            .map(|v| v == "true")
            .unwrap_or(false),
        points_per_question: decoded
            .metadata
            .get("points_per_question")
            .and_then(|v| v.parse().ok()),
    };
    Ok(Attach::Item(ContentItem {
        identifier: entry.identifier.clone(),
        title: decoded.title_or_id(),
        body: String::new(),
        published: true,
        memberships: vec![],
        position: None,
        source_dir: None,
        payload: ItemPayload::Quiz(QuizData {
            settings,
            description: decoded.description,
            questions: decoded.questions,
            bank_refs: decoded.bank_refs,
        }),
    }))
}

fn decode_bank(root: &Path, entry: &ResourceEntry) -> Result<QuestionBank, ResourceDecodeError> {
    let href = entry
        .href
        .clone()
        .or_else(|| entry.files.first().cloned())
        .ok_or_else(|| ResourceDecodeError::new(&entry.identifier, "bank without file"))?;
    let xml = read_resource_file(root, entry, &href)?;
    let decoded = super::qti::decode_assessment(&entry.identifier, &xml)?;
    let title = decoded
        .metadata
        .get("bank_title")
        .cloned()
        .unwrap_or_else(|| decoded.title_or_id());
    Ok(QuestionBank {
        slug: decoded.identifier.clone(),
        title,
        questions: decoded.questions,
    })
}

fn decode_link(root: &Path, entry: &ResourceEntry) -> Result<ContentItem, ResourceDecodeError> {
    let href = entry
        .href
        .clone()
        .or_else(|| entry.files.first().cloned())
        .ok_or_else(|| ResourceDecodeError::new(&entry.identifier, "weblink without file"))?;
    let xml = read_resource_file(root, entry, &href)?;
    let node =
        parse_xml(&xml).map_err(|reason| ResourceDecodeError::new(&entry.identifier, reason))?;
    let title = node
        .child("title")
        .map(|t| t.text_content().trim().to_string())
        .unwrap_or_else(|| entry.identifier.clone());
    let url = node
        .child("url")
        .and_then(|u| u.attr("href"))
        .map(str::to_string)
        .ok_or_else(|| ResourceDecodeError::new(&entry.identifier, "weblink without url"))?;
    Ok(ContentItem {
        identifier: entry.identifier.clone(),
        title,
        body: String::new(),
        published: true,
        memberships: vec![],
        position: None,
        source_dir: None,
        payload: ItemPayload::Link { url },
    })
}

struct DecodedModule {
    title: String,
    items: Vec<DecodedModuleItem>,
}

struct DecodedModuleItem {
    identifierref: String,
    indent: u32,
}

fn modules_from_meta(xml: &str) -> Vec<DecodedModule> {
    let Ok(root) = parse_xml(xml) else {
        return Vec::new();
    };
    let mut modules: Vec<(u32, DecodedModule)> = root
        .children_named("module")
        .map(|m| {
            let position = m
                .child("position")
                .and_then(|p| p.text_content().trim().parse().ok())
                .unwrap_or(u32::MAX);
            let items = m
                .find("items")
                .map(|items| {
                    items
                        .children_named("item")
                        .filter_map(|item| {
                            let identifierref = item
                                .child("identifierref")
                                .map(|r| r.text_content().trim().to_string())?;
                            Some(DecodedModuleItem {
                                identifierref,
                                indent: item
                                    .child("indent")
                                    .and_then(|i| i.text_content().trim().parse().ok())
                                    .unwrap_or(0),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            (
                position,
                DecodedModule {
                    title: m
                        .child("title")
                        .map(|t| t.text_content().trim().to_string())
                        .unwrap_or_default(),
                    items,
                },
            )
        })
        .collect();
    modules.sort_by_key(|(position, _)| *position);
    modules.into_iter().map(|(_, m)| m).collect()
}

fn modules_from_organization(manifest: &Manifest) -> Vec<DecodedModule> {
    manifest
        .organization
        .iter()
        .map(|module| DecodedModule {
            title: module.title.clone(),
            items: module
                .children
                .iter()
                .filter_map(|item| {
                    item.identifierref.as_ref().map(|r| DecodedModuleItem {
                        identifierref: r.clone(),
                        indent: 0,
                    })
                })
                .collect(),
        })
        .collect()
}

fn apply_modules(course: &mut Course, modules: Vec<DecodedModule>) {
    for (index, module) in modules.iter().enumerate() {
        let mut resolved: Vec<ModuleItem> = Vec::new();
        for entry in &module.items {
            let Some(item) = course
                .items
                .iter_mut()
                .find(|i| i.identifier == entry.identifierref)
            else {
                continue;
            };
            // Positions count attached items only, so unresolved refs
            // never leave gaps in the sequence.
            item.memberships.push(Membership {
                module: module.title.clone(),
                position: Some(resolved.len() as u32 + 1),
                indent: entry.indent,
            });
            resolved.push(ModuleItem {
                identifier: item.identifier.clone(),
                indent: entry.indent,
            });
        }
        course.modules.push(Module {
            title: module.title.clone(),
            position: index as u32 + 1,
            items: resolved,
        });
    }
}

fn course_title_from_settings(root: &Path) -> Option<(String, Option<String>)> {
    let xml = fs::read_to_string(root.join("course_settings/course_settings.xml")).ok()?;
    let node = parse_xml(&xml).ok()?;
    let title = node
        .child("title")
        .map(|t| t.text_content().trim().to_string())?;
    let code = node
        .child("course_code")
        .map(|c| c.text_content().trim().to_string());
    Some((title, code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(identifier: &str) -> ContentItem {
        ContentItem {
            identifier: identifier.to_string(),
            title: identifier.to_string(),
            body: String::new(),
            published: true,
            memberships: vec![],
            position: None,
            source_dir: None,
            payload: ItemPayload::Page,
        }
    }

    #[test]
    fn unresolved_module_refs_leave_no_position_gaps() {
        let mut course = Course {
            items: vec![page("a"), page("b")],
            ..Default::default()
        };
        apply_modules(
            &mut course,
            vec![DecodedModule {
                title: "Week 1".into(),
                items: vec![
                    DecodedModuleItem {
                        identifierref: "a".into(),
                        indent: 0,
                    },
                    DecodedModuleItem {
                        identifierref: "ghost".into(),
                        indent: 0,
                    },
                    DecodedModuleItem {
                        identifierref: "b".into(),
                        indent: 1,
                    },
                ],
            }],
        );

        assert_eq!(course.modules[0].items.len(), 2);
        let positions: Vec<u32> = course
            .items
            .iter()
            .map(|i| i.memberships[0].position.expect("placed"))
            .collect();
        assert_eq!(positions, vec![1, 2]);
        assert_eq!(course.items[1].memberships[0].indent, 1);
    }
}
