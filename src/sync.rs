//! The one-shot sync pipeline: author source -> remote course.
//!
//! Stage order: load registry -> load source -> render and upload assets
//! -> pages -> assignments -> quizzes -> modules -> prune -> save
//! registry. A validation failure skips the item; a failed remote call
//! aborts the stage it occurred in. Nothing under `content/` is ever
//! written; the registry under `_course_metadata/` is the only file the
//! pipeline touches.

use std::collections::{BTreeMap, HashMap};

use tracing::{error, info, warn};

use crate::config::CourseConfig;
use crate::errors::{PipelineError, ReferenceError, RemoteOperationError};
use crate::markup;
use crate::model::{ContentItem, Course, ItemPayload, Question, RubricRef};
use crate::registry::AssetRegistry;
use crate::remote::{
    AnswerPayload, AssignmentPayload, LmsClient, ModuleItemPayload, PagePayload, QuestionPayload,
    QuizPayload,
};
use crate::source;

/// Outcome of a sync run.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub pages: usize,
    pub assignments: usize,
    pub quizzes: usize,
    pub modules: usize,
    pub uploaded_assets: usize,
    pub pruned_registry_records: usize,
    /// Items skipped with the reason each was skipped.
    pub skipped: Vec<String>,
    /// Non-fatal oddities: unresolved references, missing shared rubrics.
    pub warnings: Vec<String>,
}

/// Remote identities established during the run, used by the module stage.
#[derive(Debug, Default)]
struct RemoteIds {
    page_slugs: HashMap<String, String>,
    assignment_ids: HashMap<String, i64>,
    quiz_ids: HashMap<String, i64>,
    file_ids: HashMap<String, i64>,
}

pub async fn synchronise<C: LmsClient>(
    config: &CourseConfig,
    client: &C,
) -> Result<SyncReport, PipelineError> {
    info!(course_id = config.course_id, "[SYNC] Starting full synchronisation pipeline");
    let mut report = SyncReport::default();

    let mut registry = AssetRegistry::load(&config.course_root);
    let (course, validation_errors) = source::load_course(&config.course_root)?;
    for e in &validation_errors {
        warn!(error = %e, "[SYNC] skipping invalid item");
        report.skipped.push(e.to_string());
    }

    let templates = markup::TemplateSet::load(&config.course_root, &config.template);
    let placeholders = markup::SharedDirPlaceholders::load(&config.course_root);

    // Render every body up front, uploading the assets each one
    // references. Quiz descriptions render in the quiz stage instead.
    let mut rendered: HashMap<String, String> = HashMap::new();
    for item in &course.items {
        if matches!(item.payload, ItemPayload::Quiz(_)) || item.body.trim().is_empty() {
            continue;
        }
        let html = render_item(
            config,
            client,
            &mut registry,
            &templates,
            &placeholders,
            item,
            &item.body,
            &mut report,
        )
        .await?;
        rendered.insert(item.identifier.clone(), html);
    }

    let mut ids = RemoteIds::default();

    // File stubs upload their referenced asset through the registry.
    for item in &course.items {
        let ItemPayload::File { path } = &item.payload else {
            continue;
        };
        let item_dir = item_dir_of(config, item);
        let resolved = match registry.resolve(path, &item_dir) {
            Ok(resolved) => resolved,
            Err(e) => {
                let message = format!("item `{}`: {e}", item.identifier);
                warn!("[SYNC] {message}");
                report.warnings.push(message);
                continue;
            }
        };
        let already_known =
            registry.record(&resolved.key).map(|r| r.remote_url.is_some()) == Some(true);
        let descriptor = registry
            .ensure_uploaded(&resolved, |filename, bytes| async move {
                let file = client.upload_file(config.course_id, filename, bytes).await?;
                Ok(crate::registry::RemoteDescriptor {
                    file_id: file.id,
                    url: file.url,
                })
            })
            .await
            .map_err(|e| stage_error("upload_file", &resolved.course_relative, e))?;
        if !already_known {
            report.uploaded_assets += 1;
        }
        ids.file_ids.insert(item.identifier.clone(), descriptor.file_id);
    }

    // Pages.
    for item in pages(&course) {
        let body_html = rendered.get(&item.identifier).cloned().unwrap_or_default();
        let page = client
            .upsert_page(
                config.course_id,
                PagePayload {
                    slug: item.identifier.clone(),
                    title: item.title.clone(),
                    body_html,
                    published: item.published,
                },
            )
            .await
            .map_err(|e| stage_error("upsert_page", &item.identifier, e))?;
        ids.page_slugs.insert(item.identifier.clone(), page.url);
        report.pages += 1;
    }
    info!(pages = report.pages, "[SYNC] pages stage complete");

    // Assignments.
    for item in &course.items {
        let ItemPayload::Assignment(settings) = &item.payload else {
            continue;
        };
        let description_html = rendered.get(&item.identifier).cloned().unwrap_or_default();
        let remote = client
            .upsert_assignment(
                config.course_id,
                AssignmentPayload {
                    name: item.title.clone(),
                    description_html,
                    published: item.published,
                    points_possible: settings.points_possible,
                    submission_types: settings.submission_types.clone(),
                    grading_type: settings.grading_type.clone(),
                    due_at: settings.due_at.clone(),
                },
            )
            .await
            .map_err(|e| stage_error("upsert_assignment", &item.identifier, e))?;
        ids.assignment_ids.insert(item.identifier.clone(), remote.id);
        report.assignments += 1;

        let rubric = match &settings.rubric {
            Some(RubricRef::Inline(rubric)) => Some(rubric.clone()),
            Some(RubricRef::Shared(slug)) => match course.shared_rubrics.get(slug) {
                Some(shared) => Some(shared.clone()),
                None => {
                    let message =
                        format!("assignment `{}`: shared rubric `{slug}` not found", item.identifier);
                    warn!("[SYNC] {message}");
                    report.warnings.push(message);
                    None
                }
            },
            None => None,
        };
        if let Some(rubric) = rubric {
            client
                .attach_rubric(config.course_id, remote.id, rubric)
                .await
                .map_err(|e| stage_error("attach_rubric", &item.identifier, e))?;
        }
    }
    info!(assignments = report.assignments, "[SYNC] assignments stage complete");

    // Quizzes.
    for item in &course.items {
        let ItemPayload::Quiz(quiz) = &item.payload else {
            continue;
        };
        let description_html = if quiz.description.trim().is_empty() {
            String::new()
        } else {
            render_item(
                config,
                client,
                &mut registry,
                &templates,
                &placeholders,
                item,
                &quiz.description,
                &mut report,
            )
            .await?
        };
        let remote = client
            .upsert_quiz(
                config.course_id,
                QuizPayload {
                    title: item.title.clone(),
                    description_html,
                    published: item.published,
                    quiz_type: quiz.settings.quiz_type.clone(),
                    time_limit: quiz.settings.time_limit,
                    allowed_attempts: quiz.settings.allowed_attempts,
                    shuffle_answers: quiz.settings.shuffle_answers,
                },
            )
            .await
            .map_err(|e| stage_error("upsert_quiz", &item.identifier, e))?;
        ids.quiz_ids.insert(item.identifier.clone(), remote.id);
        report.quizzes += 1;

        if !quiz.bank_refs.is_empty() {
            let message = format!(
                "quiz `{}` draws from question banks; bank contents are not synced remotely",
                item.identifier
            );
            warn!("[SYNC] {message}");
            report.warnings.push(message);
        }
        client
            .replace_quiz_questions(
                config.course_id,
                remote.id,
                quiz.questions.iter().map(question_payload).collect(),
            )
            .await
            .map_err(|e| stage_error("replace_quiz_questions", &item.identifier, e))?;
    }
    info!(quizzes = report.quizzes, "[SYNC] quizzes stage complete");

    // Modules.
    for module in &course.modules {
        let remote = client
            .upsert_module(config.course_id, module.title.clone(), module.position)
            .await
            .map_err(|e| stage_error("upsert_module", &module.title, e))?;
        let mut items = Vec::new();
        for entry in &module.items {
            let Some(item) = course.item(&entry.identifier) else {
                continue;
            };
            if let Some(payload) = module_item_payload(item, entry.indent, &ids) {
                items.push(payload);
            } else {
                let message = format!(
                    "module `{}`: item `{}` has no remote identity, left out",
                    module.title, entry.identifier
                );
                warn!("[SYNC] {message}");
                report.warnings.push(message);
            }
        }
        client
            .set_module_items(config.course_id, remote.id, items)
            .await
            .map_err(|e| stage_error("set_module_items", &module.title, e))?;
        report.modules += 1;
    }
    info!(modules = report.modules, "[SYNC] modules stage complete");

    report.pruned_registry_records = registry.prune_missing();
    registry.save()?;
    info!(
        pages = report.pages,
        assignments = report.assignments,
        quizzes = report.quizzes,
        modules = report.modules,
        uploaded_assets = report.uploaded_assets,
        warnings = report.warnings.len(),
        "[SYNC] pipeline complete"
    );
    Ok(report)
}

fn pages(course: &Course) -> impl Iterator<Item = &ContentItem> {
    course
        .items
        .iter()
        .filter(|i| matches!(i.payload, ItemPayload::Page))
}

/// Render one markdown body to platform HTML, uploading every local
/// asset it references. Unresolvable references stay local and warn.
#[allow(clippy::too_many_arguments)]
async fn render_item<C: LmsClient>(
    config: &CourseConfig,
    client: &C,
    registry: &mut AssetRegistry,
    templates: &markup::TemplateSet,
    placeholders: &markup::SharedDirPlaceholders,
    item: &ContentItem,
    body: &str,
    report: &mut SyncReport,
) -> Result<String, PipelineError> {
    let item_dir = item_dir_of(config, item);
    let mut warnings = Vec::new();
    let markdown = markup::resolve_placeholders(body, placeholders, &mut warnings);

    let mut urls: BTreeMap<String, String> = BTreeMap::new();
    for reference in markup::collect_asset_refs(&markdown) {
        let resolved = match registry.resolve(&reference, &item_dir) {
            Ok(resolved) => resolved,
            Err(e @ ReferenceError::Ambiguous { .. }) => {
                warnings.push(format!("item `{}`: {e}", item.identifier));
                continue;
            }
            Err(e @ ReferenceError::NotFound { .. }) => {
                warnings.push(format!("item `{}`: {e}", item.identifier));
                continue;
            }
        };
        let already_known = registry.record(&resolved.key).map(|r| r.remote_url.is_some())
            == Some(true);
        let descriptor = registry
            .ensure_uploaded(&resolved, |filename, bytes| async move {
                let file = client.upload_file(config.course_id, filename, bytes).await?;
                Ok(crate::registry::RemoteDescriptor {
                    file_id: file.id,
                    url: file.url,
                })
            })
            .await
            .map_err(|e| stage_error("upload_file", &resolved.course_relative, e))?;
        if !already_known {
            report.uploaded_assets += 1;
        }
        urls.insert(reference, descriptor.url);
    }

    let rewritten = markup::rewrite_asset_refs(&markdown, &urls, &mut warnings);
    for warning in warnings {
        warn!("[SYNC] {warning}");
        report.warnings.push(warning);
    }
    Ok(markup::markdown_to_platform_html(&rewritten, templates))
}

/// Directory relative asset references resolve against.
fn item_dir_of(config: &CourseConfig, item: &ContentItem) -> std::path::PathBuf {
    item.source_dir
        .clone()
        .unwrap_or_else(|| config.course_root.join("content"))
}

fn question_payload(question: &Question) -> QuestionPayload {
    QuestionPayload {
        name: question
            .stem
            .lines()
            .next()
            .unwrap_or_default()
            .chars()
            .take(60)
            .collect(),
        text_html: markup::markdown_to_platform_html(
            &question.stem,
            &markup::TemplateSet::default(),
        ),
        question_type: question.kind.wire_name().to_string(),
        points_possible: question.points,
        answers: question
            .answers
            .iter()
            .map(|a| AnswerPayload {
                text: a.text.clone(),
                weight: if a.correct { 100.0 } else { 0.0 },
            })
            .collect(),
    }
}

fn module_item_payload(
    item: &ContentItem,
    indent: u32,
    ids: &RemoteIds,
) -> Option<ModuleItemPayload> {
    let base = ModuleItemPayload {
        kind: String::new(),
        title: item.title.clone(),
        content_id: None,
        page_url: None,
        external_url: None,
        indent,
    };
    match &item.payload {
        ItemPayload::Page => Some(ModuleItemPayload {
            kind: "Page".to_string(),
            page_url: Some(ids.page_slugs.get(&item.identifier)?.clone()),
            ..base
        }),
        ItemPayload::Assignment(_) => Some(ModuleItemPayload {
            kind: "Assignment".to_string(),
            content_id: Some(*ids.assignment_ids.get(&item.identifier)?),
            ..base
        }),
        ItemPayload::Quiz(_) => Some(ModuleItemPayload {
            kind: "Quiz".to_string(),
            content_id: Some(*ids.quiz_ids.get(&item.identifier)?),
            ..base
        }),
        ItemPayload::Link { url } => Some(ModuleItemPayload {
            kind: "ExternalUrl".to_string(),
            external_url: Some(url.clone()),
            ..base
        }),
        ItemPayload::File { .. } => Some(ModuleItemPayload {
            kind: "File".to_string(),
            content_id: Some(*ids.file_ids.get(&item.identifier)?),
            ..base
        }),
    }
}

fn stage_error(
    operation: &str,
    subject: &str,
    source: Box<dyn std::error::Error + Send + Sync>,
) -> PipelineError {
    error!(operation, subject, error = %source, "[SYNC][ERROR] remote operation failed");
    PipelineError::Remote(RemoteOperationError::new(
        format!("{operation} ({subject})"),
        source,
    ))
}
