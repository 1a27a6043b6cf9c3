//! Remote course -> author source tree.
//!
//! Fetches pages, assignments, quizzes and modules through the LMS
//! client, converts platform HTML back into author markdown, and writes
//! the result out with `source::write_course`. Remote file links whose
//! bytes are already tracked by the asset registry are rewritten to
//! local paths; unknown remote files keep their URLs so nothing is
//! silently lost.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use crate::errors::{PipelineError, RemoteOperationError};
use crate::markup;
use crate::model::{
    AssignmentSettings, ContentItem, Course, Criterion, ItemPayload, Membership, Question,
    QuestionKind, QuizData, QuizSettings, Rating, Rubric, RubricRef, slugify,
};
use crate::registry::AssetRegistry;
use crate::remote::{LmsClient, RemoteCriterion, RemoteQuestion};
use crate::rubric;
use crate::source;

/// Outcome of a remote import run.
#[derive(Debug, Default)]
pub struct ImportSummary {
    pub pages: usize,
    pub assignments: usize,
    pub quizzes: usize,
    pub modules: usize,
    pub skipped: Vec<String>,
    pub rubric_dedup: rubric::DedupSummary,
}

pub async fn import_remote_course<C: LmsClient>(
    client: &C,
    course_id: i64,
    course_root: &Path,
    output_dir: &Path,
) -> Result<ImportSummary, PipelineError> {
    info!(course_id, output = %output_dir.display(), "[IMPORT] importing remote course");
    let mut summary = ImportSummary::default();
    let registry = AssetRegistry::load(course_root);
    let localise = |markdown: &str| {
        markup::rewrite_remote_file_links(markdown, &|file_id| {
            registry.path_for_remote_id(file_id).map(str::to_string)
        })
    };

    let remote_course = client
        .get_course(course_id)
        .await
        .map_err(|e| remote_error("get_course", e))?;
    let mut course = Course {
        title: remote_course.name,
        code: remote_course.course_code,
        ..Default::default()
    };

    for page in client
        .list_pages(course_id)
        .await
        .map_err(|e| remote_error("list_pages", e))?
    {
        let full = client
            .get_page_body(course_id, page.url.clone())
            .await
            .map_err(|e| remote_error("get_page_body", e))?;
        let body_html = full.body.unwrap_or_default();
        let stripped = markup::strip_platform_wrappers(&body_html);
        course.items.push(ContentItem {
            identifier: page.url.clone(),
            title: full.title,
            body: localise(&markup::platform_html_to_markdown(&stripped)),
            published: full.published,
            memberships: vec![],
            position: None,
            payload: ItemPayload::Page,
            source_dir: None,
        });
        summary.pages += 1;
    }
    info!(pages = summary.pages, "[IMPORT] pages fetched");

    let mut assignment_ids: HashMap<i64, String> = HashMap::new();
    for assignment in client
        .list_assignments(course_id)
        .await
        .map_err(|e| remote_error("list_assignments", e))?
    {
        let identifier = slugify(&assignment.name);
        assignment_ids.insert(assignment.id, identifier.clone());
        let description = assignment.description.unwrap_or_default();
        let stripped = markup::strip_platform_wrappers(&description);
        course.items.push(ContentItem {
            identifier,
            title: assignment.name,
            body: localise(&markup::platform_html_to_markdown(&stripped)),
            published: assignment.published,
            memberships: vec![],
            position: None,
            payload: ItemPayload::Assignment(AssignmentSettings {
                points_possible: assignment.points_possible,
                submission_types: assignment.submission_types,
                grading_type: assignment.grading_type,
                due_at: assignment.due_at,
                rubric: assignment
                    .rubric
                    .map(|criteria| RubricRef::Inline(rubric_from_remote(criteria))),
            }),
            source_dir: None,
        });
        summary.assignments += 1;
    }
    info!(assignments = summary.assignments, "[IMPORT] assignments fetched");

    let mut quiz_ids: HashMap<i64, String> = HashMap::new();
    for quiz in client
        .list_quizzes(course_id)
        .await
        .map_err(|e| remote_error("list_quizzes", e))?
    {
        let identifier = slugify(&quiz.title);
        quiz_ids.insert(quiz.id, identifier.clone());
        let remote_questions = client
            .list_quiz_questions(course_id, quiz.id)
            .await
            .map_err(|e| remote_error("list_quiz_questions", e))?;
        let mut questions = Vec::new();
        for rq in remote_questions {
            match question_from_remote(&rq) {
                Some(question) => questions.push(question),
                None => {
                    let message = format!(
                        "quiz `{}`: question type `{}` has no source form, skipped",
                        quiz.title, rq.question_type
                    );
                    warn!("[IMPORT] {message}");
                    summary.skipped.push(message);
                }
            }
        }
        let description = quiz.description.unwrap_or_default();
        let stripped = markup::strip_platform_wrappers(&description);
        course.items.push(ContentItem {
            identifier,
            title: quiz.title,
            body: String::new(),
            published: quiz.published,
            memberships: vec![],
            position: None,
            payload: ItemPayload::Quiz(QuizData {
                settings: QuizSettings {
                    quiz_type: quiz.quiz_type.unwrap_or_else(|| "assignment".to_string()),
                    time_limit: quiz.time_limit,
                    allowed_attempts: quiz.allowed_attempts,
                    shuffle_answers: quiz.shuffle_answers,
                    points_per_question: None,
                },
                description: localise(&markup::platform_html_to_markdown(&stripped)),
                questions,
                bank_refs: vec![],
            }),
            source_dir: None,
        });
        summary.quizzes += 1;
    }
    info!(quizzes = summary.quizzes, "[IMPORT] quizzes fetched");

    for module in client
        .list_modules(course_id)
        .await
        .map_err(|e| remote_error("list_modules", e))?
    {
        let remote_items = client
            .list_module_items(course_id, module.id)
            .await
            .map_err(|e| remote_error("list_module_items", e))?;
        let mut placed = 0u32;
        for remote_item in remote_items {
            let identifier = match remote_item.kind.as_str() {
                "Page" => remote_item.page_url.clone(),
                "Assignment" => remote_item
                    .content_id
                    .and_then(|id| assignment_ids.get(&id).cloned()),
                "Quiz" => remote_item.content_id.and_then(|id| quiz_ids.get(&id).cloned()),
                "ExternalUrl" => {
                    // External links only exist as module items remotely;
                    // materialise a link stub for each.
                    let url = match remote_item.external_url.clone() {
                        Some(url) => url,
                        None => continue,
                    };
                    let identifier = slugify(&remote_item.title);
                    if course.item(&identifier).is_none() {
                        course.items.push(ContentItem {
                            identifier: identifier.clone(),
                            title: remote_item.title.clone(),
                            body: String::new(),
                            published: true,
                            memberships: vec![],
                            position: None,
                            payload: ItemPayload::Link { url },
                            source_dir: None,
                        });
                    }
                    Some(identifier)
                }
                other => {
                    let message = format!(
                        "module `{}`: item `{}` of type `{other}` has no source form, skipped",
                        module.name, remote_item.title
                    );
                    warn!("[IMPORT] {message}");
                    summary.skipped.push(message);
                    None
                }
            };
            let Some(identifier) = identifier else {
                continue;
            };
            placed += 1;
            if let Some(item) = course.items.iter_mut().find(|i| i.identifier == identifier) {
                item.memberships.push(Membership {
                    module: module.name.clone(),
                    position: Some(placed),
                    indent: remote_item.indent,
                });
            }
        }
        summary.modules += 1;
    }
    info!(modules = summary.modules, "[IMPORT] modules fetched");

    source::write_course(&course, output_dir)?;
    summary.rubric_dedup = rubric::deduplicate_rubrics(output_dir)?;
    info!(
        pages = summary.pages,
        assignments = summary.assignments,
        quizzes = summary.quizzes,
        modules = summary.modules,
        skipped = summary.skipped.len(),
        "[IMPORT] remote import complete"
    );
    Ok(summary)
}

fn rubric_from_remote(criteria: Vec<RemoteCriterion>) -> Rubric {
    Rubric {
        title: None,
        criteria: criteria
            .into_iter()
            .map(|c| Criterion {
                description: c.description,
                long_description: c.long_description,
                points: c.points,
                ratings: c
                    .ratings
                    .into_iter()
                    .map(|r| Rating {
                        description: r.description,
                        points: r.points,
                        long_description: r.long_description,
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn question_from_remote(rq: &RemoteQuestion) -> Option<Question> {
    let kind = QuestionKind::from_wire_name(&rq.question_type)?;
    let stripped = markup::strip_platform_wrappers(&rq.question_text);
    Some(Question {
        kind,
        stem: markup::platform_html_to_markdown(&stripped),
        answers: rq
            .answers
            .iter()
            .map(|a| crate::model::Answer {
                text: a.text.clone(),
                correct: a.weight > 0.0,
            })
            .collect(),
        points: if rq.points_possible > 0.0 {
            rq.points_possible
        } else {
            1.0
        },
    })
}

fn remote_error(
    operation: &str,
    source: Box<dyn std::error::Error + Send + Sync>,
) -> PipelineError {
    PipelineError::Remote(RemoteOperationError::new(operation.to_string(), source))
}
