//! Remote LMS client.
//!
//! The [`LmsClient`] trait is the seam between the pipelines and the
//! platform API. All methods are async and return boxed errors; the trait
//! is annotated for `mockall` so tests can script the remote side without
//! a network. [`CanvasClient`] is the real implementation.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::model::Rubric;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An uploaded remote file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteFile {
    pub id: i64,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCourse {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub course_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemotePage {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub published: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteAssignment {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub points_possible: Option<f64>,
    #[serde(default)]
    pub submission_types: Vec<String>,
    #[serde(default)]
    pub grading_type: Option<String>,
    #[serde(default)]
    pub due_at: Option<String>,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub rubric: Option<Vec<RemoteCriterion>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCriterion {
    pub description: String,
    #[serde(default)]
    pub long_description: Option<String>,
    #[serde(default)]
    pub points: f64,
    #[serde(default)]
    pub ratings: Vec<RemoteRating>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteRating {
    pub description: String,
    #[serde(default)]
    pub points: f64,
    #[serde(default)]
    pub long_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteQuiz {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quiz_type: Option<String>,
    #[serde(default)]
    pub time_limit: Option<u32>,
    #[serde(default)]
    pub allowed_attempts: Option<i32>,
    #[serde(default)]
    pub shuffle_answers: bool,
    #[serde(default)]
    pub published: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteQuestion {
    #[serde(default)]
    pub question_name: String,
    pub question_text: String,
    pub question_type: String,
    #[serde(default)]
    pub points_possible: f64,
    #[serde(default)]
    pub answers: Vec<RemoteAnswer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteAnswer {
    pub text: String,
    #[serde(default)]
    pub weight: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteModule {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub position: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteModuleItem {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content_id: Option<i64>,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub indent: u32,
}

/// Outbound payloads. Plain data, owned fields.
#[derive(Debug, Clone, PartialEq)]
pub struct PagePayload {
    pub slug: String,
    pub title: String,
    pub body_html: String,
    pub published: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentPayload {
    pub name: String,
    pub description_html: String,
    pub published: bool,
    pub points_possible: Option<f64>,
    pub submission_types: Vec<String>,
    pub grading_type: Option<String>,
    pub due_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuizPayload {
    pub title: String,
    pub description_html: String,
    pub published: bool,
    pub quiz_type: String,
    pub time_limit: Option<u32>,
    pub allowed_attempts: Option<i32>,
    pub shuffle_answers: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionPayload {
    pub name: String,
    pub text_html: String,
    pub question_type: String,
    pub points_possible: f64,
    pub answers: Vec<AnswerPayload>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerPayload {
    pub text: String,
    /// 100.0 for a correct answer, 0.0 otherwise.
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleItemPayload {
    /// "Page", "Assignment", "Quiz" or "ExternalUrl".
    pub kind: String,
    pub title: String,
    pub content_id: Option<i64>,
    pub page_url: Option<String>,
    pub external_url: Option<String>,
    pub indent: u32,
}

/// The remote platform surface the pipelines need. Implemented by
/// [`CanvasClient`] and by generated mocks in tests.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait LmsClient: Send + Sync {
    async fn upload_file(
        &self,
        course_id: i64,
        filename: String,
        bytes: Vec<u8>,
    ) -> Result<RemoteFile, BoxError>;

    async fn upsert_page(&self, course_id: i64, page: PagePayload)
        -> Result<RemotePage, BoxError>;

    async fn upsert_assignment(
        &self,
        course_id: i64,
        assignment: AssignmentPayload,
    ) -> Result<RemoteAssignment, BoxError>;

    async fn attach_rubric(
        &self,
        course_id: i64,
        assignment_id: i64,
        rubric: Rubric,
    ) -> Result<(), BoxError>;

    async fn upsert_quiz(&self, course_id: i64, quiz: QuizPayload)
        -> Result<RemoteQuiz, BoxError>;

    async fn replace_quiz_questions(
        &self,
        course_id: i64,
        quiz_id: i64,
        questions: Vec<QuestionPayload>,
    ) -> Result<(), BoxError>;

    async fn upsert_module(
        &self,
        course_id: i64,
        name: String,
        position: u32,
    ) -> Result<RemoteModule, BoxError>;

    async fn set_module_items(
        &self,
        course_id: i64,
        module_id: i64,
        items: Vec<ModuleItemPayload>,
    ) -> Result<(), BoxError>;

    async fn get_course(&self, course_id: i64) -> Result<RemoteCourse, BoxError>;
    async fn list_pages(&self, course_id: i64) -> Result<Vec<RemotePage>, BoxError>;
    async fn get_page_body(&self, course_id: i64, slug: String) -> Result<RemotePage, BoxError>;
    async fn list_assignments(&self, course_id: i64) -> Result<Vec<RemoteAssignment>, BoxError>;
    async fn list_quizzes(&self, course_id: i64) -> Result<Vec<RemoteQuiz>, BoxError>;
    async fn list_quiz_questions(
        &self,
        course_id: i64,
        quiz_id: i64,
    ) -> Result<Vec<RemoteQuestion>, BoxError>;
    async fn list_modules(&self, course_id: i64) -> Result<Vec<RemoteModule>, BoxError>;
    async fn list_module_items(
        &self,
        course_id: i64,
        module_id: i64,
    ) -> Result<Vec<RemoteModuleItem>, BoxError>;
}

/// Canvas REST client.
pub struct CanvasClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl CanvasClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Build a client from `CANVAS_API_URL` and `CANVAS_API_KEY`.
    pub fn new_from_env() -> Result<Self, BoxError> {
        let base_url = std::env::var("CANVAS_API_URL")?;
        let token = std::env::var("CANVAS_API_KEY")?;
        Ok(Self::new(base_url, token))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, BoxError> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// GET a paginated collection, following `page=` until a short page.
    async fn get_paged<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, BoxError> {
        const PER_PAGE: usize = 100;
        let mut out = Vec::new();
        let mut page = 1;
        loop {
            let separator = if path.contains('?') { '&' } else { '?' };
            let url = format!("{}{}per_page={}&page={}", path, separator, PER_PAGE, page);
            let batch: Vec<T> = self.get_json(&url).await?;
            let size = batch.len();
            out.extend(batch);
            if size < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(out)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, BoxError> {
        debug!(%method, path, "canvas request");
        let response = self
            .client
            .request(method, self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn send_no_body(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<(), BoxError> {
        self.client
            .request(method, self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn rubric_json(rubric: &Rubric) -> serde_json::Value {
        let criteria: serde_json::Map<String, serde_json::Value> = rubric
            .criteria
            .iter()
            .enumerate()
            .map(|(i, criterion)| {
                let ratings: serde_json::Map<String, serde_json::Value> = criterion
                    .ratings
                    .iter()
                    .enumerate()
                    .map(|(j, rating)| {
                        (
                            j.to_string(),
                            serde_json::json!({
                                "description": rating.description,
                                "long_description": rating.long_description,
                                "points": rating.points,
                            }),
                        )
                    })
                    .collect();
                (
                    i.to_string(),
                    serde_json::json!({
                        "description": criterion.description,
                        "long_description": criterion.long_description,
                        "points": criterion.points,
                        "ratings": ratings,
                    }),
                )
            })
            .collect();
        serde_json::json!({
            "title": rubric.title,
            "points_possible": rubric.points_possible(),
            "criteria": criteria,
        })
    }
}

#[async_trait]
impl LmsClient for CanvasClient {
    /// Canvas file uploads are two-step: declare the upload, then POST the
    /// bytes to the returned target.
    async fn upload_file(
        &self,
        course_id: i64,
        filename: String,
        bytes: Vec<u8>,
    ) -> Result<RemoteFile, BoxError> {
        #[derive(Deserialize)]
        struct UploadTarget {
            upload_url: String,
            #[serde(default)]
            upload_params: serde_json::Map<String, serde_json::Value>,
        }

        let declare = serde_json::json!({
            "name": filename,
            "size": bytes.len(),
            "parent_folder_path": "course_assets",
            "on_duplicate": "overwrite",
        });
        let target: UploadTarget = self
            .send_json(
                reqwest::Method::POST,
                &format!("/courses/{course_id}/files"),
                &declare,
            )
            .await?;

        let mut form = reqwest::multipart::Form::new();
        for (key, value) in &target.upload_params {
            let text = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            form = form.text(key.clone(), text);
        }
        form = form.part(
            "file",
            reqwest::multipart::Part::bytes(bytes).file_name(filename.clone()),
        );
        let response = self
            .client
            .post(&target.upload_url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        let file: RemoteFile = response.json().await?;
        info!(file_id = file.id, %filename, "file uploaded");
        Ok(file)
    }

    /// PUT on the page slug creates the page when it does not exist yet.
    async fn upsert_page(
        &self,
        course_id: i64,
        page: PagePayload,
    ) -> Result<RemotePage, BoxError> {
        let body = serde_json::json!({
            "wiki_page": {
                "title": page.title,
                "body": page.body_html,
                "published": page.published,
            }
        });
        self.send_json(
            reqwest::Method::PUT,
            &format!("/courses/{}/pages/{}", course_id, page.slug),
            &body,
        )
        .await
    }

    async fn upsert_assignment(
        &self,
        course_id: i64,
        assignment: AssignmentPayload,
    ) -> Result<RemoteAssignment, BoxError> {
        let existing: Vec<RemoteAssignment> = self
            .get_paged(&format!(
                "/courses/{}/assignments?search_term={}",
                course_id,
                urlencode(&assignment.name)
            ))
            .await?;
        let body = serde_json::json!({
            "assignment": {
                "name": assignment.name,
                "description": assignment.description_html,
                "published": assignment.published,
                "points_possible": assignment.points_possible,
                "submission_types": assignment.submission_types,
                "grading_type": assignment.grading_type,
                "due_at": assignment.due_at,
            }
        });
        match existing.iter().find(|a| a.name == assignment.name) {
            Some(found) => {
                self.send_json(
                    reqwest::Method::PUT,
                    &format!("/courses/{}/assignments/{}", course_id, found.id),
                    &body,
                )
                .await
            }
            None => {
                self.send_json(
                    reqwest::Method::POST,
                    &format!("/courses/{course_id}/assignments"),
                    &body,
                )
                .await
            }
        }
    }

    async fn attach_rubric(
        &self,
        course_id: i64,
        assignment_id: i64,
        rubric: Rubric,
    ) -> Result<(), BoxError> {
        let body = serde_json::json!({
            "rubric": Self::rubric_json(&rubric),
            "rubric_association": {
                "association_type": "Assignment",
                "association_id": assignment_id,
                "use_for_grading": true,
                "purpose": "grading",
            }
        });
        self.send_no_body(
            reqwest::Method::POST,
            &format!("/courses/{course_id}/rubrics"),
            &body,
        )
        .await
    }

    async fn upsert_quiz(&self, course_id: i64, quiz: QuizPayload) -> Result<RemoteQuiz, BoxError> {
        let existing: Vec<RemoteQuiz> = self
            .get_paged(&format!(
                "/courses/{}/quizzes?search_term={}",
                course_id,
                urlencode(&quiz.title)
            ))
            .await?;
        let body = serde_json::json!({
            "quiz": {
                "title": quiz.title,
                "description": quiz.description_html,
                "published": quiz.published,
                "quiz_type": quiz.quiz_type,
                "time_limit": quiz.time_limit,
                "allowed_attempts": quiz.allowed_attempts,
                "shuffle_answers": quiz.shuffle_answers,
            }
        });
        match existing.iter().find(|q| q.title == quiz.title) {
            Some(found) => {
                self.send_json(
                    reqwest::Method::PUT,
                    &format!("/courses/{}/quizzes/{}", course_id, found.id),
                    &body,
                )
                .await
            }
            None => {
                self.send_json(
                    reqwest::Method::POST,
                    &format!("/courses/{course_id}/quizzes"),
                    &body,
                )
                .await
            }
        }
    }

    /// Questions are replaced wholesale: delete what is there, post the
    /// new set. Keeps the remote an exact render of the source.
    async fn replace_quiz_questions(
        &self,
        course_id: i64,
        quiz_id: i64,
        questions: Vec<QuestionPayload>,
    ) -> Result<(), BoxError> {
        #[derive(Deserialize)]
        struct ExistingQuestion {
            id: i64,
        }
        let existing: Vec<ExistingQuestion> = self
            .get_paged(&format!("/courses/{course_id}/quizzes/{quiz_id}/questions"))
            .await?;
        for question in existing {
            self.client
                .delete(self.url(&format!(
                    "/courses/{course_id}/quizzes/{quiz_id}/questions/{}",
                    question.id
                )))
                .bearer_auth(&self.token)
                .send()
                .await?
                .error_for_status()?;
        }
        for (position, question) in questions.iter().enumerate() {
            let answers: Vec<serde_json::Value> = question
                .answers
                .iter()
                .map(|a| {
                    serde_json::json!({
                        "answer_text": a.text,
                        "answer_weight": a.weight,
                    })
                })
                .collect();
            let body = serde_json::json!({
                "question": {
                    "question_name": question.name,
                    "question_text": question.text_html,
                    "question_type": question.question_type,
                    "points_possible": question.points_possible,
                    "position": position + 1,
                    "answers": answers,
                }
            });
            self.send_no_body(
                reqwest::Method::POST,
                &format!("/courses/{course_id}/quizzes/{quiz_id}/questions"),
                &body,
            )
            .await?;
        }
        Ok(())
    }

    async fn upsert_module(
        &self,
        course_id: i64,
        name: String,
        position: u32,
    ) -> Result<RemoteModule, BoxError> {
        let existing: Vec<RemoteModule> =
            self.get_paged(&format!("/courses/{course_id}/modules")).await?;
        let body = serde_json::json!({
            "module": { "name": name, "position": position }
        });
        match existing.iter().find(|m| m.name == name) {
            Some(found) => {
                self.send_json(
                    reqwest::Method::PUT,
                    &format!("/courses/{}/modules/{}", course_id, found.id),
                    &body,
                )
                .await
            }
            None => {
                self.send_json(
                    reqwest::Method::POST,
                    &format!("/courses/{course_id}/modules"),
                    &body,
                )
                .await
            }
        }
    }

    async fn set_module_items(
        &self,
        course_id: i64,
        module_id: i64,
        items: Vec<ModuleItemPayload>,
    ) -> Result<(), BoxError> {
        #[derive(Deserialize)]
        struct ExistingItem {
            id: i64,
        }
        let existing: Vec<ExistingItem> = self
            .get_paged(&format!("/courses/{course_id}/modules/{module_id}/items"))
            .await?;
        for item in existing {
            self.client
                .delete(self.url(&format!(
                    "/courses/{course_id}/modules/{module_id}/items/{}",
                    item.id
                )))
                .bearer_auth(&self.token)
                .send()
                .await?
                .error_for_status()?;
        }
        for (position, item) in items.iter().enumerate() {
            let body = serde_json::json!({
                "module_item": {
                    "title": item.title,
                    "type": item.kind,
                    "content_id": item.content_id,
                    "page_url": item.page_url,
                    "external_url": item.external_url,
                    "indent": item.indent,
                    "position": position + 1,
                }
            });
            self.send_no_body(
                reqwest::Method::POST,
                &format!("/courses/{course_id}/modules/{module_id}/items"),
                &body,
            )
            .await?;
        }
        Ok(())
    }

    async fn get_course(&self, course_id: i64) -> Result<RemoteCourse, BoxError> {
        self.get_json(&format!("/courses/{course_id}")).await
    }

    async fn list_pages(&self, course_id: i64) -> Result<Vec<RemotePage>, BoxError> {
        self.get_paged(&format!("/courses/{course_id}/pages")).await
    }

    async fn get_page_body(&self, course_id: i64, slug: String) -> Result<RemotePage, BoxError> {
        self.get_json(&format!("/courses/{course_id}/pages/{slug}"))
            .await
    }

    async fn list_assignments(&self, course_id: i64) -> Result<Vec<RemoteAssignment>, BoxError> {
        self.get_paged(&format!(
            "/courses/{course_id}/assignments?include[]=rubric"
        ))
        .await
    }

    async fn list_quizzes(&self, course_id: i64) -> Result<Vec<RemoteQuiz>, BoxError> {
        self.get_paged(&format!("/courses/{course_id}/quizzes")).await
    }

    async fn list_quiz_questions(
        &self,
        course_id: i64,
        quiz_id: i64,
    ) -> Result<Vec<RemoteQuestion>, BoxError> {
        self.get_paged(&format!("/courses/{course_id}/quizzes/{quiz_id}/questions"))
            .await
    }

    async fn list_modules(&self, course_id: i64) -> Result<Vec<RemoteModule>, BoxError> {
        self.get_paged(&format!("/courses/{course_id}/modules")).await
    }

    async fn list_module_items(
        &self,
        course_id: i64,
        module_id: i64,
    ) -> Result<Vec<RemoteModuleItem>, BoxError> {
        self.get_paged(&format!("/courses/{course_id}/modules/{module_id}/items"))
            .await
    }
}

fn urlencode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push_str("%20"),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
