//! Canonical course model.
//!
//! Every pipeline in the crate converges on these types: the source tree
//! loads into a [`Course`], the sync pipeline renders one, the cartridge
//! exporter serialises one and the importer reconstructs one. An item's
//! kind is derived from its payload variant and is never stored as a
//! separate field.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A whole course: content items, module structure, shared question
/// banks and shared rubrics.
#[derive(Debug, Clone, Default)]
pub struct Course {
    pub title: String,
    pub code: Option<String>,
    pub items: Vec<ContentItem>,
    pub modules: Vec<Module>,
    pub banks: Vec<QuestionBank>,
    pub shared_rubrics: BTreeMap<String, Rubric>,
}

impl Course {
    pub fn item(&self, identifier: &str) -> Option<&ContentItem> {
        self.items.iter().find(|i| i.identifier == identifier)
    }

    pub fn bank(&self, slug: &str) -> Option<&QuestionBank> {
        self.banks.iter().find(|b| b.slug == slug)
    }
}

/// The five content kinds. Derived from [`ItemPayload`], never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Page,
    Assignment,
    Quiz,
    Link,
    File,
}

impl ContentKind {
    /// Folder suffix used in the author source tree, e.g. `intro.page/`.
    pub fn folder_suffix(self) -> &'static str {
        match self {
            ContentKind::Page => "page",
            ContentKind::Assignment => "assignment",
            ContentKind::Quiz => "quiz",
            ContentKind::Link => "link",
            ContentKind::File => "file",
        }
    }

    pub fn from_folder_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "page" => Some(ContentKind::Page),
            "assignment" => Some(ContentKind::Assignment),
            "quiz" => Some(ContentKind::Quiz),
            "link" => Some(ContentKind::Link),
            "file" => Some(ContentKind::File),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.folder_suffix())
    }
}

/// One authored content item.
#[derive(Debug, Clone)]
pub struct ContentItem {
    /// Stable identity that survives export/import round trips. Defaults
    /// to the slug of the source folder name.
    pub identifier: String,
    pub title: String,
    /// Authored markdown body. Empty for links and file stubs.
    pub body: String,
    pub published: bool,
    /// Which modules this item appears in, and where.
    pub memberships: Vec<Membership>,
    /// Explicit ordering override from frontmatter; wins over the numeric
    /// folder-name prefix and lexical fallback.
    pub position: Option<u32>,
    pub payload: ItemPayload,
    /// Source folder this item was loaded from, when it came from disk.
    /// Relative asset references resolve against it.
    pub source_dir: Option<std::path::PathBuf>,
}

impl ContentItem {
    pub fn kind(&self) -> ContentKind {
        match self.payload {
            ItemPayload::Page => ContentKind::Page,
            ItemPayload::Assignment(_) => ContentKind::Assignment,
            ItemPayload::Quiz(_) => ContentKind::Quiz,
            ItemPayload::Link { .. } => ContentKind::Link,
            ItemPayload::File { .. } => ContentKind::File,
        }
    }
}

/// Variant-specific settings. The variant itself is the item's kind.
#[derive(Debug, Clone)]
pub enum ItemPayload {
    Page,
    Assignment(AssignmentSettings),
    Quiz(QuizData),
    Link { url: String },
    File { path: String },
}

/// Placement of an item inside a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(default)]
    pub indent: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points_possible: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub submission_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grading_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", skip_deserializing)]
    pub rubric: Option<RubricRef>,
}

/// A rubric attached to an assignment: either written out inline in the
/// item folder, or a reference into the shared `rubrics/` directory.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RubricRef {
    Shared(String),
    Inline(Rubric),
}

#[derive(Debug, Clone, Default)]
pub struct QuizData {
    pub settings: QuizSettings,
    /// Markdown shown above the questions. Encoded in the QTI
    /// `objectives` block on export so it survives round trips.
    pub description: String,
    pub questions: Vec<Question>,
    pub bank_refs: Vec<BankRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSettings {
    #[serde(default = "default_quiz_type")]
    pub quiz_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_attempts: Option<i32>,
    #[serde(default)]
    pub shuffle_answers: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points_per_question: Option<f64>,
}

fn default_quiz_type() -> String {
    "assignment".to_string()
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            quiz_type: default_quiz_type(),
            time_limit: None,
            allowed_attempts: None,
            shuffle_answers: false,
            points_per_question: None,
        }
    }
}

/// A draw from a shared question bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankRef {
    pub bank: String,
    pub draw: u32,
    #[serde(default = "default_points_per_question")]
    pub points_per_question: f64,
}

fn default_points_per_question() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuestionKind {
    MultipleChoice,
    MultipleAnswers,
    TrueFalse,
    ShortAnswer,
    Essay,
    FileUpload,
}

impl QuestionKind {
    /// Wire name used in QTI metadata and the remote API.
    pub fn wire_name(self) -> &'static str {
        match self {
            QuestionKind::MultipleChoice => "multiple_choice_question",
            QuestionKind::MultipleAnswers => "multiple_answers_question",
            QuestionKind::TrueFalse => "true_false_question",
            QuestionKind::ShortAnswer => "short_answer_question",
            QuestionKind::Essay => "essay_question",
            QuestionKind::FileUpload => "file_upload_question",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "multiple_choice_question" => Some(QuestionKind::MultipleChoice),
            "multiple_answers_question" => Some(QuestionKind::MultipleAnswers),
            "true_false_question" => Some(QuestionKind::TrueFalse),
            "short_answer_question" => Some(QuestionKind::ShortAnswer),
            "essay_question" => Some(QuestionKind::Essay),
            "file_upload_question" => Some(QuestionKind::FileUpload),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Question {
    pub kind: QuestionKind,
    /// Question stem, markdown.
    pub stem: String,
    pub answers: Vec<Answer>,
    pub points: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub correct: bool,
}

/// A shared question bank, authored as `question-banks/<slug>.bank.md`.
#[derive(Debug, Clone)]
pub struct QuestionBank {
    pub slug: String,
    pub title: String,
    pub questions: Vec<Question>,
}

/// A module: an ordered grouping of items.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub title: String,
    pub position: u32,
    /// Item identifiers in display order.
    pub items: Vec<ModuleItem>,
}

#[derive(Debug, Clone)]
pub struct ModuleItem {
    pub identifier: String,
    pub indent: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
}

impl Rubric {
    pub fn points_possible(&self) -> f64 {
        self.criteria.iter().map(|c| c.points).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
    #[serde(default)]
    pub points: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ratings: Vec<Rating>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub description: String,
    #[serde(default)]
    pub points: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
}

/// Lowercase-and-hyphenate a title into a filesystem/identifier slug.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut last_hyphen = true;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("untitled");
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_derived_from_payload() {
        let item = ContentItem {
            identifier: "welcome".into(),
            title: "Welcome".into(),
            body: String::new(),
            published: true,
            memberships: vec![],
            position: None,
            payload: ItemPayload::Quiz(QuizData::default()),
            source_dir: None,
        };
        assert_eq!(item.kind(), ContentKind::Quiz);
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Week 1: Intro & Setup!"), "week-1-intro-setup");
        assert_eq!(slugify("  --  "), "untitled");
    }

    #[test]
    fn folder_suffix_round_trips() {
        for kind in [
            ContentKind::Page,
            ContentKind::Assignment,
            ContentKind::Quiz,
            ContentKind::Link,
            ContentKind::File,
        ] {
            assert_eq!(ContentKind::from_folder_suffix(kind.folder_suffix()), Some(kind));
        }
    }
}
