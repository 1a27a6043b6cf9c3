//! The plain-text quiz format authored in `.quiz/index.md` bodies and
//! `question-banks/*.bank.md` files.
//!
//! Grammar, line oriented:
//! - everything before the first numbered line is the quiz description
//! - `1. stem` or `1) stem` starts a question; bare following lines
//!   continue the stem
//! - `a) choice` is a multiple-choice option, `*a)` marks it correct
//! - `[*] choice` / `[ ] choice` are multiple-answers options
//! - `* accepted` is one accepted short-answer string
//! - a line of `####` marks an essay question
//! - a line of `^^^^` marks a file-upload question
//!
//! True/false is not written distinctly: a two-choice question whose
//! options are exactly True and False is recognised as such.

use regex::Regex;

use crate::model::{Answer, Question, QuestionKind};

/// Result of parsing one quiz body.
#[derive(Debug, Clone, Default)]
pub struct ParsedQuiz {
    pub description: String,
    pub questions: Vec<Question>,
}

/// Parse quiz text into a description and questions. Never fails: lines
/// that fit no rule are treated as stem/description continuations, which
/// is what an author editing by hand expects.
pub fn parse(text: &str) -> ParsedQuiz {
    let question_start = Regex::new(r"^(\d+)[.)]\s+(.*)$").unwrap();
    let choice = Regex::new(r"^(\*?)([a-z])\)\s+(.*)$").unwrap();
    let multi = Regex::new(r"^\[([ *])\]\s+(.*)$").unwrap();
    let short = Regex::new(r"^\*\s+(.*)$").unwrap();

    let mut description_lines: Vec<&str> = Vec::new();
    let mut questions: Vec<RawQuestion> = Vec::new();
    let mut current: Option<RawQuestion> = None;

    for line in text.lines() {
        let trimmed = line.trim_end();
        if let Some(caps) = question_start.captures(trimmed) {
            if let Some(done) = current.take() {
                questions.push(done);
            }
            current = Some(RawQuestion::new(caps[2].to_string()));
            continue;
        }
        let Some(q) = current.as_mut() else {
            description_lines.push(trimmed);
            continue;
        };
        if trimmed.trim() == "####" {
            q.essay = true;
        } else if trimmed.trim() == "^^^^" {
            q.file_upload = true;
        } else if let Some(caps) = choice.captures(trimmed.trim_start()) {
            q.choices.push(Answer {
                text: caps[3].trim().to_string(),
                correct: &caps[1] == "*",
            });
        } else if let Some(caps) = multi.captures(trimmed.trim_start()) {
            q.multi.push(Answer {
                text: caps[2].trim().to_string(),
                correct: &caps[1] == "*",
            });
        } else if let Some(caps) = short.captures(trimmed.trim_start()) {
            q.short.push(caps[1].trim().to_string());
        } else if q.choices.is_empty()
            && q.multi.is_empty()
            && q.short.is_empty()
            && !q.essay
            && !q.file_upload
        {
            // Stem continuation, blank lines included.
            q.stem.push('\n');
            q.stem.push_str(trimmed);
        }
    }
    if let Some(done) = current.take() {
        questions.push(done);
    }

    ParsedQuiz {
        description: join_description(&description_lines),
        questions: questions.into_iter().map(RawQuestion::finish).collect(),
    }
}

/// Render questions back to the text format. `parse(render(q)) == q`.
pub fn render(description: &str, questions: &[Question]) -> String {
    let mut out = String::new();
    if !description.trim().is_empty() {
        out.push_str(description.trim_end());
        out.push_str("\n\n");
    }
    for (index, question) in questions.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", index + 1, question.stem.trim_end()));
        match question.kind {
            QuestionKind::MultipleChoice | QuestionKind::TrueFalse => {
                for (i, answer) in question.answers.iter().enumerate() {
                    let letter = (b'a' + (i % 26) as u8) as char;
                    let marker = if answer.correct { "*" } else { "" };
                    out.push_str(&format!("{}{}) {}\n", marker, letter, answer.text));
                }
            }
            QuestionKind::MultipleAnswers => {
                for answer in &question.answers {
                    let mark = if answer.correct { '*' } else { ' ' };
                    out.push_str(&format!("[{}] {}\n", mark, answer.text));
                }
            }
            QuestionKind::ShortAnswer => {
                for answer in &question.answers {
                    out.push_str(&format!("* {}\n", answer.text));
                }
            }
            QuestionKind::Essay => out.push_str("####\n"),
            QuestionKind::FileUpload => out.push_str("^^^^\n"),
        }
        out.push('\n');
    }
    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}

fn join_description(lines: &[&str]) -> String {
    let mut text = lines.join("\n");
    text = text.trim().to_string();
    text
}

struct RawQuestion {
    stem: String,
    choices: Vec<Answer>,
    multi: Vec<Answer>,
    short: Vec<String>,
    essay: bool,
    file_upload: bool,
}

impl RawQuestion {
    fn new(stem: String) -> Self {
        Self {
            stem,
            choices: Vec::new(),
            multi: Vec::new(),
            short: Vec::new(),
            essay: false,
            file_upload: false,
        }
    }

    fn finish(self) -> Question {
        let stem = self.stem.trim().to_string();
        if self.essay {
            return Question {
                kind: QuestionKind::Essay,
                stem,
                answers: vec![],
                points: 1.0,
            };
        }
        if self.file_upload {
            return Question {
                kind: QuestionKind::FileUpload,
                stem,
                answers: vec![],
                points: 1.0,
            };
        }
        if !self.multi.is_empty() {
            return Question {
                kind: QuestionKind::MultipleAnswers,
                stem,
                answers: self.multi,
                points: 1.0,
            };
        }
        if !self.choices.is_empty() {
            let kind = if is_true_false(&self.choices) {
                QuestionKind::TrueFalse
            } else {
                QuestionKind::MultipleChoice
            };
            return Question {
                kind,
                stem,
                answers: self.choices,
                points: 1.0,
            };
        }
        if !self.short.is_empty() {
            return Question {
                kind: QuestionKind::ShortAnswer,
                stem,
                answers: self
                    .short
                    .into_iter()
                    .map(|text| Answer { text, correct: true })
                    .collect(),
                points: 1.0,
            };
        }
        // No answer lines at all: treat as an essay prompt.
        Question {
            kind: QuestionKind::Essay,
            stem,
            answers: vec![],
            points: 1.0,
        }
    }
}

fn is_true_false(choices: &[Answer]) -> bool {
    choices.len() == 2
        && choices
            .iter()
            .all(|c| c.text.eq_ignore_ascii_case("true") || c.text.eq_ignore_ascii_case("false"))
        && !choices[0].text.eq_ignore_ascii_case(&choices[1].text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Read chapter one before attempting this quiz.

1. What is the capital of France?
a) London
*b) Paris
c) Berlin

2. Select all prime numbers.
[*] 2
[ ] 4
[*] 5

3. Water boils at 100 degrees Celsius at sea level.
*a) True
b) False

4. Name the author of \"Dune\".
* Frank Herbert
* Herbert

5. Discuss the themes of the first chapter.
####

6. Upload your annotated bibliography.
^^^^
";

    #[test]
    fn parses_all_question_kinds() {
        let parsed = parse(SAMPLE);
        assert_eq!(
            parsed.description,
            "Read chapter one before attempting this quiz."
        );
        let kinds: Vec<_> = parsed.questions.iter().map(|q| q.kind).collect();
        assert_eq!(
            kinds,
            vec![
                QuestionKind::MultipleChoice,
                QuestionKind::MultipleAnswers,
                QuestionKind::TrueFalse,
                QuestionKind::ShortAnswer,
                QuestionKind::Essay,
                QuestionKind::FileUpload,
            ]
        );
        assert!(parsed.questions[0].answers[1].correct);
        assert!(!parsed.questions[0].answers[0].correct);
        assert_eq!(parsed.questions[3].answers.len(), 2);
        assert!(parsed.questions[3].answers.iter().all(|a| a.correct));
    }

    #[test]
    fn render_then_parse_is_identity() {
        let parsed = parse(SAMPLE);
        let rendered = render(&parsed.description, &parsed.questions);
        let reparsed = parse(&rendered);
        assert_eq!(reparsed.description, parsed.description);
        assert_eq!(reparsed.questions.len(), parsed.questions.len());
        for (a, b) in reparsed.questions.iter().zip(&parsed.questions) {
            assert_eq!(a.kind, b.kind);
            assert_eq!(a.stem, b.stem);
            assert_eq!(a.answers, b.answers);
        }
    }

    #[test]
    fn multiline_stem_is_preserved() {
        let text = "1. Consider the following code:\n    let x = 1;\nWhat is x?\na) 0\n*b) 1\n";
        let parsed = parse(text);
        assert_eq!(parsed.questions.len(), 1);
        assert!(parsed.questions[0].stem.contains("let x = 1;"));
        assert!(parsed.questions[0].stem.contains("What is x?"));
    }

    #[test]
    fn two_arbitrary_choices_are_not_true_false() {
        let parsed = parse("1. Pick one.\n*a) Yes\nb) No\n");
        assert_eq!(parsed.questions[0].kind, QuestionKind::MultipleChoice);
    }
}
