//! QTI assessment encoding and decoding.
//!
//! The quiz description is carried in the assessment `objectives` block,
//! and the [`INLINE_QUESTIONS_FLAG`](super::INLINE_QUESTIONS_FLAG)
//! metadata field records whether questions were authored inline. Bank
//! draws are encoded as selection/ordering sections referencing the bank
//! by slug.

use std::collections::BTreeMap;

use crate::errors::ResourceDecodeError;
use crate::markup;
use crate::model::{Answer, BankRef, Question, QuestionKind, QuizData};

use super::{parse_xml, XmlBuilder, XmlNode, INLINE_QUESTIONS_FLAG, NS_QTI};

/// Encode a quiz (or a question bank, via [`encode_objectbank`]) as a
/// QTI assessment document.
pub fn encode_assessment(identifier: &str, title: &str, quiz: &QuizData) -> String {
    let mut xml = XmlBuilder::new();
    xml.open("questestinterop", &[("xmlns", NS_QTI)]);
    xml.open("assessment", &[("ident", identifier), ("title", title)]);

    xml.open("qtimetadata", &[]);
    metadata_field(&mut xml, "cc_profile", "cc.exam.v0p1");
    metadata_field(&mut xml, "quiz_type", &quiz.settings.quiz_type);
    metadata_field(
        &mut xml,
        INLINE_QUESTIONS_FLAG,
        if quiz.bank_refs.is_empty() { "true" } else { "false" },
    );
    if let Some(limit) = quiz.settings.time_limit {
        metadata_field(&mut xml, "qmd_timelimit", &limit.to_string());
    }
    if let Some(attempts) = quiz.settings.allowed_attempts {
        metadata_field(&mut xml, "allowed_attempts", &attempts.to_string());
    }
    if quiz.settings.shuffle_answers {
        metadata_field(&mut xml, "shuffle_answers", "true");
    }
    if let Some(points) = quiz.settings.points_per_question {
        metadata_field(&mut xml, "points_per_question", &points.to_string());
    }
    xml.close("qtimetadata");

    if !quiz.description.trim().is_empty() {
        xml.open("objectives", &[]);
        xml.open("material", &[]);
        xml.leaf(
            "mattext",
            &[("texttype", "text/html")],
            Some(&markup::markdown_to_platform_html(
                &quiz.description,
                &markup::TemplateSet::default(),
            )),
        );
        xml.close("material");
        xml.close("objectives");
    }

    xml.open("section", &[("ident", "root_section")]);
    for (index, question) in quiz.questions.iter().enumerate() {
        encode_question(&mut xml, index, question);
    }
    for (index, bank_ref) in quiz.bank_refs.iter().enumerate() {
        encode_bank_ref(&mut xml, index, bank_ref);
    }
    xml.close("section");

    xml.close("assessment");
    xml.close("questestinterop");
    xml.finish()
}

/// Encode a shared question bank as a QTI objectbank document.
pub fn encode_objectbank(identifier: &str, title: &str, questions: &[Question]) -> String {
    let mut xml = XmlBuilder::new();
    xml.open("questestinterop", &[("xmlns", NS_QTI)]);
    xml.open("objectbank", &[("ident", identifier)]);
    xml.open("qtimetadata", &[]);
    metadata_field(&mut xml, "bank_title", title);
    xml.close("qtimetadata");
    for (index, question) in questions.iter().enumerate() {
        encode_question(&mut xml, index, question);
    }
    xml.close("objectbank");
    xml.close("questestinterop");
    xml.finish()
}

fn metadata_field(xml: &mut XmlBuilder, label: &str, entry: &str) {
    xml.open("qtimetadatafield", &[]);
    xml.leaf("fieldlabel", &[], Some(label));
    xml.leaf("fieldentry", &[], Some(entry));
    xml.close("qtimetadatafield");
}

fn encode_question(xml: &mut XmlBuilder, index: usize, question: &Question) {
    let ident = format!("question_{}", index + 1);
    let title = format!("Question {}", index + 1);
    xml.open("item", &[("ident", ident.as_str()), ("title", title.as_str())]);

    xml.open("itemmetadata", &[]);
    xml.open("qtimetadata", &[]);
    metadata_field(xml, "question_type", question.kind.wire_name());
    metadata_field(xml, "points_possible", &question.points.to_string());
    xml.close("qtimetadata");
    xml.close("itemmetadata");

    xml.open("presentation", &[]);
    xml.open("material", &[]);
    xml.leaf(
        "mattext",
        &[("texttype", "text/html")],
        Some(&markup::markdown_to_platform_html(
            &question.stem,
            &markup::TemplateSet::default(),
        )),
    );
    xml.close("material");

    match question.kind {
        QuestionKind::MultipleChoice | QuestionKind::TrueFalse => {
            encode_choices(xml, &question.answers, "Single");
        }
        QuestionKind::MultipleAnswers => {
            encode_choices(xml, &question.answers, "Multiple");
        }
        QuestionKind::ShortAnswer => {
            xml.open("response_str", &[("ident", "response1"), ("rcardinality", "Single")]);
            xml.open("render_fib", &[]);
            xml.leaf("response_label", &[("ident", "answer1")], None);
            xml.close("render_fib");
            xml.close("response_str");
        }
        QuestionKind::Essay | QuestionKind::FileUpload => {}
    }
    xml.close("presentation");

    encode_resprocessing(xml, question);
    xml.close("item");
}

fn encode_choices(xml: &mut XmlBuilder, answers: &[Answer], cardinality: &str) {
    xml.open(
        "response_lid",
        &[("ident", "response1"), ("rcardinality", cardinality)],
    );
    xml.open("render_choice", &[]);
    for (index, answer) in answers.iter().enumerate() {
        let ident = format!("answer_{}", index + 1);
        xml.open("response_label", &[("ident", ident.as_str())]);
        xml.open("material", &[]);
        xml.leaf("mattext", &[("texttype", "text/plain")], Some(&answer.text));
        xml.close("material");
        xml.close("response_label");
    }
    xml.close("render_choice");
    xml.close("response_lid");
}

fn encode_resprocessing(xml: &mut XmlBuilder, question: &Question) {
    xml.open("resprocessing", &[]);
    xml.open("outcomes", &[]);
    xml.leaf(
        "decvar",
        &[
            ("maxvalue", "100"),
            ("minvalue", "0"),
            ("varname", "SCORE"),
            ("vartype", "Decimal"),
        ],
        None,
    );
    xml.close("outcomes");

    match question.kind {
        QuestionKind::MultipleChoice | QuestionKind::TrueFalse => {
            for (index, answer) in question.answers.iter().enumerate() {
                if !answer.correct {
                    continue;
                }
                let ident = format!("answer_{}", index + 1);
                xml.open("respcondition", &[("continue", "No")]);
                xml.open("conditionvar", &[]);
                xml.leaf("varequal", &[("respident", "response1")], Some(&ident));
                xml.close("conditionvar");
                set_full_score(xml);
                xml.close("respcondition");
            }
        }
        QuestionKind::MultipleAnswers => {
            xml.open("respcondition", &[("continue", "No")]);
            xml.open("conditionvar", &[]);
            xml.open("and", &[]);
            for (index, answer) in question.answers.iter().enumerate() {
                let ident = format!("answer_{}", index + 1);
                if answer.correct {
                    xml.leaf("varequal", &[("respident", "response1")], Some(&ident));
                } else {
                    xml.open("not", &[]);
                    xml.leaf("varequal", &[("respident", "response1")], Some(&ident));
                    xml.close("not");
                }
            }
            xml.close("and");
            xml.close("conditionvar");
            set_full_score(xml);
            xml.close("respcondition");
        }
        QuestionKind::ShortAnswer => {
            for answer in &question.answers {
                xml.open("respcondition", &[("continue", "No")]);
                xml.open("conditionvar", &[]);
                xml.leaf("varequal", &[("respident", "response1")], Some(&answer.text));
                xml.close("conditionvar");
                set_full_score(xml);
                xml.close("respcondition");
            }
        }
        QuestionKind::Essay | QuestionKind::FileUpload => {}
    }
    xml.close("resprocessing");
}

fn set_full_score(xml: &mut XmlBuilder) {
    xml.leaf(
        "setvar",
        &[("action", "Set"), ("varname", "SCORE")],
        Some("100"),
    );
}

fn encode_bank_ref(xml: &mut XmlBuilder, index: usize, bank_ref: &BankRef) {
    let ident = format!("bank_draw_{}", index + 1);
    xml.open("section", &[("ident", ident.as_str())]);
    xml.open("selection_ordering", &[]);
    xml.open("selection", &[]);
    xml.leaf("sourcebank_ref", &[], Some(&bank_ref.bank));
    xml.leaf("selection_number", &[], Some(&bank_ref.draw.to_string()));
    xml.open("selection_extension", &[]);
    xml.leaf(
        "points_per_item",
        &[],
        Some(&bank_ref.points_per_question.to_string()),
    );
    xml.close("selection_extension");
    xml.close("selection");
    xml.close("selection_ordering");
    xml.close("section");
}

/// A decoded assessment.
#[derive(Debug, Clone, Default)]
pub struct DecodedAssessment {
    pub identifier: String,
    pub title: String,
    pub metadata: BTreeMap<String, String>,
    /// Quiz description, already converted back to markdown.
    pub description: String,
    pub questions: Vec<Question>,
    pub bank_refs: Vec<BankRef>,
}

impl DecodedAssessment {
    /// The inline-vs-bank fidelity flag, when present.
    pub fn inline_flag(&self) -> Option<bool> {
        self.metadata
            .get(INLINE_QUESTIONS_FLAG)
            .map(|v| v == "true")
    }

    pub fn title_or_id(&self) -> String {
        if self.title.is_empty() {
            self.identifier.clone()
        } else {
            self.title.clone()
        }
    }
}

pub fn decode_assessment(
    identifier: &str,
    xml: &str,
) -> Result<DecodedAssessment, ResourceDecodeError> {
    let root =
        parse_xml(xml).map_err(|reason| ResourceDecodeError::new(identifier, reason))?;
    let assessment = root
        .child("assessment")
        .or_else(|| root.child("objectbank"))
        .ok_or_else(|| {
            ResourceDecodeError::new(identifier, "no <assessment> or <objectbank> element")
        })?;

    let mut decoded = DecodedAssessment {
        identifier: assessment
            .attr("ident")
            .unwrap_or(identifier)
            .to_string(),
        title: assessment.attr("title").unwrap_or_default().to_string(),
        ..Default::default()
    };

    if let Some(metadata) = assessment.find("qtimetadata") {
        for field in metadata.children_named("qtimetadatafield") {
            let label = field
                .child("fieldlabel")
                .map(|n| n.text_content().trim().to_string())
                .unwrap_or_default();
            let entry = field
                .child("fieldentry")
                .map(|n| n.text_content().trim().to_string())
                .unwrap_or_default();
            if !label.is_empty() {
                decoded.metadata.insert(label, entry);
            }
        }
    }

    if let Some(objectives) = assessment.find("objectives") {
        if let Some(mattext) = objectives.find("mattext") {
            decoded.description = markup::platform_html_to_markdown(&mattext.text_content());
        }
    }

    let mut items = Vec::new();
    assessment.descendants("item", &mut items);
    for item in items {
        decoded
            .questions
            .push(decode_question(identifier, item)?);
    }

    let mut sections = Vec::new();
    assessment.descendants("section", &mut sections);
    for section in sections {
        let Some(selection) = section.find("selection") else {
            continue;
        };
        let Some(bank) = selection
            .child("sourcebank_ref")
            .map(|n| n.text_content().trim().to_string())
        else {
            continue;
        };
        let draw = selection
            .child("selection_number")
            .and_then(|n| n.text_content().trim().parse().ok())
            .unwrap_or(1);
        let points_per_question = selection
            .find("points_per_item")
            .and_then(|n| n.text_content().trim().parse().ok())
            .unwrap_or(1.0);
        decoded.bank_refs.push(BankRef {
            bank,
            draw,
            points_per_question,
        });
    }

    Ok(decoded)
}

fn decode_question(
    resource_identifier: &str,
    item: &XmlNode,
) -> Result<Question, ResourceDecodeError> {
    let mut metadata = BTreeMap::new();
    if let Some(block) = item.find("qtimetadata") {
        for field in block.children_named("qtimetadatafield") {
            let label = field
                .child("fieldlabel")
                .map(|n| n.text_content().trim().to_string())
                .unwrap_or_default();
            let entry = field
                .child("fieldentry")
                .map(|n| n.text_content().trim().to_string())
                .unwrap_or_default();
            metadata.insert(label, entry);
        }
    }
    let kind = metadata
        .get("question_type")
        .and_then(|t| QuestionKind::from_wire_name(t))
        .ok_or_else(|| {
            ResourceDecodeError::new(
                resource_identifier,
                format!(
                    "item `{}` has unknown question type",
                    item.attr("ident").unwrap_or("?")
                ),
            )
        })?;
    let points = metadata
        .get("points_possible")
        .and_then(|p| p.parse().ok())
        .unwrap_or(1.0);

    let presentation = item.child("presentation").ok_or_else(|| {
        ResourceDecodeError::new(resource_identifier, "item without <presentation>")
    })?;
    let stem = presentation
        .child("material")
        .and_then(|m| m.child("mattext"))
        .map(|t| markup::platform_html_to_markdown(&t.text_content()))
        .unwrap_or_default();

    // Choice idents to text, in document order.
    let mut labels = Vec::new();
    presentation.descendants("response_label", &mut labels);
    let choices: Vec<(String, String)> = labels
        .iter()
        .filter_map(|label| {
            let ident = label.attr("ident")?.to_string();
            let text = label
                .find("mattext")
                .map(|t| t.text_content().trim().to_string())
                .unwrap_or_default();
            Some((ident, text))
        })
        .collect();

    // Correctness from resprocessing conditions.
    let mut correct_idents = Vec::new();
    let mut accepted_texts = Vec::new();
    if let Some(resprocessing) = item.child("resprocessing") {
        let mut conditions = Vec::new();
        resprocessing.descendants("respcondition", &mut conditions);
        for condition in conditions {
            if condition.find("setvar").is_none() {
                continue;
            }
            collect_positive_varequals(condition, &mut correct_idents, &mut accepted_texts);
        }
    }

    let answers = match kind {
        QuestionKind::MultipleChoice | QuestionKind::TrueFalse | QuestionKind::MultipleAnswers => {
            choices
                .into_iter()
                .map(|(ident, text)| Answer {
                    correct: correct_idents.contains(&ident),
                    text,
                })
                .collect()
        }
        QuestionKind::ShortAnswer => accepted_texts
            .into_iter()
            .map(|text| Answer { text, correct: true })
            .collect(),
        QuestionKind::Essay | QuestionKind::FileUpload => Vec::new(),
    };

    Ok(Question {
        kind,
        stem,
        answers,
        points,
    })
}

/// Walk a condition tree collecting `varequal` values, skipping anything
/// under a `<not>`.
fn collect_positive_varequals(
    node: &XmlNode,
    idents: &mut Vec<String>,
    texts: &mut Vec<String>,
) {
    for child in &node.children {
        match child.name.as_str() {
            "not" => {}
            "varequal" => {
                let value = child.text_content().trim().to_string();
                idents.push(value.clone());
                texts.push(value);
            }
            _ => collect_positive_varequals(child, idents, texts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QuizSettings;

    fn sample_quiz() -> QuizData {
        QuizData {
            settings: QuizSettings {
                quiz_type: "assignment".into(),
                time_limit: Some(30),
                allowed_attempts: Some(2),
                shuffle_answers: true,
                points_per_question: Some(2.0),
            },
            description: "Answer **all** questions.".into(),
            questions: vec![
                Question {
                    kind: QuestionKind::MultipleChoice,
                    stem: "Pick the even number.".into(),
                    answers: vec![
                        Answer { text: "3".into(), correct: false },
                        Answer { text: "4".into(), correct: true },
                    ],
                    points: 2.0,
                },
                Question {
                    kind: QuestionKind::MultipleAnswers,
                    stem: "Select the primes.".into(),
                    answers: vec![
                        Answer { text: "2".into(), correct: true },
                        Answer { text: "4".into(), correct: false },
                        Answer { text: "5".into(), correct: true },
                    ],
                    points: 2.0,
                },
                Question {
                    kind: QuestionKind::ShortAnswer,
                    stem: "Name the fourth planet.".into(),
                    answers: vec![Answer { text: "Mars".into(), correct: true }],
                    points: 2.0,
                },
                Question {
                    kind: QuestionKind::Essay,
                    stem: "Discuss.".into(),
                    answers: vec![],
                    points: 2.0,
                },
            ],
            bank_refs: vec![],
        }
    }

    #[test]
    fn assessment_round_trips_questions_and_description() {
        let quiz = sample_quiz();
        let xml = encode_assessment("quiz_1", "Midterm", &quiz);
        let decoded = decode_assessment("quiz_1", &xml).unwrap();

        assert_eq!(decoded.title, "Midterm");
        assert_eq!(decoded.description, "Answer **all** questions.");
        assert_eq!(decoded.inline_flag(), Some(true));
        assert_eq!(decoded.questions.len(), 4);

        let mc = &decoded.questions[0];
        assert_eq!(mc.kind, QuestionKind::MultipleChoice);
        assert_eq!(mc.stem, "Pick the even number.");
        assert_eq!(
            mc.answers,
            vec![
                Answer { text: "3".into(), correct: false },
                Answer { text: "4".into(), correct: true },
            ]
        );

        let ma = &decoded.questions[1];
        assert_eq!(ma.kind, QuestionKind::MultipleAnswers);
        assert!(ma.answers[0].correct && !ma.answers[1].correct && ma.answers[2].correct);

        let sa = &decoded.questions[2];
        assert_eq!(sa.kind, QuestionKind::ShortAnswer);
        assert_eq!(sa.answers[0].text, "Mars");

        assert_eq!(decoded.questions[3].kind, QuestionKind::Essay);
        assert!((decoded.questions[0].points - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn bank_refs_round_trip_and_clear_inline_flag() {
        let quiz = QuizData {
            bank_refs: vec![BankRef {
                bank: "algebra-basics".into(),
                draw: 5,
                points_per_question: 2.0,
            }],
            ..Default::default()
        };
        let xml = encode_assessment("quiz_2", "Drawn", &quiz);
        let decoded = decode_assessment("quiz_2", &xml).unwrap();
        assert_eq!(decoded.inline_flag(), Some(false));
        assert_eq!(decoded.bank_refs.len(), 1);
        assert_eq!(decoded.bank_refs[0].bank, "algebra-basics");
        assert_eq!(decoded.bank_refs[0].draw, 5);
    }

    #[test]
    fn objectbank_decodes_as_bank() {
        let questions = sample_quiz().questions;
        let xml = encode_objectbank("bank_1", "Algebra Basics", &questions);
        let decoded = decode_assessment("bank_1", &xml).unwrap();
        assert_eq!(decoded.questions.len(), questions.len());
        assert_eq!(
            decoded.metadata.get("bank_title").map(String::as_str),
            Some("Algebra Basics")
        );
    }

    #[test]
    fn unknown_question_type_is_a_decode_error() {
        let xml = r#"<questestinterop><assessment ident="q" title="T"><section ident="s">
          <item ident="i1"><itemmetadata><qtimetadata>
            <qtimetadatafield><fieldlabel>question_type</fieldlabel><fieldentry>hologram_question</fieldentry></qtimetadatafield>
          </qtimetadata></itemmetadata>
          <presentation><material><mattext>x</mattext></material></presentation></item>
        </section></assessment></questestinterop>"#;
        let err = decode_assessment("q", xml).unwrap_err();
        assert!(err.to_string().contains("unknown question type"));
    }
}
