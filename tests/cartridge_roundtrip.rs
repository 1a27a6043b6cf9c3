//! Export -> import round trips over a real archive on disk.

use std::fs;
use std::io::Read;
use std::path::Path;

use tempfile::tempdir;

use cartwright::cartridge::export::{export_cartridge, ExportOptions};
use cartwright::cartridge::import::import_cartridge;
use cartwright::cartridge::INLINE_QUESTIONS_FLAG;
use cartwright::model::{ItemPayload, QuestionKind, RubricRef};
use cartwright::source;

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, content).expect("write");
}

const QUIZ_BODY: &str = "\
Answer everything. *Calculators allowed.*

1. What is 2 + 2?
a) 3
*b) 4
c) 5

2. Select the primes.
[*] 2
[*] 3
[ ] 4

3. True or false: water is wet.
*a) True
b) False
";

const RUBRIC_YAML: &str = "\
title: Writing Rubric
criteria:
  - description: Clarity
    points: 5
    ratings:
      - description: Clear
        points: 5
      - description: Muddled
        points: 0
";

fn scaffold_course(root: &Path) {
    write(
        &root.join("course.yaml"),
        "course_id: 7\ncourse_name: Roundtrip Course\ncourse_code: RT-1\n",
    );
    write(
        &root.join("content/01-welcome.page/index.md"),
        "---\nname: Welcome\nmodules:\n  - Week 1\n---\n\n# Hello\n\nSome *content*.\n",
    );
    write(
        &root.join("content/02-midterm.quiz/index.md"),
        &format!(
            "---\nname: Midterm\ntime_limit: 30\nmodules:\n  - Week 1\n---\n\n{QUIZ_BODY}"
        ),
    );
    write(
        &root.join("content/03-essay.assignment/index.md"),
        "---\nname: Essay\npoints_possible: 20\nmodules:\n  - Week 1\n---\n\nWrite an essay.\n",
    );
    write(
        &root.join("content/03-essay.assignment/rubric.yaml"),
        RUBRIC_YAML,
    );
    write(
        &root.join("content/04-docs.link/index.md"),
        "---\nname: Docs\nurl: https://example.org/docs\nmodules:\n  - Week 1\n---\n",
    );
}

fn archive_entries(path: &Path) -> Vec<String> {
    let file = fs::File::open(path).expect("open archive");
    let mut zip = zip::ZipArchive::new(file).expect("zip");
    (0..zip.len())
        .map(|i| zip.by_index(i).expect("entry").name().to_string())
        .collect()
}

fn archive_entry(path: &Path, name: &str) -> String {
    let file = fs::File::open(path).expect("open archive");
    let mut zip = zip::ZipArchive::new(file).expect("zip");
    let mut entry = zip.by_name(name).expect("member present");
    let mut text = String::new();
    entry.read_to_string(&mut text).expect("utf8 member");
    text
}

#[test]
fn quizzes_are_encoded_under_both_locations() {
    let src = tempdir().expect("src");
    scaffold_course(src.path());
    let (course, skipped) = source::load_course(src.path()).expect("load");
    assert!(skipped.is_empty(), "scaffold must be valid: {skipped:?}");

    let archive = src.path().join("out.imscc");
    export_cartridge(
        &course,
        src.path(),
        &ExportOptions {
            output: archive.clone(),
            title: None,
        },
    )
    .expect("export");

    let entries = archive_entries(&archive);
    assert!(entries.contains(&"imsmanifest.xml".to_string()));
    assert!(
        entries.contains(&"midterm/assessment_qti.xml".to_string()),
        "structured QTI copy missing: {entries:?}"
    );
    assert!(
        entries.contains(&"non_cc_assessments/midterm.xml.qti".to_string()),
        "flat QTI index copy missing: {entries:?}"
    );
    // Both copies carry identical bytes.
    assert_eq!(
        archive_entry(&archive, "midterm/assessment_qti.xml"),
        archive_entry(&archive, "non_cc_assessments/midterm.xml.qti")
    );
    // Inline questions are marked as such for the re-importer.
    assert!(archive_entry(&archive, "midterm/assessment_qti.xml").contains(INLINE_QUESTIONS_FLAG));
}

#[test]
fn course_survives_an_export_import_round_trip() {
    let src = tempdir().expect("src");
    scaffold_course(src.path());
    let (course, _) = source::load_course(src.path()).expect("load");

    let archive = src.path().join("out.imscc");
    export_cartridge(
        &course,
        src.path(),
        &ExportOptions {
            output: archive.clone(),
            title: None,
        },
    )
    .expect("export");

    let out = tempdir().expect("out");
    let (imported, report) = import_cartridge(&archive, out.path()).expect("import");
    assert!(
        report.skipped.is_empty(),
        "nothing should fail to decode: {:?}",
        report.skipped
    );

    let quiz_item = imported.item("midterm").expect("quiz imported");
    let ItemPayload::Quiz(quiz) = &quiz_item.payload else {
        panic!("midterm must come back as a quiz");
    };
    assert!(
        quiz.description.contains("Answer everything"),
        "quiz description must survive: {:?}",
        quiz.description
    );
    assert_eq!(quiz.questions.len(), 3);
    assert_eq!(quiz.questions[0].kind, QuestionKind::MultipleChoice);
    assert_eq!(quiz.questions[1].kind, QuestionKind::MultipleAnswers);
    assert_eq!(quiz.questions[2].kind, QuestionKind::TrueFalse);
    let q1 = &quiz.questions[0];
    assert!(q1.stem.contains("2 + 2"));
    let correct: Vec<&str> = q1
        .answers
        .iter()
        .filter(|a| a.correct)
        .map(|a| a.text.as_str())
        .collect();
    assert_eq!(correct, vec!["4"]);
    assert_eq!(quiz.settings.time_limit, Some(30));

    let essay = imported.item("essay").expect("assignment imported");
    let ItemPayload::Assignment(settings) = &essay.payload else {
        panic!("essay must come back as an assignment");
    };
    assert_eq!(settings.points_possible, Some(20.0));
    match &settings.rubric {
        Some(RubricRef::Inline(rubric)) => {
            assert_eq!(rubric.criteria.len(), 1);
            assert_eq!(rubric.criteria[0].description, "Clarity");
        }
        other => panic!("rubric must survive the round trip, got {other:?}"),
    }

    let docs = imported.item("docs").expect("link imported");
    assert!(matches!(
        &docs.payload,
        ItemPayload::Link { url } if url == "https://example.org/docs"
    ));

    // Module structure comes back with every member in place.
    assert_eq!(imported.modules.len(), 1);
    assert_eq!(imported.modules[0].title, "Week 1");
    assert_eq!(imported.modules[0].items.len(), 4);

    // The written tree re-loads as a valid course.
    let (reloaded, skipped) = source::load_course(out.path()).expect("reload");
    assert!(skipped.is_empty(), "written tree must be valid: {skipped:?}");
    assert_eq!(reloaded.items.len(), imported.items.len());
}

fn third_party_qti(ident: &str, title: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<questestinterop xmlns="http://www.imsglobal.org/xsd/ims_qtiasiv1p2">
  <assessment ident="{ident}" title="{title}">
    <section ident="root_section">
      <item ident="q1" title="Question 1">
        <itemmetadata>
          <qtimetadata>
            <qtimetadatafield>
              <fieldlabel>question_type</fieldlabel>
              <fieldentry>multiple_choice_question</fieldentry>
            </qtimetadatafield>
            <qtimetadatafield>
              <fieldlabel>points_possible</fieldlabel>
              <fieldentry>1.0</fieldentry>
            </qtimetadatafield>
          </qtimetadata>
        </itemmetadata>
        <presentation>
          <material><mattext texttype="text/html">&lt;p&gt;Pick one.&lt;/p&gt;</mattext></material>
          <response_lid ident="response1" rcardinality="Single">
            <render_choice>
              <response_label ident="answer_1"><material><mattext>Yes</mattext></material></response_label>
              <response_label ident="answer_2"><material><mattext>No</mattext></material></response_label>
            </render_choice>
          </response_lid>
        </presentation>
        <resprocessing>
          <outcomes><decvar maxvalue="100" minvalue="0" varname="SCORE" vartype="Decimal"/></outcomes>
          <respcondition continue="No">
            <conditionvar><varequal respident="response1">answer_1</varequal></conditionvar>
            <setvar action="Set" varname="SCORE">100</setvar>
          </respcondition>
        </resprocessing>
      </item>
    </section>
  </assessment>
</questestinterop>
"#
    )
}

/// An archive produced by another tool: no fidelity flag anywhere, so the
/// importer falls back to naming heuristics.
#[test]
fn third_party_archive_without_fidelity_flag() {
    let manifest = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest identifier="vendor_export" xmlns="http://www.imsglobal.org/xsd/imsccv1p1/imscp_v1p1">
  <metadata>
    <lom><general><title><string>Vendor Course</string></title></general></lom>
  </metadata>
  <organizations>
    <organization identifier="org_1" structure="rooted-hierarchy"/>
  </organizations>
  <resources>
    <resource identifier="unit1_bank" type="imsqti_xmlv1p2/imscc_xmlv1p1/assessment" href="unit1_bank/assessment.xml">
      <file href="unit1_bank/assessment.xml"/>
    </resource>
    <resource identifier="pop_quiz" type="imsqti_xmlv1p2/imscc_xmlv1p1/assessment" href="pop_quiz/assessment.xml">
      <file href="pop_quiz/assessment.xml"/>
      <file href="non_cc_assessments/pop_quiz.xml.qti"/>
    </resource>
  </resources>
</manifest>
"#;

    let dir = tempdir().expect("dir");
    let archive = dir.path().join("vendor.imscc");
    let file = fs::File::create(&archive).expect("create");
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in [
        ("imsmanifest.xml", manifest.to_string()),
        (
            "unit1_bank/assessment.xml",
            third_party_qti("unit1_bank", "Unit 1 Question Bank"),
        ),
        (
            "pop_quiz/assessment.xml",
            third_party_qti("pop_quiz", "Pop Quiz"),
        ),
        (
            "non_cc_assessments/pop_quiz.xml.qti",
            third_party_qti("pop_quiz", "Pop Quiz"),
        ),
    ] {
        zip.start_file(name, options).expect("member");
        std::io::Write::write_all(&mut zip, content.as_bytes()).expect("write");
    }
    zip.finish().expect("finish");

    let out = tempdir().expect("out");
    let (course, report) = import_cartridge(&archive, out.path()).expect("import");
    assert!(report.skipped.is_empty(), "skipped: {:?}", report.skipped);

    // A bank-named assessment becomes a question bank, not a quiz.
    let bank = course
        .bank("unit-1-question-bank")
        .expect("bank-named assessment must land in question banks");
    assert_eq!(bank.questions.len(), 1);
    assert!(course.item("unit1_bank").is_none());

    // The other assessment stays an inline quiz.
    let quiz = course.item("pop_quiz").expect("quiz imported");
    let ItemPayload::Quiz(data) = &quiz.payload else {
        panic!("pop_quiz must come back as a quiz");
    };
    assert_eq!(data.questions.len(), 1);
    assert!(data.questions[0].stem.contains("Pick one"));
    assert!(data.questions[0].answers.iter().any(|a| a.correct && a.text == "Yes"));
}

/// Platform importers only see quizzes through the flat index; an archive
/// that lost `non_cc_assessments/` imports zero quizzes even though the
/// structured QTI copy is still present. Our importer mirrors that.
#[test]
fn stripping_the_flat_index_imports_zero_quizzes() {
    let src = tempdir().expect("src");
    scaffold_course(src.path());
    let (course, _) = source::load_course(src.path()).expect("load");

    let archive = src.path().join("out.imscc");
    export_cartridge(
        &course,
        src.path(),
        &ExportOptions {
            output: archive.clone(),
            title: None,
        },
    )
    .expect("export");

    // Rebuild the archive without the flat index member.
    let stripped = src.path().join("stripped.imscc");
    {
        let file = fs::File::open(&archive).expect("open archive");
        let mut zip = zip::ZipArchive::new(file).expect("zip");
        let out = fs::File::create(&stripped).expect("create");
        let mut writer = zip::ZipWriter::new(out);
        let options = zip::write::SimpleFileOptions::default();
        for i in 0..zip.len() {
            let mut member = zip.by_index(i).expect("member");
            if member.name().starts_with("non_cc_assessments/") {
                continue;
            }
            let mut bytes = Vec::new();
            member.read_to_end(&mut bytes).expect("read member");
            let name = member.name().to_string();
            writer.start_file(name.as_str(), options).expect("start");
            std::io::Write::write_all(&mut writer, &bytes).expect("write");
        }
        writer.finish().expect("finish");
    }

    let out = tempdir().expect("out");
    let (imported, report) = import_cartridge(&stripped, out.path()).expect("import");

    assert_eq!(report.quizzes, 0, "no quiz may import without the flat index");
    assert!(imported.item("midterm").is_none());
    assert!(
        report
            .skipped
            .iter()
            .any(|e| e.identifier == "midterm" && e.reason.contains("flat assessment index")),
        "the stripped quiz must be surfaced as skipped: {:?}",
        report.skipped
    );

    // Everything else still imports.
    assert!(imported.item("welcome").is_some());
    assert!(imported.item("essay").is_some());
    assert!(imported.item("docs").is_some());
}

#[test]
fn archives_without_a_manifest_are_rejected_before_writing() {
    let dir = tempdir().expect("dir");
    let archive = dir.path().join("bogus.imscc");
    let file = fs::File::create(&archive).expect("create");
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file("readme.txt", zip::write::SimpleFileOptions::default())
        .expect("member");
    std::io::Write::write_all(&mut zip, b"not a cartridge").expect("write");
    zip.finish().expect("finish");

    let out = dir.path().join("out");
    let err = import_cartridge(&archive, &out).expect_err("must reject");
    assert!(
        err.to_string().contains("imsmanifest.xml"),
        "unexpected error: {err}"
    );
    assert!(!out.exists(), "no output may be written for a rejected archive");
}
