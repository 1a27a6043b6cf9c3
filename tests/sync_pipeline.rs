//! Sync pipeline integration tests against a scripted mock client.
//!
//! These cover the end-to-end behaviour the pipeline promises: the author
//! tree is never mutated, identical asset bytes upload exactly once, and
//! ambiguous references are reported instead of guessed at.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::tempdir;

use cartwright::config::load_config;
use cartwright::remote::{MockLmsClient, RemoteAssignment, RemoteFile, RemotePage, RemoteQuiz};
use cartwright::sync::synchronise;

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, content).expect("write");
}

/// Minimal course: two pages embedding the same image bytes under two
/// different names, plus an assignment.
fn scaffold_course(root: &Path) {
    write(
        &root.join("course.yaml"),
        "course_id: 42\ncourse_name: Test Course\ncourse_code: TST-101\n",
    );
    fs::create_dir_all(root.join("assets")).expect("mkdir assets");
    fs::write(root.join("assets/diagram.png"), b"png-bytes").expect("asset");
    fs::write(root.join("assets/diagram-copy.png"), b"png-bytes").expect("asset");

    write(
        &root.join("content/01-welcome.page/index.md"),
        "---\nname: Welcome\nmodules:\n  - Week 1\n---\n\nIntro.\n\n![d](diagram.png)\n",
    );
    write(
        &root.join("content/02-recap.page/index.md"),
        "---\nname: Recap\nmodules:\n  - Week 1\n---\n\nAgain.\n\n![d](diagram-copy.png)\n",
    );
    write(
        &root.join("content/03-essay.assignment/index.md"),
        "---\nname: Essay\npoints_possible: 10\n---\n\nWrite things.\n",
    );
}

fn permissive_mock(uploads: Arc<AtomicUsize>) -> MockLmsClient {
    let mut client = MockLmsClient::new();
    client.expect_upload_file().returning(move |_, _, _| {
        let n = uploads.fetch_add(1, Ordering::SeqCst) as i64;
        Ok(RemoteFile {
            id: 900 + n,
            url: format!("https://lms.test/files/{}", 900 + n),
        })
    });
    client.expect_upsert_page().returning(|_, page| {
        Ok(RemotePage {
            url: page.slug,
            title: page.title,
            body: None,
            published: page.published,
        })
    });
    client.expect_upsert_assignment().returning(|_, a| {
        Ok(RemoteAssignment {
            id: 7,
            name: a.name,
            description: None,
            points_possible: a.points_possible,
            submission_types: a.submission_types,
            grading_type: a.grading_type,
            due_at: a.due_at,
            published: a.published,
            rubric: None,
        })
    });
    client.expect_attach_rubric().returning(|_, _, _| Ok(()));
    client.expect_upsert_quiz().returning(|_, q| {
        Ok(RemoteQuiz {
            id: 8,
            title: q.title,
            description: None,
            quiz_type: Some(q.quiz_type),
            time_limit: q.time_limit,
            allowed_attempts: q.allowed_attempts,
            shuffle_answers: q.shuffle_answers,
            published: q.published,
        })
    });
    client
        .expect_replace_quiz_questions()
        .returning(|_, _, _| Ok(()));
    client.expect_upsert_module().returning(|_, name, position| {
        Ok(cartwright::remote::RemoteModule {
            id: 5,
            name,
            position,
        })
    });
    client.expect_set_module_items().returning(|_, _, _| Ok(()));
    client
}

fn tree_snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    collect(dir, dir, &mut files);
    files
}

fn collect(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
    for entry in fs::read_dir(dir).expect("read_dir").flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(root, &path, out);
        } else {
            let rel = path
                .strip_prefix(root)
                .expect("relative")
                .to_string_lossy()
                .into_owned();
            out.insert(rel, fs::read(&path).expect("read"));
        }
    }
}

#[tokio::test]
async fn sync_never_mutates_the_authored_tree() {
    let dir = tempdir().expect("tempdir");
    scaffold_course(dir.path());
    let before_content = tree_snapshot(&dir.path().join("content"));
    let before_assets = tree_snapshot(&dir.path().join("assets"));

    let uploads = Arc::new(AtomicUsize::new(0));
    let client = permissive_mock(uploads.clone());
    let config = load_config(dir.path()).expect("config");

    let report = synchronise(&config, &client).await.expect("sync ok");
    assert_eq!(report.pages, 2);
    assert_eq!(report.assignments, 1);
    assert_eq!(report.modules, 1);

    assert_eq!(
        tree_snapshot(&dir.path().join("content")),
        before_content,
        "content/ must be byte-identical after a sync"
    );
    assert_eq!(
        tree_snapshot(&dir.path().join("assets")),
        before_assets,
        "assets/ must be byte-identical after a sync"
    );
    // The registry is the only thing the pipeline may write.
    assert!(dir
        .path()
        .join("_course_metadata/asset_registry.json")
        .is_file());
}

#[tokio::test]
async fn identical_bytes_upload_exactly_once() {
    let dir = tempdir().expect("tempdir");
    scaffold_course(dir.path());

    let uploads = Arc::new(AtomicUsize::new(0));
    let client = permissive_mock(uploads.clone());
    let config = load_config(dir.path()).expect("config");

    let report = synchronise(&config, &client).await.expect("sync ok");
    assert_eq!(
        uploads.load(Ordering::SeqCst),
        1,
        "two references to identical bytes must trigger a single upload"
    );
    assert_eq!(report.uploaded_assets, 1);

    // A second run finds everything in the registry and uploads nothing.
    let client = permissive_mock(uploads.clone());
    let report = synchronise(&config, &client).await.expect("second sync ok");
    assert_eq!(uploads.load(Ordering::SeqCst), 1, "re-run must not re-upload");
    assert_eq!(report.uploaded_assets, 0);
}

#[tokio::test]
async fn new_content_under_a_known_name_uploads_again() {
    let dir = tempdir().expect("tempdir");
    scaffold_course(dir.path());

    let uploads = Arc::new(AtomicUsize::new(0));
    let client = permissive_mock(uploads.clone());
    let config = load_config(dir.path()).expect("config");
    synchronise(&config, &client).await.expect("first sync");
    assert_eq!(uploads.load(Ordering::SeqCst), 1);

    // Same path, different bytes: a new content key, so a new upload.
    fs::write(dir.path().join("assets/diagram.png"), b"new-png-bytes").expect("rewrite");
    let client = permissive_mock(uploads.clone());
    synchronise(&config, &client).await.expect("second sync");
    assert_eq!(
        uploads.load(Ordering::SeqCst),
        2,
        "changed bytes under a known path must upload under a new key"
    );
}

#[tokio::test]
async fn ambiguous_references_warn_and_enumerate_candidates() {
    let dir = tempdir().expect("tempdir");
    scaffold_course(dir.path());
    // Two distinct files share a bare filename in different folders.
    fs::create_dir_all(dir.path().join("assets/week1")).expect("mkdir");
    fs::create_dir_all(dir.path().join("assets/week2")).expect("mkdir");
    fs::write(dir.path().join("assets/week1/chart.png"), b"one").expect("a");
    fs::write(dir.path().join("assets/week2/chart.png"), b"two").expect("b");
    write(
        &dir.path().join("content/04-extra.page/index.md"),
        "---\nname: Extra\n---\n\n![c](chart.png)\n",
    );

    let uploads = Arc::new(AtomicUsize::new(0));
    let client = permissive_mock(uploads.clone());
    let config = load_config(dir.path()).expect("config");
    let report = synchronise(&config, &client).await.expect("sync ok");

    let warning = report
        .warnings
        .iter()
        .find(|w| w.contains("chart.png"))
        .expect("ambiguity must surface as a warning");
    assert!(
        warning.contains("week1") && warning.contains("week2"),
        "warning should enumerate every candidate: {warning}"
    );
    // The reference stays local; only the unambiguous diagram uploads.
    assert_eq!(uploads.load(Ordering::SeqCst), 1);
}
