//! Cartridge export: canonical model -> `.imscc` archive.
//!
//! Layout contract:
//! - pages under `wiki_content/<identifier>.html`, each self-identifying
//!   through a `<meta name="identifier">` tag
//! - assignments as `<id>/<id>.html` plus `<id>/assignment_settings.xml`
//! - quizzes encoded TWICE: structured `<id>/assessment_qti.xml` and the
//!   flat `non_cc_assessments/<id>.xml.qti` index (importers exist that
//!   only read one of the two)
//! - shared banks as `<id>/objectbank_qti.xml`
//! - local assets mirrored under `web_resources/`
//! - `course_settings/` with course, module and assignment-group metadata
//!   plus the `canvas_export.txt` sentinel
//! - everything above listed in `imsmanifest.xml`

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::markup;
use crate::model::{ContentItem, ContentKind, Course, ItemPayload, Rubric, RubricRef};

use super::manifest::{write_manifest, Manifest, OrgItem};
use super::{
    qti, ResourceEntry, XmlBuilder, NS_CANVAS, NS_WEBLINK, TYPE_ASSESSMENT, TYPE_COURSE_SETTINGS,
    TYPE_LEARNING_APP, TYPE_QUESTION_BANK, TYPE_WEBCONTENT, TYPE_WEBLINK,
};

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub output: PathBuf,
    pub title: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExportSummary {
    pub pages: usize,
    pub assignments: usize,
    pub quizzes: usize,
    pub links: usize,
    pub files: usize,
    pub banks: usize,
    pub assets: usize,
    pub modules: usize,
}

/// Canvas module-item content types, by kind.
fn content_type(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Page => "WikiPage",
        ContentKind::Assignment => "Assignment",
        ContentKind::Quiz => "Quizzes::Quiz",
        ContentKind::Link => "ExternalUrl",
        ContentKind::File => "Attachment",
    }
}

pub fn export_cartridge(
    course: &Course,
    course_root: &Path,
    options: &ExportOptions,
) -> Result<ExportSummary, PipelineError> {
    let staging = tempfile::tempdir()?;
    let root = staging.path();
    let title = options.title.clone().unwrap_or_else(|| course.title.clone());
    let mut summary = ExportSummary::default();
    let mut resources = Vec::new();

    info!(title = %title, output = %options.output.display(), "[EXPORT] building cartridge");

    for item in &course.items {
        match &item.payload {
            ItemPayload::Page => {
                let href = format!("wiki_content/{}.html", item.identifier);
                write_file(root, &href, page_html(item).as_bytes())?;
                resources.push(ResourceEntry {
                    identifier: item.identifier.clone(),
                    resource_type: TYPE_WEBCONTENT.to_string(),
                    href: Some(href.clone()),
                    files: vec![href],
                });
                summary.pages += 1;
            }
            ItemPayload::Assignment(settings) => {
                let html_href = format!("{0}/{0}.html", item.identifier);
                let settings_href = format!("{}/assignment_settings.xml", item.identifier);
                let body_html =
                    markup::markdown_to_platform_html(&item.body, &markup::TemplateSet::default());
                write_file(root, &html_href, body_html.as_bytes())?;
                write_file(
                    root,
                    &settings_href,
                    assignment_settings_xml(item, settings).as_bytes(),
                )?;
                resources.push(ResourceEntry {
                    identifier: item.identifier.clone(),
                    resource_type: TYPE_LEARNING_APP.to_string(),
                    href: Some(html_href.clone()),
                    files: vec![html_href, settings_href],
                });
                summary.assignments += 1;
            }
            ItemPayload::Quiz(quiz) => {
                let qti_xml = qti::encode_assessment(&item.identifier, &item.title, quiz);
                let structured = format!("{}/assessment_qti.xml", item.identifier);
                let flat = format!("non_cc_assessments/{}.xml.qti", item.identifier);
                write_file(root, &structured, qti_xml.as_bytes())?;
                write_file(root, &flat, qti_xml.as_bytes())?;
                resources.push(ResourceEntry {
                    identifier: item.identifier.clone(),
                    resource_type: TYPE_ASSESSMENT.to_string(),
                    href: Some(structured.clone()),
                    files: vec![structured, flat],
                });
                summary.quizzes += 1;
            }
            ItemPayload::Link { url } => {
                let href = format!("{}/weblink.xml", item.identifier);
                write_file(root, &href, weblink_xml(&item.title, url).as_bytes())?;
                resources.push(ResourceEntry {
                    identifier: item.identifier.clone(),
                    resource_type: TYPE_WEBLINK.to_string(),
                    href: Some(href.clone()),
                    files: vec![href],
                });
                summary.links += 1;
            }
            ItemPayload::File { path } => {
                let source = course_root.join(path);
                let href = format!("web_resources/{path}");
                let bytes = fs::read(&source)?;
                write_file(root, &href, &bytes)?;
                resources.push(ResourceEntry {
                    identifier: item.identifier.clone(),
                    resource_type: TYPE_WEBCONTENT.to_string(),
                    href: Some(href.clone()),
                    files: vec![href],
                });
                summary.files += 1;
            }
        }
    }

    for bank in &course.banks {
        let identifier = format!("bank-{}", bank.slug);
        let href = format!("{identifier}/objectbank_qti.xml");
        let xml = qti::encode_objectbank(&bank.slug, &bank.title, &bank.questions);
        write_file(root, &href, xml.as_bytes())?;
        resources.push(ResourceEntry {
            identifier,
            resource_type: TYPE_QUESTION_BANK.to_string(),
            href: Some(href.clone()),
            files: vec![href],
        });
        summary.banks += 1;
    }

    // Mirror the shared asset tree.
    let mut asset_paths = Vec::new();
    collect_files(&course_root.join("assets"), &mut asset_paths);
    asset_paths.sort();
    for (index, path) in asset_paths.iter().enumerate() {
        let relative = relative_to(course_root, path);
        let href = format!("web_resources/{relative}");
        let bytes = fs::read(path)?;
        write_file(root, &href, &bytes)?;
        resources.push(ResourceEntry {
            identifier: format!("web_asset_{}", index + 1),
            resource_type: TYPE_WEBCONTENT.to_string(),
            href: Some(href.clone()),
            files: vec![href],
        });
        summary.assets += 1;
    }

    // course_settings/ block.
    let settings_files = vec![
        "course_settings/course_settings.xml".to_string(),
        "course_settings/module_meta.xml".to_string(),
        "course_settings/assignment_groups.xml".to_string(),
        "course_settings/canvas_export.txt".to_string(),
    ];
    write_file(
        root,
        &settings_files[0],
        course_settings_xml(course, &title).as_bytes(),
    )?;
    write_file(root, &settings_files[1], module_meta_xml(course).as_bytes())?;
    write_file(root, &settings_files[2], assignment_groups_xml().as_bytes())?;
    write_file(root, &settings_files[3], b"1\n")?;
    resources.push(ResourceEntry {
        identifier: "course_settings".to_string(),
        resource_type: TYPE_COURSE_SETTINGS.to_string(),
        href: Some(settings_files[0].clone()),
        files: settings_files,
    });
    summary.modules = course.modules.len();

    let manifest = Manifest {
        identifier: format!("cartwright_export_{}", Uuid::new_v4().simple()),
        title,
        organization: organization_items(course),
        resources,
    };
    write_file(root, "imsmanifest.xml", write_manifest(&manifest).as_bytes())?;

    zip_directory(root, &options.output)?;
    info!(
        pages = summary.pages,
        assignments = summary.assignments,
        quizzes = summary.quizzes,
        assets = summary.assets,
        "[EXPORT] cartridge written"
    );
    Ok(summary)
}

fn organization_items(course: &Course) -> Vec<OrgItem> {
    course
        .modules
        .iter()
        .enumerate()
        .map(|(index, module)| OrgItem {
            identifier: format!("module_{}", index + 1),
            title: module.title.clone(),
            identifierref: None,
            children: module
                .items
                .iter()
                .enumerate()
                .filter(|(_, entry)| course.item(&entry.identifier).is_some())
                .map(|(j, entry)| OrgItem {
                    identifier: format!("item_{}_{}", index + 1, j + 1),
                    title: course
                        .item(&entry.identifier)
                        .map(|i| i.title.clone())
                        .unwrap_or_default(),
                    identifierref: Some(entry.identifier.clone()),
                    children: vec![],
                })
                .collect(),
        })
        .collect()
}

fn page_html(item: &ContentItem) -> String {
    let body = markup::markdown_to_platform_html(&item.body, &markup::TemplateSet::default());
    let state = if item.published { "active" } else { "unpublished" };
    format!(
        "<html>\n<head>\n<title>{}</title>\n<meta name=\"identifier\" content=\"{}\"/>\n<meta name=\"workflow_state\" content=\"{}\"/>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        escape_html(&item.title),
        escape_html(&item.identifier),
        state,
        body
    )
}

fn assignment_settings_xml(
    item: &ContentItem,
    settings: &crate::model::AssignmentSettings,
) -> String {
    let mut xml = XmlBuilder::new();
    xml.open(
        "assignment",
        &[("identifier", item.identifier.as_str()), ("xmlns", NS_CANVAS)],
    );
    xml.leaf("title", &[], Some(&item.title));
    xml.leaf(
        "workflow_state",
        &[],
        Some(if item.published { "published" } else { "unpublished" }),
    );
    if let Some(points) = settings.points_possible {
        xml.leaf("points_possible", &[], Some(&points.to_string()));
    }
    if let Some(grading) = &settings.grading_type {
        xml.leaf("grading_type", &[], Some(grading));
    }
    if !settings.submission_types.is_empty() {
        xml.leaf(
            "submission_types",
            &[],
            Some(&settings.submission_types.join(",")),
        );
    }
    if let Some(due) = &settings.due_at {
        xml.leaf("due_at", &[], Some(due));
    }
    match &settings.rubric {
        Some(RubricRef::Shared(slug)) => xml.leaf("use_rubric", &[], Some(slug)),
        Some(RubricRef::Inline(rubric)) => write_rubric_xml(&mut xml, rubric),
        None => {}
    }
    xml.close("assignment");
    xml.finish()
}

pub(super) fn write_rubric_xml(xml: &mut XmlBuilder, rubric: &Rubric) {
    xml.open("rubric", &[]);
    if let Some(title) = &rubric.title {
        xml.leaf("title", &[], Some(title));
    }
    for criterion in &rubric.criteria {
        xml.open("criterion", &[]);
        xml.leaf("description", &[], Some(&criterion.description));
        if let Some(long) = &criterion.long_description {
            xml.leaf("long_description", &[], Some(long));
        }
        xml.leaf("points", &[], Some(&criterion.points.to_string()));
        for rating in &criterion.ratings {
            xml.open("rating", &[]);
            xml.leaf("description", &[], Some(&rating.description));
            if let Some(long) = &rating.long_description {
                xml.leaf("long_description", &[], Some(long));
            }
            xml.leaf("points", &[], Some(&rating.points.to_string()));
            xml.close("rating");
        }
        xml.close("criterion");
    }
    xml.close("rubric");
}

fn weblink_xml(title: &str, url: &str) -> String {
    let mut xml = XmlBuilder::new();
    xml.open("webLink", &[("xmlns", NS_WEBLINK)]);
    xml.leaf("title", &[], Some(title));
    xml.leaf("url", &[("href", url)], None);
    xml.close("webLink");
    xml.finish()
}

fn course_settings_xml(course: &Course, title: &str) -> String {
    let mut xml = XmlBuilder::new();
    xml.open(
        "course",
        &[("identifier", "course"), ("xmlns", NS_CANVAS)],
    );
    xml.leaf("title", &[], Some(title));
    if let Some(code) = &course.code {
        xml.leaf("course_code", &[], Some(code));
    }
    xml.close("course");
    xml.finish()
}

fn module_meta_xml(course: &Course) -> String {
    let mut xml = XmlBuilder::new();
    xml.open("modules", &[("xmlns", NS_CANVAS)]);
    for (index, module) in course.modules.iter().enumerate() {
        let ident = format!("module_{}", index + 1);
        xml.open("module", &[("identifier", ident.as_str())]);
        xml.leaf("title", &[], Some(&module.title));
        xml.leaf("position", &[], Some(&module.position.to_string()));
        xml.open("items", &[]);
        for (j, entry) in module.items.iter().enumerate() {
            let Some(item) = course.item(&entry.identifier) else {
                continue;
            };
            let item_ident = format!("item_{}_{}", index + 1, j + 1);
            xml.open("item", &[("identifier", item_ident.as_str())]);
            xml.leaf("content_type", &[], Some(content_type(item.kind())));
            xml.leaf("identifierref", &[], Some(&entry.identifier));
            xml.leaf("title", &[], Some(&item.title));
            xml.leaf("position", &[], Some(&(j + 1).to_string()));
            xml.leaf("indent", &[], Some(&entry.indent.to_string()));
            xml.close("item");
        }
        xml.close("items");
        xml.close("module");
    }
    xml.close("modules");
    xml.finish()
}

fn assignment_groups_xml() -> String {
    let mut xml = XmlBuilder::new();
    xml.open("assignmentGroups", &[("xmlns", NS_CANVAS)]);
    xml.open("assignmentGroup", &[("identifier", "assignment_group_1")]);
    xml.leaf("title", &[], Some("Assignments"));
    xml.leaf("position", &[], Some("1"));
    xml.close("assignmentGroup");
    xml.close("assignmentGroups");
    xml.finish()
}

fn write_file(root: &Path, relative: &str, bytes: &[u8]) -> std::io::Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    debug!(path = relative, size = bytes.len(), "[EXPORT] staging file");
    fs::write(path, bytes)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

fn relative_to(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn zip_directory(dir: &Path, output: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = fs::File::create(output)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut paths = Vec::new();
    collect_files(dir, &mut paths);
    paths.sort();
    for path in paths {
        let name = relative_to(dir, &path);
        writer
            .start_file(name.as_str(), options)
            .map_err(crate::errors::ArchiveFormatError::Zip)?;
        writer.write_all(&fs::read(&path)?)?;
    }
    writer
        .finish()
        .map_err(crate::errors::ArchiveFormatError::Zip)?;
    Ok(())
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
