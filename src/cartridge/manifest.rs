//! `imsmanifest.xml` reading and writing.

use crate::errors::ArchiveFormatError;

use super::{parse_xml, ResourceEntry, XmlBuilder, XmlNode, NS_IMSCC};

/// One `<item>` in the organization tree.
#[derive(Debug, Clone, Default)]
pub struct OrgItem {
    pub identifier: String,
    pub title: String,
    pub identifierref: Option<String>,
    pub children: Vec<OrgItem>,
}

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub identifier: String,
    pub title: String,
    /// Top-level organization items; for our exports these are modules.
    pub organization: Vec<OrgItem>,
    pub resources: Vec<ResourceEntry>,
}

impl Manifest {
    pub fn resource(&self, identifier: &str) -> Option<&ResourceEntry> {
        self.resources.iter().find(|r| r.identifier == identifier)
    }
}

pub fn parse_manifest(xml: &str) -> Result<Manifest, ArchiveFormatError> {
    let root = parse_xml(xml).map_err(ArchiveFormatError::MalformedManifest)?;
    if root.name != "manifest" {
        return Err(ArchiveFormatError::MalformedManifest(format!(
            "root element is <{}>, expected <manifest>",
            root.name
        )));
    }

    let mut manifest = Manifest {
        identifier: root.attr("identifier").unwrap_or_default().to_string(),
        ..Default::default()
    };
    if let Some(title) = root
        .child("metadata")
        .and_then(|m| m.find("string"))
        .map(|t| t.text_content())
    {
        manifest.title = title.trim().to_string();
    }

    if let Some(organizations) = root.child("organizations") {
        if let Some(organization) = organizations.child("organization") {
            // Canvas wraps modules in a single rooted item.
            let top: Vec<&XmlNode> = organization.children_named("item").collect();
            let module_nodes: Vec<&XmlNode> = match top.as_slice() {
                [single] if single.child("title").is_none() => {
                    single.children_named("item").collect()
                }
                _ => top,
            };
            manifest.organization = module_nodes.into_iter().map(org_item).collect();
        }
    }

    let resources = root
        .child("resources")
        .ok_or_else(|| ArchiveFormatError::MalformedManifest("no <resources> element".into()))?;
    for node in resources.children_named("resource") {
        let identifier = node
            .attr("identifier")
            .ok_or_else(|| {
                ArchiveFormatError::MalformedManifest("resource without identifier".into())
            })?
            .to_string();
        let files = node
            .children_named("file")
            .filter_map(|f| f.attr("href"))
            .map(str::to_string)
            .collect();
        manifest.resources.push(ResourceEntry {
            identifier,
            resource_type: node.attr("type").unwrap_or_default().to_string(),
            href: node.attr("href").map(str::to_string),
            files,
        });
    }
    Ok(manifest)
}

fn org_item(node: &XmlNode) -> OrgItem {
    OrgItem {
        identifier: node.attr("identifier").unwrap_or_default().to_string(),
        title: node
            .child("title")
            .map(|t| t.text_content().trim().to_string())
            .unwrap_or_default(),
        identifierref: node.attr("identifierref").map(str::to_string),
        children: node.children_named("item").map(org_item).collect(),
    }
}

pub fn write_manifest(manifest: &Manifest) -> String {
    let mut xml = XmlBuilder::new();
    xml.open(
        "manifest",
        &[("identifier", manifest.identifier.as_str()), ("xmlns", NS_IMSCC)],
    );

    xml.open("metadata", &[]);
    xml.leaf("schema", &[], Some("IMS Common Cartridge"));
    xml.leaf("schemaversion", &[], Some("1.1.0"));
    xml.open("lom", &[]);
    xml.open("general", &[]);
    xml.open("title", &[]);
    xml.leaf("string", &[], Some(&manifest.title));
    xml.close("title");
    xml.close("general");
    xml.close("lom");
    xml.close("metadata");

    xml.open("organizations", &[]);
    xml.open(
        "organization",
        &[("identifier", "org_1"), ("structure", "rooted-hierarchy")],
    );
    xml.open("item", &[("identifier", "LearningModules")]);
    for module in &manifest.organization {
        write_org_item(&mut xml, module);
    }
    xml.close("item");
    xml.close("organization");
    xml.close("organizations");

    xml.open("resources", &[]);
    for resource in &manifest.resources {
        let mut attrs: Vec<(&str, &str)> = vec![
            ("identifier", resource.identifier.as_str()),
            ("type", resource.resource_type.as_str()),
        ];
        if let Some(href) = &resource.href {
            attrs.push(("href", href.as_str()));
        }
        xml.open("resource", &attrs);
        for file in &resource.files {
            xml.leaf("file", &[("href", file.as_str())], None);
        }
        xml.close("resource");
    }
    xml.close("resources");
    xml.close("manifest");
    xml.finish()
}

fn write_org_item(xml: &mut XmlBuilder, item: &OrgItem) {
    let mut attrs: Vec<(&str, &str)> = vec![("identifier", item.identifier.as_str())];
    if let Some(identifierref) = &item.identifierref {
        attrs.push(("identifierref", identifierref.as_str()));
    }
    xml.open("item", &attrs);
    if !item.title.is_empty() {
        xml.leaf("title", &[], Some(&item.title));
    }
    for child in &item.children {
        write_org_item(xml, child);
    }
    xml.close("item");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::TYPE_WEBCONTENT;

    fn sample() -> Manifest {
        Manifest {
            identifier: "export_1".into(),
            title: "Biology 101".into(),
            organization: vec![OrgItem {
                identifier: "mod_1".into(),
                title: "Week 1".into(),
                identifierref: None,
                children: vec![OrgItem {
                    identifier: "it_welcome".into(),
                    title: "Welcome".into(),
                    identifierref: Some("welcome".into()),
                    children: vec![],
                }],
            }],
            resources: vec![ResourceEntry {
                identifier: "welcome".into(),
                resource_type: TYPE_WEBCONTENT.into(),
                href: Some("wiki_content/welcome.html".into()),
                files: vec!["wiki_content/welcome.html".into()],
            }],
        }
    }

    #[test]
    fn manifest_round_trips() {
        let written = write_manifest(&sample());
        let parsed = parse_manifest(&written).unwrap();
        assert_eq!(parsed.identifier, "export_1");
        assert_eq!(parsed.title, "Biology 101");
        assert_eq!(parsed.organization.len(), 1);
        assert_eq!(parsed.organization[0].title, "Week 1");
        assert_eq!(
            parsed.organization[0].children[0].identifierref.as_deref(),
            Some("welcome")
        );
        assert_eq!(parsed.resources, sample().resources);
        assert_eq!(
            parsed.resource("welcome").and_then(|r| r.href.as_deref()),
            Some("wiki_content/welcome.html")
        );
    }

    #[test]
    fn unqualified_manifest_parses_too() {
        let xml = r#"<?xml version="1.0"?>
<manifest identifier="m1">
  <organizations><organization identifier="org_1">
    <item identifier="root">
      <item identifier="i1" identifierref="r1"><title>Page</title></item>
    </item>
  </organization></organizations>
  <resources>
    <resource identifier="r1" type="webcontent" href="wiki_content/p.html">
      <file href="wiki_content/p.html"/>
    </resource>
  </resources>
</manifest>"#;
        let parsed = parse_manifest(xml).unwrap();
        assert_eq!(parsed.resources.len(), 1);
        // The titleless top-level item is a wrapper; its children are the
        // real organization entries.
        assert_eq!(parsed.organization[0].title, "Page");
        assert_eq!(parsed.organization[0].identifierref.as_deref(), Some("r1"));
    }

    #[test]
    fn missing_resources_is_malformed() {
        let err = parse_manifest(r#"<manifest identifier="m"/>"#).unwrap_err();
        assert!(matches!(err, ArchiveFormatError::MalformedManifest(_)));
    }
}
