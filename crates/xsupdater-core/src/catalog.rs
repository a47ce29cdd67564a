use std::collections::HashMap;

use log::debug;
use roxmltree::{Document, Node};

use crate::error::UpdateError;
use crate::model::{PatchRecord, PatchReference};
use crate::platform::VersionSelector;

pub const DEFAULT_CATALOG_URL: &str = "http://updates.xensource.com/XenServer/updates.xml";

/// Catalog document as fetched, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCatalog {
    pub url: String,
    pub body: String,
}

/// A `<serverversions>/<version>` node and the patches it declares.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct VersionNode {
    pub name: Option<String>,
    pub build_number: Option<String>,
    pub value: Option<String>,
    pub patches: Vec<PatchReference>,
}

impl VersionNode {
    fn matches(&self, selector: &VersionSelector) -> bool {
        let candidate = match selector {
            VersionSelector::BuildNumber(_) => self.build_number.as_deref(),
            VersionSelector::ProductVersion(_) => self.value.as_deref(),
        };
        candidate == Some(selector.value())
    }
}

/// Lookup structures built from one catalog document: version nodes in
/// document order and patch detail records grouped by uuid.
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    pub(crate) versions: Vec<VersionNode>,
    details: HashMap<String, Vec<PatchRecord>>,
}

impl CatalogIndex {
    pub fn parse(raw: &RawCatalog) -> Result<Self, UpdateError> {
        let document = Document::parse(&raw.body).map_err(|err| {
            UpdateError::CatalogMalformed(format!("{} is not well-formed XML: {err}", raw.url))
        })?;
        let root = document.root_element();
        if !root.has_tag_name("patchdata") {
            return Err(UpdateError::CatalogMalformed(format!(
                "{} has root element '{}', expected 'patchdata'",
                raw.url,
                root.tag_name().name()
            )));
        }

        let mut index = Self::default();
        for patch in children(root, "patches").flat_map(|node| children(node, "patch")) {
            // Detail entries without a uuid can never be referenced.
            let Some(uuid) = patch.attribute("uuid") else {
                continue;
            };
            index
                .details
                .entry(uuid.to_string())
                .or_default()
                .push(PatchRecord {
                    uuid: uuid.to_string(),
                    name: attribute(patch, "name-label"),
                    description: attribute(patch, "name-description"),
                    download_url: attribute(patch, "patch-url"),
                });
        }

        for version in children(root, "serverversions").flat_map(|node| children(node, "version"))
        {
            index.versions.push(VersionNode {
                name: version.attribute("name").map(str::to_string),
                build_number: version.attribute("build-number").map(str::to_string),
                value: version.attribute("value").map(str::to_string),
                patches: children(version, "patch")
                    .filter_map(|patch| patch.attribute("uuid"))
                    .map(PatchReference::new)
                    .collect(),
            });
        }

        debug!(
            "parsed catalog {}: {} version nodes, {} patch uuids",
            raw.url,
            index.versions.len(),
            index.details.len()
        );
        Ok(index)
    }

    /// References declared under every version node matching `selector`, in
    /// document order. No match yields an empty list.
    pub fn select_version(&self, selector: &VersionSelector) -> Vec<PatchReference> {
        let mut selected = Vec::new();
        for node in self.versions.iter().filter(|node| node.matches(selector)) {
            debug!(
                "catalog version '{}' matches {selector}",
                node.name.as_deref().unwrap_or("<unnamed>")
            );
            selected.extend(node.patches.iter().cloned());
        }
        debug!(
            "catalog selector {selector} matched {} patch references",
            selected.len()
        );
        selected
    }

    /// Every detail record published under `uuid`.
    pub fn details(&self, uuid: &str) -> &[PatchRecord] {
        self.details.get(uuid).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn children<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |child| child.is_element() && child.has_tag_name(tag))
}

fn attribute(node: Node<'_, '_>, name: &str) -> String {
    node.attribute(name).unwrap_or_default().to_string()
}
