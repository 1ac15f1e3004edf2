// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! The XCCDF tailoring document consumed by the OpenSCAP scanner. The
//! element layout and namespace must match what the scanner binary expects,
//! so this module owns both directions of the codec.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::{Error, Result};

use super::XCCDF_URI;

const NS_PREFIX: &str = "xccdf-1.2";

/// One `<select>` child in document order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub idref: String,
    pub selected: bool,
}

/// One `<set-value>` child in document order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetValue {
    pub idref: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TailoringProfile {
    pub id: String,
    /// Base profile id; empty when the tailoring extends nothing.
    pub extends: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub selections: Vec<Selection>,
    pub values: Vec<SetValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TailoringDocument {
    pub id: String,
    pub benchmark_href: String,
    /// RFC3339 stamp recorded in the version element.
    pub version_time: String,
    pub profile: TailoringProfile,
}

impl TailoringDocument {
    /// Renders the document. Children are emitted in the order the caller
    /// supplied them; the scanner is order-sensitive.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut root = BytesStart::new(format!("{NS_PREFIX}:Tailoring"));
        root.push_attribute((format!("xmlns:{NS_PREFIX}").as_str(), XCCDF_URI));
        root.push_attribute(("id", self.id.as_str()));
        writer.write_event(Event::Start(root))?;

        let mut benchmark = BytesStart::new(format!("{NS_PREFIX}:benchmark"));
        benchmark.push_attribute(("href", self.benchmark_href.as_str()));
        writer.write_event(Event::Empty(benchmark))?;

        let mut version = BytesStart::new(format!("{NS_PREFIX}:version"));
        version.push_attribute(("time", self.version_time.as_str()));
        writer.write_event(Event::Start(version))?;
        writer.write_event(Event::Text(BytesText::new("1")))?;
        writer.write_event(Event::End(BytesEnd::new(format!("{NS_PREFIX}:version"))))?;

        let mut profile = BytesStart::new(format!("{NS_PREFIX}:Profile"));
        profile.push_attribute(("id", self.profile.id.as_str()));
        if let Some(extends) = &self.profile.extends {
            profile.push_attribute(("extends", extends.as_str()));
        }
        writer.write_event(Event::Start(profile))?;

        if let Some(title) = &self.profile.title {
            write_override_text(&mut writer, "title", title)?;
        }
        if let Some(description) = &self.profile.description {
            write_override_text(&mut writer, "description", description)?;
        }

        for selection in &self.profile.selections {
            let mut select = BytesStart::new(format!("{NS_PREFIX}:select"));
            select.push_attribute(("idref", selection.idref.as_str()));
            select.push_attribute(("selected", if selection.selected { "true" } else { "false" }));
            writer.write_event(Event::Empty(select))?;
        }
        for value in &self.profile.values {
            let mut set_value = BytesStart::new(format!("{NS_PREFIX}:set-value"));
            set_value.push_attribute(("idref", value.idref.as_str()));
            writer.write_event(Event::Start(set_value))?;
            writer.write_event(Event::Text(BytesText::new(&value.value)))?;
            writer.write_event(Event::End(BytesEnd::new(format!("{NS_PREFIX}:set-value"))))?;
        }

        writer.write_event(Event::End(BytesEnd::new(format!("{NS_PREFIX}:Profile"))))?;
        writer.write_event(Event::End(BytesEnd::new(format!("{NS_PREFIX}:Tailoring"))))?;

        Ok(String::from_utf8(writer.into_inner())
            .map_err(|e| Error::Content(e.to_string()))?)
    }

    /// Parses a document produced by `to_xml`, preserving child order.
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc.root_element();
        if root.tag_name().name() != "Tailoring" {
            return Err(Error::Content(format!(
                "expected a Tailoring root, got {}",
                root.tag_name().name()
            )));
        }

        let mut out = TailoringDocument {
            id: root.attribute("id").unwrap_or_default().to_string(),
            ..Default::default()
        };

        for child in root.children().filter(|c| c.is_element()) {
            match child.tag_name().name() {
                "benchmark" => {
                    out.benchmark_href = child.attribute("href").unwrap_or_default().to_string();
                }
                "version" => {
                    out.version_time = child.attribute("time").unwrap_or_default().to_string();
                }
                "Profile" => {
                    out.profile = parse_profile(&child)?;
                }
                other => {
                    return Err(Error::Content(format!(
                        "unexpected tailoring element {other}"
                    )));
                }
            }
        }
        Ok(out)
    }
}

fn write_override_text(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    let mut el = BytesStart::new(format!("{NS_PREFIX}:{name}"));
    el.push_attribute(("override", "true"));
    writer.write_event(Event::Start(el))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(format!("{NS_PREFIX}:{name}"))))?;
    Ok(())
}

fn parse_profile(node: &roxmltree::Node) -> Result<TailoringProfile> {
    let mut profile = TailoringProfile {
        id: node.attribute("id").unwrap_or_default().to_string(),
        extends: node.attribute("extends").map(str::to_string),
        ..Default::default()
    };

    for child in node.children().filter(|c| c.is_element()) {
        match child.tag_name().name() {
            "title" => profile.title = child.text().map(str::to_string),
            "description" => profile.description = child.text().map(str::to_string),
            "select" => profile.selections.push(Selection {
                idref: child.attribute("idref").unwrap_or_default().to_string(),
                selected: child.attribute("selected") == Some("true"),
            }),
            "set-value" => profile.values.push(SetValue {
                idref: child.attribute("idref").unwrap_or_default().to_string(),
                value: child.text().unwrap_or_default().to_string(),
            }),
            other => {
                return Err(Error::Content(format!(
                    "unexpected profile element {other}"
                )));
            }
        }
    }
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xccdf::{tailored_profile_id, tailoring_id};

    fn sample() -> TailoringDocument {
        TailoringDocument {
            id: tailoring_id("nist-moderate-modified"),
            benchmark_href: "/content/ssg-ocp4-ds.xml".into(),
            version_time: "2026-03-14T09:26:53Z".into(),
            profile: TailoringProfile {
                id: tailored_profile_id("nist-moderate-modified"),
                extends: Some("xccdf_org.ssgproject.content_profile_moderate".into()),
                title: Some("Moderate, modified".into()),
                description: None,
                selections: vec![
                    Selection {
                        idref: "xccdf_org.ssgproject.content_rule_one".into(),
                        selected: true,
                    },
                    Selection {
                        idref: "xccdf_org.ssgproject.content_rule_two".into(),
                        selected: false,
                    },
                ],
                values: vec![SetValue {
                    idref: "xccdf_org.ssgproject.content_value_var_threshold".into(),
                    value: "600".into(),
                }],
            },
        }
    }

    #[test]
    fn round_trip_preserves_selections_and_values_in_order() {
        let doc = sample();
        let xml = doc.to_xml().unwrap();
        let parsed = TailoringDocument::parse(&xml).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn rendered_document_uses_the_xccdf_namespace() {
        let xml = sample().to_xml().unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("xmlns:xccdf-1.2=\"http://checklists.nist.gov/xccdf/1.2\""));
        assert!(xml.contains("extends=\"xccdf_org.ssgproject.content_profile_moderate\""));
    }

    #[test]
    fn profile_without_extends_omits_the_attribute() {
        let mut doc = sample();
        doc.profile.extends = None;
        let xml = doc.to_xml().unwrap();
        assert!(!xml.contains("extends="));
        let parsed = TailoringDocument::parse(&xml).unwrap();
        assert_eq!(parsed.profile.extends, None);
    }
}
