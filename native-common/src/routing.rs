use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use regex::Regex;
use serde_derive::Deserialize;
use thiserror::Error;

/// Enumeration of errors that can happen while loading the routing configuration.
/// All of them are fatal: the ingester must not start with an invalid table.
#[derive(Error, Debug)]
pub enum RoutingConfigError {
    #[error("failed to read routing configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse routing configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("rule {index} of origin {origin}: content_type value is mandatory")]
    EmptyContentType { origin: String, index: usize },
    #[error("rule {index} of origin {origin}: collection value is mandatory")]
    EmptyCollection { origin: String, index: usize },
    #[error("rule {index} of origin {origin}: invalid content_type pattern {pattern:?}: {error}")]
    InvalidPattern {
        origin: String,
        index: usize,
        pattern: String,
        error: regex::Error,
    },
}

/// A routing rule as written in the configuration document.
#[derive(Debug, Clone, Deserialize)]
struct RuleDefinition {
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    publication: Option<Vec<String>>,
    #[serde(default)]
    collection: String,
}

/// A validated routing rule, with its content type pattern compiled.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    content_type: Regex,
    publications: HashSet<String>,
    collection: String,
}

impl RoutingRule {
    pub fn content_type_pattern(&self) -> &str {
        self.content_type.as_str()
    }

    pub fn publications(&self) -> &HashSet<String> {
        &self.publications
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The pattern is searched anywhere in the content type, so `application/json`
    /// also matches `application/json; version=1.0`.
    /// An empty publication set matches any event.
    pub fn matches(&self, content_type: &str, publications: &HashSet<String>) -> bool {
        self.content_type.is_match(content_type)
            && (self.publications.is_empty() || !self.publications.is_disjoint(publications))
    }
}

/// Maps an origin system to the ordered list of rules that decide which
/// collection its content is stored in.
///
/// The table is built once at startup and never mutated afterwards, so it can be
/// shared across tasks behind an `Arc` without synchronization. Rules of an
/// origin are evaluated in the order they were declared and the first match wins:
/// a catch-all `.*` rule placed last acts as the origin's default.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    origins: HashMap<String, Vec<RoutingRule>>,
}

impl RoutingTable {
    /// Load the routing table from a JSON document on disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, RoutingConfigError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Load the routing table from a JSON document of the form
    /// `{"<origin>": [{"content_type": "<regex>", "publication": ["<id>"], "collection": "<name>"}]}`.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, RoutingConfigError> {
        let definitions: BTreeMap<String, Vec<RuleDefinition>> = serde_json::from_reader(reader)?;
        Self::build(definitions)
    }

    fn build(
        definitions: BTreeMap<String, Vec<RuleDefinition>>,
    ) -> Result<Self, RoutingConfigError> {
        let mut origins = HashMap::with_capacity(definitions.len());

        for (origin, rules) in definitions {
            let mut compiled = Vec::with_capacity(rules.len());

            for (index, rule) in rules.into_iter().enumerate() {
                if rule.content_type.is_empty() {
                    return Err(RoutingConfigError::EmptyContentType { origin, index });
                }
                if rule.collection.is_empty() {
                    return Err(RoutingConfigError::EmptyCollection { origin, index });
                }
                let content_type = match Regex::new(&rule.content_type) {
                    Ok(regex) => regex,
                    Err(error) => {
                        return Err(RoutingConfigError::InvalidPattern {
                            origin,
                            index,
                            pattern: rule.content_type,
                            error,
                        })
                    }
                };

                compiled.push(RoutingRule {
                    content_type,
                    publications: rule.publication.unwrap_or_default().into_iter().collect(),
                    collection: rule.collection,
                });
            }

            origins.insert(origin, compiled);
        }

        Ok(Self { origins })
    }

    /// Find the collection for the given origin, content type and publications.
    /// Returns `None` when the origin is unknown or none of its rules match.
    pub fn resolve(
        &self,
        origin: &str,
        content_type: &str,
        publications: &HashSet<String>,
    ) -> Option<&str> {
        self.origins
            .get(origin)?
            .iter()
            .find(|rule| rule.matches(content_type, publications))
            .map(RoutingRule::collection)
    }

    /// The rules configured for an origin, in evaluation order.
    pub fn rules(&self, origin: &str) -> &[RoutingRule] {
        self.origins.get(origin).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

impl FromStr for RoutingTable {
    type Err = RoutingConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_reader(s.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CCT: &str = "http://cmdb.ft.com/systems/cct";
    const VIDEO_EDITOR: &str = "http://cmdb.ft.com/systems/next-video-editor";

    fn publications(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn table(document: &str) -> RoutingTable {
        document.parse().expect("failed to parse routing table")
    }

    #[test]
    fn test_load_config() {
        let routing = table(
            r#"{
                "http://cmdb.ft.com/systems/cct": [
                    {"content_type": ".*", "collection": "universal-content"}
                ],
                "http://cmdb.ft.com/systems/next-video-editor": [
                    {"content_type": "application/json", "collection": "video"},
                    {"content_type": "^(application/)*(vnd.ft-upp-audio\\+json).*$", "collection": "audio"}
                ]
            }"#,
        );

        assert_eq!(routing.len(), 2);
        assert_eq!(routing.rules(CCT).len(), 1);
        let rules = routing.rules(VIDEO_EDITOR);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].content_type_pattern(), "application/json");
        assert_eq!(rules[0].collection(), "video");
        assert_eq!(rules[1].collection(), "audio");
        assert!(rules[1].publications().is_empty());
        assert!(routing.rules("unknown").is_empty());
    }

    #[test]
    fn test_empty_content_type_is_rejected() {
        let result = RoutingTable::from_str(
            r#"{"http://cmdb.ft.com/systems/cct": [{"content_type": "", "collection": "universal-content"}]}"#,
        );
        match result {
            Err(RoutingConfigError::EmptyContentType { origin, index }) => {
                assert_eq!(origin, CCT);
                assert_eq!(index, 0);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_missing_collection_is_rejected() {
        let result = RoutingTable::from_str(
            r#"{"http://cmdb.ft.com/systems/cct": [{"content_type": ".*", "collection": "a"}, {"content_type": "-"}]}"#,
        );
        match result {
            Err(RoutingConfigError::EmptyCollection { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result = RoutingTable::from_str(
            r#"{"http://cmdb.ft.com/systems/cct": [{"content_type": "application/(json", "collection": "a"}]}"#,
        );
        assert!(matches!(
            result,
            Err(RoutingConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_malformed_document_is_rejected() {
        assert!(matches!(
            RoutingTable::from_str("I am not JSON"),
            Err(RoutingConfigError::Parse(_))
        ));
        assert!(matches!(
            RoutingTable::from_str(r#"{"origin": {"content_type": ".*"}}"#),
            Err(RoutingConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_is_rejected() {
        assert!(matches!(
            RoutingTable::from_path("/this/path/does/not/exist.json"),
            Err(RoutingConfigError::Io(_))
        ));
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let routing = table(
            r#"{"sys-A": [
                {"content_type": "^application/json$", "collection": "video"},
                {"content_type": ".*", "collection": "universal"}
            ]}"#,
        );
        let none = HashSet::new();

        assert_eq!(
            routing.resolve("sys-A", "application/json", &none),
            Some("video")
        );
        assert_eq!(routing.resolve("sys-A", "text/xml", &none), Some("universal"));
        assert_eq!(routing.resolve("sys-A", "", &none), Some("universal"));
    }

    #[test]
    fn test_rule_order_is_preserved() {
        let routing = table(
            r#"{"origin": [
                {"content_type": "json", "collection": "first"},
                {"content_type": "application/json", "collection": "second"}
            ]}"#,
        );

        assert_eq!(
            routing.resolve("origin", "application/json", &HashSet::new()),
            Some("first")
        );
    }

    #[test]
    fn test_content_type_is_a_partial_match() {
        let routing = table(r#"{"origin": [{"content_type": "application/json", "collection": "c"}]}"#);
        let none = HashSet::new();

        assert_eq!(
            routing.resolve("origin", "application/json; version=1.0", &none),
            Some("c")
        );
        assert_eq!(
            routing.resolve("origin", "application/json; charset=utf-8", &none),
            Some("c")
        );
        assert_eq!(routing.resolve("origin", "text/plain", &none), None);
    }

    #[test]
    fn test_publication_scoped_rule() {
        let routing = table(
            r#"{"sys-B": [{"content_type": ".*", "publication": ["pub-1"], "collection": "external"}]}"#,
        );

        assert_eq!(
            routing.resolve("sys-B", "application/json", &publications(&["pub-1"])),
            Some("external")
        );
        assert_eq!(
            routing.resolve(
                "sys-B",
                "application/json",
                &publications(&["pub-2", "pub-1"])
            ),
            Some("external")
        );
        assert_eq!(
            routing.resolve("sys-B", "application/json", &publications(&["pub-2"])),
            None
        );
        assert_eq!(
            routing.resolve("sys-B", "application/json", &HashSet::new()),
            None
        );
    }

    #[test]
    fn test_publication_scoped_rule_before_default() {
        let routing = table(
            r#"{"origin": [
                {"content_type": "application/json", "publication": ["pub-1"], "collection": "pub-one"},
                {"content_type": ".*", "publication": null, "collection": "default"}
            ]}"#,
        );

        assert_eq!(
            routing.resolve("origin", "application/json", &publications(&["pub-1"])),
            Some("pub-one")
        );
        assert_eq!(
            routing.resolve("origin", "application/json", &publications(&["pub-3"])),
            Some("default")
        );
        assert_eq!(
            routing.resolve("origin", "text/xml", &publications(&["pub-1"])),
            Some("default")
        );
    }

    #[test]
    fn test_unknown_or_empty_origin() {
        let routing = table(r#"{"empty": [], "origin": [{"content_type": ".*", "collection": "c"}]}"#);
        let none = HashSet::new();

        assert_eq!(routing.resolve("empty", "application/json", &none), None);
        assert_eq!(routing.resolve("unknown", "application/json", &none), None);
        assert_eq!(routing.resolve("origin", "application/json", &none), Some("c"));
    }

    #[test]
    fn test_empty_document() {
        let routing = table("{}");

        assert!(routing.is_empty());
        assert_eq!(routing.resolve(CCT, "application/json", &HashSet::new()), None);
        assert!(!table(r#"{"origin": []}"#).is_empty());
    }
}
