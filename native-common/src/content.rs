use std::str::FromStr;

use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no UUID found in content body, tried paths: {0:?}")]
    IdentifierNotFound(Vec<String>),
}

/// Locates the unique identifier of a content body.
///
/// Native content of different types keeps its UUID in different places, so the
/// extractor is configured with an ordered list of dot-separated paths
/// (e.g. `uuid`, `post.uuid`, `data.uuidv3`). Paths are tried in order and the
/// first one pointing to a string that parses as a UUID wins.
#[derive(Debug, Clone, Default)]
pub struct IdentifierExtractor {
    paths: Vec<String>,
}

impl IdentifierExtractor {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the identifier exactly as it appears in the body.
    pub fn extract(&self, body: &Map<String, Value>) -> Result<String, ExtractError> {
        self.paths
            .iter()
            .filter_map(|path| lookup(body, path))
            .find(|candidate| Uuid::from_str(candidate).is_ok())
            .map(str::to_owned)
            .ok_or_else(|| ExtractError::IdentifierNotFound(self.paths.clone()))
    }
}

/// Walk a dot-separated path, returning the string found at its end.
/// Numeric segments index into arrays, any other segment is an object key.
fn lookup<'a>(body: &'a Map<String, Value>, path: &str) -> Option<&'a str> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    if first.parse::<usize>().is_ok() {
        return None;
    }
    let mut current = body.get(first)?;

    for segment in segments {
        current = match segment.parse::<usize>() {
            Ok(index) => current.as_array()?.get(index)?,
            Err(_) => current.as_object()?.get(segment)?,
        };
    }

    current.as_str()
}
