use crate::{NxError, NxResult};

pub const PATH_SEPARATOR: char = '/';
pub const CLASS_HINT_MARKER: char = ':';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub name: String,
    pub class_hint: Option<String>,
}

impl PathSegment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_hint: None,
        }
    }

    pub fn with_hint(name: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_hint: Some(hint.into()),
        }
    }

    fn parse(raw: &str, full: &str) -> NxResult<Self> {
        let mut parts = raw.split(CLASS_HINT_MARKER);
        let name = parts.next().unwrap_or_default();
        let hint = parts.next();
        if parts.next().is_some() {
            return Err(NxError::MalformedPath(full.to_string()));
        }
        match hint {
            None => Ok(PathSegment::new(name)),
            Some(hint) => {
                if name.is_empty() || hint.is_empty() {
                    return Err(NxError::MalformedPath(full.to_string()));
                }
                Ok(PathSegment::with_hint(name, hint))
            }
        }
    }
}

/// A hierarchical path whose segments may carry a class hint,
/// e.g. `/entry:NXentry/data:NXdata/signal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AugmentedPath {
    pub absolute: bool,
    pub trailing_separator: bool,
    pub segments: Vec<PathSegment>,
}

impl AugmentedPath {
    pub fn parse(path: &str) -> NxResult<Self> {
        let mut segments = Vec::new();
        for raw in path.split(PATH_SEPARATOR) {
            if raw.is_empty() {
                continue;
            }
            segments.push(PathSegment::parse(raw, path)?);
        }

        Ok(Self {
            absolute: path.starts_with(PATH_SEPARATOR),
            trailing_separator: path.len() > 1 && path.ends_with(PATH_SEPARATOR),
            segments,
        })
    }

    pub fn root() -> Self {
        Self {
            absolute: true,
            trailing_separator: false,
            segments: Vec::new(),
        }
    }

    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self {
            absolute: true,
            trailing_separator: false,
            segments,
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.segments.iter().map(|s| s.name.as_str()).collect()
    }

    /// Canonical lookup path with every hint stripped. The root is `/`.
    pub fn plain(&self) -> String {
        plain_path(&self.segments)
    }

    /// Plain path of the first `count` segments.
    pub fn plain_prefix(&self, count: usize) -> String {
        plain_path(&self.segments[..count.min(self.segments.len())])
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }
}

impl std::fmt::Display for AugmentedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for seg in &self.segments {
            write!(f, "/{}", seg.name)?;
            if let Some(hint) = &seg.class_hint {
                write!(f, "{}{}", CLASS_HINT_MARKER, hint)?;
            }
        }
        if self.trailing_separator {
            write!(f, "/")?;
        }
        Ok(())
    }
}

pub fn plain_path(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    for seg in segments {
        out.push(PATH_SEPARATOR);
        out.push_str(&seg.name);
    }
    if out.is_empty() {
        out.push(PATH_SEPARATOR);
    }
    out
}

pub fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches(PATH_SEPARATOR);
    format!("{}{}{}", parent, PATH_SEPARATOR, name)
}

/// Split a plain path into its parent path and final name.
/// Example: `/a/b` -> (`/a`, `b`), `/a` -> (`/`, `a`), `/` -> None
pub fn split_parent_name(path: &str) -> Option<(String, String)> {
    let path = path.trim_end_matches(PATH_SEPARATOR);
    if path.is_empty() {
        return None;
    }
    let last_slash = path.rfind(PATH_SEPARATOR)?;
    let parent = if last_slash == 0 {
        PATH_SEPARATOR.to_string()
    } else {
        path[..last_slash].to_string()
    };
    let name = path[last_slash + 1..].to_string();
    if name.is_empty() {
        None
    } else {
        Some((parent, name))
    }
}

/// Turn a soft link target into a full segment list. Relative targets are
/// anchored at `parent_prefix`; the not yet walked `tail` is appended.
pub fn normalize_link_target(
    parent_prefix: &[PathSegment],
    target: &str,
    tail: &[PathSegment],
) -> NxResult<Vec<PathSegment>> {
    let mut out = if target.starts_with(PATH_SEPARATOR) {
        Vec::new()
    } else {
        parent_prefix.to_vec()
    };

    for raw in target.split(PATH_SEPARATOR) {
        match raw {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            _ => out.push(PathSegment::parse(raw, target)?),
        }
    }

    out.extend(tail.iter().cloned());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_path() {
        let p = AugmentedPath::parse("/entry/data/signal").unwrap();
        assert!(p.absolute);
        assert!(!p.trailing_separator);
        assert_eq!(p.names(), vec!["entry", "data", "signal"]);
        assert_eq!(p.plain(), "/entry/data/signal");
    }

    #[test]
    fn test_parse_hints_are_stripped_from_plain() {
        let p = AugmentedPath::parse("/entry:NXentry/data:NXdata/signal").unwrap();
        assert_eq!(p.segments[0], PathSegment::with_hint("entry", "NXentry"));
        assert_eq!(p.segments[1].class_hint.as_deref(), Some("NXdata"));
        assert_eq!(p.segments[2].class_hint, None);
        assert_eq!(p.plain(), "/entry/data/signal");
        assert_eq!(p.to_string(), "/entry:NXentry/data:NXdata/signal");
    }

    #[test]
    fn test_parse_root_and_trailing() {
        let root = AugmentedPath::parse("/").unwrap();
        assert!(root.is_root());
        assert_eq!(root.plain(), "/");
        assert!(!root.trailing_separator);

        let p = AugmentedPath::parse("/entry/").unwrap();
        assert!(p.trailing_separator);
        assert_eq!(p.plain(), "/entry");
        assert_eq!(p.to_string(), "/entry/");

        let empty = AugmentedPath::parse("").unwrap();
        assert!(empty.is_root());
        assert!(!empty.absolute);
    }

    #[test]
    fn test_parse_collapses_doubled_separators() {
        let p = AugmentedPath::parse("//entry//data").unwrap();
        assert_eq!(p.plain(), "/entry/data");
    }

    #[test]
    fn test_parse_malformed_hints() {
        assert!(matches!(
            AugmentedPath::parse("/:NXentry"),
            Err(NxError::MalformedPath(_))
        ));
        assert!(matches!(
            AugmentedPath::parse("/entry:"),
            Err(NxError::MalformedPath(_))
        ));
        assert!(matches!(
            AugmentedPath::parse("/entry:NXentry:extra"),
            Err(NxError::MalformedPath(_))
        ));
    }

    #[test]
    fn test_plain_prefix() {
        let p = AugmentedPath::parse("/a:NXentry/b/c").unwrap();
        assert_eq!(p.plain_prefix(0), "/");
        assert_eq!(p.plain_prefix(2), "/a/b");
    }

    #[test]
    fn test_split_parent_name() {
        assert_eq!(
            split_parent_name("/a/b"),
            Some(("/a".to_string(), "b".to_string()))
        );
        assert_eq!(
            split_parent_name("/a"),
            Some(("/".to_string(), "a".to_string()))
        );
        assert_eq!(split_parent_name("/"), None);
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a/", "b"), "/a/b");
    }

    #[test]
    fn test_normalize_link_target() {
        let prefix = vec![PathSegment::new("entry"), PathSegment::new("data")];
        let tail = vec![PathSegment::new("x")];

        let abs = normalize_link_target(&prefix, "/other/y", &tail).unwrap();
        assert_eq!(AugmentedPath::from_segments(abs).plain(), "/other/y/x");

        let rel = normalize_link_target(&prefix, "../sample/./z", &tail).unwrap();
        assert_eq!(AugmentedPath::from_segments(rel).plain(), "/entry/sample/z/x");
    }
}
