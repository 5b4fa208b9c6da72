//! Dotted field paths over BSON documents.
//!
//! Paths such as `"address.city"` address nested documents; numeric segments index into
//! arrays (`"tags.0"`). These helpers are shared by the document facade (change tracking,
//! population, `get_path`/`set_path`) and by backends that evaluate filters and updates
//! themselves.

use bson::{Bson, Document};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Rejects paths that can never address a stored field.
///
/// Empty paths, empty segments (`"a..b"`) and operator-looking segments (`"$set"`) are
/// programming errors and are reported before any I/O is attempted.
pub fn validate_path(path: &str) -> DocumentStoreResult<()> {
    if path.is_empty() {
        return Err(DocumentStoreError::InvalidArgument("field path must not be empty".into()));
    }

    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(DocumentStoreError::InvalidArgument(format!(
                "field path `{}` contains an empty segment",
                path
            )));
        }
        if segment.starts_with('$') {
            return Err(DocumentStoreError::InvalidArgument(format!(
                "field path `{}` must not contain operator segment `{}`",
                path, segment
            )));
        }
    }

    Ok(())
}

/// Returns the value stored at `path`, if present.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Stores `value` at `path`, creating intermediate documents as needed.
///
/// An intermediate value that is neither a document nor an array is replaced by a
/// document. Array segments must address an existing index or the next free slot.
pub fn set_path(doc: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<()> {
    validate_path(path)?;

    let segments = path.split('.').collect::<Vec<_>>();
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| DocumentStoreError::InvalidArgument("field path must not be empty".into()))?;

    let mut current = doc;
    for segment in parents {
        if !matches!(current.get(*segment), Some(Bson::Document(_))) {
            current.insert(segment.to_string(), Document::new());
        }
        current = match current.get_mut(*segment) {
            Some(Bson::Document(inner)) => inner,
            _ => {
                return Err(DocumentStoreError::InvalidArgument(format!(
                    "cannot traverse `{}` in path `{}`",
                    segment, path
                )));
            }
        };
    }

    current.insert(last.to_string(), value);

    Ok(())
}

/// Removes and returns the value stored at `path`.
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Bson> {
    match path.rsplit_once('.') {
        None => doc.remove(path),
        Some((parent, last)) => match get_path_mut(doc, parent)? {
            Bson::Document(inner) => inner.remove(last),
            _ => None,
        },
    }
}

/// Mutable counterpart of [`get_path`].
pub fn get_path_mut<'a>(doc: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get_mut(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get_mut(segment)?,
            Bson::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Lists the leaf paths whose values differ between `old` and `new`.
///
/// Nested documents are compared key by key; arrays and scalars are compared whole.
/// Keys present on only one side are reported as differing.
pub fn diff_paths(old: &Document, new: &Document) -> Vec<String> {
    let mut changed = Vec::new();
    diff_into(old, new, "", &mut changed);
    changed
}

fn diff_into(old: &Document, new: &Document, prefix: &str, changed: &mut Vec<String>) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        }
    };

    for (key, new_value) in new {
        match (old.get(key), new_value) {
            (Some(Bson::Document(a)), Bson::Document(b)) => diff_into(a, b, &join(key), changed),
            (Some(old_value), _) if old_value == new_value => {}
            _ => changed.push(join(key)),
        }
    }

    for key in old.keys() {
        if !new.contains_key(key) {
            changed.push(join(key));
        }
    }
}

/// True when `path` equals `other` or one is nested under the other.
pub fn overlaps(path: &str, other: &str) -> bool {
    path == other || is_ancestor(path, other) || is_ancestor(other, path)
}

/// True when `ancestor` is a strict parent path of `path`.
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'.'
}

/// Drops duplicate paths and paths already covered by one of their ancestors.
pub fn collapse_paths(paths: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut sorted = paths.into_iter().collect::<Vec<_>>();
    sorted.sort();
    sorted.dedup();

    let mut collapsed: Vec<String> = Vec::with_capacity(sorted.len());
    for path in sorted {
        if !collapsed.iter().any(|kept| is_ancestor(kept, &path)) {
            collapsed.push(path);
        }
    }

    collapsed
}

/// Expands each path into itself and all of its parent paths, e.g. `a.b.c` into
/// `a`, `a.b` and `a.b.c`.
pub fn with_parents(paths: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut expanded = Vec::new();

    for path in paths {
        let mut end = 0;
        for segment in path.split('.') {
            end += segment.len();
            let parent = &path[..end];
            if !expanded.iter().any(|p: &String| p == parent) {
                expanded.push(parent.to_string());
            }
            end += 1;
        }
    }

    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn get_and_set_nested_paths() {
        let mut document = doc! { "name": "Ada", "address": { "city": "London" }, "tags": ["a", "b"] };

        assert_eq!(get_path(&document, "address.city"), Some(&Bson::String("London".into())));
        assert_eq!(get_path(&document, "tags.1"), Some(&Bson::String("b".into())));
        assert_eq!(get_path(&document, "address.zip"), None);

        set_path(&mut document, "address.zip", Bson::String("N1".into())).unwrap();
        set_path(&mut document, "meta.created.by", Bson::String("test".into())).unwrap();

        assert_eq!(get_path(&document, "address.zip"), Some(&Bson::String("N1".into())));
        assert_eq!(get_path(&document, "meta.created.by"), Some(&Bson::String("test".into())));
    }

    #[test]
    fn remove_nested_path() {
        let mut document = doc! { "address": { "city": "London", "zip": "N1" } };

        assert_eq!(remove_path(&mut document, "address.zip"), Some(Bson::String("N1".into())));
        assert_eq!(document, doc! { "address": { "city": "London" } });
        assert_eq!(remove_path(&mut document, "missing.path"), None);
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(validate_path("").is_err());
        assert!(validate_path("a..b").is_err());
        assert!(validate_path("$set").is_err());
        assert!(validate_path("a.$b").is_err());
        assert!(validate_path("a.b_c.0").is_ok());
    }

    #[test]
    fn diff_reports_leaf_paths() {
        let old = doc! { "name": "Ada", "address": { "city": "London", "zip": "N1" }, "age": 36 };
        let new = doc! { "name": "Ada", "address": { "city": "Paris", "zip": "N1" }, "email": "a@b.c" };

        let mut changed = diff_paths(&old, &new);
        changed.sort();

        assert_eq!(changed, vec!["address.city", "age", "email"]);
    }

    #[test]
    fn collapse_and_expand() {
        let collapsed = collapse_paths(vec!["a.b".to_string(), "a".to_string(), "c".to_string(), "c".to_string()]);
        assert_eq!(collapsed, vec!["a", "c"]);

        let expanded = with_parents(vec!["a.b.c".to_string(), "a.d".to_string()]);
        assert_eq!(expanded, vec!["a", "a.b", "a.b.c", "a.d"]);

        assert!(overlaps("a", "a.b"));
        assert!(overlaps("a.b", "a"));
        assert!(!overlaps("a", "ab"));
    }
}
