//! Lexical path manipulation, grounded on `original_source/src/fileutils.h`.
//!
//! Everything here is pure-lexical: no filesystem access, `/` as the only
//! separator, and paths treated as byte sequences rather than `str` so that
//! non-UTF-8 argv (which does occur on real build farms) round-trips
//! untouched.

use std::path::{Path, PathBuf};

/// Split `path` into its `/`-separated segments, without ever returning an
/// empty segment (so `"a//b/"` is `["a", "b"]`).
fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Collapse `.` and `..` segments, drop empty segments, and preserve a
/// leading slash for absolute paths. `..` segments that can't be cancelled
/// against anything are kept at the front of the result.
pub fn normalize(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let is_absolute = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if let Some(last) = out.last() {
                    if *last != ".." {
                        out.pop();
                        continue;
                    }
                }
                if !is_absolute {
                    out.push("..");
                }
                // An absolute path can't go above `/`; the `..` is dropped.
            }
            other => out.push(other),
        }
    }
    let joined = out.join("/");
    if is_absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Join `path` onto `cwd` (if `path` isn't already absolute) and normalize
/// the result.
pub fn make_absolute(path: &str, cwd: &str) -> String {
    if path.starts_with('/') {
        return normalize(path);
    }
    if cwd.is_empty() {
        return normalize(path);
    }
    if path.is_empty() {
        return normalize(cwd);
    }
    normalize(&format!("{}/{}", cwd.trim_end_matches('/'), path))
}

/// Express `path` relative to `base`, using the minimal number of `..`
/// segments. If `path` isn't absolute, or `base` is empty, or `path` falls
/// outside of `project_root` (when one is configured), `path` is returned
/// unmodified — this crate never leaks paths above the project root by
/// relativizing them.
pub fn make_relative(path: &str, base: &str, project_root: Option<&str>) -> String {
    if !path.starts_with('/') || base.is_empty() {
        return path.to_string();
    }
    if let Some(root) = project_root {
        if !root.is_empty() && !has_prefix(path, root) {
            return path.to_string();
        }
    }

    let path_norm = normalize(path);
    let base_norm = normalize(base);
    if path_norm == base_norm {
        return ".".to_string();
    }

    let path_segs = segments(&path_norm);
    let base_segs = segments(&base_norm);

    let common = path_segs
        .iter()
        .zip(base_segs.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let ups = base_segs.len() - common;
    let mut result: Vec<&str> = std::iter::repeat("..").take(ups).collect();
    result.extend_from_slice(&path_segs[common..]);

    if result.is_empty() {
        ".".to_string()
    } else {
        result.join("/")
    }
}

/// True iff `prefix`, treated as a directory, is a literal path-component
/// prefix of `path`. A trailing slash is appended to `prefix` if it's
/// missing. Purely lexical: `/a/` is considered a prefix of `/a/../b`.
pub fn has_prefix(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    let prefix_dir = if prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{}/", prefix)
    };
    path.starts_with(&prefix_dir) || path == prefix_dir.trim_end_matches('/')
}

/// Given an ordered list of `(old_prefix, new_prefix)` pairs, substitute
/// the first matching prefix; otherwise return `path` unchanged.
pub fn resolve_via_prefix_map(path: &str, map: &[(String, String)]) -> String {
    for (old, new) in map {
        if has_prefix(path, old) {
            let rest = &path[old.len()..];
            return format!("{}{}", new, rest);
        }
    }
    path.to_string()
}

/// Return the last `n` segments of `path`, without a trailing slash.
/// Raises if `path` doesn't have that many segments (design note §9:
/// `commonAncestorPath`'s edge case must raise, not silently truncate).
pub fn last_n_segments(path: &str, n: usize) -> Result<String, String> {
    let segs = segments(path);
    if n == 0 {
        return Ok(String::new());
    }
    if segs.len() < n {
        return Err(format!(
            "path {:?} has only {} segments, {} requested",
            path,
            segs.len(),
            n
        ));
    }
    Ok(segs[segs.len() - n..].join("/"))
}

/// Number of leading `..` segments `path` would need to cancel before it
/// can be followed from its starting point: `"a/b/c.txt"` is 0,
/// `"a/../../b.txt"` is 1, `"../.."` is 2.
pub fn parent_directory_levels(path: &str) -> usize {
    let mut depth: i64 = 0;
    let mut max_needed: i64 = 0;
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                depth -= 1;
                if -depth > max_needed {
                    max_needed = -depth;
                }
            }
            _ => depth += 1,
        }
    }
    max_needed as usize
}

/// The basename of `path`: the text after the last `/`.
pub fn path_basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

pub fn to_path_buf(path: &str) -> PathBuf {
    PathBuf::from(path)
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalize_collapses_dot_and_dotdot() {
        assert_eq!(normalize("/a/./b/../c"), "/a/c");
        assert_eq!(normalize("a/b/../../c"), "c");
        assert_eq!(normalize("../../a"), "../../a");
        assert_eq!(normalize("/../a"), "/a");
        assert_eq!(normalize("a/"), "a");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_make_relative_minimal_updirs() {
        assert_eq!(make_relative("/work/sub/file.c", "/work", None), "sub/file.c");
        assert_eq!(make_relative("/work/file.c", "/work/sub", None), "../file.c");
        assert_eq!(make_relative("/work", "/work", None), ".");
    }

    #[test]
    fn test_make_relative_outside_project_root_unchanged() {
        let result = make_relative("/etc/passwd", "/work", Some("/work"));
        assert_eq!(result, "/etc/passwd");
    }

    #[test]
    fn test_make_relative_non_absolute_unchanged() {
        assert_eq!(make_relative("rel/path", "/work", None), "rel/path");
        assert_eq!(make_relative("/work/a", "", None), "/work/a");
    }

    #[test]
    fn test_roundtrip_normalize_make_absolute_make_relative() {
        let base = "/work";
        for p in ["/work/a/b.c", "/work/../other/c.c", "/work"] {
            let abs = make_absolute(p, base);
            let rel = make_relative(abs.as_str(), base, None);
            let abs2 = make_absolute(&rel, base);
            assert_eq!(normalize(&abs), normalize(&abs2));
        }
    }

    #[test]
    fn test_has_prefix() {
        assert!(has_prefix("/a/b", "/a"));
        assert!(has_prefix("/a/", "/a"));
        assert!(!has_prefix("/ab", "/a"));
        assert!(has_prefix("/a/../b", "/a"));
    }

    #[test]
    fn test_resolve_via_prefix_map() {
        let map = vec![("/usr/include".to_string(), "/usr".to_string())];
        assert_eq!(
            resolve_via_prefix_map("/usr/include/extra", &map),
            "/usr/extra"
        );
        assert_eq!(resolve_via_prefix_map("/opt/x", &map), "/opt/x");
    }

    #[test]
    fn test_last_n_segments() {
        assert_eq!(last_n_segments("/a/b/c", 2).unwrap(), "b/c");
        assert!(last_n_segments("/a/b/c", 10).is_err());
    }

    #[test]
    fn test_parent_directory_levels() {
        assert_eq!(parent_directory_levels("a/b/c.txt"), 0);
        assert_eq!(parent_directory_levels("a/../../b.txt"), 1);
        assert_eq!(parent_directory_levels("../.."), 2);
    }

    #[test]
    fn test_path_basename() {
        assert_eq!(path_basename("a/b/c.txt"), "c.txt");
        assert_eq!(path_basename("c.txt"), "c.txt");
    }
}
