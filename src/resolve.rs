//! Path string arithmetic shared by the validator and the orchestrator.
//!
//! Paths in a parameter document may be POSIX paths, Windows drive or UNC
//! paths, or object-storage URLs; none of these helpers touch the filesystem.

use path_absolutize::Absolutize;
use std::path::{Path, PathBuf};

pub const SEPARATORS: &[char] = &['/', '\\'];

/// Scheme prefix that routes a path to the object-storage backend.
pub const OBJECT_SCHEME: &str = "s3://";

/// Default per-server path: the server's administrative share.
pub const DEFAULT_SERVER_PATH_TEMPLATE: &str = r"\\{server}\{path}";

pub fn is_object_url(path: &str) -> bool {
    path.get(..OBJECT_SCHEME.len())
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case(OBJECT_SCHEME))
}

/// Absolute in any of the syntaxes we accept: `/x`, `\\server\x`, `C:\x`, `s3://`.
pub fn is_absolute(path: &str) -> bool {
    if is_object_url(path) || path.starts_with(SEPARATORS) {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn separator_for(base: &str) -> char {
    if !is_object_url(base) && base.contains('\\') && !base.contains('/') {
        '\\'
    } else {
        '/'
    }
}

/// Join `rel` onto `base`, tolerating stray leading and trailing separators
/// on either side. Never fails.
pub fn combine(base: &str, rel: &str) -> String {
    let rel = rel.trim_matches(SEPARATORS);
    if base.is_empty() {
        return rel.to_string();
    }
    if rel.is_empty() {
        return base.to_string();
    }
    let sep = separator_for(base);
    let rel: String = rel
        .chars()
        .map(|c| if SEPARATORS.contains(&c) { sep } else { c })
        .collect();
    format!("{}{}{}", base.trim_end_matches(SEPARATORS), sep, rel)
}

/// Resolve `path` under `root` unless it is already absolute, so resolving an
/// already-resolved path is a no-op.
pub fn resolve_under(root: &str, path: &str) -> String {
    let path = path.trim();
    if is_absolute(path) || root.trim().is_empty() {
        path.to_string()
    } else {
        combine(root.trim(), path)
    }
}

/// Lexically absolutize a filesystem path against the working directory.
pub fn absolutize(path: &Path) -> PathBuf {
    match path.absolutize() {
        Ok(absolute) => absolute.into_owned(),
        Err(_) => path.to_path_buf(),
    }
}

/// Expand a server path template. `:` in the server-local path becomes `$`
/// so `D:\apps` addresses the `D$` administrative share.
pub fn server_path(template: &str, server: &str, local_path: &str) -> String {
    let local = local_path.trim_start_matches(SEPARATORS).replace(':', "$");
    template
        .replace("{server}", server.trim())
        .replace("{path}", &local)
}

/// Combine `path` under `root`, refusing anything that would land outside it.
pub fn confine(root: &str, path: &str) -> Option<String> {
    if path.split(SEPARATORS).any(|segment| segment == "..") {
        return None;
    }
    if is_absolute(path) {
        let root = root.trim_end_matches(SEPARATORS);
        let inside = path
            .get(..root.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(root))
            && path
                .get(root.len()..)
                .is_some_and(|rest| rest.len() > 1 && rest.starts_with(SEPARATORS));
        return inside.then(|| path.to_string());
    }
    Some(combine(root, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_trims_seams() {
        assert_eq!(combine("/deploy/", "/src/"), "/deploy/src");
        assert_eq!(combine(r"C:\deploy\", r"\src\app"), r"C:\deploy\src\app");
        assert_eq!(combine("s3://bucket/root", r"a\b.txt"), "s3://bucket/root/a/b.txt");
        assert_eq!(combine("", "rel"), "rel");
        assert_eq!(combine("/base", ""), "/base");
        assert_eq!(combine("/", "x"), "/x");
    }

    #[test]
    fn resolve_under_does_not_double_prefix() {
        let once = resolve_under("/deploy", "release/1.0");
        assert_eq!(once, "/deploy/release/1.0");
        assert_eq!(resolve_under("/deploy", &once), once);
        assert_eq!(resolve_under("/deploy", "s3://b/k"), "s3://b/k");
        assert_eq!(resolve_under(r"C:\d", r"E:\x"), r"E:\x");
    }

    #[test]
    fn object_url_detection_is_case_insensitive() {
        assert!(is_object_url("S3://bucket/key"));
        assert!(!is_object_url("s3:/bucket"));
        assert!(!is_object_url("/s3://x"));
    }

    #[test]
    fn server_path_uses_admin_share() {
        assert_eq!(
            server_path(DEFAULT_SERVER_PATH_TEMPLATE, "web01", r"D:\apps\site"),
            r"\\web01\D$\apps\site"
        );
        assert_eq!(server_path("/mnt/{server}/{path}", "web02", "/srv/app"), "/mnt/web02/srv/app");
    }

    #[test]
    fn confine_rejects_escapes() {
        assert_eq!(confine(r"D:\apps", r"svc\run.exe").as_deref(), Some(r"D:\apps\svc\run.exe"));
        assert_eq!(confine(r"D:\apps", r"d:\APPS\svc.exe").as_deref(), Some(r"d:\APPS\svc.exe"));
        assert_eq!(confine(r"D:\apps", r"..\windows\x.exe"), None);
        assert_eq!(confine(r"D:\apps", r"C:\windows\x.exe"), None);
        assert_eq!(confine("/srv/app", "/srv/application/x"), None);
    }
}
