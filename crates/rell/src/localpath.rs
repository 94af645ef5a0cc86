//! Translation between language file paths and local filesystem form.
//!
//! Language paths always use forward slashes. On Windows-style targets a
//! leading `/X/` names drive `X:`, so `/c/docs/file` maps to
//! `c:\docs\file` and back. Repeated separators collapse; `.` means the
//! current directory and `..` the parent, both passed through untouched.

/// Converts a language path to local form.
#[must_use]
pub fn to_local_path(path: &str, windows: bool) -> String {
    let collapsed = collapse_separators(path);
    if !windows {
        return collapsed;
    }
    let mut rest = collapsed.as_str();
    let mut out = String::new();
    // Leading /X/ names a drive.
    if let Some(stripped) = rest.strip_prefix('/') {
        let mut segments = stripped.splitn(2, '/');
        let first = segments.next().unwrap_or("");
        if first.len() == 1 && first.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            out.push_str(first);
            out.push(':');
            rest = segments.next().unwrap_or("");
            out.push('\\');
        } else {
            out.push('\\');
            rest = stripped;
        }
    }
    out.push_str(&rest.replace('/', "\\"));
    out
}

/// Converts a local path to language form.
#[must_use]
pub fn to_language_path(path: &str, windows: bool) -> String {
    if !windows {
        return collapse_separators(path);
    }
    let normalized = path.replace('\\', "/");
    let collapsed = collapse_separators(&normalized);
    // Drive letter X:/... becomes /X/...
    let mut chars = collapsed.chars();
    if let (Some(drive), Some(':')) = (chars.next(), chars.next())
        && drive.is_ascii_alphabetic()
    {
        let rest = collapsed[2..].trim_start_matches('/');
        if rest.is_empty() {
            return format!("/{drive}/");
        }
        return format!("/{drive}/{rest}");
    }
    collapsed
}

/// Collapses runs of `/` into one, preserving a single leading separator.
fn collapse_separators(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_sep = false;
    for c in path.chars() {
        if c == '/' {
            if !prev_sep {
                out.push('/');
            }
            prev_sep = true;
        } else {
            out.push(c);
            prev_sep = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_paths_pass_through() {
        assert_eq!(to_local_path("/usr/local/bin", false), "/usr/local/bin");
        assert_eq!(to_language_path("/usr/local/bin", false), "/usr/local/bin");
    }

    #[test]
    fn repeated_separators_collapse() {
        assert_eq!(to_local_path("a//b///c", false), "a/b/c");
        assert_eq!(to_language_path("//a//b", false), "/a/b");
    }

    #[test]
    fn drive_letters_map_both_ways() {
        assert_eq!(to_local_path("/c/docs/file.txt", true), "c:\\docs\\file.txt");
        assert_eq!(to_language_path("c:\\docs\\file.txt", true), "/c/docs/file.txt");
    }

    #[test]
    fn dot_segments_pass_through() {
        assert_eq!(to_local_path("./a/../b", false), "./a/../b");
    }

    #[test]
    fn round_trip_on_well_formed_inputs() {
        for p in ["/c/one/two", "relative/path", "./here", "../up/one"] {
            assert_eq!(to_language_path(&to_local_path(p, true), true), p);
            assert_eq!(to_language_path(&to_local_path(p, false), false), p);
        }
    }
}
