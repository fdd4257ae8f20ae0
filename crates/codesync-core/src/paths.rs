//! Path normalization for synced files
//!
//! Every component compares files through the same lens: forward-slash,
//! relative, case-preserving names for display and storage, and a lowercase
//! lookup key for cross-side matching.

/// Extensions that are synchronized; everything else is invisible to the engine
pub const SUPPORTED_EXTENSIONS: &[&str] = &["tsx", "ts", "jsx", "js", "json", "css"];

/// Extension appended to names that lack a supported one
pub const DEFAULT_EXTENSION: &str = "tsx";

/// Normalize a relative path.
///
/// Converts backslashes, strips leading `./` and `/`, and drops empty,
/// `.` and `..` segments so a remote name can never escape the files
/// directory.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect::<Vec<_>>()
        .join("/")
}

/// Extension of a path, if it has one
fn extension(path: &str) -> Option<&str> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// Whether the path carries one of the supported extensions
pub fn is_supported(path: &str) -> bool {
    extension(path)
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

/// Normalize and append the default extension when none is supported
pub fn ensure_extension(path: &str) -> String {
    let normalized = normalize_path(path);
    if is_supported(&normalized) {
        normalized
    } else {
        format!("{}.{}", normalized, DEFAULT_EXTENSION)
    }
}

/// Case-insensitive key used to match a file across local, remote and persisted state
pub fn lookup_key(path: &str) -> String {
    ensure_extension(path).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./components/Button.tsx"), "components/Button.tsx");
        assert_eq!(normalize_path("/abs//Nested\\File.ts"), "abs/Nested/File.ts");
        assert_eq!(normalize_path("../../etc/passwd.js"), "etc/passwd.js");
        assert_eq!(normalize_path("a/./b/../c.css"), "a/b/c.css");
    }

    #[test]
    fn test_is_supported() {
        assert!(is_supported("App.tsx"));
        assert!(is_supported("styles/Theme.CSS"));
        assert!(!is_supported("README.md"));
        assert!(!is_supported(".tsx"));
        assert!(!is_supported("Makefile"));
    }

    #[test]
    fn test_ensure_extension() {
        assert_eq!(ensure_extension("Button"), "Button.tsx");
        assert_eq!(ensure_extension("Button.ts"), "Button.ts");
        assert_eq!(ensure_extension("notes.md"), "notes.md.tsx");
    }

    #[test]
    fn test_lookup_key_is_case_insensitive() {
        assert_eq!(lookup_key("Components/Button.tsx"), lookup_key("components/button.TSX"));
        assert_eq!(lookup_key("Hero"), "hero.tsx");
    }
}
