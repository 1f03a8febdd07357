//! Discovery of external (sidecar) subtitle files next to a media file.
//!
//! Sidecars follow the `<media base>[.<tag>].<lang>.<ext>` convention. The
//! language token is the component right before the extension; anything else
//! between the base name and the language (release tags, forced markers) is
//! ignored for matching purposes.

use std::path::{Path, PathBuf};

use crate::language;

const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ass", "ssa"];

/// An external subtitle file found beside a media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarSubtitle {
    pub path: PathBuf,
    /// Language token from the filename, normalized.
    pub language: String,
}

/// List subtitle files in `dir` whose basename starts with `media_base`.
///
/// IO failures (missing directory, permissions) yield an empty list; a media
/// directory that cannot be read is indistinguishable from one with no
/// sidecars as far as state computation is concerned.
pub fn find_sidecars(dir: &Path, media_base: &str) -> Vec<SidecarSubtitle> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut sidecars = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !SUBTITLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !stem.starts_with(media_base) {
            continue;
        }
        let Some(lang) = language_token(stem) else {
            continue;
        };
        sidecars.push(SidecarSubtitle {
            path,
            language: lang,
        });
    }

    sidecars.sort_by(|a, b| a.path.cmp(&b.path));
    sidecars
}

/// Whether any sidecar matches the given language code.
pub fn has_language(sidecars: &[SidecarSubtitle], code: &str) -> bool {
    sidecars.iter().any(|s| language::matches(&s.language, code))
}

/// First sidecar matching the given language code.
pub fn find_language<'a>(sidecars: &'a [SidecarSubtitle], code: &str) -> Option<&'a SidecarSubtitle> {
    sidecars.iter().find(|s| language::matches(&s.language, code))
}

/// The last dot-separated component of a subtitle stem, when it looks like a
/// language tag (2-3 letters, optionally with a region suffix).
fn language_token(stem: &str) -> Option<String> {
    let token = stem.rsplit('.').next()?;
    let base = token.split(['-', '_']).next()?;
    if (2..=3).contains(&base.len()) && base.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(language::normalize(token))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), "stub").unwrap();
    }

    #[test]
    fn test_find_sidecars_matches_base_and_language() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Movie (2020).en.srt");
        touch(dir.path(), "Movie (2020).pt-BR.srt");
        touch(dir.path(), "Movie (2020).ass");
        touch(dir.path(), "Other Movie.en.srt");
        touch(dir.path(), "Movie (2020).mkv");

        let sidecars = find_sidecars(dir.path(), "Movie (2020)");
        let langs: Vec<&str> = sidecars.iter().map(|s| s.language.as_str()).collect();
        assert_eq!(langs, vec!["en", "pt"]);
    }

    #[test]
    fn test_find_sidecars_tagged_names() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Show S01E01.[Lingarr].fr.srt");

        let sidecars = find_sidecars(dir.path(), "Show S01E01");
        assert_eq!(sidecars.len(), 1);
        assert_eq!(sidecars[0].language, "fr");
    }

    #[test]
    fn test_find_sidecars_missing_dir_is_empty() {
        let sidecars = find_sidecars(Path::new("/nonexistent/path"), "Movie");
        assert!(sidecars.is_empty());
    }

    #[test]
    fn test_has_and_find_language() {
        let sidecars = vec![SidecarSubtitle {
            path: PathBuf::from("/m/Movie.eng.srt"),
            language: "en".to_string(),
        }];
        assert!(has_language(&sidecars, "eng"));
        assert!(!has_language(&sidecars, "fr"));
        assert!(find_language(&sidecars, "en").is_some());
    }

    #[test]
    fn test_language_token_rules() {
        assert_eq!(language_token("Movie.en"), Some("en".to_string()));
        assert_eq!(language_token("Movie.eng"), Some("en".to_string()));
        assert_eq!(language_token("Movie.pt-BR"), Some("pt".to_string()));
        // No language component at all.
        assert_eq!(language_token("Movie"), None);
        assert_eq!(language_token("Movie.1080p"), None);
    }
}
