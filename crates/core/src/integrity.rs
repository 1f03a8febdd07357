//! Line-count integrity check between a source and a translated candidate.

use std::path::Path;

use tracing::{info, warn};

use crate::subtitle::SubtitleDocument;

/// Fraction of source lines a translation may lose before it is rejected.
pub const LINE_COUNT_TOLERANCE: f64 = 0.05;

/// Whether `candidate` retains enough of `source`'s entries to be trusted.
///
/// IO or parse problems on either side return `true`: an infrastructure
/// hiccup must not fail an otherwise finished translation. Every outcome is
/// logged.
pub fn validate_files(source: &Path, candidate: &Path) -> bool {
    let source_doc = match SubtitleDocument::read_file(source) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(
                path = %source.display(),
                "integrity check could not read source, treating as valid: {}",
                e
            );
            return true;
        }
    };
    let candidate_doc = match SubtitleDocument::read_file(candidate) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(
                path = %candidate.display(),
                "integrity check could not read candidate, treating as valid: {}",
                e
            );
            return true;
        }
    };

    let source_count = source_doc.items.len();
    let candidate_count = candidate_doc.items.len();
    let minimum = (source_count as f64 * (1.0 - LINE_COUNT_TOLERANCE)).ceil() as usize;

    if candidate_count < minimum {
        warn!(
            source = source_count,
            candidate = candidate_count,
            minimum,
            "integrity check failed: translated file lost too many entries"
        );
        false
    } else {
        info!(
            source = source_count,
            candidate = candidate_count,
            "integrity check passed"
        );
        true
    }
}
