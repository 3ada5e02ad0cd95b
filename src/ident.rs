//! Filename sanitization
//! ---------------------
//! Single source of truth for turning user-supplied names into legal path
//! components. Database names, table names, record id strings and attachment
//! filenames all pass through the same rule.

use once_cell::sync::Lazy;
use regex::Regex;

/// Name of the JSON document carried by every database, table and record
/// directory.
pub const DATA_FNAME: &str = "data.json";

// Unicode-aware: letters and digits of any script survive, everything else
// outside `[-\w.]` collapses to an underscore.
static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^-\w.]").expect("static pattern"));

/// Map a string to a legal path component: trim surrounding whitespace,
/// replace inner spaces with underscores, then replace every character
/// outside the word class with an underscore.
///
/// The mapping is idempotent: `sanitize_filename(sanitize_filename(x)) ==
/// sanitize_filename(x)` for every input.
pub fn sanitize_filename(name: &str) -> String {
    let collapsed = name.trim().replace(' ', "_");
    UNSAFE_CHARS.replace_all(&collapsed, "_").into_owned()
}
