//! Region-aware pricing resolution
//!
//! Cloud providers expose regional model identifiers such as
//! `us-central1/gemini-1.5-pro` that bill at the base model's rate. The
//! resolution chain tries the exact identifier first, then strips a
//! recognized region prefix, then additionally drops a trailing numeric
//! version suffix (`text-bison-001` → `text-bison`).
//!
//! Unrecognized prefixes are not stripped: `invalid-region/model` is looked
//! up as that literal key and fails if absent.

use super::{ModelCostTable, PricingEntry};
use once_cell::sync::Lazy;
use regex::Regex;

/// `<area>-<direction><digits>`, the shape of Google Cloud region names.
static REGION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(us|europe|asia|australia|northamerica|southamerica|me|africa)-(central|east|west|north|south|northeast|northwest|southeast|southwest)\d+$",
    )
    .expect("region pattern is valid")
});

/// Trailing numeric version suffix, e.g. `-001`.
static VERSION_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-\d+$").expect("version suffix pattern is valid"));

/// Whether `region` matches the recognized cloud-region naming pattern.
pub fn is_valid_cloud_region(region: &str) -> bool {
    REGION_RE.is_match(region)
}

/// Strip a leading `<region>/` prefix when the prefix is a recognized cloud
/// region. Returns `None` when the identifier has no such prefix.
pub fn strip_region(model: &str) -> Option<&str> {
    let (prefix, rest) = model.split_once('/')?;
    if !rest.is_empty() && is_valid_cloud_region(prefix) {
        Some(rest)
    } else {
        None
    }
}

/// Strip a trailing numeric version suffix. Returns `None` when there is no
/// suffix to strip.
pub fn strip_version_suffix(model: &str) -> Option<&str> {
    let m = VERSION_SUFFIX_RE.find(model)?;
    Some(&model[..m.start()])
}

/// Resolution chain: exact match, region-stripped match, region- and
/// version-stripped match.
pub(super) fn resolve<'a>(
    table: &'a ModelCostTable,
    model: &str,
) -> Option<(&'a str, &'a PricingEntry)> {
    if let Some((key, entry)) = table.get_key_value(model) {
        return Some((key, entry));
    }

    let stripped = strip_region(model)?;
    if let Some((key, entry)) = table.get_key_value(stripped) {
        return Some((key, entry));
    }

    let unversioned = strip_version_suffix(stripped)?;
    table.get_key_value(unversioned)
}

impl ModelCostTable {
    fn get_key_value(&self, model: &str) -> Option<(&str, &PricingEntry)> {
        self.entries
            .get_key_value(model)
            .map(|(k, v)| (k.as_str(), v))
    }
}
