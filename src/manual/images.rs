//! Resolution of `[image N]` citations

use super::{ImageContent, ManualContent};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[image (\d+)\]").expect("citation pattern is valid"));

/// Images cited in `text`, in first-citation order
///
/// Citations are 1-based. Out-of-range citations are ignored and the result
/// never holds two images with the same `src`.
pub fn resolve_images(text: &str, manual: &ManualContent) -> Vec<ImageContent> {
    let mut seen = HashSet::new();

    CITATION
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse::<usize>().ok())
        .filter_map(|n| n.checked_sub(1))
        .filter_map(|index| manual.images.get(index))
        .filter(|image| seen.insert(image.src.clone()))
        .cloned()
        .collect()
}
