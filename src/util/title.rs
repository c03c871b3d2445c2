use std::collections::BTreeSet;

/// Publisher/site names commonly appended to titles after a separator.
/// Everything from the separator on is dropped, e.g. "Islam - Wikipedia".
const KNOWN_SUFFIX_SOURCES: &[&str] = &[
    "wikipedia",
    "klexikon",
    "wikibooks",
    "wikiversity",
    "planet-schule",
    "planet schule",
    "lehrer-online",
    "lernhelfer",
    "sofatutor",
    "learningapps",
    "serlo",
];

const SUFFIX_SEPARATORS: &[char] = &['-', '–', '—', '|', ':'];
const ANNOTATION_TLDS: &[&str] = &[".de", ".com", ".org", ".net", ".edu"];

/// Strip publisher suffixes and site annotations from a title:
/// `"Islam - Wikipedia"` -> `"Islam"`, `"Geschichte (planet-schule.de)"` ->
/// `"Geschichte"`. Also drops `&` characters and collapses whitespace.
///
/// Returns `None` when nothing changed (callers use this to decide whether a
/// normalized search variant exists at all) or when stripping left nothing.
pub fn normalize_title(title: &str) -> Option<String> {
    let original = title.trim();
    if original.is_empty() {
        return None;
    }

    let mut normalized = original.to_string();

    for source in KNOWN_SUFFIX_SOURCES {
        if let Some(cut) = suffix_cut_position(&normalized, source) {
            normalized.truncate(cut);
        }
    }

    normalized = strip_domain_annotation(normalized.trim_end());
    normalized = strip_trailing_pipe_segment(&normalized);

    let normalized = normalized
        .replace('&', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if normalized.is_empty() || normalized == original {
        None
    } else {
        Some(normalized)
    }
}

/// Byte position at which a `<sep> <source>...` suffix starts, if present:
/// the source name (case-insensitive) preceded by optional whitespace and one
/// separator character, itself preceded by optional whitespace.
fn suffix_cut_position(title: &str, source: &str) -> Option<usize> {
    // ASCII folding only: the source names are ASCII and byte offsets must
    // stay valid for slicing the original title.
    let haystack = title.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(rel) = haystack[search_from..].find(source) {
        let idx = search_from + rel;
        let before = &title[..idx];
        let trimmed = before.trim_end();
        if let Some(sep) = trimmed.chars().last() {
            if SUFFIX_SEPARATORS.contains(&sep) {
                let sep_start = trimmed.len() - sep.len_utf8();
                return Some(title[..sep_start].trim_end().len());
            }
        }
        search_from = idx + source.len();
    }

    None
}

/// Drop a trailing `(domain.tld)` annotation, e.g. `"Optik (leifiphysik.de)"`.
fn strip_domain_annotation(title: &str) -> String {
    let trimmed = title.trim_end();
    if let Some(rest) = trimmed.strip_suffix(')') {
        if let Some(open) = rest.rfind('(') {
            let inside = &rest[open + 1..];
            let is_domain = !inside.contains(')')
                && ANNOTATION_TLDS
                    .iter()
                    .any(|tld| inside.to_lowercase().ends_with(tld));
            if is_domain {
                return trimmed[..open].trim_end().to_string();
            }
        }
    }
    trimmed.to_string()
}

/// Drop a trailing `| anything` segment not caught by the known-source list.
fn strip_trailing_pipe_segment(title: &str) -> String {
    match title.rfind('|') {
        Some(idx) if !title[idx + 1..].trim().is_empty() => {
            title[..idx].trim_end().to_string()
        }
        _ => title.trim_end().to_string(),
    }
}

/// Search variants for a title: the original, its normalized form (when one
/// exists) and ASCII foldings of both. The original is always included.
pub fn generate_title_search_variants(title: &str) -> Vec<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut variants = BTreeSet::new();
    variants.insert(trimmed.to_string());

    if let Some(normalized) = normalize_title(trimmed) {
        variants.insert(normalized);
    }

    for variant in variants.clone() {
        let folded = fold_umlauts(&variant);
        if folded != variant {
            variants.insert(folded);
        }
    }

    variants.into_iter().collect()
}

/// German umlaut/eszett folding; the repository index stores some titles in
/// transliterated form.
pub fn fold_umlauts(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            'ä' => folded.push_str("ae"),
            'ö' => folded.push_str("oe"),
            'ü' => folded.push_str("ue"),
            'Ä' => folded.push_str("Ae"),
            'Ö' => folded.push_str("Oe"),
            'Ü' => folded.push_str("Ue"),
            'ß' => folded.push_str("ss"),
            other => folded.push(other),
        }
    }
    folded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_known_publisher_suffixes() {
        assert_eq!(normalize_title("Islam - Wikipedia").as_deref(), Some("Islam"));
        assert_eq!(
            normalize_title("Mathematik | Klexikon").as_deref(),
            Some("Mathematik")
        );
        assert_eq!(
            normalize_title("Photosynthese – Wikipedia – Die freie Enzyklopädie").as_deref(),
            Some("Photosynthese")
        );
        assert_eq!(
            normalize_title("Brüche: sofatutor Erklärvideo").as_deref(),
            Some("Brüche")
        );
    }

    #[test]
    fn strips_domain_annotation_and_pipe_tail() {
        assert_eq!(
            normalize_title("Geschichte (planet-schule.de)").as_deref(),
            Some("Geschichte")
        );
        assert_eq!(
            normalize_title("Bruchrechnen | Mathe einfach erklärt").as_deref(),
            Some("Bruchrechnen")
        );
    }

    #[test]
    fn unchanged_title_yields_none() {
        assert_eq!(normalize_title("Photosynthese"), None);
        assert_eq!(normalize_title(""), None);
        assert_eq!(normalize_title("   "), None);
    }

    #[test]
    fn drops_ampersands_and_collapses_whitespace() {
        assert_eq!(
            normalize_title("Säuren & Basen  im Alltag").as_deref(),
            Some("Säuren Basen im Alltag")
        );
    }

    #[test]
    fn variants_keep_original_and_add_normalized_and_folded_forms() {
        let variants = generate_title_search_variants("Römische Zahlen - Wikipedia");
        assert!(variants.iter().any(|v| v == "Römische Zahlen - Wikipedia"));
        assert!(variants.iter().any(|v| v == "Römische Zahlen"));
        assert!(variants.iter().any(|v| v == "Roemische Zahlen"));
    }

    #[test]
    fn variants_for_plain_ascii_title_are_just_the_original() {
        assert_eq!(
            generate_title_search_variants("Photosynthesis"),
            vec!["Photosynthesis".to_string()]
        );
    }
}
