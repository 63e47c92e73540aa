use std::collections::HashMap;

/// Fully normalised header: lowercase, ASCII letters and digits only.
/// `"Input E-mail"` and `"input_email"` both become `"inputemail"`.
pub fn normalize_header(h: &str) -> String {
    h.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Looser form used on lead tabs: lowercase with whitespace removed.
pub fn compact_header(h: &str) -> String {
    h.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Column positions by header, first occurrence wins.
#[derive(Debug, Clone, Default)]
pub struct HeaderIndex {
    by_key: HashMap<String, usize>,
    normalizer: Normalizer,
}

#[derive(Debug, Clone, Copy, Default)]
enum Normalizer {
    #[default]
    Full,
    Compact,
}

impl Normalizer {
    fn apply(self, h: &str) -> String {
        match self {
            Normalizer::Full => normalize_header(h),
            Normalizer::Compact => compact_header(h),
        }
    }
}

impl HeaderIndex {
    /// Index using [`normalize_header`] (outcome batches, archives).
    pub fn normalized(headers: &[String]) -> Self {
        Self::build(headers, Normalizer::Full)
    }

    /// Index using [`compact_header`] (lead tabs).
    pub fn compact(headers: &[String]) -> Self {
        Self::build(headers, Normalizer::Compact)
    }

    fn build(headers: &[String], normalizer: Normalizer) -> Self {
        let mut by_key = HashMap::with_capacity(headers.len());
        for (i, h) in headers.iter().enumerate() {
            let key = normalizer.apply(h);
            if key.is_empty() {
                continue;
            }
            by_key.entry(key).or_insert(i);
        }
        Self { by_key, normalizer }
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.by_key.get(&self.normalizer.apply(name)).copied()
    }

    /// First of `names` present in the index.
    pub fn first_of(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|n| self.get(n))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Cell at `col` in `row`, trimmed; empty when the row is short.
pub fn cell(row: &[String], col: Option<usize>) -> &str {
    col.and_then(|c| row.get(c)).map(|s| s.trim()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(h: &[&str]) -> Vec<String> {
        h.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalize_strips_punctuation() {
        assert_eq!(normalize_header("Input E-mail"), "inputemail");
        assert_eq!(normalize_header("zip_code"), "zipcode");
        assert_eq!(normalize_header("  Call Time (s) "), "calltimes");
    }

    #[test]
    fn compact_keeps_punctuation() {
        assert_eq!(compact_header("Last Call"), "lastcall");
        assert_eq!(compact_header("Next_Call"), "next_call");
    }

    #[test]
    fn first_occurrence_wins() {
        let idx = HeaderIndex::normalized(&headers(&["Phone", "Name", "phone"]));
        assert_eq!(idx.get("PHONE"), Some(0));
        assert_eq!(idx.first_of(&["email", "name"]), Some(1));
        assert_eq!(idx.get("email"), None);
    }

    #[test]
    fn cell_tolerates_short_rows() {
        let row = headers(&[" a ", "b"]);
        assert_eq!(cell(&row, Some(0)), "a");
        assert_eq!(cell(&row, Some(5)), "");
        assert_eq!(cell(&row, None), "");
    }
}
