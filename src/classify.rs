use regex::Regex;

/// Priority-ordered pattern rules mapping free text to a closed label set.
/// Rules run against the lower-cased concatenation of candidate fields;
/// first match wins. `fallback` covers no-match input, `empty_fallback`
/// covers entirely blank input. The two diverged between historical call
/// sites, so both are explicit per instance.
pub struct Classifier {
    rules: Vec<(String, Regex)>,
    fallback: String,
    empty_fallback: String,
}

const COLLECTION_RULES: &[(&str, &str)] = &[
    ("Tank", r"\btank\b"),
    ("Santos", r"\bsantos\b"),
    ("Panthère", r"panth[èe]re"),
    ("Ballon Bleu", r"ballon\s*bleu"),
    ("Trinity", r"\btrinity\b"),
];

// Gold before steel: any gold-family term ("gold", "pink gold", ...) wins
// even when steel also appears in the same description.
const MATERIAL_RULES: &[(&str, &str)] = &[("Gold", r"\bgold\b"), ("Steel", r"\bsteel\b")];

const SIZE_RULES: &[(&str, &str)] = &[
    ("Small", r"\b(?:small|mini|sm)\b"),
    ("Large", r"\b(?:large|xl)\b"),
];

impl Classifier {
    fn new(rules: &[(&str, &str)], fallback: &str, empty_fallback: &str) -> Self {
        Self {
            rules: rules
                .iter()
                .map(|(label, pat)| (label.to_string(), Regex::new(pat).unwrap()))
                .collect(),
            fallback: fallback.to_string(),
            empty_fallback: empty_fallback.to_string(),
        }
    }

    pub fn collection() -> Self {
        Self::new(COLLECTION_RULES, "Other", "Other")
    }

    pub fn material(empty_fallback: &str) -> Self {
        Self::new(MATERIAL_RULES, "Other", empty_fallback)
    }

    pub fn size(fallback: &str) -> Self {
        Self::new(SIZE_RULES, fallback, fallback)
    }

    pub fn classify(&self, fields: &[&str]) -> String {
        let text = fields.join(" ").to_lowercase();
        if text.trim().is_empty() {
            return self.empty_fallback.clone();
        }
        for (label, re) in &self.rules {
            if re.is_match(&text) {
                return label.clone();
            }
        }
        self.fallback.clone()
    }
}
