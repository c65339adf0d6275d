//! Case- and accent-insensitive phrase matching over free text.

/// Lowercases and strips the Latin diacritics used by the crawled sources.
pub fn fold(input: &str) -> String {
    input
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

pub fn words(input: &str) -> Vec<String> {
    fold(input)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// A set of phrases matched against whole words, so `"sp"` matches
/// `"São Paulo, SP"` but not `"Lisbon, Portugal"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhraseSet {
    phrases: Vec<Vec<String>>,
}

impl PhraseSet {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<Vec<String>> = Vec::new();
        for phrase in phrases {
            let w = words(phrase.as_ref());
            if !w.is_empty() && !out.contains(&w) {
                out.push(w);
            }
        }
        Self { phrases: out }
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn matches(&self, text: &str) -> bool {
        let haystack = words(text);
        self.phrases.iter().any(|phrase| {
            haystack
                .windows(phrase.len())
                .any(|window| window == phrase.as_slice())
        })
    }
}
