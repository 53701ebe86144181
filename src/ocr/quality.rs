/// Decides whether extracted text is good enough to stop the fallback chain.
pub trait TextQualityGate: Send + Sync {
    fn accepts(&self, text: &str) -> bool;
}

impl<F> TextQualityGate for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn accepts(&self, text: &str) -> bool {
        self(text)
    }
}

/// Default gate for a PDF text layer. All three conditions must hold after
/// whitespace normalization.
#[derive(Debug, Clone)]
pub struct MeaningfulText {
    /// Normalized text must be strictly longer than this.
    pub min_chars: usize,
    /// Token count must be strictly greater than this.
    pub min_words: usize,
    pub min_letter_run: usize,
}

impl Default for MeaningfulText {
    fn default() -> Self {
        Self {
            min_chars: 100,
            min_words: 20,
            min_letter_run: 3,
        }
    }
}

impl TextQualityGate for MeaningfulText {
    fn accepts(&self, text: &str) -> bool {
        let clean = normalize_whitespace(text);

        let long_enough = clean.chars().count() > self.min_chars;
        let has_letters = longest_ascii_letter_run(&clean) >= self.min_letter_run;
        let enough_words = clean.split(' ').filter(|w| !w.is_empty()).count() > self.min_words;

        long_enough && has_letters && enough_words
    }
}

pub fn is_text_meaningful(text: &str) -> bool {
    MeaningfulText::default().accepts(text)
}

/// Collapses every whitespace run to a single space and trims both ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn longest_ascii_letter_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in text.chars() {
        if c.is_ascii_alphabetic() {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}
