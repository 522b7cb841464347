use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer, TokenStream};

const STOP_WORDS: &[&str] = &[
    "a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
];

/// Lowercasing tokenizer that splits on non-alphanumeric characters. No
/// stemming is applied; the optional stop-word filter is the only other step.
#[derive(Clone)]
pub struct Analyzer {
    inner: TextAnalyzer,
    stop_words: bool,
}

impl Analyzer {
    pub fn new(stop_words: bool) -> Self {
        let inner = if stop_words {
            TextAnalyzer::builder(SimpleTokenizer::default())
                .filter(LowerCaser)
                .filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| s.to_string())))
                .build()
        } else {
            TextAnalyzer::builder(SimpleTokenizer::default()).filter(LowerCaser).build()
        };
        Self { inner, stop_words }
    }

    pub fn tokens(&self, text: &str) -> Vec<String> {
        let mut analyzer = self.inner.clone();
        let mut stream = analyzer.token_stream(text);
        let mut out = Vec::new();
        while stream.advance() {
            out.push(stream.token().text.clone());
        }
        out
    }
}

impl Default for Analyzer {
    fn default() -> Self { Self::new(false) }
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer").field("stop_words", &self.stop_words).finish()
    }
}
