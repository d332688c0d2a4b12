//! BM25 sentence index over a single guideline document.
//!
//! The index is built once per run and shared read-only between the
//! verifier and the CLI `search` command.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::core::text::split_sentences;

#[allow(clippy::expect_used)]
static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid token regex"));

/// Words ignored when indexing and querying.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "from", "has", "have",
    "if", "in", "is", "it", "its", "of", "on", "or", "should", "that", "the", "their", "there",
    "this", "to", "was", "were", "what", "when", "which", "who", "will", "with",
];

/// BM25 tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Length normalization strength.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// A sentence returned by [`EvidenceIndex::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSentence {
    /// Position of the sentence in the document.
    pub index: usize,
    /// Sentence text as it appears in the document.
    pub sentence: String,
    /// Raw BM25 score.
    pub score: f64,
    /// Score divided by the summed idf of the query terms, clamped to
    /// [0, 1]. Roughly the idf-weighted share of the question found in the
    /// sentence.
    pub normalized: f64,
}

/// Lexical retrieval index over the sentences of one document.
#[derive(Debug, Clone)]
pub struct EvidenceIndex {
    sentences: Vec<String>,
    term_freqs: Vec<HashMap<String, u32>>,
    lengths: Vec<usize>,
    avg_len: f64,
    doc_freq: HashMap<String, usize>,
    params: Bm25Params,
}

/// Lowercased content tokens of `text`, stopwords removed.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

impl EvidenceIndex {
    /// Segments `document` into sentences and indexes them.
    #[must_use]
    pub fn build(document: &str) -> Self {
        Self::with_params(document, Bm25Params::default())
    }

    /// Builds the index with explicit BM25 parameters.
    #[must_use]
    pub fn with_params(document: &str, params: Bm25Params) -> Self {
        let sentences = split_sentences(document);
        let mut term_freqs = Vec::with_capacity(sentences.len());
        let mut lengths = Vec::with_capacity(sentences.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for sentence in &sentences {
            let tokens = tokenize(sentence);
            lengths.push(tokens.len());
            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }

        #[allow(clippy::cast_precision_loss)]
        let avg_len = if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
        };

        Self {
            sentences,
            term_freqs,
            lengths,
            avg_len,
            doc_freq,
            params,
        }
    }

    /// Indexed sentences in document order.
    #[must_use]
    pub fn sentences(&self) -> &[String] {
        &self.sentences
    }

    /// Number of indexed sentences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    /// Returns `true` if the document produced no sentences.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    #[allow(clippy::cast_precision_loss)]
    fn idf(&self, term: &str) -> f64 {
        let n = self.sentences.len() as f64;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        ((n - df + 0.5) / (df + 0.5)).ln_1p()
    }

    #[allow(clippy::cast_precision_loss)]
    fn score(&self, doc: usize, terms: &[String]) -> f64 {
        let Bm25Params { k1, b } = self.params;
        let len_ratio = if self.avg_len > 0.0 {
            self.lengths[doc] as f64 / self.avg_len
        } else {
            1.0
        };
        terms
            .iter()
            .filter_map(|term| {
                let tf = f64::from(*self.term_freqs[doc].get(term)?);
                let idf = self.idf(term);
                Some(idf * tf * (k1 + 1.0) / (tf + k1 * (1.0 - b + b * len_ratio)))
            })
            .sum()
    }

    /// Returns up to `k` sentences with a positive score for `question`,
    /// best first (ties broken by document order).
    #[must_use]
    pub fn query(&self, question: &str, k: usize) -> Vec<ScoredSentence> {
        let mut seen = HashSet::new();
        let terms: Vec<String> = tokenize(question)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();
        if terms.is_empty() || self.is_empty() || k == 0 {
            return Vec::new();
        }

        let bound: f64 = terms.iter().map(|t| self.idf(t)).sum();
        let mut hits: Vec<(usize, f64)> = (0..self.sentences.len())
            .map(|i| (i, self.score(i, &terms)))
            .filter(|(_, s)| *s > 0.0)
            .collect();

        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(k);

        hits.into_iter()
            .map(|(index, score)| ScoredSentence {
                index,
                sentence: self.sentences[index].clone(),
                score,
                normalized: if bound > 0.0 {
                    (score / bound).clamp(0.0, 1.0)
                } else {
                    0.0
                },
            })
            .collect()
    }
}
