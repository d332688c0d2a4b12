//! Lexical evidence retrieval.
//!
//! A per-document BM25 index over sentences. The verifier queries it for
//! every verification question; the CLI exposes it through `search`.

pub mod bm25;

pub use bm25::{Bm25Params, EvidenceIndex, ScoredSentence, tokenize};
