//! kudo-rag - Retrieval for Kudo refereeing questions
//!
//! Indexes pre-chunked passages from the Kudo rule books and retrieves the
//! ones relevant to a question through query reformulation, multi-query
//! retrieval, Reciprocal Rank Fusion, filtering and optional cross-encoder
//! reranking.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod retrieval;
pub mod storage;

pub use error::{KudoError, Result};
