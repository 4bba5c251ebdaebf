//! Merger (C4, §4.4): combines ordered chunk transcripts into the final transcript text.

use crate::config::AppConfig;
use crate::domain::ChunkTranscript;

/// Combine `chunks` (already in index order) into final text and aggregate confidence.
///
/// Phase 1 (mandatory): space-join, trim, collapse internal whitespace. Phase 2 (optional, behind
/// `whisper_merge_overlap_dedup`): drop a duplicated run of tokens at each chunk boundary.
pub fn merge(chunks: &[ChunkTranscript], config: &AppConfig) -> (String, f32) {
    if chunks.is_empty() {
        return (String::new(), 0.0);
    }

    let text = if config.whisper_merge_overlap_dedup {
        merge_with_overlap_dedup(chunks, config.whisper_chunk_overlap_s)
    } else {
        merge_phase1(chunks)
    };

    let confidence =
        chunks.iter().map(|c| c.confidence as f64).sum::<f64>() / chunks.len() as f64;

    (text, confidence as f32)
}

fn merge_phase1(chunks: &[ChunkTranscript]) -> String {
    let joined = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    collapse_whitespace(joined.trim())
}

/// K tokens/second derived from overlap duration, clamped to [3, 20] (§4.4).
fn overlap_token_window(overlap_seconds: f64) -> usize {
    let k = (overlap_seconds * 2.5).round() as i64;
    k.clamp(3, 20) as usize
}

fn merge_with_overlap_dedup(chunks: &[ChunkTranscript], overlap_seconds: f64) -> String {
    let k = overlap_token_window(overlap_seconds);
    let mut merged_tokens: Vec<String> = Vec::new();

    for (i, chunk) in chunks.iter().enumerate() {
        let tokens: Vec<&str> = chunk.text.split_whitespace().collect();
        if i == 0 {
            merged_tokens.extend(tokens.iter().map(|t| t.to_string()));
            continue;
        }

        let overlap_len = longest_matching_overlap(&merged_tokens, &tokens, k);
        merged_tokens.extend(tokens.iter().skip(overlap_len).map(|t| t.to_string()));
    }

    collapse_whitespace(merged_tokens.join(" ").trim())
}

/// Length of the longest suffix of `prev` that matches a prefix of `next`, considered only up to
/// `k` tokens and case/punctuation-insensitively; 3-token minimum to count as a match (§4.4).
fn longest_matching_overlap(prev: &[String], next: &[&str], k: usize) -> usize {
    let max_len = k.min(prev.len()).min(next.len());

    for len in (3..=max_len).rev() {
        let prev_suffix = &prev[prev.len() - len..];
        let next_prefix = &next[..len];
        if prev_suffix
            .iter()
            .zip(next_prefix.iter())
            .all(|(a, b)| normalize_token(a) == normalize_token(*b))
        {
            return len;
        }
    }

    0
}

fn normalize_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
