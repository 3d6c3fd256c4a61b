use std::collections::HashMap;

use common::storage::types::{chat_message::SourceRef, document_chunk::ChunkMatch};

/// How much of the best match an extractive answer quotes.
const EXTRACTIVE_MAX_CHARS: usize = 600;

/// Assemble the grounding context handed to the generator.
///
/// Matches arrive highest-similarity first and are added until the character
/// budget would be exceeded. Every block carries a source attribution so the
/// model can cite documents by name. Only already-authorized chunks ever
/// reach this function.
pub fn build_context(
    matches: &[ChunkMatch],
    titles: &HashMap<String, String>,
    max_context_chars: usize,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut total_chars = 0usize;

    for (index, entry) in matches.iter().enumerate() {
        let title = titles
            .get(&entry.chunk.document_id)
            .map_or("Untitled document", String::as_str);
        let block = format!(
            "[Source {}: {}]\n{}",
            index + 1,
            title,
            entry.chunk.content
        );
        if total_chars + block.len() > max_context_chars {
            tracing::debug!(
                chunks_included = index,
                chars_used = total_chars,
                max_context_chars,
                "context budget exhausted; truncating"
            );
            break;
        }
        total_chars += block.len();
        parts.push(block);
    }

    parts.join("\n\n")
}

/// Source attributions shown to the user alongside the answer.
pub fn to_source_refs(matches: &[ChunkMatch], titles: &HashMap<String, String>) -> Vec<SourceRef> {
    matches
        .iter()
        .map(|entry| SourceRef {
            chunk_id: entry.chunk.id.clone(),
            document_id: entry.chunk.document_id.clone(),
            document_title: titles
                .get(&entry.chunk.document_id)
                .cloned()
                .unwrap_or_else(|| "Untitled document".to_string()),
            similarity: entry.similarity,
        })
        .collect()
}

/// Verbatim excerpt of the best match, used when generation is disabled.
pub fn extractive_answer(matches: &[ChunkMatch]) -> String {
    let Some(best) = matches.first() else {
        return String::new();
    };

    let content = best.chunk.content.trim();
    if content.chars().count() <= EXTRACTIVE_MAX_CHARS {
        return content.to_string();
    }

    let mut excerpt: String = content.chars().take(EXTRACTIVE_MAX_CHARS).collect();
    excerpt.push('…');
    excerpt
}

#[cfg(test)]
mod tests {
    use common::storage::types::{document_chunk::DocumentChunk, security::SecurityLevel};

    use super::*;

    fn sample_match(document_id: &str, content: &str, similarity: f32) -> ChunkMatch {
        ChunkMatch {
            chunk: DocumentChunk::new(
                document_id.to_string(),
                0,
                content.to_string(),
                vec![0.0; 4],
                SecurityLevel::Low,
            ),
            similarity,
        }
    }

    fn titles_for(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(id, title)| ((*id).to_string(), (*title).to_string()))
            .collect()
    }

    #[test]
    fn test_context_carries_source_attribution() {
        let matches = vec![
            sample_match("doc_a", "First chunk text.", 0.9),
            sample_match("doc_b", "Second chunk text.", 0.8),
        ];
        let titles = titles_for(&[("doc_a", "Policy"), ("doc_b", "Handbook")]);

        let context = build_context(&matches, &titles, 10_000);
        assert!(context.contains("[Source 1: Policy]"));
        assert!(context.contains("[Source 2: Handbook]"));
        assert!(context.contains("First chunk text."));
    }

    #[test]
    fn test_context_respects_character_budget() {
        let matches = vec![
            sample_match("doc_a", &"a".repeat(200), 0.9),
            sample_match("doc_b", &"b".repeat(200), 0.8),
        ];
        let titles = titles_for(&[("doc_a", "A"), ("doc_b", "B")]);

        let context = build_context(&matches, &titles, 250);
        assert!(context.contains("[Source 1: A]"));
        assert!(!context.contains("[Source 2: B]"));
    }

    #[test]
    fn test_source_refs_keep_similarity_order() {
        let matches = vec![
            sample_match("doc_a", "x", 0.91),
            sample_match("doc_b", "y", 0.42),
        ];
        let titles = titles_for(&[("doc_a", "A"), ("doc_b", "B")]);

        let refs = to_source_refs(&matches, &titles);
        assert_eq!(refs.len(), 2);
        assert!(refs[0].similarity > refs[1].similarity);
        assert_eq!(refs[0].document_title, "A");
    }

    #[test]
    fn test_extractive_answer_quotes_best_match() {
        let matches = vec![
            sample_match("doc_a", "The verbatim excerpt.", 0.9),
            sample_match("doc_b", "Should not appear.", 0.5),
        ];
        assert_eq!(extractive_answer(&matches), "The verbatim excerpt.");
    }

    #[test]
    fn test_extractive_answer_truncates_long_chunks() {
        let matches = vec![sample_match("doc_a", &"long ".repeat(500), 0.9)];
        let answer = extractive_answer(&matches);
        assert!(answer.chars().count() <= 601);
        assert!(answer.ends_with('…'));
    }

    #[test]
    fn test_extractive_answer_on_empty_matches() {
        assert_eq!(extractive_answer(&[]), "");
    }
}
