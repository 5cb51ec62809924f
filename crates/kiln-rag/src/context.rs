//! Context window assembly from ranked retrieval results.

use kiln_memory::RetrievalResult;

/// Upper bound on the assembled context, in characters. Roughly 2k tokens
/// for typical English text, leaving headroom for the query and answer
/// inside common model context windows.
pub const MAX_CONTEXT_CHARS: usize = 8000;

/// Join ranked chunks into one context block, labelled by source document.
/// When the combined text would exceed `max_chars`, whole chunks are dropped
/// from the lowest-ranked end; the top-ranked chunk is always kept.
#[must_use]
pub fn assemble(results: &[RetrievalResult], max_chars: usize) -> String {
    let mut sections = Vec::with_capacity(results.len());
    let mut total = 0usize;
    for (rank, result) in results.iter().enumerate() {
        let section = format!("[{}] {}", result.document_title, result.content);
        if rank > 0 && total + section.len() > max_chars {
            break;
        }
        total += section.len();
        sections.push(section);
    }
    sections.join("\n\n")
}
