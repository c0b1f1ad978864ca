//! Final artifact assembly from per-chunk generation results.
//!
//! Chunks may complete in any order under bounded parallelism, so results
//! carry their chunk index and assembly re-sorts before concatenation.

/// Generated markdown for one chunk, tagged with its chunk index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOutput {
    pub index: usize,
    pub markdown: String,
}

/// Separator placed between chunk outputs so unrelated sections do not
/// merge structurally.
const CHUNK_SEPARATOR: &str = "\n\n";

/// Concatenate chunk outputs in index order into the final artifact.
///
/// Adjacent chunks sometimes both emit the same boundary line (a section
/// heading repeated at the seam). The collapse rule is deliberately
/// conservative: only an exact match between the trailing line of one
/// chunk and the leading line of the next is folded, keeping legitimate
/// repeated content intact.
pub fn assemble(mut results: Vec<ChunkOutput>) -> String {
    results.sort_by_key(|r| r.index);

    let mut artifact = String::new();
    for result in &results {
        let piece = result.markdown.trim_matches('\n');
        if piece.is_empty() {
            continue;
        }

        if artifact.is_empty() {
            artifact.push_str(piece);
            continue;
        }

        let piece = match (last_line(&artifact), first_line(piece)) {
            (Some(tail), Some(head)) if !tail.is_empty() && tail == head => {
                strip_first_line(piece)
            }
            _ => piece,
        };
        if piece.is_empty() {
            continue;
        }

        artifact.push_str(CHUNK_SEPARATOR);
        artifact.push_str(piece);
    }
    artifact
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().next_back()
}

fn first_line(text: &str) -> Option<&str> {
    text.lines().next()
}

fn strip_first_line(text: &str) -> &str {
    match text.find('\n') {
        Some(pos) => text[pos + 1..].trim_start_matches('\n'),
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(index: usize, markdown: &str) -> ChunkOutput {
        ChunkOutput {
            index,
            markdown: markdown.to_string(),
        }
    }

    #[test]
    fn test_assemble_in_index_order() {
        let artifact = assemble(vec![out(0, "T0"), out(1, "T1"), out(2, "T2")]);
        assert_eq!(artifact, "T0\n\nT1\n\nT2");
    }

    #[test]
    fn test_assemble_order_independent() {
        let permuted = assemble(vec![out(2, "T2"), out(0, "T0"), out(1, "T1")]);
        let ordered = assemble(vec![out(0, "T0"), out(1, "T1"), out(2, "T2")]);
        assert_eq!(permuted, ordered);
    }

    #[test]
    fn test_assemble_skips_empty_chunks() {
        let artifact = assemble(vec![out(0, "T0"), out(1, ""), out(2, "T2")]);
        assert_eq!(artifact, "T0\n\nT2");
    }

    #[test]
    fn test_assemble_collapses_duplicate_boundary_line() {
        let artifact = assemble(vec![
            out(0, "intro\n## Chapter 2"),
            out(1, "## Chapter 2\nbody"),
        ]);
        assert_eq!(artifact, "intro\n## Chapter 2\n\nbody");
    }

    #[test]
    fn test_assemble_keeps_distinct_boundary_lines() {
        let artifact = assemble(vec![out(0, "one\ntwo"), out(1, "three\nfour")]);
        assert_eq!(artifact, "one\ntwo\n\nthree\nfour");
    }

    #[test]
    fn test_assemble_does_not_collapse_interior_repeats() {
        // Repetition away from the seam is legitimate content.
        let artifact = assemble(vec![out(0, "echo\nend"), out(1, "start\necho")]);
        assert_eq!(artifact, "echo\nend\n\nstart\necho");
    }

    #[test]
    fn test_assemble_duplicate_only_chunk() {
        // A chunk that is exactly the duplicated boundary line vanishes
        // without leaving a dangling separator.
        let artifact = assemble(vec![out(0, "alpha\nbeta"), out(1, "beta")]);
        assert_eq!(artifact, "alpha\nbeta");
    }

    #[test]
    fn test_assemble_empty_input() {
        assert_eq!(assemble(Vec::new()), "");
    }

    #[test]
    fn test_assemble_trims_chunk_edge_newlines() {
        let artifact = assemble(vec![out(0, "T0\n\n"), out(1, "\nT1")]);
        assert_eq!(artifact, "T0\n\nT1");
    }
}
