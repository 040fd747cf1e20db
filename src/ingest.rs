/// Corpus ingestion
///
/// Loads text documents from a directory and splits them into bounded,
/// overlapping chunks ready to be embedded.

use globset::Glob;
use std::collections::VecDeque;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{BotError, Result};
use crate::store::DocumentChunk;

const SEPARATOR: &str = "\n\n";

/// A loaded source file
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub source: String,
    pub text: String,
}

/// Load every file under `docs_dir` whose relative path matches `glob`
///
/// Files are visited in file-name order so that chunk order is stable
/// between runs.
pub fn load_documents(docs_dir: &Path, glob: &str) -> Result<Vec<SourceDocument>> {
    if !docs_dir.is_dir() {
        return Err(BotError::IngestFailed(format!(
            "{} is not a directory",
            docs_dir.display()
        )));
    }

    let matcher = Glob::new(glob)
        .map_err(|e| BotError::ConfigInvalid(format!("invalid create_docs.glob {:?}: {}", glob, e)))?
        .compile_matcher();

    let mut documents = Vec::new();
    for entry in WalkDir::new(docs_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| BotError::IngestFailed(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(docs_dir).unwrap_or(entry.path());
        if !matcher.is_match(relative) {
            continue;
        }

        let bytes = std::fs::read(entry.path())?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if text.trim().is_empty() {
            log::debug!("Skipping empty document {}", entry.path().display());
            continue;
        }

        documents.push(SourceDocument {
            source: entry.path().to_string_lossy().into_owned(),
            text,
        });
    }

    log::info!("Loaded {} documents from {}", documents.len(), docs_dir.display());
    Ok(documents)
}

/// Character-count based splitter
///
/// Text is cut on blank lines and the pieces are merged back together up to
/// `chunk_size` characters. When a chunk is emitted, its trailing pieces
/// totalling at most `chunk_overlap` characters start the next one.
#[derive(Debug, Clone)]
pub struct CharacterSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl CharacterSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(BotError::ConfigInvalid("chunk_size must be at least 1".into()));
        }
        if chunk_overlap > chunk_size {
            return Err(BotError::ConfigInvalid(format!(
                "chunk_overlap ({}) is larger than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        let separator_len = SEPARATOR.chars().count();
        let mut chunks = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in text.split(SEPARATOR).filter(|p| !p.is_empty()) {
            let len = piece.chars().count();
            let joined_len = |current: &VecDeque<&str>, total: usize| {
                total + len + if current.is_empty() { 0 } else { separator_len }
            };

            if joined_len(&current, total) > self.chunk_size {
                if total > self.chunk_size {
                    log::warn!(
                        "Created a chunk of size {}, which is longer than the specified {}",
                        total,
                        self.chunk_size
                    );
                }
                if !current.is_empty() {
                    push_joined(&mut chunks, &current);

                    while total > self.chunk_overlap
                        || (total > 0 && joined_len(&current, total) > self.chunk_size)
                    {
                        let Some(first) = current.pop_front() else { break };
                        total -= first.chars().count();
                        if !current.is_empty() {
                            total -= separator_len;
                        }
                    }
                }
            }

            current.push_back(piece);
            total += len;
            if current.len() > 1 {
                total += separator_len;
            }
        }

        push_joined(&mut chunks, &current);
        chunks
    }

    /// Split every document, keeping traversal order and source provenance
    pub fn split_documents(&self, documents: &[SourceDocument]) -> Vec<DocumentChunk> {
        documents
            .iter()
            .flat_map(|doc| {
                self.split_text(&doc.text)
                    .into_iter()
                    .map(move |content| DocumentChunk::new(content, doc.source.clone()))
            })
            .collect()
    }
}

fn push_joined(chunks: &mut Vec<String>, pieces: &VecDeque<&str>) {
    let joined = pieces.iter().copied().collect::<Vec<_>>().join(SEPARATOR);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Load the corpus and split it into chunks
pub fn load_and_split(
    docs_dir: &Path,
    glob: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<DocumentChunk>> {
    let splitter = CharacterSplitter::new(chunk_size, chunk_overlap)?;
    let documents = load_documents(docs_dir, glob)?;
    if documents.is_empty() {
        return Err(BotError::IngestFailed(format!(
            "no documents in {} match {:?}",
            docs_dir.display(),
            glob
        )));
    }

    let chunks = splitter.split_documents(&documents);
    log::info!("Split {} documents into {} chunks", documents.len(), chunks.len());
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn short_text_is_one_chunk() {
        let splitter = CharacterSplitter::new(100, 0).unwrap();
        assert_eq!(splitter.split_text("one\n\ntwo"), vec!["one\n\ntwo"]);
    }

    #[test]
    fn pieces_are_merged_up_to_chunk_size() {
        let splitter = CharacterSplitter::new(10, 0).unwrap();
        let chunks = splitter.split_text("aaaa\n\nbbbb\n\ncccc");
        assert_eq!(chunks, vec!["aaaa\n\nbbbb", "cccc"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn overlap_carries_trailing_pieces() {
        let splitter = CharacterSplitter::new(10, 4).unwrap();
        let chunks = splitter.split_text("aaaa\n\nbbbb\n\ncccc");
        assert_eq!(chunks, vec!["aaaa\n\nbbbb", "bbbb\n\ncccc"]);
    }

    #[test]
    fn oversized_piece_stays_whole() {
        let splitter = CharacterSplitter::new(5, 0).unwrap();
        let chunks = splitter.split_text("abcdefghij\n\nxy");
        assert_eq!(chunks, vec!["abcdefghij", "xy"]);
    }

    #[test]
    fn chunk_size_counts_characters_not_bytes() {
        let splitter = CharacterSplitter::new(4, 0).unwrap();
        assert_eq!(splitter.split_text("éééé"), vec!["éééé"]);
    }

    #[test]
    fn overlap_larger_than_size_is_rejected() {
        assert!(CharacterSplitter::new(10, 11).is_err());
        assert!(CharacterSplitter::new(0, 0).is_err());
    }

    #[test]
    fn loader_honours_glob_and_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "second").unwrap();
        fs::write(dir.path().join("a.txt"), "first").unwrap();
        fs::write(dir.path().join("notes.md"), "skipped").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("c.txt"), "third").unwrap();

        let chunks = load_and_split(dir.path(), "**/*.txt", 100, 0).unwrap();
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert!(chunks[0].source().unwrap().ends_with("a.txt"));
    }

    #[test]
    fn no_matching_documents_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "text").unwrap();
        assert!(matches!(
            load_and_split(dir.path(), "*.txt", 100, 0),
            Err(BotError::IngestFailed(_))
        ));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            load_and_split(&missing, "*", 100, 0),
            Err(BotError::IngestFailed(_))
        ));
    }
}
