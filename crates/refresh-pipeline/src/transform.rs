//! Transform stage: turn raw records into chunked knowledge documents.
//!
//! Output is a pure function of the raw input: no timestamps or random ids
//! are written, so re-running on unchanged raw files produces identical
//! chunk files.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use refresh_types::{SourceSettings, Stage};

use crate::blob::BlobStore;
use crate::error::StageError;
use crate::stage::{RunContext, StageOutput, StageTask};

/// Documents with this much content or less are dropped.
pub const MIN_CONTENT_CHARS: usize = 20;

const MAX_ID_CHARS: usize = 30;

/// One knowledge document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

/// A chunk file and its sidecar, ready to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    pub key: String,
    pub body: Vec<u8>,
    pub sidecar_key: String,
    pub sidecar: Vec<u8>,
    pub documents: usize,
}

/// Per-source transform result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTransform {
    pub source: String,
    pub documents: usize,
    pub dropped: usize,
    pub chunks: usize,
    pub stale_removed: usize,
    pub skipped: bool,
}

/// Resolve a dotted path (`acf.cards.0.data.date`) inside a record.
pub fn lookup<'a>(record: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.').try_fold(record, |value, segment| match value {
        serde_json::Value::Object(map) => map.get(segment),
        serde_json::Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Text of a field value, normalized. Empty values read as `None`.
///
/// Booleans are treated as empty: the content API reports unset custom
/// fields as `false`.
pub fn value_text(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::String(s) => normalize_text(s),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(value_text)
            .collect::<Vec<_>>()
            .join(", "),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Strip HTML tags, decode common entities and collapse whitespace.
pub fn normalize_text(raw: &str) -> String {
    let mut stripped = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                stripped.push(' ');
            }
            _ if !in_tag => stripped.push(c),
            _ => {}
        }
    }
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let decoded = tail.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &tail[1..end];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix('#')
                    .and_then(|n| match n.strip_prefix(|c: char| c == 'x' || c == 'X') {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => n.parse().ok(),
                    })
                    .and_then(char::from_u32),
            };
            c.map(|c| (c, end))
        });
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Replace anything but ASCII alphanumerics with `_`, squeezing runs.
pub fn sanitize_id(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// Build the document for one raw record, or `None` if it is too short.
pub fn build_document(
    source: &SourceSettings,
    row: usize,
    record: &serde_json::Value,
) -> Option<Document> {
    let content = source
        .text_fields
        .iter()
        .filter_map(|field| {
            lookup(record, &field.path)
                .and_then(value_text)
                .map(|value| format!("{}: {}", field.name, value))
        })
        .collect::<Vec<_>>()
        .join(" | ");

    if content.chars().count() <= MIN_CONTENT_CHARS {
        return None;
    }

    let id_value = lookup(record, &source.id_field)
        .and_then(value_text)
        .unwrap_or_default();
    let id_value: String = id_value.chars().take(MAX_ID_CHARS).collect();
    let document_id = format!("{}_{}_{}", source.name, row, sanitize_id(&id_value));

    let mut metadata = BTreeMap::new();
    metadata.insert("document_type".to_string(), source.document_type.clone());
    metadata.insert("search_category".to_string(), source.search_category.clone());
    for field in &source.metadata_fields {
        if let Some(value) = lookup(record, &field.path).and_then(value_text) {
            metadata.insert(field.name.clone(), value);
        }
    }

    Some(Document {
        document_id,
        content,
        metadata,
    })
}

/// Split documents into chunk files with sidecar descriptors.
pub fn chunk_files(
    source: &SourceSettings,
    documents: &[Document],
    chunk_prefix: &str,
    raw_key: &str,
) -> Result<Vec<ChunkFile>, serde_json::Error> {
    let rows = source.rows_per_chunk.max(1);
    let total = documents.len().div_ceil(rows);
    let mut files = Vec::with_capacity(total);

    for (i, chunk) in documents.chunks(rows).enumerate() {
        let number = i + 1;
        let key = format!(
            "{}{}/{}_chunk_{:03}.jsonl",
            chunk_prefix, source.name, source.name, number
        );

        let mut body = Vec::new();
        for doc in chunk {
            serde_json::to_writer(&mut body, doc)?;
            body.push(b'\n');
        }

        let sidecar = serde_json::json!({
            "metadataAttributes": {
                "document_type": source.document_type,
                "search_category": source.search_category,
                "chunk_number": number,
                "total_chunks": total,
                "document_count": chunk.len(),
                "data_source": raw_key,
                "format": "jsonl",
                "content_sha256": hex::encode(Sha256::digest(&body)),
            }
        });

        files.push(ChunkFile {
            sidecar_key: format!("{key}.metadata.json"),
            key,
            sidecar: serde_json::to_vec_pretty(&sidecar)?,
            documents: chunk.len(),
            body,
        });
    }
    Ok(files)
}

/// Parse JSON lines, skipping blank lines.
pub fn parse_json_lines(data: &[u8]) -> Result<Vec<serde_json::Value>, StageError> {
    let text = std::str::from_utf8(data)
        .map_err(|e| StageError::InvalidContent(format!("raw file is not UTF-8: {e}")))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .map_err(|e| StageError::InvalidContent(format!("line {}: {e}", n + 1)))
        })
        .collect()
}

/// Chunking transformer over the configured sources.
pub struct ChunkingTransformer {
    sources: Vec<SourceSettings>,
    blob: Arc<BlobStore>,
    raw_prefix: String,
    chunk_prefix: String,
}

impl ChunkingTransformer {
    pub fn new(
        sources: Vec<SourceSettings>,
        blob: Arc<BlobStore>,
        raw_prefix: impl Into<String>,
        chunk_prefix: impl Into<String>,
    ) -> Self {
        Self {
            sources,
            blob,
            raw_prefix: raw_prefix.into(),
            chunk_prefix: chunk_prefix.into(),
        }
    }

    async fn transform_source(
        &self,
        source: &SourceSettings,
    ) -> Result<SourceTransform, StageError> {
        let mut summary = SourceTransform {
            source: source.name.clone(),
            ..Default::default()
        };

        let raw_key = format!("{}{}.jsonl", self.raw_prefix, source.name);
        let Some(raw) = self.blob.get(&raw_key).await? else {
            warn!(source = %source.name, key = %raw_key, "Raw file missing, skipping source");
            summary.skipped = true;
            return Ok(summary);
        };

        let records = parse_json_lines(&raw)?;
        let documents: Vec<Document> = records
            .iter()
            .enumerate()
            .filter_map(|(row, record)| build_document(source, row, record))
            .collect();
        summary.documents = documents.len();
        summary.dropped = records.len() - documents.len();

        let files = chunk_files(source, &documents, &self.chunk_prefix, &raw_key)?;
        let mut written = BTreeSet::new();
        for file in &files {
            self.blob.put(&file.key, file.body.clone()).await?;
            self.blob.put(&file.sidecar_key, file.sidecar.clone()).await?;
            debug!(key = %file.key, documents = file.documents, "Chunk written");
            written.insert(file.key.clone());
            written.insert(file.sidecar_key.clone());
        }
        summary.chunks = files.len();

        let source_prefix = format!("{}{}/", self.chunk_prefix, source.name);
        for key in self.blob.list(&source_prefix).await? {
            if !written.contains(&key) {
                self.blob.delete(&key).await?;
                summary.stale_removed += 1;
            }
        }

        info!(
            source = %source.name,
            documents = summary.documents,
            dropped = summary.dropped,
            chunks = summary.chunks,
            "Source transformed"
        );
        Ok(summary)
    }
}

#[async_trait]
impl StageTask for ChunkingTransformer {
    fn stage(&self) -> Stage {
        Stage::Transform
    }

    async fn execute(&self, _ctx: &RunContext) -> Result<StageOutput, StageError> {
        let mut summaries = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            summaries.push(self.transform_source(source).await?);
        }

        let documents: usize = summaries.iter().map(|s| s.documents).sum();
        let chunks: usize = summaries.iter().map(|s| s.chunks).sum();
        let detail = serde_json::to_value(&summaries)?;
        let message = format!("{documents} documents in {chunks} chunks");

        if chunks == 0 {
            return Ok(StageOutput::no_data(message).with_detail(detail));
        }
        Ok(StageOutput::succeeded(message).with_detail(detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use refresh_types::{default_sources, StepOutcome};
    use serde_json::json;

    fn source(name: &str) -> SourceSettings {
        default_sources()
            .into_iter()
            .find(|s| s.name == name)
            .unwrap()
    }

    fn ctx() -> RunContext {
        RunContext {
            run_id: "run-1".into(),
            run_at: Utc::now(),
        }
    }

    fn faq(i: usize) -> serde_json::Value {
        json!({
            "question": format!("How do I get to level {i}?"),
            "answer": "Take the <b>central</b> escalators &amp; follow the signs.",
            "category": "access"
        })
    }

    #[test]
    fn test_lookup_dotted_path() {
        let record = json!({"acf": {"cards": [{"data": {"date": "2026-03-01"}}]}});
        assert_eq!(
            lookup(&record, "acf.cards.0.data.date"),
            Some(&json!("2026-03-01"))
        );
        assert!(lookup(&record, "acf.cards.1.data").is_none());
        assert!(lookup(&record, "acf.missing").is_none());
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(
            normalize_text("<p>Live  music&nbsp;&amp; food</p>\n<br/>Tonight"),
            "Live music & food Tonight"
        );
        assert_eq!(normalize_text("Caf&#233; &#x41;"), "Café A");
        assert_eq!(normalize_text("AT&T rocks"), "AT&T rocks");
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&json!(false)), None);
        assert_eq!(value_text(&json!("  ")), None);
        assert_eq!(value_text(&json!(42)), Some("42".to_string()));
        assert_eq!(value_text(&json!(["a", "", "b"])), Some("a, b".to_string()));
    }

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("Día del Niño!!"), "D_a_del_Ni_o");
        assert_eq!(sanitize_id("__x__"), "x");
    }

    #[test]
    fn test_build_document() {
        let doc = build_document(&source("faqs"), 3, &faq(2)).unwrap();
        assert_eq!(doc.document_id, "faqs_3_How_do_I_get_to_level_2");
        assert_eq!(
            doc.content,
            "Question: How do I get to level 2? | Answer: Take the central escalators & follow the signs."
        );
        assert_eq!(doc.metadata["document_type"], "faq");
        assert_eq!(doc.metadata["category"], "access");
    }

    #[test]
    fn test_short_documents_dropped() {
        let record = json!({"question": "Hi?", "answer": ""});
        // "Question: Hi?" is 13 characters
        assert!(build_document(&source("faqs"), 0, &record).is_none());
    }

    #[test]
    fn test_chunk_files_and_sidecars() {
        let faqs = source("faqs");
        let docs: Vec<_> = (0..23)
            .filter_map(|i| build_document(&faqs, i, &faq(i)))
            .collect();
        let files = chunk_files(&faqs, &docs, "knowledge/", "raw/faqs.jsonl").unwrap();

        assert_eq!(files.len(), 3);
        assert_eq!(files[0].key, "knowledge/faqs/faqs_chunk_001.jsonl");
        assert_eq!(files[2].documents, 3);
        let sidecar: serde_json::Value = serde_json::from_slice(&files[1].sidecar).unwrap();
        let attrs = &sidecar["metadataAttributes"];
        assert_eq!(attrs["chunk_number"], 2);
        assert_eq!(attrs["total_chunks"], 3);
        assert_eq!(attrs["document_count"], 10);
        assert_eq!(attrs["data_source"], "raw/faqs.jsonl");
    }

    #[tokio::test]
    async fn test_transform_is_byte_identical_on_rerun() {
        let blob = Arc::new(BlobStore::in_memory());
        let records: Vec<_> = (0..12).map(faq).collect();
        blob.put("raw/faqs.jsonl", crate::extract::to_json_lines(&records).unwrap())
            .await
            .unwrap();
        let transformer =
            ChunkingTransformer::new(vec![source("faqs")], blob.clone(), "raw/", "knowledge/");

        transformer.execute(&ctx()).await.unwrap();
        let mut first = Vec::new();
        for key in blob.list("knowledge/").await.unwrap() {
            first.push((key.clone(), blob.get(&key).await.unwrap().unwrap()));
        }

        transformer.execute(&ctx()).await.unwrap();
        let mut second = Vec::new();
        for key in blob.list("knowledge/").await.unwrap() {
            second.push((key.clone(), blob.get(&key).await.unwrap().unwrap()));
        }

        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_stale_chunks_removed() {
        let blob = Arc::new(BlobStore::in_memory());
        let transformer =
            ChunkingTransformer::new(vec![source("faqs")], blob.clone(), "raw/", "knowledge/");

        let records: Vec<_> = (0..25).map(faq).collect();
        blob.put("raw/faqs.jsonl", crate::extract::to_json_lines(&records).unwrap())
            .await
            .unwrap();
        transformer.execute(&ctx()).await.unwrap();
        assert_eq!(blob.list("knowledge/faqs/").await.unwrap().len(), 6);

        let records: Vec<_> = (0..5).map(faq).collect();
        blob.put("raw/faqs.jsonl", crate::extract::to_json_lines(&records).unwrap())
            .await
            .unwrap();
        let output = transformer.execute(&ctx()).await.unwrap();

        assert_eq!(blob.list("knowledge/faqs/").await.unwrap().len(), 2);
        let detail: Vec<SourceTransform> = serde_json::from_value(output.detail.unwrap()).unwrap();
        assert_eq!(detail[0].stale_removed, 4);
    }

    #[tokio::test]
    async fn test_missing_raw_file_skips_source() {
        let blob = Arc::new(BlobStore::in_memory());
        let transformer = ChunkingTransformer::new(default_sources(), blob, "raw/", "knowledge/");
        let output = transformer.execute(&ctx()).await.unwrap();
        assert_eq!(output.outcome, StepOutcome::NoData);
        let detail: Vec<SourceTransform> = serde_json::from_value(output.detail.unwrap()).unwrap();
        assert!(detail.iter().all(|s| s.skipped));
    }

    #[tokio::test]
    async fn test_invalid_raw_line_fails_stage() {
        let blob = Arc::new(BlobStore::in_memory());
        blob.put("raw/faqs.jsonl", "{\"question\": \n").await.unwrap();
        let transformer =
            ChunkingTransformer::new(vec![source("faqs")], blob, "raw/", "knowledge/");
        let err = transformer.execute(&ctx()).await.unwrap_err();
        assert!(matches!(err, StageError::InvalidContent(_)));
        assert!(!err.is_transient());
    }
}
