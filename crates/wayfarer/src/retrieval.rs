//! A persisted index over text documents.
//!
//! Each collection is a tantivy index in `<dir>/<name>/`, next to a small
//! `collection.json` recording which ranking produced the stored vectors.
//! Documents are split into chunks of at most `chunk_tokens` tokens; each chunk id
//! is the SHA-256 of its source path and text, so indexing the same document again
//! adds nothing. Chunks a changed document no longer produces are dropped.
//!
//! Chunks are ranked with BM25 when no embedding model is configured, and by
//! cosine similarity of their embeddings otherwise. Opening a collection with a
//! different ranking than the one it was built with re-embeds every chunk.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, OwnedValue, Schema, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexWriter, TantivyDocument, Term};
use tracing::{debug, info};

use crate::providers::base::Embedder;
use crate::token_counter::TokenCounter;

const COLLECTION_META: &str = "collection.json";
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// How chunks are ranked against a query
#[derive(Clone)]
pub enum Ranking {
    /// BM25 over the chunk text
    Lexical,
    /// Cosine similarity of embeddings
    Semantic(Arc<dyn Embedder>),
}

impl Ranking {
    /// Names the ranking in the collection metadata
    pub fn identity(&self) -> String {
        match self {
            Ranking::Lexical => "bm25".to_string(),
            Ranking::Semantic(embedder) => format!("embedding:{}", embedder.embedding_model()),
        }
    }
}

impl std::fmt::Debug for Ranking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.identity())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    pub position: usize,
    pub text: String,
    /// Empty under lexical ranking
    pub embedding: Vec<f32>,
}

/// A chunk returned by a query with its score against the query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub text: String,
    pub source: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CollectionMeta {
    ranking: String,
    dimensions: Option<usize>,
}

#[derive(Clone, Copy)]
struct Fields {
    id: Field,
    source: Field,
    position: Field,
    text: Field,
    embedding: Field,
}

impl Fields {
    fn schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field("id", STRING | STORED);
        builder.add_text_field("source", STRING | STORED);
        builder.add_u64_field("position", STORED);
        builder.add_text_field("text", TEXT | STORED);
        builder.add_bytes_field("embedding", STORED);
        builder.build()
    }

    fn resolve(schema: &Schema) -> Result<Self> {
        Ok(Self {
            id: schema.get_field("id")?,
            source: schema.get_field("source")?,
            position: schema.get_field("position")?,
            text: schema.get_field("text")?,
            embedding: schema.get_field("embedding")?,
        })
    }

    fn document(&self, chunk: &Chunk) -> TantivyDocument {
        let mut document = doc!(
            self.id => chunk.id.clone(),
            self.source => chunk.source.clone(),
            self.position => chunk.position as u64,
            self.text => chunk.text.clone(),
        );
        if !chunk.embedding.is_empty() {
            document.add_bytes(self.embedding, encode_vector(&chunk.embedding));
        }
        document
    }

    fn chunk(&self, document: &TantivyDocument) -> Option<Chunk> {
        let text_of = |field: Field| match document.get_first(field) {
            Some(OwnedValue::Str(s)) => Some(s.clone()),
            _ => None,
        };
        let position = match document.get_first(self.position) {
            Some(OwnedValue::U64(n)) => *n as usize,
            _ => 0,
        };
        let embedding = match document.get_first(self.embedding) {
            Some(OwnedValue::Bytes(bytes)) => decode_vector(bytes),
            _ => Vec::new(),
        };
        Some(Chunk {
            id: text_of(self.id)?,
            source: text_of(self.source)?,
            position,
            text: text_of(self.text)?,
            embedding,
        })
    }
}

pub struct DocumentIndex {
    name: String,
    dir: PathBuf,
    index: Index,
    fields: Fields,
    meta: CollectionMeta,
    chunks: Vec<Chunk>,
    ranking: Ranking,
    counter: TokenCounter,
    chunk_tokens: usize,
}

impl DocumentIndex {
    /// Open the named collection under `dir`, creating an empty one if it does not exist yet
    pub async fn open<P: AsRef<Path>>(
        dir: P,
        name: &str,
        ranking: Ranking,
        chunk_tokens: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref().join(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create index directory {}", dir.display()))?;

        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(&dir)
                .with_context(|| format!("Failed to open index {}", dir.display()))?
        } else {
            Index::create_in_dir(&dir, Fields::schema())
                .with_context(|| format!("Failed to create index {}", dir.display()))?
        };
        let fields = Fields::resolve(&index.schema())?;
        let chunks = load_chunks(&index, &fields)?;

        let stored = read_meta(&dir.join(COLLECTION_META)).await?;
        let identity = ranking.identity();
        let mut collection = Self {
            name: name.to_string(),
            dir,
            index,
            fields,
            meta: stored.clone().unwrap_or(CollectionMeta {
                ranking: identity.clone(),
                dimensions: None,
            }),
            chunks,
            ranking,
            counter: TokenCounter::new()?,
            chunk_tokens: chunk_tokens.max(1),
        };

        if collection.meta.ranking != identity {
            info!(
                collection = %name,
                from = %collection.meta.ranking,
                to = %identity,
                chunks = collection.chunks.len(),
                "ranking changed, re-embedding collection"
            );
            collection.reembed(identity).await?;
        } else if stored.is_none() {
            collection.save_meta().await?;
        }

        debug!(collection = %name, chunks = collection.chunks.len(), "opened index");
        Ok(collection)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Index a document, returning how many new chunks were added
    pub async fn upsert_document<P: AsRef<Path>>(&mut self, document: P) -> Result<usize> {
        let document = document.as_ref();
        let text = tokio::fs::read_to_string(document)
            .await
            .with_context(|| format!("Failed to read document {}", document.display()))?;
        let source = source_key(document).await;

        let wanted: Vec<(String, String)> = chunk_text(&text, self.chunk_tokens, &self.counter)
            .into_iter()
            .map(|piece| (chunk_id(&source, &piece), piece))
            .collect();
        let wanted_ids: HashSet<&str> = wanted.iter().map(|(id, _)| id.as_str()).collect();

        let stale: Vec<String> = self
            .chunks
            .iter()
            .filter(|c| c.source == source && !wanted_ids.contains(c.id.as_str()))
            .map(|c| c.id.clone())
            .collect();

        let existing: HashSet<&str> = self.chunks.iter().map(|c| c.id.as_str()).collect();
        let mut seen = HashSet::new();
        let fresh: Vec<(usize, String, String)> = wanted
            .iter()
            .enumerate()
            .filter(|(_, (id, _))| !existing.contains(id.as_str()) && seen.insert(id.clone()))
            .map(|(position, (id, text))| (position, id.clone(), text.clone()))
            .collect();

        let texts: Vec<String> = fresh.iter().map(|(_, _, text)| text.clone()).collect();
        let embeddings = self.embed(&texts).await?;
        let added: Vec<Chunk> = fresh
            .into_iter()
            .zip(embeddings)
            .map(|((position, id, text), embedding)| Chunk {
                id,
                source: source.clone(),
                position,
                text,
                embedding,
            })
            .collect();

        if !stale.is_empty() || !added.is_empty() {
            let mut writer = self.writer()?;
            for id in &stale {
                writer.delete_term(Term::from_field_text(self.fields.id, id));
            }
            for chunk in &added {
                writer.add_document(self.fields.document(chunk))?;
            }
            writer.commit()?;

            let stale: HashSet<&String> = stale.iter().collect();
            self.chunks.retain(|c| !stale.contains(&c.id));
            self.chunks.extend(added.iter().cloned());
            sort_chunks(&mut self.chunks);
            self.save_meta().await?;
        }

        info!(
            collection = %self.name,
            document = %source,
            added = added.len(),
            removed = stale.len(),
            total = self.chunks.len(),
            "indexed document"
        );
        Ok(added.len())
    }

    /// Chunks of `document` ranked against the query, best first, at most `n`.
    ///
    /// Chunks that do not match the query at all follow the matches in document
    /// order, so paging through the result reaches every chunk of the document.
    pub async fn query<P: AsRef<Path>>(
        &self,
        query: &str,
        document: P,
        n: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let source = source_key(document.as_ref()).await;
        let candidates: Vec<&Chunk> = self.chunks.iter().filter(|c| c.source == source).collect();
        if candidates.is_empty() || n == 0 {
            return Ok(Vec::new());
        }

        let scores = match &self.ranking {
            Ranking::Lexical => self.lexical_scores(query, &source, candidates.len())?,
            Ranking::Semantic(embedder) => {
                let query_vector = embedder
                    .embed(&[query.to_string()])
                    .await?
                    .into_iter()
                    .next()
                    .context("Embedder returned no vector for the query")?;
                let mut scores = HashMap::new();
                for chunk in &candidates {
                    if chunk.embedding.len() != query_vector.len() {
                        bail!(
                            "Query vector has {} dimensions but collection {} stores {}-dimensional vectors",
                            query_vector.len(),
                            self.name,
                            chunk.embedding.len()
                        );
                    }
                    scores.insert(chunk.id.clone(), cosine(&query_vector, &chunk.embedding));
                }
                scores
            }
        };

        let mut scored: Vec<ScoredChunk> = candidates
            .into_iter()
            .map(|c| ScoredChunk {
                text: c.text.clone(),
                source: c.source.clone(),
                score: scores.get(&c.id).copied().unwrap_or(0.0),
            })
            .collect();
        // Stable, so ties keep document order
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(n);
        Ok(scored)
    }

    fn lexical_scores(&self, query: &str, source: &str, limit: usize) -> Result<HashMap<String, f32>> {
        // Only plain terms reach the parser, so question marks or colons are never syntax
        let terms: String = query
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        if terms.trim().is_empty() {
            return Ok(HashMap::new());
        }

        let reader = self.index.reader()?;
        let searcher = reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.fields.text]);
        let text_query = parser.parse_query(&terms)?;
        let in_source: Box<dyn Query> = Box::new(TermQuery::new(
            Term::from_field_text(self.fields.source, source),
            IndexRecordOption::Basic,
        ));
        let filtered = BooleanQuery::new(vec![(Occur::Must, text_query), (Occur::Must, in_source)]);

        let mut scores = HashMap::new();
        for (score, address) in searcher.search(&filtered, &TopDocs::with_limit(limit.max(1)))? {
            let document: TantivyDocument = searcher.doc(address)?;
            if let Some(chunk) = self.fields.chunk(&document) {
                scores.insert(chunk.id, score);
            }
        }
        Ok(scores)
    }

    async fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let embedder = match &self.ranking {
            Ranking::Lexical => return Ok(vec![Vec::new(); texts.len()]),
            Ranking::Semantic(embedder) => embedder.clone(),
        };
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = embedder.embed(texts).await?;
        if vectors.len() != texts.len() {
            bail!(
                "Embedder returned {} vectors for {} chunks",
                vectors.len(),
                texts.len()
            );
        }
        for vector in &vectors {
            match self.meta.dimensions {
                Some(dimensions) if dimensions != vector.len() => bail!(
                    "Embedder {} returned {}-dimensional vectors but collection {} stores {} dimensions",
                    embedder.embedding_model(),
                    vector.len(),
                    self.name,
                    dimensions
                ),
                Some(_) => {}
                None => self.meta.dimensions = Some(vector.len()),
            }
        }
        Ok(vectors)
    }

    // Replace every stored vector with one from the current ranking
    async fn reembed(&mut self, identity: String) -> Result<()> {
        self.meta = CollectionMeta {
            ranking: identity,
            dimensions: None,
        };
        let texts: Vec<String> = self.chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embed(&texts).await?;
        for (chunk, embedding) in self.chunks.iter_mut().zip(embeddings) {
            chunk.embedding = embedding;
        }

        let mut writer = self.writer()?;
        writer.delete_all_documents()?;
        for chunk in &self.chunks {
            writer.add_document(self.fields.document(chunk))?;
        }
        writer.commit()?;
        self.save_meta().await
    }

    fn writer(&self) -> Result<IndexWriter> {
        self.index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .with_context(|| format!("Failed to open a writer on {}", self.dir.display()))
    }

    async fn save_meta(&self) -> Result<()> {
        let path = self.dir.join(COLLECTION_META);
        tokio::fs::write(&path, serde_json::to_vec(&self.meta)?)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

async fn read_meta(path: &Path) -> Result<Option<CollectionMeta>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).with_context(|| {
            format!("Corrupt collection metadata at {}", path.display())
        })?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context("Failed to read collection metadata"),
    }
}

fn load_chunks(index: &Index, fields: &Fields) -> Result<Vec<Chunk>> {
    let reader = index.reader()?;
    let searcher = reader.searcher();
    let total = searcher.num_docs() as usize;
    if total == 0 {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::with_capacity(total);
    for (_, address) in searcher.search(&AllQuery, &TopDocs::with_limit(total))? {
        let document: TantivyDocument = searcher.doc(address)?;
        if let Some(chunk) = fields.chunk(&document) {
            chunks.push(chunk);
        }
    }
    sort_chunks(&mut chunks);
    Ok(chunks)
}

fn sort_chunks(chunks: &mut [Chunk]) {
    chunks.sort_by(|a, b| a.source.cmp(&b.source).then(a.position.cmp(&b.position)));
}

/// The key a document's chunks are stored under: its canonical path when it exists
pub async fn source_key(document: &Path) -> String {
    tokio::fs::canonicalize(document)
        .await
        .unwrap_or_else(|_| document.to_path_buf())
        .display()
        .to_string()
}

fn chunk_id(source: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split text into chunks of at most `max_tokens` tokens, keeping whole lines where possible
pub fn chunk_text(text: &str, max_tokens: usize, counter: &TokenCounter) -> Vec<String> {
    let max_tokens = max_tokens.max(1);
    let newline = counter.count_tokens("\n");
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_tokens = 0;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let tokens = counter.count_tokens(line);
        if tokens > max_tokens {
            flush(&mut current, &mut chunks);
            current_tokens = 0;
            split_line(line, max_tokens, counter, &mut chunks);
            continue;
        }
        if !current.is_empty() && current_tokens + newline + tokens > max_tokens {
            flush(&mut current, &mut chunks);
            current_tokens = 0;
        }
        current_tokens += if current.is_empty() { tokens } else { newline + tokens };
        current.push(line);
    }
    flush(&mut current, &mut chunks);
    chunks
}

// Greedy word packing for a line longer than the budget
fn split_line(line: &str, max_tokens: usize, counter: &TokenCounter, chunks: &mut Vec<String>) {
    let mut piece = String::new();
    let mut piece_tokens = 0;
    for word in line.split_whitespace() {
        let first = counter.count_tokens(word);
        let next = counter.count_tokens(&format!(" {}", word));
        if !piece.is_empty() && piece_tokens + next > max_tokens {
            chunks.push(std::mem::take(&mut piece));
            piece_tokens = 0;
        }
        if piece.is_empty() {
            piece.push_str(word);
            piece_tokens = first;
        } else {
            piece.push(' ');
            piece.push_str(word);
            piece_tokens += next;
        }
    }
    if !piece.is_empty() {
        chunks.push(piece);
    }
}

fn flush(current: &mut Vec<&str>, chunks: &mut Vec<String>) {
    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }
    current.clear();
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
