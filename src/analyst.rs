use std::path::Path;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::json;
use tracing::info;

use crate::handoff::HandoffRecord;

const EMBEDDING_MODEL: &str = "text-embedding-3-small";
const ANSWER_MODEL: &str = "gpt-4o-mini";
const TOP_K: usize = 5;
/// Pages longer than this are split into multiple chunks.
const CHUNK_MAX_CHARS: usize = 4000;

const GUARDED_PROMPT: &str = "You are the document analyst. Answer the question using ONLY the \
context provided. If the context does not contain the answer, say: \"I don't know based on the \
document.\" Keep the answer concise.";

/// An answer plus the pages it was drawn from.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub source_pages: Vec<usize>,
}

#[derive(Debug, Clone)]
struct PageChunk {
    page: usize,
    text: String,
    embedding: Vec<f32>,
}

/// Downstream consumer of the handoff record: indexes the acquired
/// document and answers questions over it, refusing to go beyond it.
pub struct QueryAgent {
    client: Client,
    api_key: String,
    chunks: Vec<PageChunk>,
}

impl QueryAgent {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            chunks: Vec::new(),
        }
    }

    /// Extract, chunk, and embed the document named by a validated handoff
    /// record.
    pub async fn index_from_handoff(&mut self, record: &HandoffRecord) -> Result<()> {
        info!(path = %record.file_path.display(), "loading document");
        let pages = extract_pdf_pages(&record.file_path).await?;
        let chunks = build_chunks(&pages);
        if chunks.is_empty() {
            return Err(anyhow!("document produced no extractable text"));
        }

        info!(chunks = chunks.len(), "embedding document chunks");
        let texts: Vec<&str> = chunks.iter().map(|(_, t)| t.as_str()).collect();
        let embeddings = self.embed(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(anyhow!(
                "embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                embeddings.len()
            ));
        }

        self.chunks = chunks
            .into_iter()
            .zip(embeddings)
            .map(|((page, text), embedding)| PageChunk {
                page,
                text,
                embedding,
            })
            .collect();
        info!("indexing complete, ready for queries");
        Ok(())
    }

    /// Answer one question from the indexed document with page citations.
    pub async fn query(&self, question: &str) -> Result<Answer> {
        if self.chunks.is_empty() {
            return Ok(Answer {
                text: "No document indexed.".to_string(),
                source_pages: Vec::new(),
            });
        }

        let question_embedding = self
            .embed(&[question])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no embedding returned for the question"))?;

        let mut ranked: Vec<(&PageChunk, f32)> = self
            .chunks
            .iter()
            .map(|c| (c, cosine_similarity(&c.embedding, &question_embedding)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(TOP_K);

        let context = ranked
            .iter()
            .map(|(c, _)| format!("[page {}]\n{}", c.page, c.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut source_pages: Vec<usize> = ranked.iter().map(|(c, _)| c.page).collect();
        source_pages.sort_unstable();
        source_pages.dedup();

        let text = self.answer_with_context(&context, question).await?;
        Ok(Answer { text, source_pages })
    }

    async fn answer_with_context(&self, context: &str, question: &str) -> Result<String> {
        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": ANSWER_MODEL,
                "temperature": 0,
                "messages": [
                    {"role": "system", "content": GUARDED_PROMPT},
                    {"role": "user", "content":
                        format!("Context:\n{context}\n\nQuestion: {question}\nAnswer:")},
                ],
            }))
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            let msg = body["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(anyhow!("chat API error ({status}): {msg}"));
        }
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow!("no content in chat response"))
    }

    async fn embed(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": EMBEDDING_MODEL,
                "input": inputs,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            let msg = body["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(anyhow!("embeddings API error ({status}): {msg}"));
        }

        body["data"]
            .as_array()
            .ok_or_else(|| anyhow!("no data in embeddings response"))?
            .iter()
            .map(|item| {
                item["embedding"]
                    .as_array()
                    .ok_or_else(|| anyhow!("embedding item without vector"))
                    .map(|v| v.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect())
            })
            .collect()
    }
}

/// Per-page text via the external `pdftotext` tool; `\f` separates pages
/// in its output.
async fn extract_pdf_pages(path: &Path) -> Result<Vec<String>> {
    let output = tokio::process::Command::new("pdftotext")
        .arg("-layout")
        .arg(path)
        .arg("-")
        .output()
        .await
        .context("running pdftotext (is poppler installed?)")?;

    if !output.status.success() {
        return Err(anyhow!(
            "pdftotext failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    Ok(text.split('\u{c}').map(str::to_string).collect())
}

/// One chunk per non-empty page, splitting oversized pages; each chunk
/// keeps its 1-based page number for citations.
fn build_chunks(pages: &[String]) -> Vec<(usize, String)> {
    let mut chunks = Vec::new();
    for (idx, page) in pages.iter().enumerate() {
        let trimmed = page.trim();
        if trimmed.is_empty() {
            continue;
        }
        let page_no = idx + 1;
        let chars: Vec<char> = trimmed.chars().collect();
        for piece in chars.chunks(CHUNK_MAX_CHARS) {
            chunks.push((page_no, piece.iter().collect::<String>()));
        }
    }
    chunks
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
