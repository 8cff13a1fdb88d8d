use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use docqa_core::{IndexStats, KnowledgeBase};
use docqa_index::{Answer, IndexError, QueryResult, Scope};
use docqa_memory::document;
use docqa_memory::{DocumentId, DocumentRecord, DocumentStatus};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::{Command, ScopeArgs};

pub(crate) async fn run(kb: &KnowledgeBase, command: Command, json: bool) -> anyhow::Result<()> {
    match command {
        Command::Upload { paths } => upload(kb, &paths, json).await,
        Command::List => {
            let docs = kb.list().await?;
            if json {
                print_json(&docs)
            } else {
                print_documents(&docs);
                Ok(())
            }
        }
        Command::Show { id } => {
            let doc = kb.get(&parse_id(&id)).await?;
            if json {
                print_json(&doc)
            } else {
                print_documents(std::slice::from_ref(&doc));
                Ok(())
            }
        }
        Command::Delete { id, yes } => {
            let id = parse_id(&id);
            let doc = kb.get(&id).await?;
            if !yes && !confirm_delete(&doc)? {
                println!("aborted");
                return Ok(());
            }
            kb.delete(&id).await?;
            if json {
                print_json(&json!({ "deleted": id }))
            } else {
                println!("deleted {} ({})", doc.name, id);
                Ok(())
            }
        }
        Command::Reprocess { id } => {
            let id = parse_id(&id);
            kb.reprocess(&id).await?;
            let doc = kb.wait_idle(&id).await?;
            if json {
                print_json(&doc)
            } else {
                print_documents(std::slice::from_ref(&doc));
                Ok(())
            }
        }
        Command::Query {
            question,
            scope,
            retrieve_only,
        } => {
            let resolved = prepare_scope(kb, &scope).await?;
            if retrieve_only {
                let result = kb.retrieve(&question, &resolved, scope.top_k).await?;
                if json {
                    print_json(&result)
                } else {
                    print_passages(&result);
                    Ok(())
                }
            } else {
                let answer = kb.query(&question, &resolved, scope.top_k).await?;
                if json {
                    print_json(&answer)
                } else {
                    print_answer(&answer);
                    Ok(())
                }
            }
        }
        Command::Chat { scope } => {
            let resolved = prepare_scope(kb, &scope).await?;
            chat(kb, &resolved, scope.top_k).await
        }
        Command::Stats => {
            let stats = kb.stats().await?;
            if json {
                print_json(&stats)
            } else {
                print_stats(&stats);
                Ok(())
            }
        }
    }
}

fn parse_id(raw: &str) -> DocumentId {
    DocumentId::from(raw.trim())
}

async fn prepare_scope(kb: &KnowledgeBase, args: &ScopeArgs) -> anyhow::Result<Scope> {
    let mut loaded = Vec::new();
    if !args.load.is_empty() {
        loaded = upload_all(kb, &args.load).await?;
        report_failures(&loaded)?;
    }
    match args.document.as_deref() {
        Some(raw) => {
            let id = parse_id(raw);
            // Allow scoping by the file name of a document loaded in this run.
            let id = loaded
                .iter()
                .filter_map(|o| o.record.as_ref())
                .find(|r| r.name == raw)
                .map_or(id, |r| r.id.clone());
            kb.get(&id).await?;
            Ok(Scope::Document(id))
        }
        None => Ok(Scope::Global),
    }
}

struct UploadOutcome {
    path: PathBuf,
    record: Option<DocumentRecord>,
    error: Option<String>,
}

fn expand_paths(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let found = document::collect_files(path)
                .with_context(|| format!("failed to scan {}", path.display()))?;
            tracing::info!(dir = %path.display(), files = found.len(), "scanned directory");
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |n| n.to_string_lossy().into_owned(),
    )
}

async fn upload_all(kb: &KnowledgeBase, paths: &[PathBuf]) -> anyhow::Result<Vec<UploadOutcome>> {
    let mut outcomes = Vec::new();
    for path in expand_paths(paths)? {
        let outcome = match tokio::fs::read(&path).await {
            Ok(bytes) => match kb.upload(&display_name(&path), bytes).await {
                Ok(record) => UploadOutcome {
                    path,
                    record: Some(record),
                    error: None,
                },
                Err(IndexError::DuplicateDocument { existing }) => {
                    let record = kb.get(&existing).await?;
                    tracing::info!(path = %path.display(), existing = %existing, "already uploaded");
                    UploadOutcome {
                        path,
                        record: Some(record),
                        error: None,
                    }
                }
                Err(e) => UploadOutcome {
                    path,
                    record: None,
                    error: Some(e.to_string()),
                },
            },
            Err(e) => UploadOutcome {
                path,
                record: None,
                error: Some(format!("read failed: {e}")),
            },
        };
        outcomes.push(outcome);
    }

    for outcome in &mut outcomes {
        if let Some(record) = &outcome.record {
            let settled = kb.wait_idle(&record.id).await?;
            if settled.status == DocumentStatus::Failed {
                outcome.error.clone_from(&settled.failure_reason);
            }
            outcome.record = Some(settled);
        }
    }
    Ok(outcomes)
}

fn report_failures(outcomes: &[UploadOutcome]) -> anyhow::Result<()> {
    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    if failed > 0 {
        for o in outcomes.iter().filter(|o| o.error.is_some()) {
            eprintln!(
                "{}: {}",
                o.path.display(),
                o.error.as_deref().unwrap_or_default()
            );
        }
        bail!("{failed} of {} documents failed", outcomes.len());
    }
    Ok(())
}

async fn upload(kb: &KnowledgeBase, paths: &[PathBuf], json: bool) -> anyhow::Result<()> {
    let outcomes = upload_all(kb, paths).await?;
    if outcomes.is_empty() {
        bail!("no supported documents found");
    }
    if json {
        let rows: Vec<_> = outcomes
            .iter()
            .map(|o| json!({ "path": o.path, "document": o.record, "error": o.error }))
            .collect();
        print_json(&rows)?;
    } else {
        let records: Vec<DocumentRecord> =
            outcomes.iter().filter_map(|o| o.record.clone()).collect();
        print_documents(&records);
    }
    report_failures(&outcomes)
}

fn confirm_delete(doc: &DocumentRecord) -> anyhow::Result<bool> {
    dialoguer::Confirm::new()
        .with_prompt(format!(
            "Delete {} and its {} indexed chunks?",
            doc.name, doc.chunk_count
        ))
        .default(false)
        .interact()
        .context("confirmation prompt failed")
}

async fn chat(kb: &KnowledgeBase, scope: &Scope, top_k: Option<usize>) -> anyhow::Result<()> {
    match scope {
        Scope::Global => println!("Asking the whole knowledge base. Type /exit to quit."),
        Scope::Document(id) => println!("Asking document {id}. Type /exit to quit."),
    }
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "/exit" | "/quit") {
            break;
        }

        match kb.query(question, scope, top_k).await {
            Ok(answer) => print_answer(&answer),
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_documents(docs: &[DocumentRecord]) {
    if docs.is_empty() {
        println!("no documents");
        return;
    }
    println!("{:<36}  {:<10}  {:>6}  NAME", "ID", "STATUS", "CHUNKS");
    for doc in docs {
        println!(
            "{:<36}  {:<10}  {:>6}  {}",
            doc.id.as_str(),
            doc.status.as_str(),
            doc.chunk_count,
            doc.name
        );
        if let Some(reason) = &doc.failure_reason {
            println!("{:<36}  reason: {reason}", "");
        }
    }
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text.trim());
    if !answer.citations.is_empty() {
        println!("\nSources:");
        for c in &answer.citations {
            let chunks: Vec<String> = c.chunk_indices.iter().map(u32::to_string).collect();
            println!("  - {} (chunks {})", c.document_name, chunks.join(", "));
        }
    }
    println!();
}

fn print_passages(result: &QueryResult) {
    if result.is_empty() {
        println!("no matching passages");
        return;
    }
    for (rank, chunk) in result.chunks.iter().enumerate() {
        println!(
            "#{} {} [chunk {}] score {:.3}",
            rank + 1,
            chunk.document_name,
            chunk.chunk_index,
            chunk.score
        );
        println!("{}\n", chunk.text.trim());
    }
}

fn print_stats(stats: &IndexStats) {
    println!("provider:        {} ({})", stats.provider, stats.model);
    println!("embeddings:      {}", stats.embedding_model);
    println!(
        "storage:         {} ({})",
        stats.storage_mode, stats.vector_backend
    );
    println!(
        "chunking:        {} tokens, overlap {} ({})",
        stats.chunk_size, stats.chunk_overlap, stats.tokenizer
    );
    println!("compression:     {}", stats.compression.as_str());
    println!("jobs in flight:  {}", stats.jobs_in_flight);
    println!("documents:");
    for c in &stats.documents {
        println!("  {:<10} {}", c.status.as_str(), c.count);
    }
    println!("collections:");
    if stats.collections.is_empty() {
        println!("  (none)");
    }
    for c in &stats.collections {
        println!("  {:<48} {}", c.name, c.size);
    }
}
