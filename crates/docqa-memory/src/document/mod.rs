//! Text extraction from uploaded bytes.

pub mod error;
pub mod loader;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

pub use error::DocumentError;
#[cfg(feature = "pdf")]
pub use loader::PdfLoader;
pub use loader::TextLoader;

/// Default maximum upload size: 50 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

const PDF_MAGIC: &[u8] = b"%PDF-";

pub trait DocumentLoader: Send + Sync {
    fn extract(
        &self,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<String, DocumentError>> + Send + '_>>;

    fn supported_extensions(&self) -> &[&str];
}

/// Lowercased extension of a file name, empty when there is none.
#[must_use]
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Whether [`extract_text`] knows how to read files named like `name`.
#[must_use]
pub fn is_supported(name: &str) -> bool {
    let ext = extension_of(name);
    TextLoader::default().supported_extensions().contains(&ext.as_str())
        || (cfg!(feature = "pdf") && ext == "pdf")
}

/// Extract plain text, choosing the loader by extension or PDF signature.
///
/// # Errors
///
/// Returns [`DocumentError::FileTooLarge`] above `max_file_size`, a loader error for
/// unreadable input and [`DocumentError::EmptyText`] when nothing extractable remains.
pub async fn extract_text(
    name: &str,
    bytes: Vec<u8>,
    max_file_size: u64,
) -> Result<String, DocumentError> {
    let size = bytes.len() as u64;
    if size > max_file_size {
        return Err(DocumentError::FileTooLarge {
            size,
            limit: max_file_size,
        });
    }

    let looks_like_pdf = extension_of(name) == "pdf" || bytes.starts_with(PDF_MAGIC);
    let text = if looks_like_pdf {
        extract_pdf(bytes).await?
    } else {
        TextLoader::default().extract(bytes).await?
    };

    if text.trim().is_empty() {
        return Err(DocumentError::EmptyText);
    }
    Ok(text)
}

#[cfg(feature = "pdf")]
async fn extract_pdf(bytes: Vec<u8>) -> Result<String, DocumentError> {
    PdfLoader.extract(bytes).await
}

#[cfg(not(feature = "pdf"))]
async fn extract_pdf(_bytes: Vec<u8>) -> Result<String, DocumentError> {
    Err(DocumentError::UnsupportedFormat("pdf".into()))
}

/// Every supported file under `dir`, recursively, in path order.
///
/// # Errors
///
/// Returns an error if a directory cannot be read.
pub fn collect_files(dir: &Path) -> Result<Vec<PathBuf>, DocumentError> {
    let walker = ignore::WalkBuilder::new(dir)
        .standard_filters(false)
        .hidden(true)
        .follow_links(false)
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let path = entry.into_path();
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_supported)
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_of("Guidance.PDF"), "pdf");
        assert_eq!(extension_of("README"), "");
    }

    #[test]
    fn supported_names() {
        assert!(is_supported("notes.md"));
        assert!(is_supported("policy.txt"));
        assert!(!is_supported("model.xlsx"));
    }

    #[tokio::test]
    async fn text_extraction() {
        let text = extract_text("a.txt", b"Model inventory".to_vec(), 1024)
            .await
            .unwrap();
        assert_eq!(text, "Model inventory");
    }

    #[tokio::test]
    async fn whitespace_only_is_empty_text() {
        let err = extract_text("a.txt", b" \n\t ".to_vec(), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::EmptyText));
    }

    #[tokio::test]
    async fn oversized_upload_rejected() {
        let err = extract_text("a.txt", vec![b'a'; 10], 5).await.unwrap_err();
        assert!(matches!(
            err,
            DocumentError::FileTooLarge { size: 10, limit: 5 }
        ));
    }

    #[tokio::test]
    async fn corrupt_pdf_is_extraction_error() {
        let err = extract_text("broken.pdf", b"%PDF-1.7 garbage".to_vec(), 1024)
            .await
            .unwrap_err();
        assert!(!matches!(err, DocumentError::EmptyText));
    }

    #[test]
    fn collect_files_recurses_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("nested/a.md"), "a").unwrap();
        std::fs::write(dir.path().join("image.png"), "x").unwrap();

        let files = collect_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, vec!["b.txt", "a.md"]);
    }

    #[cfg(unix)]
    #[test]
    fn collect_files_does_not_follow_symlinked_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("policy.txt"), "p").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("again")).unwrap();

        let files = collect_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("policy.txt")]);
    }

    #[test]
    fn collect_files_skips_hidden_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".cache")).unwrap();
        std::fs::write(dir.path().join(".cache/old.txt"), "o").unwrap();
        std::fs::write(dir.path().join("guide.md"), "g").unwrap();

        let files = collect_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("guide.md")]);
    }

    #[test]
    fn collect_files_missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_files(&dir.path().join("absent")).is_err());
    }
}
