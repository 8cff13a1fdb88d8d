use std::future::Future;
use std::pin::Pin;

use super::super::{DocumentError, DocumentLoader};

/// PDF text layer via `pdf-extract`, run on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfLoader;

impl DocumentLoader for PdfLoader {
    fn extract(
        &self,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<String, DocumentError>> + Send + '_>> {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text_from_mem(&bytes)
                    .map_err(|e| DocumentError::Pdf(e.to_string()))
            })
            .await
            // pdf-extract panics on some malformed inputs
            .map_err(|e| DocumentError::Pdf(format!("extractor aborted: {e}")))?
        })
    }

    fn supported_extensions(&self) -> &[&str] {
        &["pdf"]
    }
}
