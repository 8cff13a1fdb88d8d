use std::future::Future;
use std::pin::Pin;

use super::super::{DocumentError, DocumentLoader};

const BOM: char = '\u{feff}';

/// UTF-8 text and markdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextLoader;

impl DocumentLoader for TextLoader {
    fn extract(
        &self,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<String, DocumentError>> + Send + '_>> {
        Box::pin(async move {
            let text = String::from_utf8(bytes)?;
            Ok(match text.strip_prefix(BOM) {
                Some(rest) => rest.to_owned(),
                None => text,
            })
        })
    }

    fn supported_extensions(&self) -> &[&str] {
        &["txt", "md", "markdown"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_text_passes_through() {
        let text = TextLoader.extract(b"hello world".to_vec()).await.unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn bom_is_stripped() {
        let mut bytes = "\u{feff}Title".as_bytes().to_vec();
        bytes.extend_from_slice(b"\nbody");
        let text = TextLoader.extract(bytes).await.unwrap();
        assert_eq!(text, "Title\nbody");
    }

    #[tokio::test]
    async fn invalid_utf8_rejected() {
        let result = TextLoader.extract(vec![0xff, 0xfe, 0x00]).await;
        assert!(matches!(result, Err(DocumentError::InvalidUtf8(_))));
    }

    #[test]
    fn supported_extensions_list() {
        let exts = TextLoader.supported_extensions();
        assert!(exts.contains(&"txt"));
        assert!(exts.contains(&"md"));
        assert!(exts.contains(&"markdown"));
    }
}
