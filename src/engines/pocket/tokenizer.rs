use std::path::Path;

use tokenizers::Tokenizer;

use crate::error::{Result, TtsError};

/// Text front-end for the text conditioner graph.
pub struct TextTokenizer {
    inner: Tokenizer,
}

impl TextTokenizer {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TtsError::ModelNotFound(path.display().to_string()));
        }
        let inner = Tokenizer::from_file(path).map_err(|e| TtsError::Tokenizer(e.to_string()))?;
        log::info!(
            "Tokenizer loaded from {} (vocab size {})",
            path.display(),
            inner.get_vocab_size(true)
        );
        Ok(Self { inner })
    }

    /// Token ids for one normalized chunk, without special tokens.
    pub fn encode(&self, text: &str) -> Result<Vec<i64>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| TtsError::Tokenizer(e.to_string()))?;
        let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        if ids.is_empty() {
            return Err(TtsError::InvalidInput(format!(
                "text produced no tokens: {text:?}"
            )));
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORD_LEVEL: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": { "[UNK]": 0, "Hello": 1, "world": 2, ".": 3 },
            "unk_token": "[UNK]"
        }
    }"#;

    #[test]
    fn encodes_with_vocab_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        std::fs::write(&path, WORD_LEVEL).unwrap();

        let tokenizer = TextTokenizer::load(&path).unwrap();
        assert_eq!(tokenizer.encode("Hello world.").unwrap(), vec![1, 2, 3]);
        assert_eq!(tokenizer.encode("Goodbye world.").unwrap(), vec![0, 2, 3]);
    }

    #[test]
    fn missing_file_is_reported_by_path() {
        let err = TextTokenizer::load(Path::new("/nowhere/tokenizer.json"))
            .err()
            .unwrap();
        assert!(matches!(err, TtsError::ModelNotFound(p) if p.contains("nowhere")));
    }
}
