use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// Fixture format version this binary understands.
pub const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionBank {
    pub version: u32,
    pub documents: Vec<FixtureDocument>,
    pub questions: Vec<FixtureQuestion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureDocument {
    pub id: String,
    pub source: String,
    pub doc_type: String,
    pub jurisdiction: String,
    pub year: Option<i32>,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureQuestion {
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub expected_document_ids: Vec<String>,
    #[serde(default)]
    pub expected_fragments: Vec<String>,
    #[serde(default)]
    pub is_impossible: bool,
}

impl QuestionBank {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading question bank {}", path.display()))?;
        let bank: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing question bank {}", path.display()))?;
        bank.validate()?;
        Ok(bank)
    }

    fn validate(&self) -> Result<()> {
        if self.version != SUPPORTED_VERSION {
            return Err(anyhow!(
                "question bank version {} is not supported (expected {SUPPORTED_VERSION})",
                self.version
            ));
        }
        if self.documents.is_empty() {
            return Err(anyhow!("question bank contains no documents"));
        }
        for question in &self.questions {
            if question.is_impossible && !question.expected_document_ids.is_empty() {
                return Err(anyhow!(
                    "question {} is marked impossible but expects documents",
                    question.id
                ));
            }
            for expected in &question.expected_document_ids {
                if !self.documents.iter().any(|doc| &doc.id == expected) {
                    return Err(anyhow!(
                        "question {} expects unknown document {expected}",
                        question.id
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile failed");
        file.write_all(content.as_bytes()).expect("write failed");
        file
    }

    #[test]
    fn shipped_fixture_parses() {
        let path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures/question_bank_v1.yaml");
        let bank = QuestionBank::load(&path).expect("fixture should parse");
        assert_eq!(bank.version, SUPPORTED_VERSION);
        assert!(bank.questions.iter().any(|q| q.is_impossible));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let file = write_fixture(
            "version: 99\ndocuments:\n  - id: a\n    source: s\n    doc_type: act\n    \
             jurisdiction: india\n    year: 2000\n    content: text\nquestions: []\n",
        );
        let err = QuestionBank::load(file.path()).expect_err("version check should fail");
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn unknown_expected_document_is_rejected() {
        let file = write_fixture(
            "version: 1\ndocuments:\n  - id: a\n    source: s\n    doc_type: act\n    \
             jurisdiction: india\n    year: 2000\n    content: text\nquestions:\n  - id: q\n    \
             query: what\n    expected_document_ids: [missing]\n",
        );
        assert!(QuestionBank::load(file.path()).is_err());
    }
}
