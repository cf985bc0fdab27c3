use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;

fn default_fixture_path() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir.join("fixtures/question_bank_v1.yaml")
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Retrieval quality harness over the question bank")]
pub struct Config {
    /// Path to the question bank fixture
    #[arg(long, default_value_os_t = default_fixture_path())]
    pub fixture: PathBuf,

    /// Hit-rate cutoff (a question is a hit when an expected document
    /// appears in the top k)
    #[arg(long, default_value_t = 5)]
    pub k: usize,

    /// Limit the number of questions evaluated (0 = all)
    #[arg(long = "limit", default_value_t = 0)]
    pub limit_arg: usize,

    /// Hashed embedding dimensionality for the run
    #[arg(long, default_value_t = 64)]
    pub embedding_dimensions: usize,

    /// Annotate the run; printed with the summary
    #[arg(long)]
    pub label: Option<String>,

    // Computed, not an argument
    #[arg(skip)]
    pub limit: Option<usize>,
}

impl Config {
    pub fn finalize(&mut self) -> Result<()> {
        if self.k == 0 {
            return Err(anyhow!("--k must be greater than zero"));
        }
        if self.embedding_dimensions == 0 {
            return Err(anyhow!("--embedding-dimensions must be greater than zero"));
        }
        self.limit = (self.limit_arg > 0).then_some(self.limit_arg);
        Ok(())
    }
}

pub fn parse() -> Result<Config> {
    let mut config = Config::parse();
    config.finalize()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_k_is_rejected() {
        let mut config = Config::parse_from(["evaluations", "--k", "0"]);
        assert!(config.finalize().is_err());
    }

    #[test]
    fn zero_limit_means_all() {
        let mut config = Config::parse_from(["evaluations"]);
        config.finalize().expect("defaults should be valid");
        assert_eq!(config.limit, None);

        let mut config = Config::parse_from(["evaluations", "--limit", "3"]);
        config.finalize().expect("limit should be valid");
        assert_eq!(config.limit, Some(3));
    }
}
