//! Process configuration.
//!
//! Every setting is a CLI flag backed by a named environment variable with a
//! documented default (see [`ConfigArgs`]). [`load_config`] validates the raw
//! arguments once at startup and produces the immutable [`Config`] that is
//! passed by reference (or `Arc`) into every component.

use anyhow::{bail, Result};
use clap::Args;
use std::path::PathBuf;

/// Raw configuration as read from flags / environment variables.
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// SQLite database file.
    #[arg(long, env = "DATABASE_PATH", default_value = "./data/page-rag.sqlite", global = true)]
    pub database_path: PathBuf,

    /// Host name of the Ollama backend.
    #[arg(long, env = "OLLAMA_DOMAIN", default_value = "localhost", global = true)]
    pub ollama_domain: String,

    /// Port of the Ollama backend.
    #[arg(long, env = "OLLAMA_PORT", default_value_t = 11434, global = true)]
    pub ollama_port: u16,

    /// Full Ollama base URL; overrides domain and port when set.
    #[arg(long, env = "OLLAMA_HOST", global = true)]
    pub ollama_host: Option<String>,

    /// Model used by `/chat`.
    #[arg(long, env = "OLLAMA_GENERATION_MODEL", default_value = "llama3.2", global = true)]
    pub generation_model: String,

    /// Model used to embed page chunks and queries.
    #[arg(long, env = "OLLAMA_EMBEDDING_MODEL", default_value = "nomic-embed-text", global = true)]
    pub embedding_model: String,

    /// Output dimensionality of the embedding model.
    #[arg(long, env = "EMBEDDING_DIMS", default_value_t = 768, global = true)]
    pub embedding_dims: usize,

    /// Retry budget for embedding calls made by the indexer.
    #[arg(long, env = "EMBEDDING_MAX_RETRIES", default_value_t = 5, global = true)]
    pub embedding_max_retries: u32,

    /// HTTP timeout for backend calls, in seconds.
    #[arg(long, env = "BACKEND_TIMEOUT_SECS", default_value_t = 60, global = true)]
    pub backend_timeout_secs: u64,

    /// Maximum chunk length in characters.
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 800, global = true)]
    pub chunk_size: usize,

    /// Characters shared between consecutive chunks.
    #[arg(long, env = "CHUNK_OVERLAP", default_value_t = 400, global = true)]
    pub chunk_overlap: usize,

    /// Separator the splitter breaks content on.
    #[arg(long, env = "CHUNK_SEPARATOR", default_value = ".", global = true)]
    pub chunk_separator: String,

    /// Number of chunks retrieved for each chat question.
    #[arg(long, env = "RETRIEVAL_LIMIT", default_value_t = 5, global = true)]
    pub retrieval_limit: usize,

    /// Optional cosine-distance cut-off for chat retrieval.
    #[arg(long, env = "RETRIEVAL_SIMILARITY_THRESHOLD", global = true)]
    pub retrieval_similarity_threshold: Option<f32>,

    /// Directory holding `*.hbs` prompt templates.
    #[arg(long, env = "PROMPT_TEMPLATES_DIR", default_value = "./prompt_templates", global = true)]
    pub prompt_templates_dir: PathBuf,

    /// Template rendered for `/chat`.
    #[arg(long, env = "GROUNDING_TEMPLATE", default_value = "grounded_answer", global = true)]
    pub grounding_template: String,

    /// Address the HTTP server binds to.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:8000", global = true)]
    pub bind_addr: String,

    /// Tracing filter used when `RUST_LOG` is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Directory for the rotating log file.
    #[arg(long, env = "LOG_DIR", default_value = "./logs", global = true)]
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub ollama: OllamaConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub prompts: PromptConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Base URL, e.g. `http://localhost:11434`.
    pub host: String,
    pub generation_model: String,
    pub embedding_model: String,
    pub embedding_dims: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separator: String,
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub limit: usize,
    pub similarity_threshold: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct PromptConfig {
    pub templates_dir: PathBuf,
    pub grounding_template: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: PathBuf,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 400,
            separator: ".".to_string(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: 5,
            similarity_threshold: None,
        }
    }
}

fn build_ollama_host(args: &ConfigArgs) -> String {
    match args.ollama_host.as_deref().map(str::trim) {
        Some(host) if !host.is_empty() => host.trim_end_matches('/').to_string(),
        _ => format!("http://{}:{}", args.ollama_domain, args.ollama_port),
    }
}

/// Validate raw arguments and build the process [`Config`].
pub fn load_config(args: &ConfigArgs) -> Result<Config> {
    // Validate chunking
    if args.chunk_size == 0 {
        bail!("CHUNK_SIZE must be > 0");
    }
    if args.chunk_overlap >= args.chunk_size {
        bail!(
            "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
            args.chunk_overlap,
            args.chunk_size
        );
    }
    if args.chunk_separator.is_empty() {
        bail!("CHUNK_SEPARATOR must not be empty");
    }

    // Validate models
    if args.embedding_dims == 0 {
        bail!("EMBEDDING_DIMS must be > 0");
    }
    if args.generation_model.trim().is_empty() {
        bail!("OLLAMA_GENERATION_MODEL must not be empty");
    }
    if args.embedding_model.trim().is_empty() {
        bail!("OLLAMA_EMBEDDING_MODEL must not be empty");
    }

    // Validate retrieval
    if args.retrieval_limit < 1 {
        bail!("RETRIEVAL_LIMIT must be >= 1");
    }
    if let Some(t) = args.retrieval_similarity_threshold {
        if !(0.0..=1.0).contains(&t) {
            bail!("RETRIEVAL_SIMILARITY_THRESHOLD must be in [0.0, 1.0]");
        }
    }

    if args.grounding_template.trim().is_empty() {
        bail!("GROUNDING_TEMPLATE must not be empty");
    }

    Ok(Config {
        db: DbConfig {
            path: args.database_path.clone(),
        },
        ollama: OllamaConfig {
            host: build_ollama_host(args),
            generation_model: args.generation_model.clone(),
            embedding_model: args.embedding_model.clone(),
            embedding_dims: args.embedding_dims,
            max_retries: args.embedding_max_retries,
            timeout_secs: args.backend_timeout_secs,
        },
        chunking: ChunkingConfig {
            chunk_size: args.chunk_size,
            chunk_overlap: args.chunk_overlap,
            separator: args.chunk_separator.clone(),
        },
        retrieval: RetrievalConfig {
            limit: args.retrieval_limit,
            similarity_threshold: args.retrieval_similarity_threshold,
        },
        prompts: PromptConfig {
            templates_dir: args.prompt_templates_dir.clone(),
            grounding_template: args.grounding_template.clone(),
        },
        server: ServerConfig {
            bind: args.bind_addr.clone(),
        },
        logging: LoggingConfig {
            level: args.log_level.clone(),
            dir: args.log_dir.clone(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: ConfigArgs,
    }

    fn parse(args: &[&str]) -> ConfigArgs {
        let mut argv = vec!["page-rag"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().config
    }

    #[test]
    fn test_defaults_are_valid() {
        let args = parse(&["--ollama-host", ""]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.chunking.chunk_overlap, 400);
        assert_eq!(config.chunking.separator, ".");
        assert_eq!(config.ollama.embedding_dims, 768);
        assert_eq!(config.retrieval.limit, 5);
        assert!(config.retrieval.similarity_threshold.is_none());
    }

    #[test]
    fn test_host_built_from_domain_and_port() {
        let args = parse(&[
            "--ollama-host",
            "",
            "--ollama-domain",
            "ollama",
            "--ollama-port",
            "9999",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.ollama.host, "http://ollama:9999");
    }

    #[test]
    fn test_explicit_host_wins() {
        let args = parse(&["--ollama-host", "http://gpu-box:11434/", "--ollama-domain", "x"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.ollama.host, "http://gpu-box:11434");
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let args = parse(&["--chunk-size", "100", "--chunk-overlap", "100"]);
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_threshold_out_of_range() {
        let args = parse(&["--retrieval-similarity-threshold", "1.5"]);
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_zero_dims_rejected() {
        let args = parse(&["--embedding-dims", "0"]);
        assert!(load_config(&args).is_err());
    }
}
