use crate::error::TabulaError;
use crate::ingest::ConflictPolicy;
use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use url::Url;

pub const GREETING: &str = "Hello! I'm a SQL assistant. Ask me anything about your database.";
pub const FALLBACK_ANSWER: &str = "Sorry, I couldn't find an answer to that question in the database. Please try rephrasing it.";
pub const NO_DATABASE_NOTICE: &str =
    "Please upload CSV files and convert them to the database first.";

pub static CONFIG: LazyLock<Config> = LazyLock::new(|| {
    Config::from_env().unwrap_or_else(|e| panic!("FATAL: invalid configuration: {e}"))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub loglevel: String,
    /// SQLite file the uploaded tables are written to.
    pub database_path: PathBuf,
    /// Directory uploaded files are saved into before ingestion.
    pub upload_dir: PathBuf,
    pub on_conflict: ConflictPolicy,
    pub max_upload_bytes: usize,
    /// Secret for the private session cookie. A random key is generated when unset.
    pub cookie_secret: Option<String>,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible API root; `chat/completions` is joined onto it.
    pub base_url: Url,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_iterations: usize,
    /// Row cap the agent is told to apply to its queries.
    pub top_k: usize,
    pub forward_history: bool,
    pub proxy: Option<Url>,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            loglevel: "info".to_string(),
            database_path: PathBuf::from("student.sqlite"),
            upload_dir: PathBuf::from("temp_csv_files"),
            on_conflict: ConflictPolicy::Replace,
            max_upload_bytes: 200 * 1024 * 1024,
            cookie_secret: None,
            llm: LlmConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://api.groq.com/openai/v1/")
                .expect("static LLM base url is valid"),
            api_key: String::new(),
            model: "llama-3.1-70b-versatile".to_string(),
            temperature: 0.0,
            max_iterations: 15,
            top_k: 10,
            forward_history: false,
            proxy: None,
            timeout_secs: 60,
        }
    }
}

impl Config {
    /// Defaults, then `TABULA_*` variables (`__` separates nested keys), then `GROQ_API_KEY`.
    pub fn from_env() -> Result<Self, TabulaError> {
        let cfg: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Env::prefixed("TABULA_").split("__"))
            .merge(
                Env::raw()
                    .only(&["GROQ_API_KEY"])
                    .map(|_| "llm.api_key".into()),
            )
            .extract()
            .map_err(|e| TabulaError::Configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), TabulaError> {
        if self.llm.max_iterations == 0 {
            return Err(TabulaError::Configuration(
                "llm.max_iterations must be at least 1".to_string(),
            ));
        }
        if let Some(secret) = self.cookie_secret.as_ref()
            && secret.len() < 64
        {
            return Err(TabulaError::Configuration(
                "cookie_secret must be at least 64 bytes".to_string(),
            ));
        }
        Ok(())
    }

    /// Endpoint for chat completions under the configured base url.
    pub fn chat_completions_url(&self) -> Result<Url, TabulaError> {
        Ok(self.llm.base_url.join("chat/completions")?)
    }
}
