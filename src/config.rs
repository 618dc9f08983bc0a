//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BESPOKE__*` 覆盖（双下划线表示嵌套，如 `BESPOKE__RETRY__MAX_ATTEMPTS=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub api: ApiSection,
    pub retry: RetrySection,
    pub memory: MemorySection,
    pub sandbox: SandboxSection,
    pub realtime: RealtimeSection,
}

/// [app] 段：助手资料、线程标题、数据目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub assistant_name: String,
    pub assistant_description: String,
    pub thread_title: String,
    /// 相对路径的存储文件都落在这里
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            assistant_name: "BespokeAssistant".to_string(),
            assistant_description: "A custom, context-aware assistant.".to_string(),
            thread_title: "Persistent Session".to_string(),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// [api] 段：远端服务地址与凭据来源
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    pub sentiment_url: String,
    /// 存放 Bearer token 的环境变量名
    pub credential_env: String,
    /// 单次 HTTP 请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.aimlapi.com".to_string(),
            sentiment_url: "https://api.sentimentanalysis.com/analyze".to_string(),
            credential_env: "AIMLAPI_API_KEY".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// [retry] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1000,
        }
    }
}

/// [memory] 段：长期记忆库与上下文文件（相对路径基于 app.data_dir）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub long_term_db: PathBuf,
    pub context_file: PathBuf,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            long_term_db: PathBuf::from("memory.db"),
            context_file: PathBuf::from("context.json"),
        }
    }
}

/// [sandbox] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub timeout_ms: u64,
    /// 0 表示不限步数，只受超时约束
    pub max_steps: u64,
    pub max_output_chars: usize,
    pub max_source_chars: usize,
    /// 单个字符串值的长度上限
    pub max_value_chars: usize,
    pub max_depth: usize,
    pub max_concurrent_jobs: usize,
    /// 保留的任务记录条数
    pub max_job_history: usize,
    /// 为空时允许全部内置函数
    pub allowed_builtins: Vec<String>,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            max_steps: 1_000_000,
            max_output_chars: 10_000,
            max_source_chars: 10_000,
            max_value_chars: 100_000,
            max_depth: 128,
            max_concurrent_jobs: 4,
            max_job_history: 64,
            allowed_builtins: Vec::new(),
        }
    }
}

/// [realtime] 段：未配置 url 时不启用实时通道
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeSection {
    pub url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            url: None,
            request_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// 长期记忆库的实际路径
    pub fn long_term_db_path(&self) -> PathBuf {
        self.app.data_dir.join(&self.memory.long_term_db)
    }

    /// 上下文文件的实际路径（默认 data/context.json）
    pub fn context_file_path(&self) -> PathBuf {
        self.app.data_dir.join(&self.memory.context_file)
    }
}

/// 从 config 目录加载配置，环境变量 BESPOKE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BESPOKE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BESPOKE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
