//! 沙箱执行策略

use std::collections::HashSet;
use std::time::Duration;

use crate::config::SandboxSection;

/// 解释器允许调用的全部内置函数
pub const BUILTINS: &[&str] = &[
    "abs", "min", "max", "pow", "sqrt", "floor", "ceil", "round", "len", "str", "upper", "lower", "print",
];

#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    /// 单个任务的墙钟上限
    pub timeout: Duration,
    /// 解释步数上限；None 表示只受超时约束
    pub max_steps: Option<u64>,
    pub max_source_chars: usize,
    pub max_output_chars: usize,
    /// 单个字符串值的长度上限，拼接与字符串函数的结果都受其约束
    pub max_value_chars: usize,
    pub max_depth: usize,
    pub max_concurrent_jobs: usize,
    /// CodeSandbox 保留的已结束任务条数
    pub max_job_history: usize,
    pub allowed_builtins: HashSet<String>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            max_steps: Some(1_000_000),
            max_source_chars: 10_000,
            max_output_chars: 10_000,
            max_value_chars: 100_000,
            max_depth: 128,
            max_concurrent_jobs: 4,
            max_job_history: 64,
            allowed_builtins: BUILTINS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SandboxPolicy {
    pub fn from_config(cfg: &SandboxSection) -> Self {
        let allowed_builtins = if cfg.allowed_builtins.is_empty() {
            BUILTINS.iter().map(|s| s.to_string()).collect()
        } else {
            cfg.allowed_builtins
                .iter()
                .filter(|name| {
                    let known = BUILTINS.contains(&name.as_str());
                    if !known {
                        tracing::warn!(builtin = %name, "Unknown builtin in sandbox allow-list, ignored");
                    }
                    known
                })
                .cloned()
                .collect()
        };
        Self {
            timeout: Duration::from_millis(cfg.timeout_ms),
            max_steps: (cfg.max_steps > 0).then_some(cfg.max_steps),
            max_source_chars: cfg.max_source_chars,
            max_output_chars: cfg.max_output_chars,
            max_value_chars: cfg.max_value_chars,
            max_depth: cfg.max_depth.max(1),
            max_concurrent_jobs: cfg.max_concurrent_jobs.max(1),
            max_job_history: cfg.max_job_history,
            allowed_builtins,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_steps(mut self, max_steps: Option<u64>) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed_builtins.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_filters_unknown_builtins() {
        let cfg = SandboxSection {
            allowed_builtins: vec!["abs".into(), "eval".into()],
            max_steps: 0,
            ..SandboxSection::default()
        };
        let policy = SandboxPolicy::from_config(&cfg);
        assert!(policy.is_allowed("abs"));
        assert!(!policy.is_allowed("eval"));
        assert!(!policy.is_allowed("print"));
        assert_eq!(policy.max_steps, None);
        assert_eq!(policy.timeout, Duration::from_millis(3000));
    }
}
