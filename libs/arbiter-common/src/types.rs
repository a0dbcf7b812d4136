use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Languages the judge accepts. The variant decides both the compile
/// strategy (native binary, bytecode directory, plain script) and the
/// run command the sandbox builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    Java,
    Python,
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "c" => Ok(Language::C),
            "cpp" | "c++" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "python" | "py" => Ok(Language::Python),
            other => Err(format!("unsupported language: {}", other)),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Python => "python",
        };
        f.write_str(name)
    }
}

/// One submission: source code plus everything needed to run it against
/// an ordered list of stdin payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub language: Language,
    pub code: String,
    #[serde(default)]
    pub stdins: Vec<String>,
    #[serde(default = "default_time_limit_ms")]
    pub time_limit_ms: u64,
    /// Overall wall-clock ceiling shared by the whole batch, distinct
    /// from the per-case limit above.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_time_limit_ms: Option<u64>,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

pub fn default_time_limit_ms() -> u64 {
    30_000
}

pub fn default_memory_limit_mb() -> u64 {
    256
}

/// Raw outcome of running one artifact against one stdin. Produced
/// exactly once per sandbox call and never mutated afterwards.
///
/// Units are milliseconds and kilobytes everywhere. `exit_code` is -1
/// when the process never started (compile failure, synthetic results);
/// `memory_used_kb` is 0 when the sampler never got a reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub request_id: Uuid,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub memory_used_kb: u64,
    pub timed_out: bool,
}

impl ExecutionResult {
    /// Synthetic result for a case that never ran because compilation
    /// failed. The diagnostics land in stderr so classification sees a
    /// compile error (-1 exit, non-empty stderr).
    pub fn compile_failure(diagnostics: &str) -> Self {
        ExecutionResult {
            request_id: Uuid::new_v4(),
            stdout: String::new(),
            stderr: diagnostics.to_string(),
            exit_code: -1,
            duration_ms: 0,
            memory_used_kb: 0,
            timed_out: false,
        }
    }

    /// Synthetic result for a case skipped because the shared wall
    /// budget ran out before it could start.
    pub fn budget_exhausted() -> Self {
        ExecutionResult {
            request_id: Uuid::new_v4(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -9,
            duration_ms: 0,
            memory_used_kb: 0,
            timed_out: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Language::Cpp).unwrap(), "\"cpp\"");
        assert_eq!(
            serde_json::from_str::<Language>("\"python\"").unwrap(),
            Language::Python
        );
    }

    #[test]
    fn submission_defaults_apply() {
        let sub: Submission =
            serde_json::from_str(r#"{"language":"c","code":"int main(){}"}"#).unwrap();
        assert_eq!(sub.time_limit_ms, 30_000);
        assert_eq!(sub.memory_limit_mb, 256);
        assert!(sub.stdins.is_empty());
        assert!(sub.wall_time_limit_ms.is_none());
    }

    #[test]
    fn execution_result_wire_names_are_camel_case() {
        let json = serde_json::to_value(ExecutionResult::compile_failure("boom")).unwrap();
        assert_eq!(json["exitCode"], -1);
        assert_eq!(json["stderr"], "boom");
        assert_eq!(json["timedOut"], false);
        assert!(json.get("exit_code").is_none());
    }

    #[test]
    fn budget_exhausted_sentinel_shape() {
        let r = ExecutionResult::budget_exhausted();
        assert_eq!(r.exit_code, -9);
        assert!(r.timed_out);
        assert!(r.stdout.is_empty() && r.stderr.is_empty());
        assert_eq!(r.duration_ms, 0);
    }
}
