//! Compile a submission into a runnable artifact.
//!
//! Python needs no subprocess: the source lands in a temp file and the
//! interpreter runs it directly. C and C++ go through gcc/g++ with
//! optimization on. Java is compiled into a private directory named
//! scratch because javac may emit several class files; the directory as
//! a whole is the artifact.

use std::path::PathBuf;

use thiserror::Error;
use tokio::process::Command;
use tracing::warn;

use arbiter_common::types::Language;

/// Opaque handle to one compiled submission. Exactly one artifact
/// exists per successful compile; the owner removes it after the last
/// run on every exit path.
#[derive(Debug)]
pub enum Artifact {
    /// Interpreted source, run via the interpreter.
    Script(PathBuf),
    /// Natively compiled executable.
    Binary(PathBuf),
    /// Directory of compiled bytecode plus the entry type to launch.
    ClassDir { dir: PathBuf, class: String },
}

impl Artifact {
    /// Best-effort removal; a vanished artifact is not an error.
    pub fn cleanup(&self) {
        let outcome = match self {
            Artifact::Script(path) | Artifact::Binary(path) => std::fs::remove_file(path),
            Artifact::ClassDir { dir, .. } => std::fs::remove_dir_all(dir),
        };
        if let Err(e) = outcome {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, artifact = ?self, "failed to remove artifact");
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    /// The toolchain rejected the submission. Recoverable: the batch
    /// turns this into synthetic per-case results.
    #[error("{diagnostics}")]
    Failed { diagnostics: String },
    /// The toolchain binary itself is missing. Fatal configuration
    /// error, never folded into case results.
    #[error("toolchain '{tool}' is not available")]
    ToolchainMissing {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("scratch space error: {0}")]
    Scratch(#[from] std::io::Error),
}

pub async fn compile(language: Language, source: &str) -> Result<Artifact, CompileError> {
    match language {
        Language::Python => {
            let path = write_source(source, ".py").await?;
            Ok(Artifact::Script(path))
        }
        Language::C => compile_native("gcc", ".c", source).await,
        Language::Cpp => compile_native("g++", ".cpp", source).await,
        Language::Java => compile_java(source).await,
    }
}

/// Persist the source into a fresh temp file with the right extension.
async fn write_source(source: &str, suffix: &str) -> Result<PathBuf, CompileError> {
    let file = tempfile::Builder::new()
        .prefix("arbiter-sub-")
        .suffix(suffix)
        .tempfile()?;
    let path = file
        .into_temp_path()
        .keep()
        .map_err(|e| CompileError::Scratch(e.error))?;
    tokio::fs::write(&path, source).await?;
    Ok(path)
}

async fn compile_native(
    compiler: &'static str,
    suffix: &str,
    source: &str,
) -> Result<Artifact, CompileError> {
    let src = write_source(source, suffix).await?;
    let exe = src.with_extension("");

    let output = Command::new(compiler)
        .arg(&src)
        .arg("-O2")
        .arg("-o")
        .arg(&exe)
        .output()
        .await;

    // the source never outlives the compile, success or not
    let _ = tokio::fs::remove_file(&src).await;

    let output = match output {
        Ok(output) => output,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CompileError::ToolchainMissing {
                tool: compiler,
                source: e,
            })
        }
        Err(e) => return Err(e.into()),
    };

    if !output.status.success() {
        return Err(CompileError::Failed {
            diagnostics: diagnostics_from(&output.stderr),
        });
    }
    Ok(Artifact::Binary(exe))
}

async fn compile_java(source: &str) -> Result<Artifact, CompileError> {
    let class = entry_class(source);
    let dir = tempfile::Builder::new()
        .prefix("arbiter-java-")
        .tempdir()?
        .into_path();
    let src_path = dir.join(format!("{}.java", class));

    if let Err(e) = tokio::fs::write(&src_path, source).await {
        let _ = std::fs::remove_dir_all(&dir);
        return Err(e.into());
    }

    let output = Command::new("javac").arg(&src_path).output().await;
    let output = match output {
        Ok(output) => output,
        Err(e) => {
            let _ = std::fs::remove_dir_all(&dir);
            return if e.kind() == std::io::ErrorKind::NotFound {
                Err(CompileError::ToolchainMissing {
                    tool: "javac",
                    source: e,
                })
            } else {
                Err(e.into())
            };
        }
    };

    if !output.status.success() {
        let _ = std::fs::remove_dir_all(&dir);
        return Err(CompileError::Failed {
            diagnostics: diagnostics_from(&output.stderr),
        });
    }
    Ok(Artifact::ClassDir { dir, class })
}

fn diagnostics_from(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    if text.trim().is_empty() {
        "compilation failed".to_string()
    } else {
        text.into_owned()
    }
}

/// Best-effort scan for the public entry type of a Java submission.
/// Falls back to `Main` when nothing obvious is declared.
fn entry_class(source: &str) -> String {
    let mut words = source.split_whitespace().peekable();
    while let Some(word) = words.next() {
        if word == "public" && words.peek() == Some(&"class") {
            words.next();
            if let Some(raw) = words.next() {
                let name: String = raw
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                if !name.is_empty() {
                    return name;
                }
            }
        }
    }
    "Main".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_declared_entry_class() {
        let source = "import java.util.*;\npublic class Solution {\n  public static void main(String[] a) {}\n}";
        assert_eq!(entry_class(source), "Solution");
    }

    #[test]
    fn brace_glued_to_name_is_stripped() {
        assert_eq!(entry_class("public class Foo{ }"), "Foo");
    }

    #[test]
    fn falls_back_to_main() {
        assert_eq!(entry_class("class Helper {}"), "Main");
        assert_eq!(entry_class(""), "Main");
    }

    #[tokio::test]
    async fn python_compile_leaves_exactly_one_script() {
        let artifact = compile(Language::Python, "print('hi')").await.unwrap();
        match &artifact {
            Artifact::Script(path) => {
                assert!(path.exists());
                assert_eq!(path.extension().and_then(|e| e.to_str()), Some("py"));
                let body = std::fs::read_to_string(path).unwrap();
                assert_eq!(body, "print('hi')");
            }
            other => panic!("expected a script artifact, got {:?}", other),
        }
        artifact.cleanup();
        if let Artifact::Script(path) = &artifact {
            assert!(!path.exists());
        }
    }

    #[tokio::test]
    #[ignore] // requires gcc on the host
    async fn gcc_failure_carries_diagnostics() {
        let err = compile(Language::C, "int main( {").await.unwrap_err();
        match err {
            CompileError::Failed { diagnostics } => assert!(!diagnostics.is_empty()),
            other => panic!("expected Failed, got {:?}", other),
        }
    }
}
