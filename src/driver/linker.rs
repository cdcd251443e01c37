use std::{
    ffi::OsStr,
    fs::File,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use tracing::instrument;

use crate::{codegen::Module, errors::SlangError, session::Session};

/// Turns a lowered module into an executable.
pub trait Toolchain {
    /// Builds `module` into the executable at `session.output_file` and returns its path.
    fn build(&self, session: &Session, module: &Module) -> Result<PathBuf, SlangError>;
}

/// Compiles the rendered IR with `clang` and links it against the C library.
#[derive(Debug, Clone)]
pub struct ClangToolchain {
    /// The compiler driver, `clang` unless overridden.
    pub compiler: PathBuf,
    /// Upper bound for each toolchain process.
    pub timeout: Duration,
    /// Checked while waiting; once set the running process is killed.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ClangToolchain {
    fn default() -> Self {
        Self {
            compiler: PathBuf::from("clang"),
            timeout: Duration::from_secs(120),
            cancel: None,
        }
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

impl ClangToolchain {
    fn tool_name(&self) -> String {
        self.compiler.display().to_string()
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Runs one toolchain step inside `scratch`, capturing its output for diagnostics.
    #[instrument(level = "debug", skip(self, scratch))]
    fn run(&self, step: &str, args: &[&OsStr], scratch: &Path) -> Result<(), SlangError> {
        let tool = format!("{} ({step})", self.tool_name());
        if self.cancelled() {
            return Err(SlangError::BuildCancelled { tool });
        }

        let io_error = |error: std::io::Error| SlangError::BuildFailed {
            tool: tool.clone(),
            diagnostics: error.to_string(),
        };

        let stdout_path = scratch.join(format!("{step}.stdout"));
        let stderr_path = scratch.join(format!("{step}.stderr"));
        let stdout = File::create(&stdout_path).map_err(io_error)?;
        let stderr = File::create(&stderr_path).map_err(io_error)?;

        let mut child = Command::new(&self.compiler)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(io_error)?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().map_err(io_error)? {
                break status;
            }

            if self.cancelled() {
                child.kill().ok();
                child.wait().ok();
                tracing::warn!("{tool} cancelled");
                return Err(SlangError::BuildCancelled { tool });
            }

            if started.elapsed() >= self.timeout {
                child.kill().ok();
                child.wait().ok();
                return Err(SlangError::BuildFailed {
                    diagnostics: format!("timed out after {:?}", self.timeout),
                    tool,
                });
            }

            std::thread::sleep(POLL_INTERVAL);
        };

        tracing::debug!("{tool} result ok: {}", status.success());

        if !status.success() {
            let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default();
            let stdout = std::fs::read_to_string(&stdout_path).unwrap_or_default();
            tracing::error!("{tool} error:\n{stderr}");
            return Err(SlangError::BuildFailed {
                diagnostics: format!("{status}\n{stderr}{stdout}"),
                tool,
            });
        }

        Ok(())
    }
}

impl Toolchain for ClangToolchain {
    #[instrument(level = "debug", skip_all, fields(output = %session.output_file.display()))]
    fn build(&self, session: &Session, module: &Module) -> Result<PathBuf, SlangError> {
        let io_error = |error: std::io::Error| SlangError::BuildFailed {
            tool: self.tool_name(),
            diagnostics: error.to_string(),
        };

        // Removed on drop, whichever way this function returns.
        let scratch = tempfile::Builder::new()
            .prefix("slang-build-")
            .tempdir()
            .map_err(io_error)?;

        let ir = module.to_string();
        let ir_path = scratch.path().join("module.ll");
        let object_path = scratch.path().join("module.o");
        std::fs::write(&ir_path, &ir).map_err(io_error)?;

        if session.output_ll {
            std::fs::write(session.output_file.with_extension("ll"), &ir).map_err(io_error)?;
        }

        self.run(
            "compile",
            &[
                OsStr::new("-c"),
                OsStr::new(session.optlevel.flag()),
                OsStr::new("-Wno-override-module"),
                ir_path.as_os_str(),
                OsStr::new("-o"),
                object_path.as_os_str(),
            ],
            scratch.path(),
        )?;

        self.run(
            "link",
            &[
                object_path.as_os_str(),
                OsStr::new("-o"),
                session.output_file.as_os_str(),
            ],
            scratch.path(),
        )?;

        tracing::info!("built {}", session.output_file.display());
        Ok(session.output_file.clone())
    }
}
