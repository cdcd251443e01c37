use std::{
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
    sync::OnceLock,
};

use slang::codegen;
use slang::driver::linker::{ClangToolchain, Toolchain};
use slang::errors::SlangError;
use slang::interpreter::Vm;
use slang::parser::parse_program;
use slang::session::{OptLevel, Session};
use tempfile::TempDir;

#[derive(Debug)]
pub struct CompileResult {
    #[allow(unused)]
    pub folder: TempDir,
    pub binary_file: PathBuf,
}

/// Whether a `clang` is installed; native tests are skipped without one unless
/// `SLANG_REQUIRE_CLANG` is set, in which case a missing `clang` fails the test.
#[allow(unused)]
pub fn toolchain_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        let available = Command::new("clang")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success());
        if !available {
            assert!(
                std::env::var_os("SLANG_REQUIRE_CLANG").is_none(),
                "SLANG_REQUIRE_CLANG is set but clang was not found"
            );
            eprintln!("clang not found, skipping native tests");
        }
        available
    })
}

#[allow(unused)]
pub fn compile_program(
    source: &str,
    name: &str,
    optlevel: OptLevel,
) -> Result<CompileResult, Box<dyn std::error::Error>> {
    let program = parse_program(source)?;

    let test_dir = tempfile::tempdir()?;
    let output_file = test_dir.path().join(name);
    let output_file = if cfg!(target_os = "windows") {
        output_file.with_extension("exe")
    } else {
        output_file
    };

    let mut session = Session::new(output_file);
    session.optlevel = optlevel;

    let module = codegen::compile(&session, &program)?;
    let binary_file = ClangToolchain::default().build(&session, &module)?;

    Ok(CompileResult {
        folder: test_dir,
        binary_file,
    })
}

#[allow(unused)]
pub fn run_program(program: &Path) -> Result<Output, std::io::Error> {
    Command::new(program)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?
        .wait_with_output()
}

/// Exit code, stdout and stderr of the compiled program.
#[allow(unused)]
#[track_caller]
pub fn compile_and_run(source: &str, name: &str, optlevel: OptLevel) -> (i32, String, String) {
    let result = compile_program(source, name, optlevel).expect("failed to compile");

    let output = run_program(&result.binary_file).expect("failed to run");

    (
        output.status.code().unwrap(),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

/// Everything the interpreter printed, and how the run ended.
#[allow(unused)]
#[track_caller]
pub fn interpret(source: &str) -> (String, Result<(), SlangError>) {
    let program = parse_program(source).expect("failed to parse");
    let mut vm = Vm::default();
    let mut out = Vec::new();
    let result = vm.run(&program, &mut out);
    (String::from_utf8(out).unwrap(), result)
}
