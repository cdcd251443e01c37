use std::process::ExitCode;

fn main() -> ExitCode {
    slang::driver::main()
}
