use std::process::ExitCode;

fn main() -> ExitCode {
    fintrack_cli::run()
}
