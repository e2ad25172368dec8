use std::process::ExitCode;

fn main() -> ExitCode {
    lawnpeak_cli::run()
}
