use std::process::ExitCode;

fn main() -> ExitCode {
    loanline_cli::run()
}
