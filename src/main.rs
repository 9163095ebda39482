use std::process::ExitCode;

fn main() -> ExitCode {
    // without a handler Ctrl-C falls back to the default disposition
    awx_cli::cli::watch_interrupt();
    let code = awx_cli::cli::run();
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
