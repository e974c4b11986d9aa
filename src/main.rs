use std::process::ExitCode;

fn main() -> ExitCode {
    dosekeeper_lib::run()
}
