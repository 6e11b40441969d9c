use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(error) = chronoscan::run().await {
        eprintln!("chronoscan: {error}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
