use aipal::cli::run_aipal;

fn main() {
    if let Err(err) = run_aipal() {
        tracing::error!(error = %err, "aipal failed");
        std::process::exit(1);
    }
}
