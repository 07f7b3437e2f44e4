#[cfg_attr(not(feature = "llama"), allow(dead_code))]
mod app;
mod cli;
#[cfg_attr(not(feature = "llama"), allow(dead_code))]
mod warmup;

use std::process::ExitCode;

#[cfg(feature = "llama")]
fn main() -> ExitCode {
    app::run::<nox_llama::LlamaBackend>(nox_llama::supports_mlock)
}

#[cfg(not(feature = "llama"))]
fn main() -> ExitCode {
    // Keep `--help`/`--version` and flag validation working in hermetic
    // builds even though no model can be loaded.
    let _ = <cli::Args as clap::Parser>::parse();
    eprintln!("failed to initialize backend: built without an inference backend (rebuild with --features llama)");
    ExitCode::FAILURE
}
