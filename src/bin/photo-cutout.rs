//! photo-cutout CLI
//!
//! Removes or recolors image backgrounds and drives an external upscaler,
//! using the photo-cutout library with ONNX Runtime or Tract backends.

#[cfg(feature = "cli")]
use photo_cutout::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<std::process::ExitCode> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
