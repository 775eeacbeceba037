use anyhow::{bail, Context, Result};
use clap::Parser;
use std::process::Command;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Compile the kernel probe crate for the BPF target
    BuildEbpf {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
    },
}

fn main() -> Result<()> {
    match Args::parse().command {
        Cmd::BuildEbpf { target } => build_ebpf(&target),
    }
}

fn build_ebpf(target: &str) -> Result<()> {
    // The probe crate is built release-only: debug codegen drags in core
    // formatting paths that bpf-linker rejects, and release LTO strips them.
    let status = Command::new("cargo")
        .args([
            "+nightly",
            "build",
            "--package",
            "memstacks-ebpf",
            "--target",
            target,
            "-Z",
            "build-std=core",
            "--release",
        ])
        .status()
        .context("Failed to run cargo for the probe crate")?;

    if !status.success() {
        bail!("Probe build failed");
    }

    println!("probe object: target/{target}/release/memstacks-ebpf");
    Ok(())
}
