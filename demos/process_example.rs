//! Example demonstrating the non-blocking process API.
//!
//! This example shows how to:
//! - Run a process and check its exit code
//! - Capture process output
//! - Talk to a child through its pipes with `communicate`

use maniac_subprocess::{Command, ProcessResult, Redirect};
use std::error::Error;

async fn run_examples() -> ProcessResult<()> {
    // Example 1: Simple process with inherited stdio
    println!("=== Example 1: Run 'echo' command ===");
    let status = Command::new("echo")
        .arg("Hello from maniac-subprocess!")
        .status()
        .await?;
    println!("Exit status: {}", status);

    // Example 2: Capture output
    println!("\n=== Example 2: Capture output ===");
    let stdout = Command::new("echo")
        .arg("Captured output!")
        .capture_output()
        .await?;
    println!("stdout: {}", String::from_utf8_lossy(&stdout));

    // Example 3: Check exit code
    println!("\n=== Example 3: Exit code ===");
    let status = Command::new("sh").args(["-c", "exit 42"]).status().await?;
    println!("Exit code: {}", status.returncode());

    // Example 4: Feed stdin while draining stdout and stderr
    println!("\n=== Example 4: communicate ===");
    let mut child = Command::new("sh")
        .stdin(Redirect::Pipe)
        .stdout(Redirect::Pipe)
        .stderr(Redirect::Pipe)
        .spawn()?;
    let (stdout, stderr) = child
        .communicate(Some(b"echo to stdout\necho to stderr >&2\nexit 3\n"))
        .await?;
    println!("stdout: {}", String::from_utf8_lossy(&stdout.unwrap_or_default()));
    println!("stderr: {}", String::from_utf8_lossy(&stderr.unwrap_or_default()));
    println!("Exit code: {:?}", child.returncode().map(|s| s.returncode()));

    println!("\n=== All examples completed! ===");
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    if let Err(e) = runtime.block_on(run_examples()) {
        eprintln!("Error: {}", e);
    }
    Ok(())
}
