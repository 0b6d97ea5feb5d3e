use anyhow::{bail, Context, Result};
use calltrace_common::{
    parse_trace_line, PROP_CONFIG_FILE, PROP_OUTPUT_FILE_PATH, PROP_TARGET_PACKAGES,
};
use clap::Parser;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Build the calltrace agent library
    BuildAgent {
        #[arg(long)]
        release: bool,
    },
    /// Run a Java program with the agent attached
    Run {
        #[arg(long)]
        class_path: String,
        /// Fully qualified main class
        #[arg(long)]
        main: String,
        /// Comma-separated target packages, e.g. com.acme,org.example
        #[arg(long)]
        targets: Option<String>,
        /// Trace output file (stdout if omitted)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Agent properties file
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        release: bool,
        /// Arguments passed to the Java program
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Check every line of a trace log against the line format
    VerifyTrace { file: PathBuf },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::BuildAgent { release } => build_agent(release)?,
        Cmd::Run { class_path, main, targets, output, config, release, args } => {
            build_agent(release)?;
            run(&class_path, &main, targets.as_deref(), output.as_deref(), config.as_deref(), release, &args)?;
        }
        Cmd::VerifyTrace { file } => verify_trace(&file)?,
    }

    Ok(())
}

fn build_agent(release: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("build").arg("--package").arg("calltrace");
    if release {
        cmd.arg("--release");
    }

    let status = cmd.status().context("Failed to build agent")?;

    if !status.success() {
        bail!("Failed to build agent");
    }

    println!("✓ Agent built successfully");
    println!("  Library: {}", agent_library(release).display());
    println!("  Profile: {}", profile(release));

    Ok(())
}

fn profile(release: bool) -> &'static str {
    if release {
        "release"
    } else {
        "debug"
    }
}

fn agent_library(release: bool) -> PathBuf {
    let file = format!("{}calltrace{}", std::env::consts::DLL_PREFIX, std::env::consts::DLL_SUFFIX);
    Path::new("target").join(profile(release)).join(file)
}

fn run(
    class_path: &str,
    main: &str,
    targets: Option<&str>,
    output: Option<&Path>,
    config: Option<&Path>,
    release: bool,
    args: &[String],
) -> Result<()> {
    let library = fs::canonicalize(agent_library(release)).context("Agent library not found")?;

    let mut cmd = Command::new("java");
    cmd.arg(format!("-agentpath:{}", library.display()));
    if let Some(targets) = targets {
        cmd.arg(format!("-D{PROP_TARGET_PACKAGES}={targets}"));
    }
    if let Some(output) = output {
        cmd.arg(format!("-D{PROP_OUTPUT_FILE_PATH}={}", output.display()));
    }
    if let Some(config) = config {
        cmd.arg(format!("-D{PROP_CONFIG_FILE}={}", config.display()));
    }
    cmd.arg("-cp").arg(class_path).arg(main).args(args);

    let status = cmd.status().context("Failed to launch java")?;
    if !status.success() {
        bail!("Java program exited with {status}");
    }
    Ok(())
}

fn verify_trace(file: &Path) -> Result<()> {
    let contents =
        fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let mut total = 0usize;
    let mut with_caller = 0usize;
    let mut per_class: BTreeMap<&str, usize> = BTreeMap::new();
    let mut malformed = Vec::new();

    for (number, line) in contents.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        match parse_trace_line(line) {
            Some(parsed) => {
                total += 1;
                if parsed.caller.is_some() {
                    with_caller += 1;
                }
                *per_class.entry(parsed.class_name).or_default() += 1;
            }
            None => malformed.push(number + 1),
        }
    }

    println!("✓ {total} trace lines, {with_caller} with caller context");
    for (class, count) in &per_class {
        println!("  {count:>8}  {class}");
    }

    if !malformed.is_empty() {
        bail!("{} malformed line(s), first at line {}", malformed.len(), malformed[0]);
    }
    Ok(())
}
