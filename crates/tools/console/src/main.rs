//! Script console - line-oriented host for the script session core

use clap::Parser;
use script_host::mlua;
use script_host::{EngineConfig, ScriptEngine};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Run Lua snippets against one persistent session
#[derive(Parser)]
#[command(name = "script-console")]
#[command(about = "Run Lua snippets against one persistent session", long_about = None)]
struct Cli {
    /// KDL config file with an `engine` node
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Script files executed in order before reading stdin
    files: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    let transcript = Arc::new(Transcript::new(io::stdout()));
    let sink = transcript.clone();
    let engine = ScriptEngine::with_config(move |text| sink.write(text), config)?;
    if !engine.is_output_redirected() {
        warn!("Script output is not redirected; some output may be lost");
    }

    for path in &cli.files {
        match std::fs::read_to_string(path) {
            Ok(source) => {
                info!("Running {}", path.display());
                engine.execute(&source);
                transcript.end_line();
            }
            Err(e) => eprintln!("{}: {}", path.display(), e),
        }
    }

    let stdin = io::stdin();
    if cli.files.is_empty() || stdin.is_terminal() {
        repl(&engine, stdin.lock(), &*transcript, stdin.is_terminal())?;
    }

    Ok(())
}

/// Everything the console shows: script messages, prompts and command output
struct Transcript<W: Write> {
    out: Mutex<W>,
    /// Last write did not finish its line
    line_open: AtomicBool,
}

impl<W: Write> Transcript<W> {
    fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            line_open: AtomicBool::new(false),
        }
    }

    /// Write script or command output verbatim
    fn write(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.emit(text);
        self.line_open.store(!text.ends_with('\n'), Ordering::SeqCst);
    }

    /// Terminate a line left open by the last write, so prompts start fresh
    fn end_line(&self) {
        if self.line_open.swap(false, Ordering::SeqCst) {
            self.emit("\n");
        }
    }

    fn prompt(&self, prompt: &str) {
        self.end_line();
        self.emit(prompt);
    }

    fn emit(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        // A closed stdout leaves nowhere to report to
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

/// Read snippets line by line, holding incomplete statements until they close
fn repl<W: Write>(
    engine: &ScriptEngine,
    mut input: impl BufRead,
    transcript: &Transcript<W>,
    interactive: bool,
) -> anyhow::Result<()> {
    let mut pending = String::new();
    let mut line = String::new();

    loop {
        if interactive {
            transcript.prompt(if pending.is_empty() { "> " } else { ">> " });
        }

        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }

        if pending.is_empty() {
            match line.trim() {
                ":quit" => break,
                ":vars" => {
                    transcript.write(&format!("{}\n", engine.scope().names()?.join(" ")));
                    continue;
                }
                _ => {}
            }
        }

        pending.push_str(&line);
        if is_incomplete(engine, &pending) {
            continue;
        }

        engine.execute(&pending);
        transcript.end_line();
        pending.clear();
    }

    // Leftover input still gets its syntax error reported
    if !pending.is_empty() {
        engine.execute(&pending);
        transcript.end_line();
    }
    Ok(())
}

/// Whether the text so far stops in the middle of a statement
fn is_incomplete(engine: &ScriptEngine, source: &str) -> bool {
    matches!(
        engine.lua().load(source).into_function(),
        Err(mlua::Error::SyntaxError {
            incomplete_input: true,
            ..
        })
    )
}
