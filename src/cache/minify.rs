//! CSS/JS minifiers.
//!
//! The asset cache only needs `minify(kind, source) -> bytes`; everything about how
//! that happens lives behind the [`Minifier`] trait.

use std::{
    io::{self, ErrorKind, Write},
    path::PathBuf,
    process::{Command, Stdio},
    thread,
    time::Instant,
};

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_minifier::{Minifier as OxcMinifier, MinifierOptions};
use oxc_parser::Parser;
use oxc_span::SourceType;
use thiserror::Error;
use tracing::{debug, warn};

use super::keys::AssetKind;

#[derive(Debug, Error)]
pub enum MinifyError {
    #[error("asset source is not valid UTF-8")]
    Encoding,
    #[error("failed to parse {kind} source: {message}")]
    Parse { kind: AssetKind, message: String },
    #[error("minifier `{program}` unavailable: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("minifier command failed (exit {exit_code:?}): {stderr}")]
    Command {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("minifier i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// A pure `source -> minified` transformation.
pub trait Minifier: Send + Sync {
    fn minify(&self, kind: AssetKind, source: &[u8]) -> Result<Vec<u8>, MinifyError>;
}

/// An external program that reads source on stdin and writes the result to stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMinifier {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandMinifier {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace separated command line such as `esbuild --minify --loader=js`.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts.map(str::to_string).collect()))
    }

    pub fn run(&self, source: &[u8]) -> Result<Vec<u8>, MinifyError> {
        let started_at = Instant::now();
        let program = self.program.display().to_string();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                warn!(
                    target = "pagestash::cache::minify",
                    op = "minify::command",
                    result = "error",
                    error_code = "spawn",
                    program = %program,
                    error = %err,
                    "Failed to spawn minifier"
                );
                MinifyError::Spawn {
                    program: program.clone(),
                    source: err,
                }
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(ErrorKind::BrokenPipe, "minifier stdin unavailable"))?;

        // stdin is fed concurrently: the child may fill stdout before reading all input.
        let (output, written) = thread::scope(|scope| {
            let writer = scope.spawn(move || {
                let result = stdin.write_all(source);
                drop(stdin);
                result
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("minifier stdin writer panicked")));
            (output, written)
        });
        let output = output?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target = "pagestash::cache::minify",
                op = "minify::command",
                result = "error",
                error_code = "exit_status",
                program = %program,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                stderr = %stderr,
                "Minifier command failed"
            );
            return Err(MinifyError::Command { exit_code, stderr });
        }

        if let Err(err) = written
            && err.kind() != ErrorKind::BrokenPipe
        {
            return Err(MinifyError::Io(err));
        }

        debug!(
            target = "pagestash::cache::minify",
            op = "minify::command",
            result = "ok",
            program = %program,
            input_bytes = source.len(),
            output_bytes = output.stdout.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Minifier command finished"
        );
        Ok(output.stdout)
    }
}

/// Default minifier: lightningcss for stylesheets, oxc for scripts. An external
/// command configured for a kind replaces the built-in one.
#[derive(Debug, Clone, Default)]
pub struct StandardMinifier {
    css_command: Option<CommandMinifier>,
    js_command: Option<CommandMinifier>,
}

impl StandardMinifier {
    pub fn new(css_command: Option<CommandMinifier>, js_command: Option<CommandMinifier>) -> Self {
        Self {
            css_command,
            js_command,
        }
    }
}

impl Minifier for StandardMinifier {
    fn minify(&self, kind: AssetKind, source: &[u8]) -> Result<Vec<u8>, MinifyError> {
        match (kind, &self.css_command, &self.js_command) {
            (AssetKind::Css, Some(command), _) => command.run(source),
            (AssetKind::Css, None, _) => minify_css(source),
            (AssetKind::Js, _, Some(command)) => command.run(source),
            (AssetKind::Js, _, None) => minify_js(source),
        }
    }
}

/// Minify a stylesheet with lightningcss.
pub fn minify_css(source: &[u8]) -> Result<Vec<u8>, MinifyError> {
    let text = std::str::from_utf8(source).map_err(|_| MinifyError::Encoding)?;
    let parse_error = |message: String| MinifyError::Parse {
        kind: AssetKind::Css,
        message,
    };

    let mut sheet = StyleSheet::parse(text, ParserOptions::default())
        .map_err(|err| parse_error(err.to_string()))?;
    sheet
        .minify(MinifyOptions::default())
        .map_err(|err| parse_error(err.to_string()))?;
    let printed = sheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|err| parse_error(err.to_string()))?;

    Ok(printed.code.into_bytes())
}

/// Minify a classic (non-module) script with oxc.
pub fn minify_js(source: &[u8]) -> Result<Vec<u8>, MinifyError> {
    let text = std::str::from_utf8(source).map_err(|_| MinifyError::Encoding)?;

    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, text, SourceType::cjs()).parse();
    if parsed.panicked || !parsed.errors.is_empty() {
        let message = parsed
            .errors
            .first()
            .map(|err| err.to_string())
            .unwrap_or_else(|| "parser aborted".to_string());
        return Err(MinifyError::Parse {
            kind: AssetKind::Js,
            message,
        });
    }

    let mut program = parsed.program;
    let _ = OxcMinifier::new(MinifierOptions::default()).build(&allocator, &mut program);
    let printed = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            ..CodegenOptions::default()
        })
        .build(&program);

    Ok(printed.code.into_bytes())
}
