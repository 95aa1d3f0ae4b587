//! Locating and running the external JDK/apktool binaries.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, info, warn};

use crate::config::ToolchainConfig;
use crate::error::{PackError, Result};

const STDERR_TAIL_LINES: usize = 40;

const JAVA_CANDIDATE_BINS: [&str; 6] = [
    "/opt/homebrew/opt/openjdk@21/bin",
    "/opt/homebrew/opt/openjdk@17/bin",
    "/opt/homebrew/opt/openjdk/bin",
    "/usr/local/opt/openjdk@21/bin",
    "/usr/local/opt/openjdk@17/bin",
    "/usr/local/opt/openjdk/bin",
];

#[derive(Debug, Clone)]
pub struct Toolchain {
    pub java: PathBuf,
    pub apktool_jar: PathBuf,
    pub jarsigner: PathBuf,
}

#[derive(Debug, Default)]
pub struct ToolOutput {
    pub stdout: Vec<String>,
    pub stderr_tail: Vec<String>,
}

impl Toolchain {
    pub fn resolve(config: &ToolchainConfig) -> Result<Self> {
        let apktool_jar = resolve_jar(&config.apktool_jar).ok_or_else(|| {
            PackError::ToolNotFound(config.apktool_jar.display().to_string())
        })?;
        debug!(jar = %apktool_jar.display(), "Resolved apktool");

        Ok(Toolchain {
            java: config.java.clone(),
            apktool_jar,
            jarsigner: config.jarsigner.clone(),
        })
    }

    /// `java -jar <apktool> <args...>`
    pub fn apktool(&self) -> Command {
        let mut cmd = Command::new(&self.java);
        cmd.arg("-jar").arg(&self.apktool_jar);
        apply_java_env_fallbacks(&mut cmd);
        cmd
    }

    pub fn jarsigner(&self) -> Command {
        let mut cmd = Command::new(&self.jarsigner);
        apply_java_env_fallbacks(&mut cmd);
        cmd
    }
}

fn resolve_jar(configured: &Path) -> Option<PathBuf> {
    if configured.is_file() {
        return Some(configured.to_path_buf());
    }
    let file_name = configured.file_name()?;

    if let Ok(root) = std::env::var("VEIL_TOOLCHAIN_DIR") {
        let candidate = PathBuf::from(root).join(file_name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        if let Some(found) = search_ancestors(&cwd, file_name) {
            return Some(found);
        }
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(dir) = exe_path.parent() {
            if let Some(found) = search_ancestors(dir, file_name) {
                return Some(found);
            }
        }
    }

    None
}

fn search_ancestors(start: &Path, file_name: &std::ffi::OsStr) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(file_name))
        .find(|candidate| candidate.is_file())
}

/// Runs `cmd` to completion, streaming its output into the log.
pub fn run_tool(tool: &str, mut cmd: Command) -> Result<ToolOutput> {
    info!(tool, command = %describe_command(&cmd), "Running external tool");

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| PackError::Spawn {
            tool: tool.to_string(),
            source,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_tool = tool.to_string();
    let stdout_reader = thread::spawn(move || {
        let mut lines = Vec::new();
        if let Some(stdout) = stdout {
            for line in BufReader::new(stdout).lines().map_while(std::result::Result::ok) {
                debug!(tool = %stdout_tool, "{line}");
                lines.push(line);
            }
        }
        lines
    });

    let stderr_tool = tool.to_string();
    let stderr_reader = thread::spawn(move || {
        let mut tail = StderrTail::new(STDERR_TAIL_LINES);
        if let Some(stderr) = stderr {
            for line in BufReader::new(stderr).lines().map_while(std::result::Result::ok) {
                warn!(tool = %stderr_tool, "{line}");
                tail.push(line);
            }
        }
        tail.into_lines()
    });

    let status = child.wait().map_err(|source| PackError::Spawn {
        tool: tool.to_string(),
        source,
    })?;
    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr_tail = stderr_reader.join().unwrap_or_default();

    if !status.success() {
        return Err(PackError::ToolFailed {
            tool: tool.to_string(),
            code: status.code(),
            stderr_tail,
        });
    }

    Ok(ToolOutput {
        stdout,
        stderr_tail,
    })
}

/// Program and arguments only. Env overrides carry signing passwords.
fn describe_command(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

struct StderrTail {
    lines: VecDeque<String>,
    cap: usize,
}

impl StderrTail {
    fn new(cap: usize) -> Self {
        StderrTail {
            lines: VecDeque::with_capacity(cap),
            cap,
        }
    }

    fn push(&mut self, line: String) {
        if line.trim().is_empty() {
            return;
        }
        if self.lines.len() == self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

fn java_works(java_bin: &Path) -> bool {
    java_bin.is_file()
        && Command::new(java_bin)
            .arg("-version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
}

/// Puts a working Homebrew JDK first on `PATH` and points `JAVA_HOME` at a
/// usable JDK, leaving the environment alone where nothing better is found.
pub fn apply_java_env_fallbacks(cmd: &mut Command) {
    let current_path = std::env::var("PATH").unwrap_or_default();

    let preferred_java_bin = JAVA_CANDIDATE_BINS
        .iter()
        .find(|bin_dir| java_works(&Path::new(bin_dir).join("java")))
        .map(|bin_dir| bin_dir.to_string());

    let existing_dirs: Vec<&str> = JAVA_CANDIDATE_BINS
        .iter()
        .copied()
        .filter(|candidate| Path::new(candidate).is_dir())
        .collect();

    cmd.env(
        "PATH",
        merge_path_entries(&current_path, preferred_java_bin.as_deref(), &existing_dirs),
    );

    let mut java_home_to_set = std::env::var("JAVA_HOME")
        .ok()
        .filter(|home| java_works(&Path::new(home).join("bin/java")));

    if java_home_to_set.is_none() {
        java_home_to_set = preferred_java_bin
            .as_deref()
            .and_then(|preferred| Path::new(preferred).parent())
            .map(|parent| parent.to_string_lossy().to_string());
    }

    if java_home_to_set.is_none() {
        let java_home_bin = Path::new("/usr/libexec/java_home");
        if java_home_bin.exists() {
            java_home_to_set = Command::new(java_home_bin)
                .output()
                .ok()
                .filter(|output| output.status.success())
                .and_then(|output| String::from_utf8(output.stdout).ok())
                .map(|home| home.trim().to_string())
                .filter(|home| !home.is_empty());
        }
    }

    if let Some(java_home) = java_home_to_set {
        cmd.env("JAVA_HOME", java_home);
    }
}

fn merge_path_entries(current: &str, preferred: Option<&str>, extra_dirs: &[&str]) -> String {
    let mut entries: Vec<String> = current
        .split(':')
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect();

    if let Some(preferred) = preferred {
        entries.retain(|entry| entry != preferred);
        entries.insert(0, preferred.to_string());
    }

    for dir in extra_dirs {
        if !entries.iter().any(|entry| entry == dir) {
            entries.push(dir.to_string());
        }
    }

    entries.join(":")
}
