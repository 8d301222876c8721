//! Harness configuration from ~/.shproberc and the environment
//!
//! The rc file uses shell assignment syntax:
//! - SHPROBE_PROMPT (regex matched by expect_prompt)
//! - SHPROBE_TIMEOUT, SHPROBE_STARTUP_TIMEOUT, SHPROBE_SETTLE_TIMEOUT,
//!   SHPROBE_KILL_GRACE (seconds, fractions allowed)
//! - SHPROBE_STRIP_ESCAPES (true/false)
//! - SHPROBE_ROWS, SHPROBE_COLS
//! - SHPROBE_WORKDIR
//! - SHPROBE_ENV_<NAME>="value" (passed to the shell as NAME)
//!
//! The same keys are read from the process environment, which wins over
//! the file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pty::SpawnOptions;
use crate::retry::Settle;

/// Matches the usual `$ `, `# `, `% ` and `> ` prompt endings.
pub const DEFAULT_PROMPT: &str = r"[^\r\n]*[$#%>] ";

const ENV_PREFIX: &str = "SHPROBE_ENV_";

/// Everything needed to spawn and drive one shell.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Shell under test
    pub program: String,
    pub args: Vec<String>,
    /// Regex that `expect_prompt` waits for
    pub prompt: String,
    /// Per-expectation timeout
    pub timeout: Duration,
    /// Timeout for the first prompt after spawn
    pub startup_timeout: Duration,
    /// Longest wait for a process state to settle
    pub settle_timeout: Duration,
    pub kill_grace: Duration,
    pub strip_escapes: bool,
    pub rows: u16,
    pub cols: u16,
    pub working_dir: Option<PathBuf>,
    /// Extra environment for the shell
    pub env: Vec<(String, String)>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            prompt: DEFAULT_PROMPT.to_string(),
            timeout: Duration::from_secs(5),
            startup_timeout: Duration::from_secs(10),
            settle_timeout: Duration::from_secs(2),
            kill_grace: Duration::from_millis(250),
            strip_escapes: true,
            rows: 24,
            cols: 80,
            working_dir: None,
            env: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Defaults for running `program` with `args`.
    pub fn for_shell(program: impl Into<String>, args: &[String]) -> Self {
        Self {
            program: program.into(),
            args: args.to_vec(),
            ..Self::default()
        }
    }

    /// Parse configuration from ~/.shproberc, falling back to defaults
    pub fn from_rc() -> Self {
        Self::from_file(&Self::rc_path()).unwrap_or_default()
    }

    /// Get the path to .shproberc
    pub fn rc_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".shproberc")
    }

    /// Parse configuration from a specific file
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Parse configuration from content string
    pub fn parse(content: &str) -> Self {
        let mut config = Self::default();
        config.apply_rc(content);
        config
    }

    /// Apply the assignments in `content` on top of the current values.
    pub fn apply_rc(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line = line.strip_prefix("export ").unwrap_or(line);

            if let Some((key, value)) = parse_assignment(line) {
                self.set(&key, unquote(&value));
            }
        }
    }

    /// Apply `SHPROBE_*` variables, typically from `std::env::vars()`.
    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if key.starts_with("SHPROBE_") {
                self.set(&key, value);
            }
        }
    }

    /// Set one key. Returns false for unknown keys and unusable values.
    pub fn set(&mut self, key: &str, value: String) -> bool {
        let applied = match key {
            "SHPROBE_PROMPT" => {
                // A prompt that can match nothing would never synchronize
                if regex::bytes::Regex::new(&value).is_ok_and(|re| !re.is_match(b"")) {
                    self.prompt = value.clone();
                    true
                } else {
                    false
                }
            }
            "SHPROBE_TIMEOUT" => parse_seconds(&value).map(|d| self.timeout = d).is_some(),
            "SHPROBE_STARTUP_TIMEOUT" => parse_seconds(&value).map(|d| self.startup_timeout = d).is_some(),
            "SHPROBE_SETTLE_TIMEOUT" => parse_seconds(&value).map(|d| self.settle_timeout = d).is_some(),
            "SHPROBE_KILL_GRACE" => parse_seconds(&value).map(|d| self.kill_grace = d).is_some(),
            "SHPROBE_STRIP_ESCAPES" => parse_bool(&value).map(|b| self.strip_escapes = b).is_some(),
            "SHPROBE_ROWS" => parse_dimension(&value).map(|n| self.rows = n).is_some(),
            "SHPROBE_COLS" => parse_dimension(&value).map(|n| self.cols = n).is_some(),
            "SHPROBE_WORKDIR" => {
                self.working_dir = (!value.is_empty()).then(|| PathBuf::from(&value));
                true
            }
            _ if key.starts_with(ENV_PREFIX) && key.len() > ENV_PREFIX.len() => {
                let name = &key[ENV_PREFIX.len()..];
                self.set_env(name, &value);
                true
            }
            // Unrelated keys (SHPROBE_LOG and friends) are not ours
            _ => return false,
        };
        if !applied {
            tracing::warn!(key, value = %value, "ignoring invalid configuration value");
        }
        applied
    }

    /// Add or replace a variable in the shell's environment.
    pub fn set_env(&mut self, name: &str, value: &str) {
        self.env.retain(|(k, _)| k != name);
        self.env.push((name.to_string(), value.to_string()));
    }

    /// Environment value the shell will see for `name`, if overridden.
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn spawn_options(&self) -> SpawnOptions {
        SpawnOptions {
            program: self.program.clone(),
            args: self.args.clone(),
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
            rows: self.rows,
            cols: self.cols,
            strip_escapes: self.strip_escapes,
            kill_grace: self.kill_grace,
            ..SpawnOptions::default()
        }
    }

    pub fn settle(&self) -> Settle {
        Settle::new(self.settle_timeout)
    }
}

/// Parse a shell variable assignment (KEY=value or KEY="value")
fn parse_assignment(line: &str) -> Option<(String, String)> {
    let eq_pos = line.find('=')?;
    let key = line[..eq_pos].trim().to_string();
    let value = line[eq_pos + 1..].trim().to_string();

    // Validate key is a valid identifier
    if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }

    Some((key, value))
}

/// Remove surrounding quotes from a value
fn unquote(s: &str) -> String {
    let s = s.trim();

    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        return s[1..s.len() - 1].to_string();
    }

    s.to_string()
}

/// Seconds, fractions allowed: "5", "0.25".
pub fn parse_seconds(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<f64>().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_dimension(value: &str) -> Option<u16> {
    value.trim().parse::<u16>().ok().filter(|&n| n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        let config = HarnessConfig::parse("");
        assert_eq!(config.prompt, DEFAULT_PROMPT);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(config.strip_escapes);
        assert!(config.env.is_empty());
    }

    #[test]
    fn test_parse_rc() {
        let content = r#"
# cush settings
SHPROBE_PROMPT="cush> "
export SHPROBE_TIMEOUT=2.5
SHPROBE_STRIP_ESCAPES=off
SHPROBE_ROWS=40
SHPROBE_COLS='132'
SHPROBE_ENV_TERM="dumb"
SHPROBE_WORKDIR=/tmp
"#;
        let config = HarnessConfig::parse(content);

        assert_eq!(config.prompt, "cush> ");
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert!(!config.strip_escapes);
        assert_eq!((config.rows, config.cols), (40, 132));
        assert_eq!(config.env_value("TERM"), Some("dumb"));
        assert_eq!(config.working_dir, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let content = r#"
SHPROBE_TIMEOUT=soon
SHPROBE_ROWS=0
SHPROBE_PROMPT="(unclosed"
SHPROBE_KILL_GRACE=-1
"#;
        let config = HarnessConfig::parse(content);
        let defaults = HarnessConfig::default();
        assert_eq!(config.timeout, defaults.timeout);
        assert_eq!(config.rows, defaults.rows);
        assert_eq!(config.prompt, defaults.prompt);
        assert_eq!(config.kill_grace, defaults.kill_grace);
    }

    #[test]
    fn test_prompt_matching_nothing_is_rejected() {
        let mut config = HarnessConfig::default();
        assert!(!config.set("SHPROBE_PROMPT", String::new()));
        assert!(!config.set("SHPROBE_PROMPT", "(> )?".to_string()));
        assert_eq!(config.prompt, DEFAULT_PROMPT);
        assert!(config.set("SHPROBE_PROMPT", "cush> ".to_string()));
        assert_eq!(config.prompt, "cush> ");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = HarnessConfig::parse("SHPROBE_TIMEOUT=3\nSHPROBE_ENV_PS1=\"a$ \"");
        config.apply_env(vec![
            ("SHPROBE_TIMEOUT".to_string(), "7".to_string()),
            ("SHPROBE_ENV_PS1".to_string(), "b$ ".to_string()),
            ("SHPROBE_LOG".to_string(), "debug".to_string()),
            ("HOME".to_string(), "/nowhere".to_string()),
        ]);
        assert_eq!(config.timeout, Duration::from_secs(7));
        assert_eq!(config.env_value("PS1"), Some("b$ "));
        assert_eq!(config.env.len(), 1);
        assert_eq!(config.env_value("HOME"), None);
    }

    #[test]
    fn test_spawn_options_carry_settings() {
        let mut config = HarnessConfig::for_shell("/bin/sh", &["-i".to_string()]);
        config.set_env("PS1", "test> ");
        config.kill_grace = Duration::from_millis(100);
        let opts = config.spawn_options();
        assert_eq!(opts.program, "/bin/sh");
        assert_eq!(opts.args, vec!["-i"]);
        assert_eq!(opts.env, vec![("PS1".to_string(), "test> ".to_string())]);
        assert_eq!(opts.kill_grace, Duration::from_millis(100));
        assert_eq!(opts.line_terminator, "\n");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".shproberc");
        fs::write(&path, "export SHPROBE_SETTLE_TIMEOUT=0.5\nSHPROBE_KILL_GRACE=1\n").unwrap();

        let config = HarnessConfig::from_file(&path).unwrap();
        assert_eq!(config.settle_timeout, Duration::from_millis(500));
        assert_eq!(config.kill_grace, Duration::from_secs(1));

        assert!(HarnessConfig::from_file(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"hello\""), "hello");
        assert_eq!(unquote("'hello'"), "hello");
        assert_eq!(unquote("hello"), "hello");
        assert_eq!(unquote("  \"hello\"  "), "hello");
        assert_eq!(unquote("\""), "\"");
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_seconds("0.25"), Some(Duration::from_millis(250)));
        assert_eq!(parse_seconds("nan"), None);
        assert_eq!(parse_seconds("-2"), None);
    }
}
