use nu_ansi_term::Color;

use crate::runner::Outcome;

/// Output format for script outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Text,
    Json,
}

/// Renders one outcome per script, as a coloured line or a JSON object
pub struct Reporter {
    format: Format,
    use_colors: bool,
    width: usize,
}

impl Reporter {
    pub fn new(format: Format) -> Self {
        // Detect if we're in a TTY for color support
        let use_colors = atty::is(atty::Stream::Stdout)
            && std::env::var("NO_COLOR").is_err()
            && std::env::var("SHPROBE_NO_COLOR").is_err();

        // Rules are sized to the terminal, capped so logs stay readable
        let width = terminal_size::terminal_size()
            .map(|(w, _)| w.0 as usize)
            .unwrap_or(72)
            .clamp(20, 100);

        Self {
            format,
            use_colors,
            width,
        }
    }

    pub fn with_colors(mut self, enabled: bool) -> Self {
        self.use_colors = enabled;
        self
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width.max(20);
        self
    }

    pub fn render(&self, outcome: &Outcome) -> String {
        match self.format {
            Format::Json => outcome.to_json(),
            Format::Text => self.render_text(outcome),
        }
    }

    fn paint(&self, color: Color, text: &str) -> String {
        if self.use_colors {
            color.bold().paint(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn render_text(&self, outcome: &Outcome) -> String {
        let seconds = outcome.elapsed_ms as f64 / 1000.0;
        let status = if outcome.passed {
            self.paint(Color::Green, "PASS")
        } else {
            self.paint(Color::Red, "FAIL")
        };
        let mut out = format!("{status} {} ({seconds:.2}s)", outcome.script);

        let Some(failure) = &outcome.failure else {
            return out;
        };

        out.push_str(&format!(
            "\n  {}: {}",
            self.paint(Color::Yellow, &failure.error_code),
            failure.message
        ));
        if let Some(expected) = &failure.expected {
            out.push_str(&format!("\n  expected: {expected}"));
        }
        if let Some(observed) = &failure.observed {
            out.push_str(&format!("\n  {}", self.rule(" observed ")));
            // Control characters are escaped so a stray \r cannot hide a line
            for line in observed.split('\n') {
                out.push_str(&format!("\n  | {}", line.escape_debug()));
            }
            out.push_str(&format!("\n  {}", self.rule("")));
        }
        out
    }

    fn rule(&self, title: &str) -> String {
        let len = self.width.saturating_sub(2 + title.len());
        let left = len / 2;
        let line = format!("{}{}{}", "-".repeat(left), title, "-".repeat(len - left));
        if self.use_colors {
            Color::DarkGray.paint(line).to_string()
        } else {
            line
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use std::time::Duration;

    fn reporter() -> Reporter {
        Reporter::new(Format::Text).with_colors(false).with_width(40)
    }

    #[test]
    fn test_pass_line() {
        let outcome = Outcome::new("cd", Ok(()), Duration::from_millis(840));
        assert_eq!(reporter().render(&outcome), "PASS cd (0.84s)");
    }

    #[test]
    fn test_failure_shows_expected_and_observed() {
        let err = anyhow::Error::from(HarnessError::MatchTimeout {
            expected: "literal \"exit\\r\\n\"".into(),
            observed: "exit\r\nlogout\r\n".into(),
            elapsed: Duration::from_secs(5),
        });
        let outcome = Outcome::new("history", Err(err), Duration::from_secs(5));
        let text = reporter().render(&outcome);

        assert!(text.starts_with("FAIL history (5.00s)"));
        assert!(text.contains("MATCH_TIMEOUT: timed out after"));
        assert!(text.contains("expected: literal \"exit\\r\\n\""));
        assert!(text.contains("  | exit\\r"));
        assert!(text.contains("  | logout\\r"));
        assert!(text.contains("observed"));
    }

    #[test]
    fn test_rule_width() {
        let rule = reporter().rule("");
        assert_eq!(rule.len(), 38);
        assert!(rule.chars().all(|c| c == '-'));
    }

    #[test]
    fn test_json_format() {
        let outcome = Outcome::new("cd", Ok(()), Duration::ZERO);
        let json = Reporter::new(Format::Json).render(&outcome);
        assert!(json.starts_with('{'));
        assert!(json.contains("\"script\":\"cd\""));
    }
}
