use std::io::{IsTerminal, Write};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Line-oriented questions on stderr, answers from stdin.
pub struct Prompter {
    lines: Lines<BufReader<Stdin>>,
}

impl Default for Prompter {
    fn default() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Prompter {
    /// `None` on EOF.
    pub async fn ask(&mut self, question: &str) -> std::io::Result<Option<String>> {
        let mut err = std::io::stderr();
        write!(err, "{question}")?;
        err.flush()?;
        let line = self.lines.next_line().await?;
        Ok(line.map(|l| l.trim_end_matches('\r').to_string()))
    }

    pub async fn ask_yes_no(&mut self, question: &str) -> std::io::Result<bool> {
        let answer = self.ask(&format!("{question} [y/N] ")).await?;
        Ok(is_yes(answer.as_deref().unwrap_or_default()))
    }

    /// Like [`Prompter::ask`] but without echo. Piped input cannot be hidden,
    /// so it is read as usual after a notice.
    pub async fn ask_hidden(&mut self, question: &str) -> std::io::Result<Option<String>> {
        if !std::io::stdin().is_terminal() {
            eprintln!("(stdin is not a terminal, input will be visible)");
            return self.ask(question).await;
        }
        let mut err = std::io::stderr();
        write!(err, "{question}")?;
        err.flush()?;
        let line = tokio::task::spawn_blocking(read_hidden_line)
            .await
            .map_err(std::io::Error::other)??;
        eprintln!();
        Ok(line)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Restores the terminal however the read ends.
struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Edit {
    Pending,
    Submit,
    Abandon,
}

fn apply_key(line: &mut String, key: &KeyEvent) -> Edit {
    if key.kind == KeyEventKind::Release {
        return Edit::Pending;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Enter => Edit::Submit,
        KeyCode::Esc => Edit::Abandon,
        KeyCode::Char('c' | 'd') if ctrl => Edit::Abandon,
        KeyCode::Backspace => {
            line.pop();
            Edit::Pending
        }
        KeyCode::Char(c) if !ctrl => {
            line.push(c);
            Edit::Pending
        }
        _ => Edit::Pending,
    }
}

fn read_hidden_line() -> std::io::Result<Option<String>> {
    enable_raw_mode()?;
    let _guard = RawModeGuard;
    let mut line = String::new();
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        match apply_key(&mut line, &key) {
            Edit::Pending => {}
            Edit::Submit => return Ok(Some(line)),
            Edit::Abandon => return Ok(None),
        }
    }
}
