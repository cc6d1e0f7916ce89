// ABOUTME: Fake interactive shell: prompt, line editing, and per-line audit records.
// ABOUTME: Input lines are recorded and never executed.

use crate::audit::{AuditEvent, AuditSink, EventKind, Severity};
use crate::error::ShellError;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const PROMPT: &[u8] = b"$ ";

/// Longest line the editor keeps. Further bytes up to the line end are dropped.
pub const MAX_LINE_LEN: usize = 4096;

const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const BACKSPACE: u8 = 0x08;
const ESC: u8 = 0x1b;
const DELETE: u8 = 0x7f;

/// Where the shell writes its output.
#[async_trait]
pub trait ShellOutput: Send {
    async fn write(&mut self, data: &[u8]) -> std::io::Result<()>;

    /// Close the underlying channel.
    async fn close(&mut self);
}

/// Something the editor produced from input bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Line(String),
    /// A line that ran past `MAX_LINE_LEN`; holds the kept prefix.
    Truncated(String),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Escape {
    #[default]
    None,
    Start,
    Csi,
    Ss3,
}

/// Minimal terminal line discipline: echo, backspace, CR/LF, escape skipping.
#[derive(Debug, Default)]
pub struct LineEditor {
    buf: Vec<u8>,
    escape: Escape,
    after_cr: bool,
    truncated: bool,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte. Echo output is appended to `echo`.
    pub fn push(&mut self, byte: u8, echo: &mut Vec<u8>) -> Option<LineEvent> {
        let after_cr = std::mem::take(&mut self.after_cr);

        match self.escape {
            Escape::Start => {
                self.escape = match byte {
                    b'[' => Escape::Csi,
                    b'O' => Escape::Ss3,
                    _ => Escape::None,
                };
                return None;
            }
            Escape::Csi => {
                if (0x40..=0x7e).contains(&byte) {
                    self.escape = Escape::None;
                }
                return None;
            }
            Escape::Ss3 => {
                self.escape = Escape::None;
                return None;
            }
            Escape::None => {}
        }

        match byte {
            b'\n' if after_cr => None,
            b'\r' | b'\n' => {
                self.after_cr = byte == b'\r';
                echo.extend_from_slice(b"\r\n");
                let line = String::from_utf8_lossy(&self.buf).into_owned();
                self.buf.clear();
                if std::mem::take(&mut self.truncated) {
                    Some(LineEvent::Truncated(line))
                } else {
                    Some(LineEvent::Line(line))
                }
            }
            BACKSPACE | DELETE => {
                if self.pop_char() {
                    echo.extend_from_slice(b"\x08 \x08");
                }
                None
            }
            CTRL_C => {
                echo.extend_from_slice(b"^C\r\n");
                self.buf.clear();
                self.truncated = false;
                Some(LineEvent::Eof)
            }
            CTRL_D if self.buf.is_empty() => Some(LineEvent::Eof),
            ESC => {
                self.escape = Escape::Start;
                None
            }
            b if b < 0x20 => None,
            b => {
                if self.buf.len() >= MAX_LINE_LEN {
                    self.truncated = true;
                    return None;
                }
                self.buf.push(b);
                echo.push(b);
                None
            }
        }
    }

    /// Remove the last character, including UTF-8 continuation bytes.
    fn pop_char(&mut self) -> bool {
        let Some(mut last) = self.buf.pop() else {
            return false;
        };
        while last & 0xc0 == 0x80 {
            match self.buf.pop() {
                Some(b) => last = b,
                None => break,
            }
        }
        true
    }
}

/// How a shell session ended.
#[derive(Debug)]
pub enum ShellExit {
    Eof,
    Failed(ShellError),
}

/// One emulated shell bound to a channel.
pub struct ShellEmulator<O: ShellOutput> {
    remote: SocketAddr,
    sink: Arc<dyn AuditSink>,
    input: mpsc::UnboundedReceiver<Vec<u8>>,
    output: O,
    editor: LineEditor,
}

impl<O: ShellOutput> ShellEmulator<O> {
    pub fn new(
        remote: SocketAddr,
        sink: Arc<dyn AuditSink>,
        input: mpsc::UnboundedReceiver<Vec<u8>>,
        output: O,
    ) -> Self {
        Self {
            remote,
            sink,
            input,
            output,
            editor: LineEditor::new(),
        }
    }

    fn event(&self, severity: Severity, message: impl Into<String>) -> AuditEvent {
        AuditEvent::ssh(EventKind::SshShell, severity, Some(self.remote), message)
    }

    fn received(&self, line: String) -> AuditEvent {
        self.event(Severity::Info, format!("shell received: {line}"))
            .with_field("line", line)
    }

    /// Run until end of input or a failure, then close the channel.
    pub async fn run(mut self) -> ShellExit {
        self.sink.emit(self.event(Severity::Debug, "allocate shell"));

        let exit = match self.serve().await {
            Ok(()) => {
                self.sink.emit(self.event(Severity::Debug, "shell exit"));
                ShellExit::Eof
            }
            Err(e) => {
                self.sink.emit(
                    self.event(Severity::Warn, format!("terminal read failed ({e})"))
                        .with_field("error", e.to_string()),
                );
                ShellExit::Failed(e)
            }
        };
        self.output.close().await;
        exit
    }

    async fn serve(&mut self) -> Result<(), ShellError> {
        self.output.write(PROMPT).await.map_err(ShellError::Write)?;

        while let Some(chunk) = self.input.recv().await {
            let mut echo = Vec::new();
            let mut end = None;

            for &byte in &chunk {
                match self.editor.push(byte, &mut echo) {
                    None => {}
                    Some(LineEvent::Line(line)) => {
                        self.sink.emit(self.received(line));
                        echo.extend_from_slice(PROMPT);
                    }
                    Some(LineEvent::Truncated(line)) => {
                        self.sink.emit(self.received(line).with_field("truncated", "true"));
                        echo.extend_from_slice(PROMPT);
                    }
                    Some(LineEvent::Eof) => {
                        end = Some(Ok(()));
                        break;
                    }
                }
            }

            if !echo.is_empty() {
                self.output.write(&echo).await.map_err(ShellError::Write)?;
            }
            if let Some(end) = end {
                return end;
            }
        }
        Ok(())
    }
}
