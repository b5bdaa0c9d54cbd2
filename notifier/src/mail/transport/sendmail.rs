//! Local sendmail binary, either speaking SMTP over stdio (`-bs`) or
//! reading the message from stdin (`-t`).

use std::any::Any;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;

use super::{message_id, Delivery, Driver, Transport};
use crate::mail::{Email, MailError};

pub const DEFAULT_SENDMAIL_COMMAND: &str = "/usr/sbin/sendmail -bs";

const DEFAULT_LOCAL_DOMAIN: &str = "[127.0.0.1]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendmailMode {
    /// `-bs`: an SMTP session on the child's stdin/stdout.
    Smtp,
    /// `-t`: recipients are read from the message headers.
    Pipe,
}

#[derive(Debug, Clone)]
pub struct SendmailTransport {
    program: String,
    args: Vec<String>,
    mode: SendmailMode,
    local_domain: String,
    driver: Driver,
}

impl SendmailTransport {
    /// Parse a sendmail command line. `None` uses [`DEFAULT_SENDMAIL_COMMAND`].
    pub fn new(command: Option<&str>) -> Result<Self, MailError> {
        let command = command
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_SENDMAIL_COMMAND);

        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| MailError::InvalidConfig("email.sendmail: empty command".into()))?;
        let args: Vec<String> = parts.collect();

        let mode = if args.iter().any(|a| a == "-bs") {
            SendmailMode::Smtp
        } else if args.iter().any(|a| a == "-t") {
            SendmailMode::Pipe
        } else {
            return Err(MailError::InvalidConfig(format!(
                "email.sendmail: {command:?} must use -bs or -t"
            )));
        };

        Ok(Self {
            program,
            args,
            mode,
            local_domain: DEFAULT_LOCAL_DOMAIN.to_string(),
            driver: Driver::Sendmail,
        })
    }

    /// The `mail` driver: the default command, reported under its own name.
    pub fn mail() -> Result<Self, MailError> {
        let mut transport = Self::new(None)?;
        transport.driver = Driver::Mail;
        Ok(transport)
    }

    /// Name announced in EHLO for `-bs` sessions.
    pub fn local_domain(mut self, domain: Option<&str>) -> Self {
        if let Some(domain) = domain.filter(|d| !d.is_empty()) {
            self.local_domain = domain.to_string();
        }
        self
    }

    /// The full command line.
    pub fn command(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn mode(&self) -> SendmailMode {
        self.mode
    }

    async fn deliver_smtp(&self, from: &str, recipients: &[String], raw: &[u8]) -> Result<(), MailError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MailError::Sendmail("stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MailError::Sendmail("stdout unavailable".into()))?;

        let mut session = StdioSession::new(BufReader::new(stdout), stdin);
        let result = session.transaction(&self.local_domain, from, recipients, raw).await;
        drop(session);

        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        match result {
            Err(MailError::Sendmail(reason)) if !stderr.trim().is_empty() => {
                Err(MailError::Sendmail(format!("{reason}: {}", stderr.trim())))
            }
            Err(e) => Err(e),
            Ok(()) if !output.status.success() => Err(MailError::Sendmail(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            ))),
            Ok(()) => Ok(()),
        }
    }

    async fn deliver_pipe(&self, from: &str, raw: &[u8]) -> Result<(), MailError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        // Without -i a line holding a single dot ends the message early.
        if !self.args.iter().any(|a| a == "-i" || a == "-oi") {
            command.arg("-i");
        }
        if !self.args.iter().any(|a| a.starts_with("-f")) {
            command.arg("-f").arg(from);
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| MailError::Sendmail("stdin unavailable".into()))?;
        // sendmail -t expects local line endings.
        let body = String::from_utf8_lossy(raw).replace("\r\n", "\n");
        stdin.write_all(body.as_bytes()).await?;
        stdin.shutdown().await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(MailError::Sendmail(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for SendmailTransport {
    async fn deliver(&self, email: &Email) -> Result<Delivery, MailError> {
        // -t reads recipients from the headers, so Bcc has to survive formatting.
        let message = match self.mode {
            SendmailMode::Smtp => email.to_message()?,
            SendmailMode::Pipe => email.to_message_with_bcc()?,
        };
        let envelope = message.envelope();
        let from = envelope
            .from()
            .map(ToString::to_string)
            .ok_or_else(|| MailError::Build("from address required".into()))?;
        let recipients: Vec<String> = envelope.to().iter().map(ToString::to_string).collect();
        let raw = message.formatted();

        match self.mode {
            SendmailMode::Smtp => self.deliver_smtp(&from, &recipients, &raw).await?,
            SendmailMode::Pipe => self.deliver_pipe(&from, &raw).await?,
        }

        tracing::debug!(command = %self.command(), recipients = recipients.len(), "sendmail delivery accepted");
        Ok(Delivery::new(message_id(&message)))
    }

    fn driver(&self) -> Driver {
        self.driver
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Client side of an SMTP dialogue over a pair of byte streams.
struct StdioSession<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> StdioSession<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    async fn transaction(
        &mut self,
        local_domain: &str,
        from: &str,
        recipients: &[String],
        raw: &[u8],
    ) -> Result<(), MailError> {
        self.expect(&[220]).await?;
        self.command(&format!("EHLO {local_domain}"), &[250]).await?;
        self.command(&format!("MAIL FROM:<{from}>"), &[250]).await?;
        for rcpt in recipients {
            self.command(&format!("RCPT TO:<{rcpt}>"), &[250, 251, 252]).await?;
        }
        self.command("DATA", &[354]).await?;
        self.data(raw).await?;
        self.command("QUIT", &[221]).await?;
        Ok(())
    }

    async fn command(&mut self, line: &str, expected: &[u16]) -> Result<String, MailError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        self.expect(expected).await
    }

    /// Write the message body with dot-stuffing and the terminating `.` line.
    async fn data(&mut self, raw: &[u8]) -> Result<String, MailError> {
        let text = String::from_utf8_lossy(raw);
        let text = text.strip_suffix("\r\n").unwrap_or(&text);
        for line in text.split("\r\n") {
            if line.starts_with('.') {
                self.writer.write_all(b".").await?;
            }
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\r\n").await?;
        }
        self.writer.write_all(b".\r\n").await?;
        self.writer.flush().await?;
        self.expect(&[250]).await
    }

    /// Read one (possibly multi-line) reply and check its code.
    async fn expect(&mut self, expected: &[u16]) -> Result<String, MailError> {
        let mut reply = String::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(MailError::Sendmail("unexpected end of sendmail output".into()));
            }
            let line = line.trim_end();
            reply.push_str(line);
            reply.push('\n');

            if line.len() < 4 || line.as_bytes()[3] == b' ' {
                let code: u16 = line
                    .get(..3)
                    .and_then(|c| c.parse().ok())
                    .ok_or_else(|| MailError::Sendmail(format!("malformed reply {line:?}")))?;
                if !expected.contains(&code) {
                    return Err(MailError::Sendmail(format!(
                        "expected {expected:?}, got {}",
                        reply.trim_end()
                    )));
                }
                return Ok(reply);
            }
        }
    }
}
