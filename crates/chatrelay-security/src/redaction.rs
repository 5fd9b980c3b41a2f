use tracing_subscriber::fmt::MakeWriter;

/// A writer that redacts API keys and bearer credentials from log output.
pub struct RedactingWriter<W> {
    inner: W,
}

impl RedactingWriter<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self {
            inner: std::io::stderr(),
        }
    }
}

impl<W: std::io::Write> std::io::Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let original = String::from_utf8_lossy(buf);
        let redacted = redact_secrets(&original);
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> MakeWriter<'a> for RedactingWriter<std::io::Stderr> {
    type Writer = RedactingWriter<std::io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: std::io::stderr(),
        }
    }
}

/// Replace known credential patterns with `[REDACTED]`.
pub fn redact_secrets(input: &str) -> String {
    static PATTERNS: std::sync::LazyLock<Option<regex::Regex>> = std::sync::LazyLock::new(|| {
        regex::Regex::new(
            r"(?xi)
              sk-[A-Za-z0-9_\-]{20,}          # OpenAI-style keys
            | tvly-[A-Za-z0-9_\-]{10,}        # search API keys
            | bearer\s+[A-Za-z0-9_\-\.=+/]{8,}  # Authorization header values
            ",
        )
        .ok()
    });

    match PATTERNS.as_ref() {
        Some(patterns) => patterns.replace_all(input, "[REDACTED]").into_owned(),
        None => input.to_string(),
    }
}
