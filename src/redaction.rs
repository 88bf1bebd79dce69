use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;
use std::io::Write;

lazy_static! {
    static ref REDACTION_REGEX: Regex = Regex::new(
        r"(?i)(token=)[^&\s]+|(Bearer\s+)[^\s]+|(authorization:\s*(?:Bearer\s+)?)[^\s]+"
    )
    .expect("Invalid redaction regex");
}

/// Masks credentials in free text: `token=` query values and bearer/authorization headers.
pub fn redact(input: &str) -> Cow<'_, str> {
    REDACTION_REGEX.replace_all(input, |caps: &regex::Captures| {
        let prefix = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map_or("", |m| m.as_str());
        format!("{}[REDACTED]", prefix)
    })
}

pub struct RedactingWriter<W: Write> {
    inner: W,
}

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let input = String::from_utf8_lossy(buf);
        self.inner.write_all(redact(&input).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_cable_token_and_bearer() {
        assert_eq!(
            redact("connecting to wss://api.example/cable?token=abc.def&x=1"),
            "connecting to wss://api.example/cable?token=[REDACTED]&x=1"
        );
        assert_eq!(redact("Authorization: Bearer s3cr3t"), "Authorization: Bearer [REDACTED]");
        assert_eq!(redact("no secrets here"), "no secrets here");
    }

    #[test]
    fn test_writer_redacts_and_reports_full_length() {
        let mut out = Vec::new();
        let line = b"url=ws://h/cable?token=xyz\n";
        let written = RedactingWriter::new(&mut out).write(line).unwrap();
        assert_eq!(written, line.len());
        assert_eq!(String::from_utf8(out).unwrap(), "url=ws://h/cable?token=[REDACTED]\n");
    }
}
