use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Builder for `KEY=VALUE` environment files handed to `exec --env-file`.
///
/// Invariants:
/// - Keys are non-empty ASCII alnum/underscore and do not start with a digit.
/// - Values must not contain `\n`, `\r` or `\0` (one variable per line, no quoting).
#[derive(Debug, Default, Clone)]
pub struct EnvFile {
    vars: Vec<(String, String)>,
}

impl EnvFile {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    /// Set a variable; a later set of the same key replaces the earlier value in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.vars.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.vars.push((key, value));
        }
        self
    }

    pub fn build(&self) -> io::Result<String> {
        let mut out = String::new();
        for (k, v) in &self.vars {
            let key_ok = !k.is_empty()
                && !k.as_bytes()[0].is_ascii_digit()
                && k.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
            if !key_ok {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid environment variable name '{k}'"),
                ));
            }
            if v.contains('\n') || v.contains('\r') || v.contains('\0') {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("environment variable {k} contains a newline or NUL"),
                ));
            }
            out.push_str(k);
            out.push('=');
            out.push_str(v);
            out.push('\n');
        }
        Ok(out)
    }

    /// Write to a fresh private temp file. The file is deleted when the returned handle drops,
    /// on every exit path.
    pub fn write_temp(&self, dir: Option<&Path>) -> io::Result<NamedTempFile> {
        let body = self.build()?;
        let mut builder = tempfile::Builder::new();
        builder.prefix("probox-env-").suffix(".env");
        let mut file = match dir {
            Some(d) => builder.tempfile_in(d)?,
            None => builder.tempfile()?,
        };
        file.write_all(body.as_bytes())?;
        file.flush()?;
        Ok(file)
    }
}
