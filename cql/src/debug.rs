use std::fmt::{self, Debug};

const MAX_TRACE_BYTES: usize = 256;

/// Renders a frame body the way `log::trace!` wants to see wire traffic:
/// printable ASCII inline, everything else hex-escaped. Truncated so a large
/// `ROWS` payload doesn't flood the log at trace level.
pub struct DebugBytesRef<'a>(pub &'a [u8]);

impl Debug for DebugBytesRef<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let shown = &self.0[..self.0.len().min(MAX_TRACE_BYTES)];
    write!(f, "b\"")?;
    for &b in shown {
      match b {
        b'\n' => write!(f, "\\n")?,
        b'\r' => write!(f, "\\r")?,
        b'\t' => write!(f, "\\t")?,
        b'\\' | b'"' => write!(f, "\\{}", b as char)?,
        0x00 => write!(f, "\\0")?,
        0x20..=0x7e => write!(f, "{}", b as char)?,
        _ => write!(f, "\\x{b:02x}")?,
      }
    }
    write!(f, "\"")?;
    if self.0.len() > MAX_TRACE_BYTES {
      write!(f, "...({} bytes total)", self.0.len())?;
    }
    Ok(())
  }
}
