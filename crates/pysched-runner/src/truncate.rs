//! Output truncation for persisted execution records.
//!
//! Captured stdout/stderr can be arbitrarily large; the ledger stores a
//! bounded amount per record. Middle-omission keeps both the start of the
//! output (setup, first errors) and the end (final result, tracebacks),
//! which is what someone debugging a failed run actually reads.

/// Truncate `output` to at most `max_chars` characters, omitting the middle.
///
/// Input within the budget is returned unchanged. The split is done on
/// character boundaries, so multi-byte sequences are never broken.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    if output.len() <= max_chars {
        return output.to_owned();
    }

    let chars: Vec<char> = output.chars().collect();
    let total = chars.len();
    if total <= max_chars {
        // Byte length exceeded the budget but the char count fits.
        return output.to_owned();
    }

    let half = max_chars / 2;
    let head: String = chars[..half].iter().collect();
    let tail: String = chars[total - half..].iter().collect();
    let omitted = total - max_chars;

    format!("{head}\n[... {omitted} chars omitted ...]\n{tail}")
}
