//! Output truncation, ANSI stripping, and binary sanitization.
//!
//! Grounded on `original_source/reagent/tool/truncation.py`. Bounds every
//! tool output before it reaches the model (SPEC_FULL §4.5/§8 property 3);
//! oversized output is saved to a side file under `std::env::temp_dir()`
//! rather than Python's `~/.reagent/tool-output`, since this crate carries
//! no home-directory config layer (§10.3).

use std::io::Write as _;

use regex::Regex;

pub const MAX_LINES: usize = 2000;
pub const MAX_BYTES: usize = 50 * 1024;

/// Truncates `text` to at most `max_lines` lines (keeping the tail) and
/// `max_bytes` bytes, saving the full body to a side file when truncation
/// occurs and referencing it in the notice.
pub fn truncate_output(text: &str, max_lines: usize, max_bytes: usize) -> String {
    if text.is_empty() {
        return String::new();
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let byte_count = text.len();
    let needs_truncation = lines.len() > max_lines || byte_count > max_bytes;
    if !needs_truncation {
        return text.to_string();
    }

    let full_path = save_to_temp(text);

    let (kept, skipped): (Vec<&str>, usize) = if lines.len() > max_lines {
        (lines[lines.len() - max_lines..].to_vec(), lines.len() - max_lines)
    } else {
        (lines.clone(), 0)
    };

    let mut result = kept.join("\n");
    let mut skipped_bytes = 0usize;
    if result.len() > max_bytes {
        skipped_bytes = byte_count - max_bytes;
        result = truncate_at_char_boundary(&result, max_bytes);
    }

    let mut notice_parts = Vec::new();
    if skipped > 0 {
        notice_parts.push(format!("{skipped} lines skipped"));
    }
    if skipped_bytes > 0 {
        notice_parts.push(format!("{skipped_bytes} bytes skipped"));
    }
    let mut notice = format!(
        "[Output truncated: {}. Total: {} lines, {} bytes]",
        notice_parts.join(", "),
        lines.len(),
        byte_count
    );
    if let Some(path) = full_path {
        notice.push_str(&format!("\n[Full output saved to: {}]", path.display()));
    }

    format!("{notice}\n{result}")
}

fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> String {
    let mut end = max_bytes.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

fn save_to_temp(text: &str) -> Option<std::path::PathBuf> {
    let dir = std::env::temp_dir().join("cloudllm-tool-output");
    std::fs::create_dir_all(&dir).ok()?;
    let name = format!("cloudllm-{}.txt", uuid::Uuid::new_v4().simple());
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).ok()?;
    file.write_all(text.as_bytes()).ok()?;
    Some(path)
}

/// Strips ANSI escape sequences (CSI sequences) from `text`.
pub fn strip_ansi(text: &str) -> String {
    let re = Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").unwrap();
    re.replace_all(text, "").into_owned()
}

/// Removes binary garbage, keeping printable chars, tabs, newlines, and
/// carriage returns; strips C0/C1 controls and format chars.
pub fn sanitize_binary_output(text: &str) -> String {
    text.chars()
        .filter(|&ch| {
            if ch == '\t' || ch == '\n' || ch == '\r' {
                return true;
            }
            let cp = ch as u32;
            cp >= 32 && !(0x7F..0xA0).contains(&cp) && !(0xFFF9..0xFFFC).contains(&cp)
        })
        .collect()
}
