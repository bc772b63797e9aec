//! Linux kernel runtime error extraction: NULL pointer dereferences,
//! kernel BUGs, kernel panics and UBSAN reports, all bracketed by a
//! kernel log timestamp tag.

use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;

use crate::error::LogspecError;

/// `[   12.345678]`-style kernel timestamp tag.
pub const LINUX_TIMESTAMP: &str = r"\[[ \d.]+\]";

static CUT_HERE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"{LINUX_TIMESTAMP} ------------\[ cut here \]------------")).unwrap()
});
static END_TRACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"{LINUX_TIMESTAMP} ---\[ end trace")).unwrap());

static NULL_DEREF_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{LINUX_TIMESTAMP} (?:Unable to handle kernel NULL pointer dereference|BUG: kernel NULL pointer dereference)"
    ))
    .unwrap()
});

static KERNEL_BUG_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{LINUX_TIMESTAMP} kernel BUG at (?P<file>\S+):(?P<line>\d+)!"
    ))
    .unwrap()
});

static KERNEL_PANIC_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"{LINUX_TIMESTAMP} Kernel panic - not syncing: (?P<message>.+)")).unwrap()
});

static UBSAN_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{LINUX_TIMESTAMP} UBSAN: (?P<kind>[\w-]+) in (?P<location>\S+)"
    ))
    .unwrap()
});

const SPECIAL_CASED_BUG_MESSAGES: [&str; 3] = [
    "sleeping function called from invalid context",
    "scheduling while atomic",
    "corrupted stack end",
];

fn block_between<'a>(text: &'a str, start: regex::Match, end: Option<&Regex>) -> &'a str {
    let rest = &text[start.start()..];
    match end.and_then(|re| re.find(rest)) {
        Some(m) => &rest[..m.end()],
        None => rest,
    }
}

#[derive(Debug, Clone)]
pub struct GenericError {
    pub excerpt: String,
}

impl LogspecError for GenericError {
    fn error_type(&self) -> &str {
        "linux.generic"
    }
    fn error_summary(&self) -> &str {
        "unhandled kernel warning/oops"
    }
    fn report_excerpt(&self) -> &str {
        &self.excerpt
    }
    fn signature_fields(&self) -> Vec<(&str, Value)> {
        vec![
            ("error_type", json!(self.error_type())),
            ("excerpt", json!(self.excerpt)),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct NullPointerDereference {
    pub excerpt: String,
}

impl LogspecError for NullPointerDereference {
    fn error_type(&self) -> &str {
        "linux.kernel.null_pointer_dereference"
    }
    fn error_summary(&self) -> &str {
        "kernel NULL pointer dereference"
    }
    fn report_excerpt(&self) -> &str {
        &self.excerpt
    }
    fn signature_fields(&self) -> Vec<(&str, Value)> {
        vec![("error_type", json!(self.error_type()))]
    }
}

#[derive(Debug, Clone)]
pub struct KernelBug {
    pub file: String,
    pub line: u32,
    pub excerpt: String,
}

impl LogspecError for KernelBug {
    fn error_type(&self) -> &str {
        "linux.kernel.bug"
    }
    fn error_summary(&self) -> &str {
        "kernel BUG"
    }
    fn report_excerpt(&self) -> &str {
        &self.excerpt
    }
    fn signature_fields(&self) -> Vec<(&str, Value)> {
        vec![
            ("error_type", json!(self.error_type())),
            ("file", json!(self.file)),
            ("line", json!(self.line)),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct KernelPanic {
    pub message: String,
    pub excerpt: String,
}

impl LogspecError for KernelPanic {
    fn error_type(&self) -> &str {
        "linux.kernel.panic"
    }
    fn error_summary(&self) -> &str {
        &self.message
    }
    fn report_excerpt(&self) -> &str {
        &self.excerpt
    }
    fn signature_fields(&self) -> Vec<(&str, Value)> {
        vec![
            ("error_type", json!(self.error_type())),
            ("message", json!(self.message)),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct UbsanError {
    pub kind: String,
    pub location: String,
    pub excerpt: String,
}

impl LogspecError for UbsanError {
    fn error_type(&self) -> &str {
        "linux.kernel.ubsan"
    }
    fn error_summary(&self) -> &str {
        &self.kind
    }
    fn report_excerpt(&self) -> &str {
        &self.excerpt
    }
    fn signature_fields(&self) -> Vec<(&str, Value)> {
        vec![
            ("error_type", json!(self.error_type())),
            ("kind", json!(self.kind)),
            ("location", json!(self.location)),
        ]
    }
}

/// Locate the most specific kernel error within `text`, recursing into
/// a "cut here" generic block to look for a more specific match before
/// returning the generic record.
pub fn find_kernel_error(text: &str) -> Option<Box<dyn LogspecError + Send + Sync>> {
    if let Some(m) = NULL_DEREF_START.find(text) {
        let excerpt = block_between(text, m, Some(&END_TRACE)).to_string();
        return Some(Box::new(NullPointerDereference { excerpt }));
    }
    if let Some(caps) = KERNEL_BUG_START.captures(text) {
        let m = caps.get(0).unwrap();
        let excerpt = block_between(text, m, Some(&END_TRACE)).to_string();
        return Some(Box::new(KernelBug {
            file: caps["file"].to_string(),
            line: caps["line"].parse().unwrap_or_default(),
            excerpt,
        }));
    }
    if let Some(caps) = KERNEL_PANIC_START.captures(text) {
        let m = caps.get(0).unwrap();
        // An incomplete panic report (board reset mid-dump, no further
        // output) carries no useful excerpt; skip it rather than
        // reporting a truncated "error".
        if m.end() >= text.len() {
            return None;
        }
        let excerpt = text[m.start()..].to_string();
        return Some(Box::new(KernelPanic {
            message: caps["message"].trim().to_string(),
            excerpt,
        }));
    }
    if let Some(caps) = UBSAN_START.captures(text) {
        let m = caps.get(0).unwrap();
        let excerpt = block_between(text, m, None).to_string();
        return Some(Box::new(UbsanError {
            kind: caps["kind"].to_string(),
            location: caps["location"].to_string(),
            excerpt,
        }));
    }
    if let Some(m) = CUT_HERE.find(text) {
        let block = block_between(text, m, Some(&END_TRACE));
        // Look for something more specific inside the block before
        // falling back to a generic record.
        let inner = &block[block.find('\n').map_or(0, |i| i + 1)..];
        if let Some(specific) = find_kernel_error(inner) {
            return Some(specific);
        }
        return Some(Box::new(GenericError {
            excerpt: block.to_string(),
        }));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_pointer_dereference_is_detected() {
        let log = "[   12.345678] Unable to handle kernel NULL pointer dereference at virtual address 0\n\
                    [   12.345679] ---[ end trace 0000000000000000 ]---\n";
        let err = find_kernel_error(log).unwrap();
        assert_eq!(err.error_type(), "linux.kernel.null_pointer_dereference");
    }

    #[test]
    fn kernel_bug_captures_file_and_line() {
        let log = "[   12.0] kernel BUG at mm/slub.c:123!\n[   12.1] ---[ end trace 1 ]---\n";
        let err = find_kernel_error(log).unwrap();
        assert_eq!(err.error_type(), "linux.kernel.bug");
    }

    #[test]
    fn incomplete_panic_report_is_ignored() {
        let log = "[   12.0] Kernel panic - not syncing: VFS: Unable to mount root fs";
        assert!(find_kernel_error(log).is_none());
    }

    #[test]
    fn complete_panic_report_is_detected() {
        let log = "[   12.0] Kernel panic - not syncing: VFS: Unable to mount root fs\n\
                    [   12.1] CPU: 0 PID: 1 Comm: swapper\n";
        let err = find_kernel_error(log).unwrap();
        assert_eq!(err.error_type(), "linux.kernel.panic");
        assert_eq!(err.error_summary(), "VFS: Unable to mount root fs");
        let other = find_kernel_error(log).unwrap();
        assert_eq!(err.signature(), other.signature());
    }

    #[test]
    fn ubsan_error_is_detected() {
        let log = "[   12.0] UBSAN: array-index-out-of-bounds in drivers/foo.c:1:1\n";
        let err = find_kernel_error(log).unwrap();
        assert_eq!(err.error_type(), "linux.kernel.ubsan");
    }

    #[test]
    fn generic_cut_here_falls_back_when_nothing_specific_found() {
        let log = "[   1.0] ------------[ cut here ]------------\n\
                    [   1.1] WARNING: something unusual happened\n\
                    [   1.2] ---[ end trace 1 ]---\n";
        let err = find_kernel_error(log).unwrap();
        assert_eq!(err.error_type(), "linux.generic");
    }
}
