//! Kbuild error extraction: classify a `make` failure by the target that
//! failed to build and pull out the most relevant compiler/linker
//! diagnostic near it.

use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;

use crate::error::LogspecError;

static MAKE_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^.*make(?:\[\d+\])?: \*\*\* \[(?P<script>[^:]+): (?P<target>[^\]]+)\] Error \d+").unwrap()
});

static COMPILER_ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?P<file>[^\s:]+):(?P<line>\d+):(?:\d+:)?\s*(?:fatal )?(?P<level>error|warning):\s*(?P<message>.+)$")
        .unwrap()
});

static LINKER_ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?P<file>[^\s:]+):\s*(?:in function[^:]*:)?\s*(?P<message>undefined reference to.+)$")
        .unwrap()
});

#[derive(Debug, Clone)]
pub struct KbuildCompilerError {
    pub script: String,
    pub target: String,
    pub src_file: String,
    pub location: Option<String>,
    pub level: String,
    pub message: String,
    pub excerpt: String,
}

impl LogspecError for KbuildCompilerError {
    fn error_type(&self) -> &str {
        match self.level.as_str() {
            "warning" => "kbuild.compiler.warning",
            _ => "kbuild.compiler.error",
        }
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
            ("error_summary", json!(self.message)),
            ("src_file", json!(self.src_file)),
            ("target", json!(self.target)),
            ("location", json!(self.location)),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct KbuildLinkerError {
    pub script: String,
    pub target: String,
    pub file: String,
    pub message: String,
    pub excerpt: String,
}

impl LogspecError for KbuildLinkerError {
    fn error_type(&self) -> &str {
        "kbuild.linker"
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
            ("file", json!(self.file)),
            ("message", json!(self.message)),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct KbuildModpostError {
    pub script: String,
    pub target: String,
    pub excerpt: String,
}

impl LogspecError for KbuildModpostError {
    fn error_type(&self) -> &str {
        "kbuild.modpost"
    }
    fn error_summary(&self) -> &str {
        "modpost failed"
    }
    fn report_excerpt(&self) -> &str {
        &self.excerpt
    }
    fn signature_fields(&self) -> Vec<(&str, Value)> {
        vec![
            ("error_type", json!(self.error_type())),
            ("target", json!(self.target)),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct KbuildProcessError {
    pub script: String,
    pub target: String,
    pub excerpt: String,
}

impl LogspecError for KbuildProcessError {
    fn error_type(&self) -> &str {
        "kbuild.process"
    }
    fn error_summary(&self) -> &str {
        "build process step failed"
    }
    fn report_excerpt(&self) -> &str {
        &self.excerpt
    }
    fn signature_fields(&self) -> Vec<(&str, Value)> {
        vec![
            ("error_type", json!(self.error_type())),
            ("target", json!(self.target)),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct KbuildGenericError {
    pub script: String,
    pub target: String,
    pub excerpt: String,
}

impl LogspecError for KbuildGenericError {
    fn error_type(&self) -> &str {
        "kbuild.generic"
    }
    fn error_summary(&self) -> &str {
        "build step failed"
    }
    fn report_excerpt(&self) -> &str {
        &self.excerpt
    }
    fn signature_fields(&self) -> Vec<(&str, Value)> {
        vec![
            ("error_type", json!(self.error_type())),
            ("script", json!(self.script)),
            ("target", json!(self.target)),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct KbuildUnknownError {
    pub excerpt: String,
}

impl LogspecError for KbuildUnknownError {
    fn error_type(&self) -> &str {
        "kbuild.unknown"
    }
    fn error_summary(&self) -> &str {
        "build failed for an unrecognized reason"
    }
    fn report_excerpt(&self) -> &str {
        &self.excerpt
    }
    fn signature_fields(&self) -> Vec<(&str, Value)> {
        vec![("error_type", json!(self.error_type()))]
    }
}

fn is_object_file(target: &str) -> bool {
    target.ends_with(".o") || target.ends_with(".s") || target.ends_with(".i")
}

fn is_other_compiler_target(text: &str, target_stem: &str) -> bool {
    let needle = format!("{target_stem}:");
    text.contains(&needle)
}

fn is_kbuild_target(target: &str) -> bool {
    matches!(target, "modules" | "Module.symvers" | "vmlinux")
}

fn target_stem(target: &str) -> &str {
    target.rsplit_once('.').map_or(target, |(stem, _)| stem)
}

fn parse_compiler_error_line(block: &str) -> Option<(String, Option<String>, String, String)> {
    let caps = COMPILER_ERROR_LINE.captures(block)?;
    let file = caps["file"].to_string();
    let location = Some(caps["line"].to_string());
    let level = caps["level"].to_string();
    let message = caps["message"].trim().to_string();
    Some((file, location, level, message))
}

fn parse_linker_error_line(block: &str) -> Option<(String, String)> {
    let caps = LINKER_ERROR_LINE.captures(block)?;
    Some((caps["file"].to_string(), caps["message"].trim().to_string()))
}

/// Find the last mention of `target_stem` in `text` and return the
/// surrounding ~20 lines as the block to search for a specific error in.
fn block_around_last_mention<'a>(text: &'a str, target_stem: &str) -> &'a str {
    let lines: Vec<&str> = text.lines().collect();
    let last_idx = lines
        .iter()
        .rposition(|line| line.contains(target_stem))
        .unwrap_or(lines.len().saturating_sub(1));
    let start = last_idx.saturating_sub(20);
    let end = lines.len();
    let slice = &lines[start..end];
    let offset: usize = lines[..start].iter().map(|l| l.len() + 1).sum();
    &text[offset..offset + slice.iter().map(|l| l.len() + 1).sum::<usize>().min(text.len() - offset)]
}

/// Scan `text` for a `make: *** [script: target] Error N` line and
/// classify the failure by what kind of target it names.
pub fn find_kbuild_error(text: &str) -> Option<Box<dyn LogspecError + Send + Sync>> {
    let caps = MAKE_ERROR.captures(text)?;
    let script = caps["script"].trim().to_string();
    let target = caps["target"].trim().to_string();
    let stem = target_stem(&target);

    if is_object_file(&target) || is_other_compiler_target(text, stem) {
        // Single-line strategy first, then block strategy.
        if let Some((src_file, location, level, message)) = parse_compiler_error_line(text) {
            return Some(Box::new(KbuildCompilerError {
                script,
                target,
                src_file,
                location,
                level,
                message: message.clone(),
                excerpt: message,
            }));
        }
        let block = block_around_last_mention(text, stem);
        if let Some((src_file, location, level, message)) = parse_compiler_error_line(block) {
            return Some(Box::new(KbuildCompilerError {
                script,
                target,
                src_file,
                location,
                level,
                message: message.clone(),
                excerpt: block.to_string(),
            }));
        }
        if let Some((file, message)) = parse_linker_error_line(block) {
            return Some(Box::new(KbuildLinkerError {
                script,
                target,
                file,
                message: message.clone(),
                excerpt: block.to_string(),
            }));
        }
        return Some(Box::new(KbuildCompilerError {
            script,
            target,
            src_file: String::new(),
            location: None,
            level: "error".to_string(),
            message: "compiler invocation failed".to_string(),
            excerpt: block.to_string(),
        }));
    }

    if script.contains("modpost") {
        return Some(Box::new(KbuildModpostError {
            script,
            target,
            excerpt: text.to_string(),
        }));
    }

    if is_kbuild_target(&target) {
        return Some(Box::new(KbuildProcessError {
            script,
            target,
            excerpt: text.to_string(),
        }));
    }

    Some(Box::new(KbuildGenericError {
        script,
        target,
        excerpt: text.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiler_error_is_classified() {
        let log = "drivers/foo/bar.c:42:1: error: implicit declaration of function 'baz'\n\
                    make[1]: *** [scripts/Makefile.build: drivers/foo/bar.o] Error 1\n";
        let err = find_kbuild_error(log).unwrap();
        assert_eq!(err.error_type(), "kbuild.compiler.error");
        assert_eq!(err.error_summary(), "implicit declaration of function 'baz'");
        assert_eq!(err.signature_fields().into_iter().find(|(k, _)| *k == "src_file").unwrap().1, json!("drivers/foo/bar.c"));
        assert_eq!(err.signature_fields().into_iter().find(|(k, _)| *k == "location").unwrap().1, json!("42"));
        let other = find_kbuild_error(log).unwrap();
        assert_eq!(err.signature(), other.signature());
    }

    #[test]
    fn modpost_error_is_classified() {
        let log = "ERROR: modpost: \"foo\" undefined!\n\
                    make: *** [scripts/Makefile.modpost: __modpost] Error 1\n";
        let err = find_kbuild_error(log).unwrap();
        assert_eq!(err.error_type(), "kbuild.modpost");
    }

    #[test]
    fn process_error_is_classified() {
        let log = "make: *** [Makefile: modules] Error 2\n";
        let err = find_kbuild_error(log).unwrap();
        assert_eq!(err.error_type(), "kbuild.process");
    }

    #[test]
    fn generic_error_is_classified() {
        let log = "make: *** [Makefile: headers_install] Error 2\n";
        let err = find_kbuild_error(log).unwrap();
        assert_eq!(err.error_type(), "kbuild.generic");
    }

    #[test]
    fn no_match_returns_none() {
        assert!(find_kbuild_error("all good, nothing to see\n").is_none());
    }

    #[test]
    fn signature_is_stable_for_same_failure() {
        let log = "make[2]: *** [scripts/Makefile.build: drivers/foo/bar.o] Error 1\n";
        let a = find_kbuild_error(log).unwrap();
        let b = find_kbuild_error(log).unwrap();
        assert_eq!(a.signature(), b.signature());
    }
}
