//! Baseline dmesg test extractor: the simplest possible error record,
//! a `kern  :` line inside a dmesg capture bracket.

use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;

use crate::error::LogspecError;

static DMESG_BRACKET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)/opt/kernelci/dmesg\.sh.*?<LAVA_TEST_RUNNER EXIT>").unwrap()
});
static KERN_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^kern\s*:\s*(?P<message>.+)$").unwrap());

#[derive(Debug, Clone)]
pub struct TestError {
    pub message: String,
    pub excerpt: String,
}

impl LogspecError for TestError {
    fn error_type(&self) -> &str {
        "test.baseline.dmesg"
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

/// Find the first `kern  :` line inside the dmesg capture bracket, if
/// any.
pub fn find_baseline_error(text: &str) -> Option<Box<dyn LogspecError + Send + Sync>> {
    let bracket = DMESG_BRACKET.find(text)?.as_str();
    let caps = KERN_LINE.captures(bracket)?;
    let message = caps["message"].trim().to_string();
    Some(Box::new(TestError {
        message: message.clone(),
        excerpt: bracket.to_string(),
    }))
}
