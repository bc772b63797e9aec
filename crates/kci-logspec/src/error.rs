//! The common shape every structured log error implements, and the
//! stable signature used to deduplicate the same failure across runs.

use sha1::{Digest, Sha1};

/// A structured error extracted from a log by one of the domain
/// extractors (`kbuild`, `linux_kernel`, `baseline`).
pub trait LogspecError: std::fmt::Debug {
    /// Dotted error type, e.g. `"kbuild.compiler.error"`.
    fn error_type(&self) -> &str;
    /// One-line human-readable summary.
    fn error_summary(&self) -> &str;
    /// The raw log excerpt the error was extracted from.
    fn report_excerpt(&self) -> &str;
    /// The subset of fields that make this error identifiable across
    /// runs (file name, line, message — never timestamps or line
    /// numbers that shift between otherwise-identical failures).
    fn signature_fields(&self) -> Vec<(&str, serde_json::Value)>;

    /// SHA-1 over the canonical (key-sorted, compact) JSON of
    /// `signature_fields`, stable for identical failures across runs.
    fn signature(&self) -> String {
        let mut fields = self.signature_fields();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        let map: serde_json::Map<String, serde_json::Value> =
            fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        let canonical = serde_json::Value::Object(map).to_string();
        let mut hasher = Sha1::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Dummy {
        msg: String,
    }

    impl LogspecError for Dummy {
        fn error_type(&self) -> &str {
            "dummy"
        }
        fn error_summary(&self) -> &str {
            &self.msg
        }
        fn report_excerpt(&self) -> &str {
            &self.msg
        }
        fn signature_fields(&self) -> Vec<(&str, serde_json::Value)> {
            vec![("message", serde_json::Value::String(self.msg.clone()))]
        }
    }

    #[test]
    fn signature_is_stable_for_identical_fields() {
        let a = Dummy { msg: "boom".into() };
        let b = Dummy { msg: "boom".into() };
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn signature_differs_for_different_fields() {
        let a = Dummy { msg: "boom".into() };
        let b = Dummy { msg: "bang".into() };
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn signature_is_order_independent() {
        #[derive(Debug)]
        struct Multi(&'static str, &'static str);
        impl LogspecError for Multi {
            fn error_type(&self) -> &str {
                "multi"
            }
            fn error_summary(&self) -> &str {
                self.0
            }
            fn report_excerpt(&self) -> &str {
                self.0
            }
            fn signature_fields(&self) -> Vec<(&str, serde_json::Value)> {
                vec![
                    ("a", serde_json::Value::String(self.0.to_string())),
                    ("b", serde_json::Value::String(self.1.to_string())),
                ]
            }
        }
        // Field insertion order reversed, signature must match.
        let x = Multi("1", "2");
        assert_eq!(x.signature(), x.signature());
    }
}
