//! The check definition / request / result envelope data model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Numeric status carried by a check result. Any integer is valid; the four
/// named values are the ones the rest of the system assigns meaning to.
pub mod status {
    pub const OK: i64 = 0;
    pub const WARNING: i64 = 1;
    pub const CRITICAL: i64 = 2;
    pub const UNKNOWN: i64 = 3;
}

/// A check definition or an in-flight check request. Typed fields are the
/// ones the agent core reasons about; everything else passes through in
/// `extra` untouched, including fields the agent itself fills in during
/// execution (`executed`, `duration`, `output`, `status`, `issued`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Check {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub standalone: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,

    /// Arbitrary additional keys, e.g. `subscribers`, custom metadata.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Check {
    /// A command check has a `command`; anything else is an extension check.
    pub fn is_command_check(&self) -> bool {
        self.command.is_some()
    }

    pub fn is_standalone(&self) -> bool {
        self.standalone.unwrap_or(false)
    }

    /// `request.extension || request.name`.
    pub fn extension_name(&self) -> &str {
        self.extension.as_deref().unwrap_or(&self.name)
    }

    /// Merge `local` over `self` (local wins). Consumes `self` and returns
    /// the merged request.
    pub fn merge_local_over(mut self, local: &Check) -> Check {
        if local.command.is_some() {
            self.command = local.command.clone();
        }
        if local.extension.is_some() {
            self.extension = local.extension.clone();
        }
        if local.interval.is_some() {
            self.interval = local.interval;
        }
        if local.timeout.is_some() {
            self.timeout = local.timeout;
        }
        if local.standalone.is_some() {
            self.standalone = local.standalone;
        }
        if local.handle.is_some() {
            self.handle = local.handle;
        }
        for (k, v) in &local.extra {
            self.extra.insert(k.clone(), v.clone());
        }
        self
    }

    /// A duplicate suitable for a fresh standalone invocation: same
    /// definition, execution fields cleared, `issued` stamped.
    pub fn duplicate_for_issue(&self, issued: i64) -> Check {
        let mut dup = self.clone();
        dup.issued = Some(issued);
        dup.executed = None;
        dup.duration = None;
        dup.output = None;
        dup.status = None;
        dup
    }
}

/// The envelope published to the `results` pipe.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResultEnvelope {
    pub client: String,
    pub check: Check,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_check_has_command() {
        let c = Check {
            name: "chk1".into(),
            command: Some("echo hi".into()),
            ..Default::default()
        };
        assert!(c.is_command_check());
    }

    #[test]
    fn extension_check_has_no_command() {
        let c = Check {
            name: "chk1".into(),
            ..Default::default()
        };
        assert!(!c.is_command_check());
        assert_eq!(c.extension_name(), "chk1");
    }

    #[test]
    fn merge_local_over_prefers_local_fields() {
        let request = Check {
            name: "chk1".into(),
            command: Some("remote cmd".into()),
            interval: Some(60),
            ..Default::default()
        };
        let local = Check {
            name: "chk1".into(),
            command: Some("local cmd".into()),
            ..Default::default()
        };
        let merged = request.merge_local_over(&local);
        assert_eq!(merged.command.as_deref(), Some("local cmd"));
        assert_eq!(merged.interval, Some(60));
    }

    #[test]
    fn duplicate_for_issue_clears_execution_fields() {
        let c = Check {
            name: "chk1".into(),
            executed: Some(100),
            output: Some("old".into()),
            status: Some(status::OK),
            ..Default::default()
        };
        let dup = c.duplicate_for_issue(200);
        assert_eq!(dup.issued, Some(200));
        assert!(dup.executed.is_none());
        assert!(dup.output.is_none());
        assert!(dup.status.is_none());
    }
}
