//! Machine facts and the ambient predicate context
//!
//! Facts are gathered once per run from platform utilities and drive
//! both primary-manifest discovery and condition evaluation. Admins
//! can extend the context through `ConditionalItems.plist` in the
//! managed-installs directory.

use plist::{Dictionary, Value};
use steward_config::Preferences;

/// Identity and platform facts for this machine.
#[derive(Debug, Clone, Default)]
pub struct MachineFacts {
    pub fqdn: String,
    pub shortname: String,
    pub serial_number: Option<String>,
    pub os_vers: String,
    pub arch: String,
}

impl MachineFacts {
    /// Gather facts from the running system.
    pub async fn gather() -> Self {
        let fqdn = command_stdout("hostname", &["-f"])
            .await
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "localhost".to_string());
        let shortname = fqdn.split('.').next().unwrap_or(&fqdn).to_string();
        Self {
            fqdn: fqdn.clone(),
            shortname,
            serial_number: serial_number().await,
            os_vers: os_version().await,
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Primary-manifest identifiers to try, in order.
    ///
    /// An explicitly configured client identifier short-circuits the
    /// chain; otherwise: FQDN, short hostname (when distinct), serial
    /// number (when known), then the literal `site_default`.
    #[must_use]
    pub fn manifest_candidates(&self, client_identifier: Option<&str>) -> Vec<String> {
        if let Some(explicit) = client_identifier {
            return vec![explicit.to_string()];
        }
        let mut candidates = vec![self.fqdn.clone()];
        if self.shortname != self.fqdn {
            candidates.push(self.shortname.clone());
        }
        if let Some(serial) = &self.serial_number {
            candidates.push(serial.clone());
        }
        candidates.push("site_default".to_string());
        candidates
    }
}

/// Build the base condition context from machine facts.
#[must_use]
pub fn condition_context(facts: &MachineFacts) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.insert("hostname".into(), Value::String(facts.fqdn.clone()));
    dict.insert("os_vers".into(), Value::String(facts.os_vers.clone()));
    dict.insert("arch".into(), Value::String(facts.arch.clone()));
    if let Some(serial) = &facts.serial_number {
        dict.insert("serial_number".into(), Value::String(serial.clone()));
    }
    dict
}

/// Merge admin-provided conditions from `ConditionalItems.plist`.
///
/// A missing or malformed document contributes nothing.
pub async fn merge_admin_conditions(context: &mut Dictionary, prefs: &Preferences) {
    if let Ok(extra) = steward_store::read_dict(&prefs.conditional_items_path()).await {
        for (key, value) in extra {
            context.insert(key, value);
        }
    }
}

async fn command_stdout(program: &str, args: &[&str]) -> Option<String> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(target_os = "macos")]
async fn serial_number() -> Option<String> {
    let listing = command_stdout("ioreg", &["-rd1", "-c", "IOPlatformExpertDevice"]).await?;
    listing.lines().find_map(|line| {
        line.contains("IOPlatformSerialNumber").then(|| {
            line.rsplit('"')
                .nth(1)
                .unwrap_or_default()
                .to_string()
        })
    })
}

#[cfg(not(target_os = "macos"))]
async fn serial_number() -> Option<String> {
    None
}

#[cfg(target_os = "macos")]
async fn os_version() -> String {
    command_stdout("sw_vers", &["-productVersion"])
        .await
        .unwrap_or_else(|| "0".to_string())
}

#[cfg(not(target_os = "macos"))]
async fn os_version() -> String {
    "0".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> MachineFacts {
        MachineFacts {
            fqdn: "mac01.corp.example".into(),
            shortname: "mac01".into(),
            serial_number: Some("C02XYZ".into()),
            os_vers: "14.5".into(),
            arch: "aarch64".into(),
        }
    }

    #[test]
    fn candidate_chain_order() {
        assert_eq!(
            facts().manifest_candidates(None),
            ["mac01.corp.example", "mac01", "C02XYZ", "site_default"]
        );
    }

    #[test]
    fn explicit_identifier_short_circuits() {
        assert_eq!(facts().manifest_candidates(Some("kiosk")), ["kiosk"]);
    }

    #[test]
    fn short_hostname_skipped_when_not_distinct() {
        let facts = MachineFacts {
            fqdn: "mac01".into(),
            shortname: "mac01".into(),
            serial_number: None,
            ..MachineFacts::default()
        };
        assert_eq!(facts.manifest_candidates(None), ["mac01", "site_default"]);
    }

    #[test]
    fn context_carries_facts() {
        let ctx = condition_context(&facts());
        assert_eq!(ctx.get("os_vers").unwrap().as_string(), Some("14.5"));
        assert_eq!(ctx.get("serial_number").unwrap().as_string(), Some("C02XYZ"));
    }
}
