//! Profile Validator (C4): reads a named credential profile, validates
//! it for its authentication kind, and caches the verdict with a TTL
//! (spec §3 "Profile", §4.4).
//!
//! The credentials store itself is read-only external state (spec §6:
//! "credentials file is read-only to this process and owned by the
//! external credential store"); this module only parses and validates
//! what it finds there, following the donor's "never throws, always
//! returns a diagnostic record" philosophy from `baseline_service.rs`.

use crate::utils::clock::Clock;
use crate::utils::TtlCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    Keypair,
    Oauth,
    Password,
    Sso,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub name: String,
    pub account: String,
    pub user: String,
    pub auth_kind: AuthKind,
    pub private_key_path: Option<String>,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CredentialsFile {
    #[serde(flatten)]
    profiles: HashMap<String, Profile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub available_profiles: Vec<String>,
    pub config_path: String,
}

pub struct ProfileValidator {
    credentials_path: PathBuf,
    cache: TtlCache<String, ProfileValidation>,
}

impl ProfileValidator {
    pub fn new(credentials_path: PathBuf, ttl_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self { credentials_path, cache: TtlCache::new(ttl_secs, clock) }
    }

    /// Validate the named profile (or "default"), consulting the TTL
    /// cache first. Never returns an error: all failure modes are
    /// expressed in the returned `ProfileValidation`.
    pub fn validate(&self, profile_name: &str) -> ProfileValidation {
        if let Some(cached) = self.cache.get(&profile_name.to_string()) {
            return cached;
        }

        let result = self.validate_uncached(profile_name);
        self.cache.insert(profile_name.to_string(), result.clone());
        result
    }

    pub fn invalidate(&self, profile_name: &str) {
        self.cache.invalidate(&profile_name.to_string());
    }

    pub fn load_profile(&self, profile_name: &str) -> Option<Profile> {
        let file = self.read_credentials_file().ok()?;
        file.profiles.get(profile_name).cloned()
    }

    fn validate_uncached(&self, profile_name: &str) -> ProfileValidation {
        let config_path = self.credentials_path.display().to_string();

        let file = match self.read_credentials_file() {
            Ok(f) => f,
            Err(e) => {
                return ProfileValidation {
                    valid: false,
                    errors: vec![format!("failed to read credentials store: {e}")],
                    available_profiles: vec![],
                    config_path,
                };
            }
        };

        let Some(profile) = file.profiles.get(profile_name) else {
            let mut available: Vec<String> = file.profiles.keys().cloned().collect();
            available.sort();
            return ProfileValidation {
                valid: false,
                errors: vec![format!("profile '{profile_name}' not found")],
                available_profiles: available,
                config_path,
            };
        };

        let mut errors = Vec::new();
        if profile.account.trim().is_empty() {
            errors.push("missing required field 'account' (expected e.g. 'myorg-myaccount')".to_string());
        }
        if profile.user.trim().is_empty() {
            errors.push("missing required field 'user'".to_string());
        }
        match profile.auth_kind {
            AuthKind::Keypair => {
                if profile.private_key_path.as_deref().unwrap_or("").trim().is_empty() {
                    errors.push("keypair auth requires 'private_key_path'".to_string());
                } else if let Some(path) = &profile.private_key_path {
                    if let Ok(metadata) = std::fs::metadata(path) {
                        #[cfg(unix)]
                        {
                            use std::os::unix::fs::PermissionsExt;
                            let mode = metadata.permissions().mode() & 0o777;
                            if mode & 0o077 != 0 {
                                errors.push(format!(
                                    "private key file '{path}' is group/world readable (mode {mode:o}); chmod 600 it"
                                ));
                            }
                        }
                        let _ = metadata;
                    } else {
                        errors.push(format!("private key file '{path}' not found"));
                    }
                }
            }
            AuthKind::Password => {}
            AuthKind::Oauth | AuthKind::Sso => {}
        }

        ProfileValidation { valid: errors.is_empty(), errors, available_profiles: vec![], config_path }
    }

    fn read_credentials_file(&self) -> Result<CredentialsFile, String> {
        let content = std::fs::read_to_string(&self.credentials_path)
            .map_err(|e| format!("{}: {e}", self.credentials_path.display()))?;
        toml::from_str(&content).map_err(|e| format!("malformed credentials file: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::FixedClock;
    use chrono::Utc;

    fn write_credentials(contents: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn missing_profile_lists_available() {
        let file = write_credentials(
            r#"
            [other]
            name = "other"
            account = "acme"
            user = "bob"
            auth_kind = "password"
            "#,
        );
        let validator =
            ProfileValidator::new(file.path().to_path_buf(), 30, Arc::new(FixedClock::new(Utc::now())));
        let result = validator.validate("default");
        assert!(!result.valid);
        assert_eq!(result.available_profiles, vec!["other".to_string()]);
    }

    #[test]
    fn keypair_without_key_path_is_invalid() {
        let file = write_credentials(
            r#"
            [default]
            name = "default"
            account = "acme"
            user = "bob"
            auth_kind = "keypair"
            "#,
        );
        let validator =
            ProfileValidator::new(file.path().to_path_buf(), 30, Arc::new(FixedClock::new(Utc::now())));
        let result = validator.validate("default");
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("private_key_path")));
    }

    #[test]
    fn result_is_cached_within_ttl() {
        let file = write_credentials(
            r#"
            [default]
            name = "default"
            account = "acme"
            user = "bob"
            auth_kind = "password"
            "#,
        );
        let validator =
            ProfileValidator::new(file.path().to_path_buf(), 30, Arc::new(FixedClock::new(Utc::now())));
        let first = validator.validate("default");
        std::fs::remove_file(file.path()).unwrap();
        let second = validator.validate("default");
        assert_eq!(first.valid, second.valid);
    }
}
