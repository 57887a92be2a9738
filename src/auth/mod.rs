pub mod files;
pub mod tls;

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

/// The one object the policy table guards.
pub const OBJECT_LOGS: &str = "logs";

pub const ACTION_APPEND: &str = "append";
pub const ACTION_READ: &str = "read";
pub const ACTION_RESET: &str = "reset";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A policy line that is not `p, <subject>, <object>, <action>`.
    #[error("malformed policy rule on line {line}: {rule:?}")]
    MalformedRule { line: usize, rule: String },

    #[error("{subject} is not permitted to {action} {object}")]
    PermissionDenied {
        subject: String,
        object: String,
        action: String,
    },
}

/// Authorizer
///
/// Deny-by-default access control over `(subject, object, action)`
/// triples. The policy file holds one rule per line in the form
/// `p, <subject>, <object>, <action>`; `#` starts a comment and `*`
/// matches anything in its position:
///
/// ```ignore
/// p, super,    logs, append
/// p, super,    logs, read
/// p, super,    logs, reset
/// p, readonly, logs, read
/// ```
///
/// Subjects come from client certificate common names, so the policy is
/// only as strong as the CA that signs them.
pub struct Authorizer {
    rules: HashSet<(String, String, String)>,
}

impl Authorizer {
    /// Load a policy file.
    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        Self::from_policy(&fs::read_to_string(path)?)
    }

    /// An authorizer that lets every subject do everything. Only for
    /// setups that authenticate some other way, or not at all.
    pub fn allow_all() -> Self {
        let mut rules = HashSet::new();
        rules.insert(("*".to_string(), "*".to_string(), "*".to_string()));
        Authorizer { rules }
    }

    /// Parse policy rules from their textual form.
    pub fn from_policy(content: &str) -> Result<Self, AuthError> {
        let mut rules = HashSet::new();
        for (i, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            match fields.as_slice() {
                ["p", subject, object, action] => {
                    rules.insert((
                        subject.to_string(),
                        object.to_string(),
                        action.to_string(),
                    ));
                }
                _ => {
                    return Err(AuthError::MalformedRule {
                        line: i + 1,
                        rule: line.to_string(),
                    })
                }
            }
        }
        Ok(Authorizer { rules })
    }

    /// Ok iff some rule lets `subject` perform `action` on `object`.
    pub fn authorize(&self, subject: &str, object: &str, action: &str) -> Result<(), AuthError> {
        for s in [subject, "*"] {
            for o in [object, "*"] {
                for a in [action, "*"] {
                    if self
                        .rules
                        .contains(&(s.to_string(), o.to_string(), a.to_string()))
                    {
                        return Ok(());
                    }
                }
            }
        }
        Err(AuthError::PermissionDenied {
            subject: subject.to_string(),
            object: object.to_string(),
            action: action.to_string(),
        })
    }
}
