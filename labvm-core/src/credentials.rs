//! Credential and name derivation for student sandboxes.
//!
//! Students are identified by the roll number embedded in their campus email
//! address. The digit run is the stable identity token everything else hangs
//! off: the sandbox username, the VM name suffix, and the admin password
//! prefix. Derivation is deterministic so re-running it for the same roster
//! always yields the same VM names.

use rand::prelude::*;

use crate::names::sanitize;

/// Identity token used when an email contains no digits at all.
const FALLBACK_IDENTITY: &str = "000";

/// Length of the random portion of a generated password.
const PASSWORD_SUFFIX_LEN: usize = 12;

/// Identity and names derived from one roster entry. Passwords are generated
/// separately (see [`generate_password`]) because derivation must stay
/// deterministic while passwords must not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedIdentity {
    /// The digit run extracted from the email, or `"000"`.
    pub identity: String,
    /// Sandbox admin username (equal to the identity token).
    pub username: String,
    /// Deterministic VM name: `sanitize(course + "-" + last3(identity))`.
    pub vm_name: String,
}

/// Extract the first maximal run of ASCII digits from an email address.
///
/// `"std2024101@x.com"` yields `"2024101"`. Emails without digits fall back
/// to the `"000"` sentinel.
pub fn identity_token(email: &str) -> String {
    let start = match email.find(|c: char| c.is_ascii_digit()) {
        Some(idx) => idx,
        None => return FALLBACK_IDENTITY.to_string(),
    };

    email[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect()
}

/// Last three characters of an identity token, left-padded with zeros when
/// the token is shorter than three digits.
fn last3(identity: &str) -> String {
    let tail: String = identity
        .chars()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{:0>3}", tail)
}

/// Derive the identity, username, and VM name for one student.
///
/// Deterministic and side-effect free. Two students whose emails share the
/// same trailing three digits derive the same VM name; callers must treat
/// that as a resource conflict rather than overwrite.
pub fn derive(email: &str, course_name: &str) -> DerivedIdentity {
    let identity = identity_token(email);
    let vm_name = sanitize(&format!("{}-{}", course_name, last3(&identity)));

    DerivedIdentity {
        username: identity.clone(),
        identity,
        vm_name,
    }
}

/// Generate the admin password for a sandbox.
///
/// Keeps the legacy `last3@` prefix students are told to expect, followed by
/// a random alphanumeric suffix. The password exists only on the persisted
/// VM record; it is never re-derivable from the email.
pub fn generate_password(identity: &str) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                            abcdefghijklmnopqrstuvwxyz\
                            0123456789";
    let mut rng = rand::rng();
    let suffix: String = (0..PASSWORD_SUFFIX_LEN)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect();

    format!("{}@{}", last3(identity), suffix)
}
