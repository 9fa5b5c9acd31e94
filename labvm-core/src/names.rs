//! Name sanitation for cloud resource names and OS computer names.
//!
//! Course names and derived VM names come from free-form human input, so
//! everything that ends up as a provider resource name goes through
//! [`sanitize`] first. Computer names have a stricter character set and a
//! 15-character OS limit, handled by [`host_name`].

/// Maximum length the provider accepts for a resource name.
const MAX_RESOURCE_NAME_LEN: usize = 80;

/// OS limit for a machine's computer name.
const MAX_HOST_NAME_LEN: usize = 15;

/// Prefix applied when a computer name would otherwise be all digits.
const HOST_NAME_PREFIX: &str = "vm";

/// Normalize arbitrary input into a provider-legal resource name.
///
/// Trims surrounding whitespace, collapses internal whitespace runs into a
/// single hyphen, drops every character outside `[A-Za-z0-9_.-]`, and
/// truncates to the provider's 80-character limit. Idempotent.
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_whitespace = false;

    for c in raw.trim().chars() {
        if c.is_whitespace() {
            in_whitespace = true;
            continue;
        }
        if in_whitespace {
            out.push('-');
            in_whitespace = false;
        }
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
            out.push(c);
        }
    }

    out.truncate(MAX_RESOURCE_NAME_LEN);
    out
}

/// Derive a legal OS computer name from an already-sanitized resource name.
///
/// Strips everything outside `[A-Za-z0-9-]`, prefixes `"vm"` when the result
/// is empty or purely numeric (computer names cannot be all digits), and
/// truncates to 15 characters.
pub fn host_name(sanitized: &str) -> String {
    let mut out: String = sanitized
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();

    if out.is_empty() || out.chars().all(|c| c.is_ascii_digit()) {
        out.insert_str(0, HOST_NAME_PREFIX);
    }

    out.truncate(MAX_HOST_NAME_LEN);
    out
}
