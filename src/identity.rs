// SPDX-License-Identifier: AGPL-3.0-or-later
//! Identity sanitizer
//!
//! Turns a user identity such as `alice@example.com` into the peer name used
//! for the store comment and the profile file name (`alice_example.com`).
//!
//! Domains may not contain the separator, so splitting a name at its last
//! `_` recovers the identity and distinct identities never share a name.
//! Identities differing only in case are the same peer.

use crate::error::{Result, RosterError};

/// Replaces `@` in a sanitized name
pub const SEPARATOR: char = '_';

/// Parse an identity read from input into its peer name.
///
/// Unlike [`sanitize`], the input must be an address of the form
/// `local@domain.tld`; a name that is already canonical is rejected since
/// nothing could be delivered to it.
pub fn parse(identity: &str) -> Result<String> {
    let identity = identity.trim().to_ascii_lowercase();
    let (local, domain) = split_identity(&identity)?;
    Ok(format!("{}{}{}", local, SEPARATOR, domain))
}

/// Normalize a raw identity into a canonical peer name.
///
/// Already-canonical names are returned unchanged, so the function is
/// idempotent.
pub fn sanitize(identity: &str) -> Result<String> {
    let identity = identity.trim().to_ascii_lowercase();

    if identity.contains('@') {
        return parse(&identity);
    }

    if is_canonical(&identity) {
        Ok(identity)
    } else {
        Err(invalid(&identity, "expected the form local@domain.tld"))
    }
}

/// Whether `name` already has the shape produced by [`sanitize`]
pub fn is_canonical(name: &str) -> bool {
    if name.is_empty() || !name.chars().all(is_allowed) {
        return false;
    }

    // Domains never contain the separator, so the last one splits the name.
    match name.rsplit_once(SEPARATOR) {
        Some((local, domain)) => !local.is_empty() && is_domain(domain),
        None => false,
    }
}

fn split_identity(identity: &str) -> Result<(&str, &str)> {
    let (local, domain) = identity
        .split_once('@')
        .ok_or_else(|| invalid(identity, "missing '@'"))?;

    if local.is_empty() {
        return Err(invalid(identity, "empty local part"));
    }
    if domain.contains('@') {
        return Err(invalid(identity, "more than one '@'"));
    }
    if let Some(c) = local.chars().chain(domain.chars()).find(|c| !is_allowed(*c)) {
        return Err(invalid(identity, &format!("character '{}' is not allowed", c)));
    }
    if !is_domain(domain) {
        return Err(invalid(identity, "domain part must contain a dot"));
    }

    Ok((local, domain))
}

fn is_domain(domain: &str) -> bool {
    domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains(SEPARATOR)
        && !domain.contains("..")
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+')
}

fn invalid(identity: &str, reason: &str) -> RosterError {
    RosterError::InvalidIdentity {
        identity: identity.to_string(),
        reason: reason.to_string(),
    }
}
