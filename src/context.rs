//! Context-to-agent resolution.
//!
//! An inbound request names its agent indirectly: through the SNMPv3
//! context engine ID and context name (or community), and through the
//! transport it arrived on. [`probe_context`] turns that tuple into an
//! ordered list of identifier candidates, most specific first, for the
//! caller to try against the discovered agents.

use std::net::SocketAddr;

use crate::oid::Oid;
use crate::util::encode_hex;

/// snmpUDPDomain (RFC 3417).
pub const UDP_DOMAIN_ARCS: [u32; 7] = [1, 3, 6, 1, 6, 1, 1];
/// transportDomainUdpIpv6 (RFC 3419).
pub const UDP6_DOMAIN_ARCS: [u32; 9] = [1, 3, 6, 1, 2, 1, 100, 1, 2];

/// The IPv4 UDP transport domain.
pub fn udp_domain() -> Oid {
    Oid::from_arcs(&UDP_DOMAIN_ARCS)
}

/// The IPv6 UDP transport domain.
pub fn udp6_domain() -> Oid {
    Oid::from_arcs(&UDP6_DOMAIN_ARCS)
}

/// Generate agent-identifier candidates for a request, most specific
/// first.
///
/// The fully qualified shape is
/// `engine-id/context-name/transport-domain/peer-address`, shortened
/// from the right one segment at a time. When an engine ID is present
/// the whole sequence repeats without it (the legacy layout). Binary
/// engine IDs and context names render as lowercase hex; IPv6 peer
/// addresses swap `:` for `_` so they stay path-safe. No identifier is
/// yielded twice.
pub fn probe_context(
    transport_domain: &Oid,
    transport_address: &SocketAddr,
    context_engine_id: Option<&[u8]>,
    context_name: &[u8],
) -> Vec<String> {
    let engine = context_engine_id.filter(|id| !id.is_empty());
    let mut candidates = Vec::new();
    push_candidates(
        transport_domain,
        transport_address,
        engine,
        context_name,
        &mut candidates,
    );
    if engine.is_some() {
        // Legacy layout without the engine ID in the path.
        push_candidates(
            transport_domain,
            transport_address,
            None,
            context_name,
            &mut candidates,
        );
    }
    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.clone()));
    candidates
}

fn push_candidates(
    transport_domain: &Oid,
    transport_address: &SocketAddr,
    engine: Option<&[u8]>,
    context_name: &[u8],
    out: &mut Vec<String>,
) {
    let mut parts: Vec<String> = Vec::with_capacity(4);
    if let Some(engine) = engine {
        parts.push(ident_fragment(engine));
    }
    parts.push(ident_fragment(context_name));
    parts.push(transport_domain.to_string());
    if transport_domain.starts_with(&udp_domain()) {
        parts.push(transport_address.ip().to_string());
    } else if transport_domain.starts_with(&udp6_domain()) {
        parts.push(transport_address.ip().to_string().replace(':', "_"));
    }
    parts.retain(|p| !p.is_empty());

    while !parts.is_empty() {
        out.push(normalize(&parts.join("/")));
        parts.pop();
    }
}

/// Render request bytes as an identifier fragment: text when printable,
/// lowercase hex otherwise.
fn ident_fragment(bytes: &[u8]) -> String {
    if !bytes.is_empty() && bytes.iter().all(|b| b.is_ascii_graphic()) {
        String::from_utf8_lossy(bytes).into_owned()
    } else if bytes.is_empty() {
        String::new()
    } else {
        encode_hex(bytes)
    }
}

/// Collapse `.` and `..` segments and repeated separators.
fn normalize(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if stack.last().is_some_and(|s| *s != "..") {
                    stack.pop();
                } else {
                    stack.push("..");
                }
            }
            other => stack.push(other),
        }
    }
    stack.join("/")
}
