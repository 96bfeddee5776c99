//! Binary scope codec for cross-worker transfer.
//!
//! Scopes travel between workers attached to thunks and chunks, so every
//! variant has a stable numeric tag and a self-describing little-endian
//! payload. Custom processors and taints are identified by their registered
//! *name*, not their tag, because tags are allocated per process and need not
//! agree across the cluster.
//!
//! Two failure channels, mirroring the crate's error design:
//!
//! - **Malformed input** (truncation, bad magic, resource-limit hits)
//!   returns a [`WireError`].
//! - **Unknown-but-well-formed input** (a variant name this process has not
//!   registered, an undecodable payload) **degrades**: [`decode_scope`]
//!   returns an invalid scope, so the receiving scheduler skips the
//!   candidate instead of aborting. The degrade is logged at `warn`.
//!
//! Decode enforces the [`WireConfig`] resource limits the way a
//! length-delimited transport codec enforces a maximum frame length: the
//! input is untrusted.

use crate::extension::Extensions;
use crate::processor::{CustomProc, Processor};
use crate::scope::taint::Taint;
use crate::scope::{ExactScope, NodeScope, ProcessScope, Scope};
use crate::tracing_compat::warn;
use crate::types::{NodeUuid, ThreadId, WorkerId};

/// Magic prefix of an encoded scope.
pub const WIRE_MAGIC: [u8; 4] = *b"PSCP";
/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

const TAG_ANY: u8 = 0;
const TAG_TAINT: u8 = 1;
const TAG_UNION: u8 = 2;
const TAG_NODE: u8 = 3;
const TAG_PROCESS: u8 = 4;
const TAG_EXACT: u8 = 5;
const TAG_INVALID: u8 = 6;

const PROC_OS: u8 = 0;
const PROC_THREAD: u8 = 1;
const PROC_CUSTOM: u8 = 2;

const TAINT_DEFAULT_ENABLED: u8 = 0;
const TAINT_PROCESSOR_TYPE: u8 = 1;
const TAINT_CUSTOM: u8 = 2;

/// Errors for malformed or over-limit wire input (and for encoding scopes
/// that reference unregistered variants).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The input does not start with [`WIRE_MAGIC`].
    #[error("bad magic")]
    BadMagic,
    /// The input uses a format version this process does not speak.
    #[error("unsupported wire version {version}")]
    UnsupportedVersion {
        /// The version byte received.
        version: u8,
    },
    /// The input ended mid-value.
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// Bytes remained after the scope was fully decoded.
    #[error("trailing bytes after scope")]
    TrailingBytes,
    /// Scope nesting exceeded the configured limit.
    #[error("scope nesting exceeds {limit}")]
    DepthLimit {
        /// The configured maximum depth.
        limit: usize,
    },
    /// A union carried more children than the configured limit.
    #[error("union width exceeds {limit}")]
    UnionLimit {
        /// The configured maximum width.
        limit: usize,
    },
    /// A taint set carried more taints than the configured limit.
    #[error("taint set exceeds {limit}")]
    TaintLimit {
        /// The configured maximum size.
        limit: usize,
    },
    /// A length-prefixed field exceeded the configured limit.
    #[error("payload length {len} exceeds {limit}")]
    PayloadLimit {
        /// The length declared on the wire.
        len: usize,
        /// The configured maximum.
        limit: usize,
    },
    /// A name field was not valid UTF-8.
    #[error("invalid utf-8 in name")]
    InvalidName,
    /// A union arrived with no children.
    #[error("empty union on wire")]
    EmptyUnion,
    /// An exact scope's processor was not on its own worker.
    #[error("exact scope processor not on its worker")]
    ProcessorMismatch,
    /// Encoding referenced a variant with no registration to name it.
    #[error("unregistered {what}: {name}")]
    Unregistered {
        /// What kind of variant lacked a registration.
        what: &'static str,
        /// Its local tag, for diagnostics.
        name: String,
    },
}

/// Resource limits applied while decoding untrusted input.
#[derive(Debug, Clone)]
pub struct WireConfig {
    max_depth: usize,
    max_union_children: usize,
    max_taints: usize,
    max_payload_len: usize,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_union_children: 1024,
            max_taints: 64,
            max_payload_len: 64 * 1024,
        }
    }
}

impl WireConfig {
    /// Creates the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum scope nesting depth.
    #[must_use]
    pub const fn with_max_depth(mut self, limit: usize) -> Self {
        self.max_depth = limit;
        self
    }

    /// Sets the maximum union width.
    #[must_use]
    pub const fn with_max_union_children(mut self, limit: usize) -> Self {
        self.max_union_children = limit;
        self
    }

    /// Sets the maximum taint-set size.
    #[must_use]
    pub const fn with_max_taints(mut self, limit: usize) -> Self {
        self.max_taints = limit;
        self
    }

    /// Sets the maximum length of names and payloads.
    #[must_use]
    pub const fn with_max_payload_len(mut self, limit: usize) -> Self {
        self.max_payload_len = limit;
        self
    }
}

/// Encodes a scope for transfer.
///
/// Fails only when the scope references a custom variant this process never
/// registered (nothing could name it on the wire).
pub fn encode_scope(scope: &Scope, extensions: &Extensions) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&WIRE_MAGIC);
    out.push(WIRE_VERSION);
    encode_scope_value(scope, extensions, &mut out)?;
    Ok(out)
}

fn encode_scope_value(
    scope: &Scope,
    extensions: &Extensions,
    out: &mut Vec<u8>,
) -> Result<(), WireError> {
    match scope {
        Scope::Any => out.push(TAG_ANY),
        Scope::Taint(t) => {
            out.push(TAG_TAINT);
            write_u32(out, t.taints().len() as u32);
            for taint in t.taints() {
                encode_taint(taint, extensions, out)?;
            }
            encode_scope_value(t.inner(), extensions, out)?;
        }
        Scope::Union(u) => {
            out.push(TAG_UNION);
            write_u32(out, u.children().len() as u32);
            for child in u.children() {
                encode_scope_value(child, extensions, out)?;
            }
        }
        Scope::Node(n) => {
            out.push(TAG_NODE);
            write_u128(out, n.uuid().get());
        }
        Scope::Process(p) => {
            out.push(TAG_PROCESS);
            write_u128(out, p.node().uuid().get());
            write_u64(out, p.wid().get());
        }
        Scope::Exact(e) => {
            out.push(TAG_EXACT);
            write_u128(out, e.process().node().uuid().get());
            write_u64(out, e.process().wid().get());
            encode_processor(e.proc(), extensions, out)?;
        }
        Scope::Invalid(inv) => {
            out.push(TAG_INVALID);
            encode_scope_value(inv.left(), extensions, out)?;
            encode_scope_value(inv.right(), extensions, out)?;
        }
    }
    Ok(())
}

fn encode_processor(
    proc: &Processor,
    extensions: &Extensions,
    out: &mut Vec<u8>,
) -> Result<(), WireError> {
    match proc {
        Processor::Os(p) => {
            out.push(PROC_OS);
            write_u64(out, p.pid().get());
        }
        Processor::Thread(p) => {
            out.push(PROC_THREAD);
            write_u64(out, p.pid().get());
            write_u64(out, p.tid().get());
        }
        Processor::Custom(p) => {
            let name =
                extensions
                    .processor_name(p.tag())
                    .ok_or_else(|| WireError::Unregistered {
                        what: "processor variant",
                        name: p.tag().to_string(),
                    })?;
            let codec =
                extensions
                    .processor_codec(p.tag())
                    .ok_or_else(|| WireError::Unregistered {
                        what: "processor codec",
                        name: p.tag().to_string(),
                    })?;
            let payload = codec
                .encode(p.payload())
                .map_err(|e| WireError::Unregistered {
                    what: "processor payload",
                    name: e.reason,
                })?;
            out.push(PROC_CUSTOM);
            write_str(out, &name);
            write_u64(out, p.pid().get());
            write_u64(out, p.ident());
            write_bytes(out, &payload);
        }
    }
    Ok(())
}

fn encode_taint(
    taint: &Taint,
    extensions: &Extensions,
    out: &mut Vec<u8>,
) -> Result<(), WireError> {
    match taint {
        Taint::DefaultEnabled => out.push(TAINT_DEFAULT_ENABLED),
        Taint::ProcessorType(tag) => {
            let name = extensions
                .processor_name(*tag)
                .ok_or_else(|| WireError::Unregistered {
                    what: "processor variant",
                    name: tag.to_string(),
                })?;
            out.push(TAINT_PROCESSOR_TYPE);
            write_str(out, &name);
        }
        Taint::Custom { tag, payload } => {
            let name = extensions
                .taint_name(*tag)
                .ok_or_else(|| WireError::Unregistered {
                    what: "taint variant",
                    name: tag.to_string(),
                })?;
            out.push(TAINT_CUSTOM);
            write_str(out, &name);
            write_bytes(out, payload);
        }
    }
    Ok(())
}

/// Decodes a scope received from a peer.
///
/// Malformed input is an error; well-formed input naming variants this
/// process does not know **degrades** to an invalid scope (logged at
/// `warn`), which the scheduler then treats as "skip this candidate".
pub fn decode_scope(
    bytes: &[u8],
    extensions: &Extensions,
    config: &WireConfig,
) -> Result<Scope, WireError> {
    let mut reader = Reader { buf: bytes };
    if reader.take(4)? != WIRE_MAGIC.as_slice() {
        return Err(WireError::BadMagic);
    }
    let version = reader.u8()?;
    if version != WIRE_VERSION {
        return Err(WireError::UnsupportedVersion { version });
    }
    match decode_scope_value(&mut reader, extensions, config, 0) {
        Ok(scope) => {
            if reader.buf.is_empty() {
                Ok(scope)
            } else {
                Err(WireError::TrailingBytes)
            }
        }
        Err(DecodeIssue::Malformed(err)) => Err(err),
        Err(DecodeIssue::Degrade { what, detail }) => {
            warn!(what, detail = %detail, "undecodable wire element, degrading scope to invalid");
            Ok(Scope::invalid(Scope::Any, Scope::Any))
        }
    }
}

enum DecodeIssue {
    Malformed(WireError),
    Degrade {
        what: &'static str,
        detail: String,
    },
}

impl From<WireError> for DecodeIssue {
    fn from(err: WireError) -> Self {
        Self::Malformed(err)
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.buf.len() < n {
            return Err(WireError::UnexpectedEof);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(arr))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(arr))
    }

    fn u128(&mut self) -> Result<u128, WireError> {
        let mut arr = [0u8; 16];
        arr.copy_from_slice(self.take(16)?);
        Ok(u128::from_le_bytes(arr))
    }

    fn bytes(&mut self, limit: usize) -> Result<&'a [u8], WireError> {
        let len = self.u32()? as usize;
        if len > limit {
            return Err(WireError::PayloadLimit { len, limit });
        }
        self.take(len)
    }

    fn str(&mut self, limit: usize) -> Result<&'a str, WireError> {
        core::str::from_utf8(self.bytes(limit)?).map_err(|_| WireError::InvalidName)
    }
}

fn decode_scope_value(
    reader: &mut Reader<'_>,
    extensions: &Extensions,
    config: &WireConfig,
    depth: usize,
) -> Result<Scope, DecodeIssue> {
    if depth >= config.max_depth {
        return Err(WireError::DepthLimit {
            limit: config.max_depth,
        }
        .into());
    }
    let tag = reader.u8()?;
    match tag {
        TAG_ANY => Ok(Scope::Any),
        TAG_TAINT => {
            let count = reader.u32()? as usize;
            if count > config.max_taints {
                return Err(WireError::TaintLimit {
                    limit: config.max_taints,
                }
                .into());
            }
            let mut taints = Vec::with_capacity(count);
            for _ in 0..count {
                taints.push(decode_taint(reader, extensions, config)?);
            }
            let inner = decode_scope_value(reader, extensions, config, depth + 1)?;
            Ok(Scope::tainted(inner, taints))
        }
        TAG_UNION => {
            let count = reader.u32()? as usize;
            if count == 0 {
                return Err(WireError::EmptyUnion.into());
            }
            if count > config.max_union_children {
                return Err(WireError::UnionLimit {
                    limit: config.max_union_children,
                }
                .into());
            }
            let mut children = Vec::with_capacity(count);
            for _ in 0..count {
                children.push(decode_scope_value(reader, extensions, config, depth + 1)?);
            }
            Scope::union_of(children).ok_or(DecodeIssue::Malformed(WireError::EmptyUnion))
        }
        TAG_NODE => Ok(Scope::node(NodeUuid::new(reader.u128()?))),
        TAG_PROCESS => {
            let uuid = NodeUuid::new(reader.u128()?);
            let wid = WorkerId::new(reader.u64()?);
            Ok(Scope::Process(ProcessScope::new(NodeScope::new(uuid), wid)))
        }
        TAG_EXACT => {
            let uuid = NodeUuid::new(reader.u128()?);
            let wid = WorkerId::new(reader.u64()?);
            let proc = decode_processor(reader, extensions, config)?;
            if proc.pid() != wid {
                return Err(WireError::ProcessorMismatch.into());
            }
            Ok(Scope::Exact(ExactScope::new(
                ProcessScope::new(NodeScope::new(uuid), wid),
                proc,
            )))
        }
        TAG_INVALID => {
            let left = decode_scope_value(reader, extensions, config, depth + 1)?;
            let right = decode_scope_value(reader, extensions, config, depth + 1)?;
            Ok(Scope::invalid(left, right))
        }
        unknown => Err(DecodeIssue::Degrade {
            what: "scope variant",
            detail: unknown.to_string(),
        }),
    }
}

fn decode_processor(
    reader: &mut Reader<'_>,
    extensions: &Extensions,
    config: &WireConfig,
) -> Result<Processor, DecodeIssue> {
    let tag = reader.u8()?;
    match tag {
        PROC_OS => Ok(Processor::os(WorkerId::new(reader.u64()?))),
        PROC_THREAD => {
            let pid = WorkerId::new(reader.u64()?);
            let tid = ThreadId::new(reader.u64()?);
            Ok(Processor::thread(pid, tid))
        }
        PROC_CUSTOM => {
            let name = reader.str(config.max_payload_len)?.to_owned();
            let pid = WorkerId::new(reader.u64()?);
            let ident = reader.u64()?;
            let payload = reader.bytes(config.max_payload_len)?;
            let Some(local_tag) = extensions.processor_tag(&name) else {
                return Err(DecodeIssue::Degrade {
                    what: "processor variant",
                    detail: name,
                });
            };
            if local_tag.is_builtin() {
                // A custom frame must not impersonate a built-in.
                return Err(DecodeIssue::Degrade {
                    what: "processor variant",
                    detail: name,
                });
            }
            let Some(codec) = extensions.processor_codec(local_tag) else {
                return Err(DecodeIssue::Degrade {
                    what: "processor codec",
                    detail: name,
                });
            };
            match codec.decode(payload) {
                Ok(validated) => Ok(Processor::Custom(CustomProc::new(
                    local_tag, pid, ident, validated,
                ))),
                Err(err) => Err(DecodeIssue::Degrade {
                    what: "processor payload",
                    detail: err.reason,
                }),
            }
        }
        unknown => Err(DecodeIssue::Degrade {
            what: "processor wire tag",
            detail: unknown.to_string(),
        }),
    }
}

fn decode_taint(
    reader: &mut Reader<'_>,
    extensions: &Extensions,
    config: &WireConfig,
) -> Result<Taint, DecodeIssue> {
    let tag = reader.u8()?;
    match tag {
        TAINT_DEFAULT_ENABLED => Ok(Taint::DefaultEnabled),
        TAINT_PROCESSOR_TYPE => {
            let name = reader.str(config.max_payload_len)?.to_owned();
            extensions
                .processor_tag(&name)
                .map(Taint::ProcessorType)
                .ok_or(DecodeIssue::Degrade {
                    what: "processor variant",
                    detail: name,
                })
        }
        TAINT_CUSTOM => {
            let name = reader.str(config.max_payload_len)?.to_owned();
            let payload = reader.bytes(config.max_payload_len)?;
            extensions
                .taint_tag(&name)
                .map(|tag| Taint::custom(tag, payload))
                .ok_or(DecodeIssue::Degrade {
                    what: "taint variant",
                    detail: name,
                })
        }
        unknown => Err(DecodeIssue::Degrade {
            what: "taint wire tag",
            detail: unknown.to_string(),
        }),
    }
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_u128(out: &mut Vec<u8>, value: u128) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    write_bytes(out, s.as_bytes());
}
