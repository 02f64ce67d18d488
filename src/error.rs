//! Error taxonomy for every layer of the toolkit.
//!
//! Each variant corresponds to one well-defined failure kind; nothing here
//! is a generic catch-all except `Io`/`Nix`, which exist only to let `?`
//! cross a module boundary before being folded into a more specific variant
//! by the caller.

use std::fmt;

use nix::errno::Errno;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("label error: {0}")]
    Label(#[from] LabelError),

    #[error("bpf({cmd:?}) failed: {errno}")]
    Syscall { cmd: BpfCmdName, errno: Errno },

    #[error("verifier rejected program ({kind:?}): {errno}")]
    Verifier {
        kind: VerifierErrorKind,
        errno: Errno,
        log: String,
    },

    #[error("attach failed: {0}")]
    Attach(#[from] AttachError),

    #[error("map error: {0}")]
    Map(#[from] MapError),

    #[error("btf error: {0}")]
    Btf(#[from] BtfError),

    #[error("relocation could not be resolved: {0}")]
    Relocation(#[from] RelocationError),

    #[error("operation on a closed handle")]
    HandleClosed,

    #[error("timed out waiting for a value")]
    Timeout,

    #[error(transparent)]
    Io(#[from] ::std::io::Error),

    #[error("syscall failed: {0}")]
    Nix(#[from] nix::Error),
}

impl Error {
    pub fn syscall(cmd: BpfCmdName, errno: Errno) -> Self {
        Error::Syscall { cmd, errno }
    }
}

/// Name of the `bpf()` command a `SyscallError` failed on, kept separate
/// from `consts::BpfCmd` so error messages survive even an unrecognized
/// command number from a newer kernel.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BpfCmdName {
    MapCreate,
    MapLookupElem,
    MapUpdateElem,
    MapDeleteElem,
    MapGetNextKey,
    MapLookupAndDeleteElem,
    MapLookupBatch,
    MapUpdateBatch,
    MapLookupAndDeleteBatch,
    ProgLoad,
    ObjPin,
    ObjGet,
    ProgAttach,
    ProgDetach,
    LinkCreate,
    IterCreate,
}

#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("register {0} out of range (must be 0..=10)")]
    RegisterOutOfRange(u8),
    #[error("immediate {0} does not fit in a signed 32-bit field")]
    ImmediateOverflow(i64),
    #[error("jump offset {0} does not fit in a signed 16-bit field")]
    OffsetOverflow(i32),
    #[error("operand form mismatch: expected {expected}, got {actual}")]
    OperandForm {
        expected: &'static str,
        actual: &'static str,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum LabelError {
    #[error("reference to unknown label {0:?}")]
    UnknownLabel(String),
    #[error("branch to label {label:?} is {delta} slots away, outside ±32767")]
    LabelTooFar { label: String, delta: i64 },
    #[error("label {0:?} defined more than once")]
    DuplicateLabel(String),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum VerifierErrorKind {
    InvalidMemAccess,
    UnreachableCode,
    StackOverflow,
    RegisterUninit,
    HelperMisuse,
    LicenseRequired,
    UnknownHelper,
    TooManyInstructions,
    Unclassified,
}

impl VerifierErrorKind {
    /// Best-effort classification of a verifier log against the phrases the
    /// kernel verifier is known to emit. Ordering matters: more specific
    /// phrases are checked before generic ones.
    pub fn classify(log: &str) -> Self {
        let hay = log;
        let has = |needle: &str| hay.contains(needle);

        if has("invalid mem access") || has("invalid access to map value") {
            VerifierErrorKind::InvalidMemAccess
        } else if has("unreachable insn") {
            VerifierErrorKind::UnreachableCode
        } else if has("invalid stack") || has("combined stack size") {
            VerifierErrorKind::StackOverflow
        } else if has("!read_ok") || has("R0 !read_ok") || has("is not initialized") {
            VerifierErrorKind::RegisterUninit
        } else if has("invalid func") || has("unknown func") {
            VerifierErrorKind::UnknownHelper
        } else if has("helper call is not allowed") || has("arg") && has("type=") {
            VerifierErrorKind::HelperMisuse
        } else if has("unprivileged") || has("GPL") {
            VerifierErrorKind::LicenseRequired
        } else if has("exceeds") && has("insns") || has("too many instructions") {
            VerifierErrorKind::TooManyInstructions
        } else {
            VerifierErrorKind::Unclassified
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("network interface {0:?} not found")]
    InterfaceNotFound(String),
    #[error("clsact qdisc already exists on this interface")]
    QdiscExists,
    #[error("permission denied (needs CAP_NET_ADMIN or CAP_SYS_ADMIN)")]
    PermissionDenied,
    #[error("attach type not supported by this kernel")]
    Unsupported,
    #[error("netlink request failed: {0}")]
    Netlink(Errno),
}

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("key not found")]
    KeyNotFound,
    #[error("key already exists")]
    KeyExists,
    #[error("map is full")]
    TableFull,
    #[error("invalid map file descriptor")]
    InvalidFd,
    #[error("map operation failed: {0}")]
    Other(Errno),
}

impl From<Errno> for MapError {
    fn from(errno: Errno) -> Self {
        match errno {
            Errno::ENOENT => MapError::KeyNotFound,
            Errno::EEXIST => MapError::KeyExists,
            Errno::E2BIG => MapError::TableFull,
            Errno::EBADF => MapError::InvalidFd,
            other => MapError::Other(other),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BtfError {
    #[error("/sys/kernel/btf/vmlinux is not available: {0}")]
    NotAvailable(String),
    #[error("malformed BTF blob: {0}")]
    Malformed(String),
    #[error("BTF type {0:?} not found")]
    TypeNotFound(String),
    #[error("field {0:?} not found")]
    FieldNotFound(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RelocationError {
    #[error("target type {type_id} has no field at path {path:?}")]
    FieldNotFound { type_id: u32, path: String },
    #[error("target type {0} not found in target BTF")]
    TypeNotFound(u32),
    #[error("enum value {name:?} not found in type {type_id}")]
    EnumValueNotFound { type_id: u32, name: String },
}

impl fmt::Display for BpfCmdName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            BpfCmdName::MapCreate => "MAP_CREATE",
            BpfCmdName::MapLookupElem => "MAP_LOOKUP_ELEM",
            BpfCmdName::MapUpdateElem => "MAP_UPDATE_ELEM",
            BpfCmdName::MapDeleteElem => "MAP_DELETE_ELEM",
            BpfCmdName::MapGetNextKey => "MAP_GET_NEXT_KEY",
            BpfCmdName::MapLookupAndDeleteElem => "MAP_LOOKUP_AND_DELETE_ELEM",
            BpfCmdName::MapLookupBatch => "MAP_LOOKUP_BATCH",
            BpfCmdName::MapUpdateBatch => "MAP_UPDATE_BATCH",
            BpfCmdName::MapLookupAndDeleteBatch => "MAP_LOOKUP_AND_DELETE_BATCH",
            BpfCmdName::ProgLoad => "PROG_LOAD",
            BpfCmdName::ObjPin => "OBJ_PIN",
            BpfCmdName::ObjGet => "OBJ_GET",
            BpfCmdName::ProgAttach => "PROG_ATTACH",
            BpfCmdName::ProgDetach => "PROG_DETACH",
            BpfCmdName::LinkCreate => "BPF_LINK_CREATE",
            BpfCmdName::IterCreate => "BPF_ITER_CREATE",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_verifier_phrases() {
        assert_eq!(
            VerifierErrorKind::classify("R1 invalid mem access 'inv'"),
            VerifierErrorKind::InvalidMemAccess
        );
        assert_eq!(
            VerifierErrorKind::classify("unreachable insn 12"),
            VerifierErrorKind::UnreachableCode
        );
        assert_eq!(
            VerifierErrorKind::classify("something we've never seen"),
            VerifierErrorKind::Unclassified
        );
    }
}
