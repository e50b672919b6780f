//! Error taxonomy for bucket operations
//!
//! Every failure surfaced by a [`Bucket`](super::Bucket) is a [`BucketError`].
//! Wrappers added while an error travels up the stack (`Op`, `WithCleanup`,
//! `Clobbered`) never hide the underlying kind: [`BucketError::kind`] looks
//! through them, so callers can tell a clobber from a transient failure
//! without matching on strings.

use std::io;
use thiserror::Error;

pub type BucketResult<T> = Result<T, BucketError>;

/// Coarse classification of a [`BucketError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The object (or the requested generation of it) does not exist
    NotFound,
    /// A generation or meta-generation precondition did not hold
    Precondition,
    /// The bucket itself does not exist
    BucketNotExist,
    /// The operation context was cancelled
    Cancelled,
    /// The operation context's deadline passed
    DeadlineExceeded,
    /// The request was malformed
    InvalidArgument,
    /// Transport or stream failure
    Io,
    /// Anything else
    Other,
}

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A not-found that almost certainly means the destination moved on
    #[error("precondition failed: {source}")]
    Clobbered { source: Box<BucketError> },

    #[error("storage: bucket doesn't exist")]
    BucketNotExist,

    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(io::Error),

    #[error("{0}")]
    Other(String),

    /// Names the sub-operation that failed
    #[error("{op}: {source}")]
    Op {
        op: &'static str,
        source: Box<BucketError>,
    },

    /// A primary failure plus a failed best-effort cleanup
    #[error("{primary} (cleanup also failed: {cleanup})")]
    WithCleanup {
        #[source]
        primary: Box<BucketError>,
        cleanup: Box<BucketError>,
    },
}

impl BucketError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BucketError::NotFound(_) => ErrorKind::NotFound,
            BucketError::Precondition(_) | BucketError::Clobbered { .. } => ErrorKind::Precondition,
            BucketError::BucketNotExist => ErrorKind::BucketNotExist,
            BucketError::Cancelled => ErrorKind::Cancelled,
            BucketError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            BucketError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            BucketError::Io(_) => ErrorKind::Io,
            BucketError::Other(_) => ErrorKind::Other,
            BucketError::Op { source, .. } => source.kind(),
            BucketError::WithCleanup { primary, .. } => primary.kind(),
        }
    }

    pub fn is_precondition(&self) -> bool {
        self.kind() == ErrorKind::Precondition
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Prefix the error with the name of the failing sub-operation.
    pub fn annotate(self, op: &'static str) -> Self {
        BucketError::Op {
            op,
            source: Box::new(self),
        }
    }

    /// Reinterpret this error as a clobber of the destination object.
    pub fn clobbered(self) -> Self {
        BucketError::Clobbered {
            source: Box::new(self),
        }
    }

    /// Attach a cleanup failure to this (primary) error.
    pub fn with_cleanup_failure(self, cleanup: BucketError) -> Self {
        BucketError::WithCleanup {
            primary: Box::new(self),
            cleanup: Box::new(cleanup),
        }
    }

    /// The cleanup failure carried alongside a primary error, if any.
    pub fn cleanup_failure(&self) -> Option<&BucketError> {
        match self {
            BucketError::WithCleanup { cleanup, .. } => Some(cleanup),
            BucketError::Op { source, .. } => source.cleanup_failure(),
            _ => None,
        }
    }

    /// Names of the sub-operations this error was annotated with, outermost first.
    pub fn op_path(&self) -> Vec<&'static str> {
        let mut path = Vec::new();
        let mut current = self;
        loop {
            match current {
                BucketError::Op { op, source } => {
                    path.push(*op);
                    current = source;
                }
                BucketError::WithCleanup { primary, .. } => current = primary,
                _ => return path,
            }
        }
    }
}

/// A `BucketError` smuggled through an `io::Error` (for instance by a
/// throttled reader) comes back out as itself.
impl From<io::Error> for BucketError {
    fn from(err: io::Error) -> Self {
        let wraps_bucket_error = err
            .get_ref()
            .is_some_and(|inner| inner.is::<BucketError>());
        if !wraps_bucket_error {
            return BucketError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<BucketError>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => BucketError::Io(io::Error::new(kind, other)),
            None => BucketError::Io(io::Error::from(kind)),
        }
    }
}

/// Annotate the error side of a result with the failing sub-operation.
pub trait Annotate<T> {
    fn annotate(self, op: &'static str) -> BucketResult<T>;
}

impl<T> Annotate<T> for BucketResult<T> {
    fn annotate(self, op: &'static str) -> BucketResult<T> {
        self.map_err(|err| err.annotate(op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_looks_through_wrappers() {
        let err = BucketError::NotFound("a".into())
            .clobbered()
            .annotate("ComposeObjects")
            .with_cleanup_failure(BucketError::Other("boom".into()).annotate("DeleteObject"));

        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(err.is_precondition());
        assert!(!err.is_not_found());
        assert!(err.cleanup_failure().is_some());
        assert_eq!(err.op_path(), vec!["ComposeObjects"]);
    }

    #[test]
    fn test_display_annotations() {
        let err = BucketError::BucketNotExist.annotate("ListObjects");
        assert_eq!(err.to_string(), "ListObjects: storage: bucket doesn't exist");

        let err = BucketError::Cancelled
            .annotate("ComposeObjects")
            .with_cleanup_failure(BucketError::NotFound("tmp".into()).annotate("DeleteObject"));
        assert_eq!(
            err.to_string(),
            "ComposeObjects: context canceled (cleanup also failed: DeleteObject: not found: tmp)"
        );
    }

    #[test]
    fn test_io_roundtrip_preserves_bucket_error() {
        let io_err = io::Error::other(BucketError::DeadlineExceeded);
        let err: BucketError = io_err.into();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);

        let plain: BucketError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert_eq!(plain.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_result_annotate() {
        let result: BucketResult<()> = Err(BucketError::Precondition("gen".into()));
        let err = result.annotate("CreateObject").unwrap_err();
        assert_eq!(err.to_string(), "CreateObject: precondition failed: gen");
        assert!(err.is_precondition());
    }
}
