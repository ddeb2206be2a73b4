#![warn(missing_docs)]

//! pipecache fingerprint evaluation: turns ordered cache-key segments into a [`Fingerprint`].
//!
//! Literal segments pass through verbatim. Path segments are comma-separated glob rules
//! (`!` marks an exclude) that are resolved against a root directory, enumerated, and
//! folded into an order-independent content hash (Key mode) or a sorted set of relative
//! paths (Path mode).

pub mod enumerate;
pub mod error;
pub mod evaluator;
pub mod fingerprint;
pub mod glob;
pub mod path;
pub mod segment;

pub use enumerate::{enumerate_matches, EnumerationPlan, EnumerationRoot};
pub use error::{FingerprintError, FingerprintResult};
pub use evaluator::FingerprintCreator;
pub use fingerprint::{split_key, Fingerprint, FingerprintKind, WILDCARD};
pub use glob::{compile, GlobDecision, GlobFilter, GlobPredicate};
pub use path::{lexical_normalize, relative_to, resolve_rule, to_slash};
pub use segment::{parse_segment, KeySegment, PathExpression};
