mod source;

pub use source::{QualityLink, RawSource, ResolveError, ResolvedSource, Subtitle};
