//! Recap Insight crate - statistics and prose derived from a window's events.
//!
//! Provides:
//! - Edit magnitude scoring and bucketing
//! - Per-type aggregation and top contributors
//! - Window-over-window trends
//! - Summary building with highlights, transforms and an optional narrative

pub mod aggregate;
pub mod error;
pub mod magnitude;
pub mod narrative;
pub mod summary;
pub mod transform;
pub mod trend;

pub use aggregate::{aggregate, top_contributors};
pub use error::InsightError;
pub use magnitude::{EditMagnitude, MagnitudeScorer};
pub use narrative::{
    narrator_from_config, CredentialGated, DisabledNarrator, Narrator, TemplateNarrator,
    NO_NARRATIVE,
};
pub use summary::SummaryBuilder;
pub use transform::{
    apply_filters, apply_transforms, HighlightLimit, IgnoredTypes, IngestFilter,
    SummaryTransform,
};
pub use trend::compare;
