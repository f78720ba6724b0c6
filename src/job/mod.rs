mod brand;
mod model;
mod status;

pub use brand::{BrandColor, BrandStyle, BrandTone, ColorUsage};
pub use model::{
    AssetRef, AuditEvent, AuditKind, Capability, CaptionConfig, ImageConfig, Job, RetryConfig,
    TaskPlan, VideoConfig,
};
pub use status::JobStatus;
