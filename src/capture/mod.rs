//! Capture pipeline: body normalization and text/binary classification

pub mod classify;
pub mod normalize;

pub use classify::{classify, mime_essence, BodyKind};
pub use normalize::{decode_body, read_body, recover_form_body, CaptureNormalizer, ContentEncoding};
