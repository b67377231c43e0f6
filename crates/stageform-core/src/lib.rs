pub mod codec;
pub mod errors;
pub mod ids;
pub mod response;
pub mod stage;
pub mod transform;

pub use codec::{decode_payload, encode_payload, normalize_payload, render_payload, Envelope};
pub use errors::CodecError;
pub use ids::SessionId;
pub use response::Response;
pub use stage::{EnvelopeKind, Stage};
pub use transform::{IntakeOutcome, IntakePipeline, PayloadTransform, ProfileTransform};
