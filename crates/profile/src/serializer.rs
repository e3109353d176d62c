use crate::profile::Profile;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Turns a profile into the bytes written to a snapshot file.
pub trait ProfileSerializer: Send + Sync {
    fn serialize(&self, profile: &Profile, pretty: bool) -> Result<Vec<u8>, SerializeError>;
}

/// JSON serializer. Pretty output is tab-indented, matching how the host
/// writes its own profile files; compact output has no whitespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonProfileSerializer;

impl ProfileSerializer for JsonProfileSerializer {
    fn serialize(&self, profile: &Profile, pretty: bool) -> Result<Vec<u8>, SerializeError> {
        if !pretty {
            return Ok(serde_json::to_vec(profile)?);
        }
        let mut buf = Vec::new();
        let mut ser =
            serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"\t"));
        profile.serialize(&mut ser)?;
        Ok(buf)
    }
}
