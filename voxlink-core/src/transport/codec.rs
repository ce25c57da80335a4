//! Outbound payload encoding.

use tracing::warn;

use crate::{audio::pcm, engine::EncoderKind};

/// Turns quantized samples into transport bytes.
pub trait PayloadEncoder: Send {
    fn name(&self) -> &str;

    fn encode(&mut self, samples: &[i16]) -> Vec<u8>;
}

/// Raw little-endian 16-bit PCM.
#[derive(Debug, Default, Clone, Copy)]
pub struct PcmEncoder;

impl PayloadEncoder for PcmEncoder {
    fn name(&self) -> &str {
        "pcm"
    }

    fn encode(&mut self, samples: &[i16]) -> Vec<u8> {
        pcm::to_le_bytes(samples)
    }
}

/// Pick the encoder `kind` asks for.
///
/// `External` needs the host to supply an encoder with the same name;
/// otherwise PCM is used.
pub fn build_encoder(
    kind: &EncoderKind,
    external: Option<Box<dyn PayloadEncoder>>,
) -> Box<dyn PayloadEncoder> {
    match (kind, external) {
        (EncoderKind::Pcm, _) => Box::new(PcmEncoder),
        (EncoderKind::External { name }, Some(enc)) if enc.name() == name.as_str() => enc,
        (EncoderKind::External { name }, _) => {
            warn!(encoder = %name, "external encoder not provided; sending raw PCM");
            Box::new(PcmEncoder)
        }
    }
}
