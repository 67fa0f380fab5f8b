mod cpf;
mod audit;

pub use cpf::Cpf;
pub use audit::*;

use base64::prelude::*;
use serde::{Deserialize, Serialize};

/// How the operator produced the signature. The compositor never looks at it: every kind
/// arrives already rasterized.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureKind {
    Drawn,
    Typed,
    Uploaded,
}

/// A signature as it comes from the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignatureInput {
    pub kind: SignatureKind,
    /// Image bytes, either plain base64 or a `data:image/...;base64,` URL.
    pub raster: String,
}

impl SignatureInput {
    /// Resolves the input to raw image bytes.
    pub fn into_raster(self) -> Result<SignatureRaster, base64::DecodeError> {
        let payload = match self.raster.split_once(',') {
            Some((header, data)) if header.starts_with("data:") => data,
            _ => self.raster.as_str(),
        };
        let bytes = BASE64_STANDARD.decode(payload.trim())?;
        Ok(SignatureRaster {
            kind: self.kind,
            bytes,
        })
    }
}

/// Encoded image bytes (PNG or JPEG) of a signature.
#[derive(Clone, Debug, PartialEq)]
pub struct SignatureRaster {
    pub kind: SignatureKind,
    pub bytes: Vec<u8>,
}

impl SignatureRaster {
    pub fn new(kind: SignatureKind, bytes: Vec<u8>) -> SignatureRaster {
        SignatureRaster { kind, bytes }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_and_plain_base64() {
        let encoded = BASE64_STANDARD.encode(b"\x89PNG fake");
        let url = SignatureInput {
            kind: SignatureKind::Drawn,
            raster: format!("data:image/png;base64,{encoded}"),
        };
        let plain = SignatureInput {
            kind: SignatureKind::Uploaded,
            raster: encoded,
        };
        assert_eq!(url.into_raster().unwrap().bytes, b"\x89PNG fake");
        let plain = plain.into_raster().unwrap();
        assert_eq!(plain.bytes, b"\x89PNG fake");
        assert_eq!(plain.kind, SignatureKind::Uploaded);
    }

    #[test]
    fn test_empty_raster() {
        let input = SignatureInput {
            kind: SignatureKind::Typed,
            raster: "data:image/png;base64,".to_string(),
        };
        assert!(input.into_raster().unwrap().is_empty());
    }

    #[test]
    fn test_bad_base64() {
        let input = SignatureInput {
            kind: SignatureKind::Typed,
            raster: "%%%".to_string(),
        };
        assert!(input.into_raster().is_err());
    }
}
