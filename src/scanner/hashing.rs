use image::DynamicImage;
use img_hash::{HashAlg, HasherConfig};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Content digests of a media buffer, uppercase hex without separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    pub md5: String,
    pub sha256: String,
}

/// Compute MD5 and SHA-256 in one pass over `bytes`.
pub fn digest(bytes: &[u8]) -> ContentDigest {
    let mut md5_hasher = Md5::new();
    let mut sha256_hasher = Sha256::new();

    for chunk in bytes.chunks(64 * 1024) {
        md5_hasher.update(chunk);
        sha256_hasher.update(chunk);
    }

    ContentDigest {
        md5: format!("{:X}", md5_hasher.finalize()),
        sha256: format!("{:X}", sha256_hasher.finalize()),
    }
}

pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:X}", Md5::digest(bytes))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:X}", Sha256::digest(bytes))
}

/// Perceptual hash flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    Average,
    Perception,
    Difference,
    Wavelet,
}

impl HashKind {
    /// Kinds that can actually be computed.
    pub const IMPLEMENTED: [HashKind; 3] =
        [HashKind::Average, HashKind::Perception, HashKind::Difference];

    /// Value stored in `picturehash.kind`.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashKind::Average => "average",
            HashKind::Perception => "perception",
            HashKind::Difference => "difference",
            HashKind::Wavelet => "wavelet",
        }
    }

    pub fn flag_name(&self) -> &'static str {
        match self {
            HashKind::Average => "averageHash",
            HashKind::Perception => "perceptHash",
            HashKind::Difference => "diffHash",
            HashKind::Wavelet => "waveletHash",
        }
    }

    /// Reject kinds without an implementation.
    pub fn ensure_implemented(self) -> Result<Self> {
        match self {
            HashKind::Wavelet => Err(Error::Unimplemented("wavelet hash")),
            kind => Ok(kind),
        }
    }

    fn hasher(&self) -> Result<img_hash::Hasher> {
        let config = HasherConfig::new().hash_size(8, 8);
        let config = match self {
            HashKind::Average => config.hash_alg(HashAlg::Mean),
            HashKind::Perception => config.hash_alg(HashAlg::Mean).preproc_dct(),
            HashKind::Difference => config.hash_alg(HashAlg::Gradient),
            HashKind::Wavelet => return Err(Error::Unimplemented("wavelet hash")),
        };
        Ok(config.to_hasher())
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag_name())
    }
}

impl FromStr for HashKind {
    type Err = Error;

    /// Accepts both the flag names (`perceptHash`) and the stored names (`perception`).
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "averageHash" | "average" => Ok(HashKind::Average),
            "perceptHash" | "perception" => Ok(HashKind::Perception),
            "diffHash" | "difference" => Ok(HashKind::Difference),
            "waveletHash" | "wavelet" => Ok(HashKind::Wavelet),
            other => Err(Error::Config(format!("unknown hash kind: {}", other))),
        }
    }
}

/// The three perceptual hashes of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PerceptualHashes {
    pub average: u64,
    pub perception: u64,
    pub difference: u64,
}

impl PerceptualHashes {
    pub fn compute(img: &DynamicImage) -> Result<Self> {
        Ok(Self {
            average: phash(img, HashKind::Average)?,
            perception: phash(img, HashKind::Perception)?,
            difference: phash(img, HashKind::Difference)?,
        })
    }

    pub fn get(&self, kind: HashKind) -> Option<u64> {
        match kind {
            HashKind::Average => Some(self.average),
            HashKind::Perception => Some(self.perception),
            HashKind::Difference => Some(self.difference),
            HashKind::Wavelet => None,
        }
    }
}

/// 64-bit perceptual hash of `img`.
pub fn phash(img: &DynamicImage, kind: HashKind) -> Result<u64> {
    let hasher = kind.hasher()?;

    // img_hash carries its own `image` version, so hand the pixels over raw.
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let converted = img_hash::image::RgbaImage::from_raw(width, height, rgba.into_raw())
        .ok_or_else(|| Error::Decode("failed to create image for hashing".to_string()))?;

    let hash = hasher.hash_image(&img_hash::image::DynamicImage::ImageRgba8(converted));
    let bytes: [u8; 8] = hash
        .as_bytes()
        .try_into()
        .map_err(|_| Error::Decode(format!("unexpected hash length {}", hash.as_bytes().len())))?;

    Ok(u64::from_be_bytes(bytes))
}

/// Number of differing bits between two hashes.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 128])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_digest_matches_known_values() {
        let d = digest(b"abc");
        assert_eq!(d.md5, "900150983CD24FB0D6963F7D28E17F72");
        assert_eq!(
            d.sha256,
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        );
        assert_eq!(md5_hex(b"abc"), d.md5);
        assert_eq!(sha256_hex(b"abc"), d.sha256);
    }

    #[test]
    fn test_digest_is_uppercase_fixed_width() {
        let d = digest(&[0u8; 100_000]);
        assert_eq!(d.md5.len(), 32);
        assert_eq!(d.sha256.len(), 64);
        assert!(d.md5.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_kind_names() {
        assert_eq!("perceptHash".parse::<HashKind>().unwrap(), HashKind::Perception);
        assert_eq!("averageHash".parse::<HashKind>().unwrap(), HashKind::Average);
        assert_eq!("diffHash".parse::<HashKind>().unwrap(), HashKind::Difference);
        assert_eq!("difference".parse::<HashKind>().unwrap(), HashKind::Difference);
        assert!("blockHash".parse::<HashKind>().is_err());
        assert!(HashKind::Wavelet.ensure_implemented().is_err());
    }

    #[test]
    fn test_same_pixels_same_hashes() {
        let a = PerceptualHashes::compute(&gradient(64, 48)).unwrap();
        let b = PerceptualHashes::compute(&gradient(64, 48)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_resized_image_stays_close() {
        let big = PerceptualHashes::compute(&gradient(400, 300)).unwrap();
        let small = PerceptualHashes::compute(&gradient(200, 150)).unwrap();
        assert!(hamming_distance(big.perception, small.perception) <= 8);
    }

    #[test]
    fn test_wavelet_not_computed() {
        assert!(phash(&gradient(16, 16), HashKind::Wavelet).is_err());
    }
}
