//! File-level building blocks: discovery, reading, hashing, decoding,
//! thumbnails and EXIF.

pub mod decode;
pub mod discovery;
pub mod hashing;
pub mod metadata;
pub mod reader;
pub mod thumbnails;
pub mod video;

pub use decode::decode_image;
pub use discovery::{walk, Discovered, ExcludeFilter};
pub use hashing::{digest, md5_hex, sha256_hex, ContentDigest, HashKind, PerceptualHashes};
pub use metadata::{extract_exif, ExifInfo};
pub use reader::{FileReader, LoadedFile};
pub use thumbnails::{Derived, Thumbnail, Thumbnailer};
pub use video::Transcoder;
