pub mod decode;
pub mod excerpt;

pub use decode::{decode, DecodeError, DecodedMidi};
pub use excerpt::{excerpt_smf, ExcerptError};
