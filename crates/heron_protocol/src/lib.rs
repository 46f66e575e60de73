pub mod codec;
pub mod types;

pub use codec::{decode_frame, encode_frame};
pub use types::*;
