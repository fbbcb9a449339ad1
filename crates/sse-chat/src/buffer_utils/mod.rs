mod buffering;
mod frame_reader;

pub use buffering::CircularLineBuffer;
pub use frame_reader::{read_frames, FrameAssembler};
