//! Module containing the universal error type for this crate
use thiserror::Error;

/// Universal error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("node is not present in this `Context`")]
    BadNode,

    #[error("`Context` is empty")]
    EmptyContext,

    #[error("opcode {0} is not supported by the tape evaluators")]
    UnsupportedOpcode(String),

    #[error("tape requires {0} slots, but at most 255 are addressable")]
    TooManySlots(usize),

    #[error("tile size list must not be empty")]
    EmptyTileSizes,

    #[error("tile sizes must be in descending order ({0} <= {1})")]
    BadTileOrder(usize, usize),

    #[error("tile size {0} is not divisible by subsequent tile size {1}")]
    BadTileSize(usize, usize),

    #[error("image size {0} is not a multiple of the largest tile size {1}")]
    BadImageSize(usize, usize),

    #[error("failed to build worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
