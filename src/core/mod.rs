// Core modules implementing store access, decoding, dumping, and error modeling.
pub mod builder;
pub mod column;
pub mod decode;
pub mod dump;
pub mod engine;
pub mod error;
pub mod format;
pub mod json;
pub mod mem;
pub mod store;
