pub mod common;
pub mod index;
pub mod locate;
pub mod metadata;
pub mod roundtrip;
pub mod webdata;
