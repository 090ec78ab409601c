pub mod merkle;

pub use merkle::merkle_root;
