pub mod frost_bridge;
pub mod signer;
