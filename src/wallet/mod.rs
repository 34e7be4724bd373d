pub mod key_derivation;
pub mod operator_key;
