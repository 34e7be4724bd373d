pub mod evm_client;

#[cfg(test)]
pub(crate) mod simulated_node;
