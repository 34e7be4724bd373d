pub mod binding_store;
