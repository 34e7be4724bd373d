pub mod voter_did_registry;
