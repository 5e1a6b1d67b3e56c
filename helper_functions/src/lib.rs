pub mod accessors;
pub mod block_rewards;
pub mod electra;
pub mod epoch_context;
pub mod error;
pub mod fork;
pub mod misc;
pub mod mutators;
pub mod predicates;
pub mod signing;
pub mod verifier;
