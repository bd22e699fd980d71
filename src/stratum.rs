use super::*;

mod authorize;
pub(crate) mod client;
mod difficulty;
mod error;
mod extranonce;
mod merkle;
mod message;
mod nbits;
mod nonce;
mod notify;
mod ntime;
mod prevhash;
mod set_difficulty;
mod submit;
mod subscribe;
mod suggest_difficulty;
mod version;

pub use {
    authorize::Authorize,
    difficulty::Difficulty,
    error::{InternalError, JsonRpcError},
    extranonce::Extranonce,
    merkle::MerkleNode,
    message::{Id, Message},
    nbits::Nbits,
    nonce::Nonce,
    notify::Notify,
    ntime::Ntime,
    prevhash::PrevHash,
    set_difficulty::SetDifficulty,
    submit::Submit,
    subscribe::{Subscribe, SubscribeResult},
    suggest_difficulty::SuggestDifficulty,
    version::Version,
};
