//! Commitment codec: preimages and the payment hashes derived from them.

mod payment;

pub use payment::{hash, verify, PaymentHash, Preimage, HASH_LEN};
