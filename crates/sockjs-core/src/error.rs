/// Failures decoding an inbound message payload.
///
/// The `Display` text of each variant is the exact body the HTTP
/// transports answer with (status 500).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("Payload expected.")]
    Expected,
    #[error("Broken JSON encoding.")]
    BrokenJson,
}
