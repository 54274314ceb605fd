//! ---
//! cairn_section: "03-persistence-logging"
//! cairn_subsection: "module"
//! cairn_type: "source"
//! cairn_scope: "code"
//! cairn_description: "Memento persistence abstractions and storage bindings."
//! cairn_version: "v0.1.0"
//! cairn_owner: "tbd"
//! ---
use std::fmt;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::memento::Memento;
use crate::{PersistenceError, Result};

/// Attempts made by [`RetryingCodec`] unless configured otherwise.
pub const MAX_SERIALIZATION_ATTEMPTS: usize = 5;

/// Codec operation, reported when retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecOperation {
    /// Memento to text.
    Encode,
    /// Text to memento.
    Decode,
}

impl fmt::Display for CodecOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CodecOperation::Encode => "encode",
            CodecOperation::Decode => "decode",
        })
    }
}

/// The `(id, type)` pair a manifest scan extracts from a document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestEntry {
    /// Memento identifier.
    pub id: String,
    /// Originating type.
    #[serde(rename = "type")]
    pub kind: String,
}

/// Text codec for mementos.
pub trait MementoCodec: Send + Sync {
    /// Encode a memento into its durable text form.
    fn encode(&self, memento: &Memento) -> Result<String>;

    /// Decode a full memento.
    fn decode(&self, text: &str) -> Result<Memento>;

    /// Extract only `id` and `type`, without materialising the body.
    fn probe(&self, text: &str) -> Result<ManifestEntry>;
}

/// Pretty-printed JSON documents with top-level `category`, `id` and `type`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMementoCodec;

impl MementoCodec for JsonMementoCodec {
    fn encode(&self, memento: &Memento) -> Result<String> {
        Ok(serde_json::to_string_pretty(memento)?)
    }

    fn decode(&self, text: &str) -> Result<Memento> {
        Ok(serde_json::from_str(text)?)
    }

    fn probe(&self, text: &str) -> Result<ManifestEntry> {
        // Unknown fields are skipped without being built, so a malformed body still probes.
        Ok(serde_json::from_str(text)?)
    }
}

/// Retries encode/decode on the wrapped codec up to a fixed number of attempts.
#[derive(Debug, Clone)]
pub struct RetryingCodec<C> {
    inner: C,
    max_attempts: usize,
}

impl<C: MementoCodec> RetryingCodec<C> {
    /// Wrap `inner`; a cap of zero is treated as a single attempt.
    pub fn new(inner: C, max_attempts: usize) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
        }
    }

    /// The wrapped codec.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Attempt cap.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    fn attempt<T>(
        &self,
        operation: CodecOperation,
        mut call: impl FnMut(&C) -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 1;
        loop {
            match call(&self.inner) {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(%operation, attempt, "memento serialization succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt < self.max_attempts => {
                    warn!(
                        %operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "memento serialization failed; retrying"
                    );
                    attempt += 1;
                }
                Err(err) => {
                    return Err(PersistenceError::RetriesExhausted {
                        operation,
                        attempts: attempt,
                        source: Box::new(err),
                    })
                }
            }
        }
    }
}

impl<C: MementoCodec> MementoCodec for RetryingCodec<C> {
    fn encode(&self, memento: &Memento) -> Result<String> {
        self.attempt(CodecOperation::Encode, |codec| codec.encode(memento))
    }

    fn decode(&self, text: &str) -> Result<Memento> {
        self.attempt(CodecOperation::Decode, |codec| codec.decode(text))
    }

    fn probe(&self, text: &str) -> Result<ManifestEntry> {
        self.inner.probe(text)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::memento::{EntityMemento, LocationMemento, PolicyMemento};

    /// Fails the first `failures` calls of every operation, then delegates to JSON.
    struct FlakyCodec {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakyCodec {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }

        fn gate(&self) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(PersistenceError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "transient",
                )));
            }
            Ok(())
        }
    }

    impl MementoCodec for FlakyCodec {
        fn encode(&self, memento: &Memento) -> Result<String> {
            self.gate()?;
            JsonMementoCodec.encode(memento)
        }

        fn decode(&self, text: &str) -> Result<Memento> {
            self.gate()?;
            JsonMementoCodec.decode(text)
        }

        fn probe(&self, text: &str) -> Result<ManifestEntry> {
            JsonMementoCodec.probe(text)
        }
    }

    fn sample_mementos() -> Vec<Memento> {
        vec![
            EntityMemento::new("e1", "AppServer")
                .top_level()
                .with_display_name("web tier")
                .with_child("e2")
                .with_location("loc1")
                .with_policy("p1")
                .with_config("http.port", json!(8080))
                .with_attribute("service.up", json!(true))
                .into(),
            LocationMemento::new("loc1", "SshMachineLocation")
                .with_parent("region")
                .with_child("loc2")
                .with_config("user", json!("ops"))
                .into(),
            PolicyMemento::new("p1", "AutoScalerPolicy")
                .attached_to("e1")
                .with_config("max", json!(4))
                .with_flag("suspended", json!(false))
                .into(),
        ]
    }

    #[test]
    fn json_round_trip_preserves_every_kind() {
        let codec = JsonMementoCodec;
        for memento in sample_mementos() {
            let text = codec.encode(&memento).unwrap();
            assert_eq!(codec.decode(&text).unwrap(), memento);
        }
    }

    #[test]
    fn probe_survives_undecodable_body() {
        let text = r#"{"category":"entity","id":"e9","type":"Broken","children":42}"#;
        assert!(JsonMementoCodec.decode(text).is_err());
        let entry = JsonMementoCodec.probe(text).unwrap();
        assert_eq!(entry.id, "e9");
        assert_eq!(entry.kind, "Broken");
    }

    #[test]
    fn retry_recovers_from_transient_failures() {
        let codec = RetryingCodec::new(FlakyCodec::new(3), MAX_SERIALIZATION_ATTEMPTS);
        let memento: Memento = EntityMemento::new("e1", "AppServer").into();
        let text = codec.encode(&memento).unwrap();
        assert_eq!(codec.inner().calls.load(Ordering::SeqCst), 4);
        assert_eq!(codec.decode(&text).unwrap(), memento);
    }

    #[test]
    fn retry_gives_up_at_the_cap() {
        let codec = RetryingCodec::new(FlakyCodec::new(usize::MAX), 5);
        let memento: Memento = PolicyMemento::new("p1", "Restarter").into();
        match codec.encode(&memento).unwrap_err() {
            PersistenceError::RetriesExhausted {
                operation,
                attempts,
                ..
            } => {
                assert_eq!(operation, CodecOperation::Encode);
                assert_eq!(attempts, 5);
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(codec.inner().calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn retry_repeats_deterministic_decode_failures() {
        let codec = RetryingCodec::new(JsonMementoCodec, 2);
        let err = codec.decode("not json").unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::RetriesExhausted {
                operation: CodecOperation::Decode,
                attempts: 2,
                ..
            }
        ));
    }

    #[test]
    fn zero_cap_still_attempts_once() {
        let codec = RetryingCodec::new(JsonMementoCodec, 0);
        assert_eq!(codec.max_attempts(), 1);
    }
}
