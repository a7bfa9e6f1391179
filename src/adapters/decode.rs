//! Deserialization adapter: one decode of a fixed input per invocation.

use std::fmt;
use std::hint::black_box;
use std::marker::PhantomData;
use std::sync::Arc;

use clap::ValueEnum;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, OperationError, Result};
use crate::harness::{InvocationContext, Operation, Outcome};
use crate::payload::{LargeRecord, MediumRecord, SizeClass, SmallRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderKind {
    /// `serde_json`
    Standard,
    /// `simd-json` serde frontend
    Simd,
}

impl DecoderKind {
    pub const ALL: [DecoderKind; 2] = [DecoderKind::Standard, DecoderKind::Simd];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecoderKind::Standard => "standard",
            DecoderKind::Simd => "simd",
        }
    }

    pub fn library(&self) -> &'static str {
        match self {
            DecoderKind::Standard => "serde_json",
            DecoderKind::Simd => "simd-json",
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, input: &[u8]) -> std::result::Result<T, OperationError> {
        match self {
            DecoderKind::Standard => {
                serde_json::from_slice(input).map_err(|e| OperationError::Decode(e.to_string()))
            }
            DecoderKind::Simd => {
                // simd-json parses in place.
                let mut scratch = input.to_vec();
                simd_json::serde::from_slice(&mut scratch)
                    .map_err(|e| OperationError::Decode(e.to_string()))
            }
        }
    }
}

/// Target type of a decode, by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schema {
    /// `[{id,name}]`
    SmallRecords,
    MediumRecords,
    /// Records with nested address, friends and settings.
    LargeRecords,
}

impl Schema {
    pub fn for_size(size: SizeClass) -> Self {
        match size {
            SizeClass::Small => Schema::SmallRecords,
            SizeClass::Medium => Schema::MediumRecords,
            SizeClass::Large => Schema::LargeRecords,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Schema::SmallRecords => "small_records",
            Schema::MediumRecords => "medium_records",
            Schema::LargeRecords => "large_records",
        }
    }

    /// Type-erased operation decoding `input` into this schema.
    pub fn operation(&self, decoder: DecoderKind, input: Vec<u8>) -> Result<Arc<dyn Operation>> {
        let op: Arc<dyn Operation> = match self {
            Schema::SmallRecords => {
                Arc::new(DecodeOperation::<Vec<SmallRecord>>::new(decoder, input)?)
            }
            Schema::MediumRecords => {
                Arc::new(DecodeOperation::<Vec<MediumRecord>>::new(decoder, input)?)
            }
            Schema::LargeRecords => {
                Arc::new(DecodeOperation::<Vec<LargeRecord>>::new(decoder, input)?)
            }
        };
        Ok(op)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decodes the same bytes into `T` on every invocation.
pub struct DecodeOperation<T> {
    decoder: DecoderKind,
    input: Vec<u8>,
    _schema: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> DecodeOperation<T> {
    /// Fails if `input` does not decode into `T`, so a bad fixture is caught
    /// before anything is timed.
    pub fn new(decoder: DecoderKind, input: Vec<u8>) -> Result<Self> {
        let op = Self {
            decoder,
            input,
            _schema: PhantomData,
        };
        op.decode().map_err(|e| {
            BenchError::Config(format!(
                "input does not match {} schema ({}): {e}",
                std::any::type_name::<T>(),
                decoder.library()
            ))
        })?;
        Ok(op)
    }

    pub fn decode(&self) -> std::result::Result<T, OperationError> {
        self.decoder.decode(&self.input)
    }

    pub fn input_len(&self) -> usize {
        self.input.len()
    }
}

impl<T: DeserializeOwned> Operation for DecodeOperation<T> {
    fn invoke(&self, _ctx: &InvocationContext) -> std::result::Result<Outcome, OperationError> {
        let value = self.decode()?;
        black_box(&value);
        Ok(Outcome::identity(self.input.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::WireSize;
    use crate::payload::PayloadGenerator;

    const CTX: InvocationContext = InvocationContext {
        iteration: 0,
        worker: 0,
    };

    #[test]
    fn test_both_decoders_agree_on_every_schema() {
        let gen = PayloadGenerator::new(11);

        let input = gen.records(SizeClass::Small).unwrap();
        let a: Vec<SmallRecord> = DecoderKind::Standard.decode(&input).unwrap();
        let b: Vec<SmallRecord> = DecoderKind::Simd.decode(&input).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, gen.small_records());

        let input = gen.records(SizeClass::Medium).unwrap();
        let a: Vec<MediumRecord> = DecoderKind::Standard.decode(&input).unwrap();
        let b: Vec<MediumRecord> = DecoderKind::Simd.decode(&input).unwrap();
        assert_eq!(a, b);

        let input = gen.records(SizeClass::Large).unwrap();
        let a: Vec<LargeRecord> = DecoderKind::Standard.decode(&input).unwrap();
        let b: Vec<LargeRecord> = DecoderKind::Simd.decode(&input).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invoke_reports_input_length() {
        let input = PayloadGenerator::new(0).records(SizeClass::Small).unwrap();
        let len = input.len() as u64;
        for decoder in DecoderKind::ALL {
            let op = Schema::SmallRecords.operation(decoder, input.clone()).unwrap();
            let outcome = op.invoke(&CTX).unwrap();
            assert_eq!(outcome.decoded_bytes, len);
            assert_eq!(outcome.wire, WireSize::Identity);
        }
    }

    #[test]
    fn test_mismatched_input_is_rejected_at_construction() {
        let medium = PayloadGenerator::new(0).records(SizeClass::Medium).unwrap();
        for decoder in DecoderKind::ALL {
            assert!(Schema::LargeRecords.operation(decoder, medium.clone()).is_err());
            assert!(Schema::SmallRecords
                .operation(decoder, b"{\"not\":\"an array\"}".to_vec())
                .is_err());
        }
    }

    #[test]
    fn test_decode_errors_surface_as_operation_errors() {
        for decoder in DecoderKind::ALL {
            let err = decoder.decode::<Vec<SmallRecord>>(b"[{\"id\":").unwrap_err();
            assert!(matches!(err, OperationError::Decode(_)));
        }
    }

    #[test]
    fn test_schema_follows_size_class() {
        assert_eq!(Schema::for_size(SizeClass::Small), Schema::SmallRecords);
        assert_eq!(Schema::for_size(SizeClass::Large).to_string(), "large_records");
    }
}
