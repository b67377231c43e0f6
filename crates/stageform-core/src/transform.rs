//! Intake-stage payload transforms.
//!
//! A [`PayloadTransform`] is a pure function from a typed input record to a
//! derived result. Sessions only see the erased [`IntakePipeline`], so the
//! state machine never names a concrete schema.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{deserialize_record, normalize_payload, render_payload};
use crate::errors::CodecError;

/// Typed intake strategy.
pub trait PayloadTransform: Send + Sync + 'static {
    type Input: DeserializeOwned + Serialize;
    type Output: Serialize;

    fn transform(&self, input: &Self::Input) -> Self::Output;
}

/// What a successful intake produces.
#[derive(Clone, Debug, PartialEq)]
pub struct IntakeOutcome {
    /// Accumulator entry: rendering of the decoded input.
    pub rendered: String,
    /// Derived result written back to the peer.
    pub result: Value,
}

/// Object-safe intake step: decode, render, transform.
pub trait IntakePipeline: Send + Sync {
    fn run(&self, data: &Value) -> Result<IntakeOutcome, CodecError>;
}

impl<T: PayloadTransform> IntakePipeline for T {
    fn run(&self, data: &Value) -> Result<IntakeOutcome, CodecError> {
        let input: T::Input = normalize_payload(data)?;
        let rendered = render_payload(&input)?;
        let result = serde_json::to_value(self.transform(&input)).map_err(CodecError::Encode)?;
        Ok(IntakeOutcome { rendered, result })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: i64,
}

/// Intake record for the reference transform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileInput {
    pub first_name: String,
    pub last_name: String,
    pub age: i64,
    #[serde(deserialize_with = "deserialize_record")]
    pub address: Address,
    #[serde(default)]
    pub hobbies: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub full_name: String,
    pub age: i64,
    pub full_address: String,
    pub hobbies: Vec<String>,
    pub number_of_hobbies: usize,
}

/// Flattens a [`ProfileInput`] into a [`ProfileSummary`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ProfileTransform;

impl PayloadTransform for ProfileTransform {
    type Input = ProfileInput;
    type Output = ProfileSummary;

    fn transform(&self, input: &ProfileInput) -> ProfileSummary {
        ProfileSummary {
            full_name: format!("{} {}", input.first_name, input.last_name),
            age: input.age,
            full_address: flatten_address(&input.address),
            hobbies: input.hobbies.clone(),
            number_of_hobbies: input.hobbies.len(),
        }
    }
}

fn flatten_address(addr: &Address) -> String {
    format!("{} {}, {} - {}", addr.street, addr.city, addr.state, addr.zip_code)
}
