use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::commitment::BlobCommitment;
use crate::config;
use crate::error::{Error, Result};

/// A typed Move entry-function argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveArg {
    String(String),
    U64(u64),
    U32(u32),
    Bytes(Vec<u8>),
}

impl MoveArg {
    /// Wallet-extension form: u64 as a decimal string, byte vectors as a plain
    /// array of numbers.
    pub fn to_wallet_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::U64(v) => Value::String(v.to_string()),
            Self::U32(v) => json!(v),
            Self::Bytes(b) => json!(b),
        }
    }

    /// `aptos move run --json-file` form.
    pub fn to_cli_json(&self) -> Value {
        match self {
            Self::String(s) => json!({ "type": "string", "value": s }),
            Self::U64(v) => json!({ "type": "u64", "value": v.to_string() }),
            Self::U32(v) => json!({ "type": "u32", "value": v.to_string() }),
            Self::Bytes(b) => json!({ "type": "hex", "value": format!("0x{}", hex::encode(b)) }),
        }
    }
}

/// Unsigned transaction payload that registers a blob's metadata on-chain.
#[derive(Debug, Clone)]
pub struct RegistrationPayload {
    pub function: String,
    pub arguments: Vec<MoveArg>,
    pub max_gas_amount: u64,
    pub gas_unit_price: u64,
    pub expiration_micros: i64,
}

#[derive(Serialize)]
struct EntryFunctionPayload<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a str,
    type_arguments: [&'static str; 0],
    arguments: Vec<Value>,
    max_gas_amount: String,
    gas_unit_price: String,
}

impl RegistrationPayload {
    /// JSON accepted by browser wallet extensions (`entry_function_payload`).
    pub fn to_wallet_json(&self) -> Value {
        let payload = EntryFunctionPayload {
            kind: "entry_function_payload",
            function: &self.function,
            type_arguments: [],
            arguments: self.arguments.iter().map(MoveArg::to_wallet_json).collect(),
            max_gas_amount: self.max_gas_amount.to_string(),
            gas_unit_price: self.gas_unit_price.to_string(),
        };
        json!(payload)
    }

    /// JSON accepted by `aptos move run --json-file`.
    pub fn to_cli_json(&self) -> Value {
        json!({
            "function_id": self.function,
            "type_args": [],
            "args": self.arguments.iter().map(MoveArg::to_cli_json).collect::<Vec<_>>(),
        })
    }
}

/// Convert a retention period into an absolute expiration timestamp in
/// microseconds. The period is clamped to at least one day, so the result is
/// always strictly after `now`. Periods that overflow the timestamp are
/// rejected as invalid input.
pub fn expiration_micros(now: DateTime<Utc>, retention_days: i64) -> Result<i64> {
    let days = config::clamp_retention_days(retention_days);
    days.checked_mul(config::MICROS_PER_DAY)
        .and_then(|span| now.timestamp_micros().checked_add(span))
        .ok_or_else(|| Error::invalid("retention period too long"))
}

/// Builds register-blob payloads for a fixed module address.
#[derive(Debug, Clone)]
pub struct RegistrationBuilder {
    module_address: String,
}

impl RegistrationBuilder {
    pub fn new(module_address: impl Into<String>) -> Self {
        Self {
            module_address: module_address.into(),
        }
    }

    pub fn function_id(&self) -> String {
        format!(
            "{}::{}::{}",
            self.module_address,
            config::REGISTER_MODULE,
            config::REGISTER_FUNCTION
        )
    }

    /// Build the registration payload for `name` owned by `owner`, expiring
    /// `retention_days` after `now`.
    pub fn build(
        &self,
        owner: &str,
        name: &str,
        commitment: &BlobCommitment,
        retention_days: i64,
        now: DateTime<Utc>,
    ) -> Result<RegistrationPayload> {
        if owner.trim().is_empty() {
            return Err(Error::invalid("owner address is required"));
        }
        if name.trim().is_empty() {
            return Err(Error::invalid("blob name is required"));
        }

        let expiration = expiration_micros(now, retention_days)?;

        Ok(RegistrationPayload {
            function: self.function_id(),
            arguments: vec![
                MoveArg::String(name.to_string()),
                MoveArg::U64(expiration as u64),
                MoveArg::Bytes(commitment.merkle_root.to_vec()),
                MoveArg::U32(commitment.num_chunksets),
                MoveArg::U64(commitment.raw_size),
            ],
            max_gas_amount: config::MAX_GAS_AMOUNT,
            gas_unit_price: config::GAS_UNIT_PRICE,
            expiration_micros: expiration,
        })
    }
}
