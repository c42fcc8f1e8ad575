//! Proof artifacts exchanged with the engine.
//!
//! Keys are capabilities: they wrap an engine-side identifier, are not
//! `Clone`, and are released through the engine when the pipeline that
//! created them is reset or dropped.

use std::fmt;

use proofbridge_sandbox::KeyId;

/// Size of a serialized field element.
pub const FIELD_SIZE: usize = 32;

/// Serialized description of an arithmetic circuit, as consumed by the
/// engine's composer constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintSystem(Vec<u8>);

impl ConstraintSystem {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A field element in big-endian form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FieldElement([u8; FIELD_SIZE]);

impl FieldElement {
    pub fn from_be_bytes(bytes: [u8; FIELD_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; FIELD_SIZE];
        bytes[FIELD_SIZE - 8..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    pub fn to_be_bytes(&self) -> [u8; FIELD_SIZE] {
        self.0
    }
}

impl From<u64> for FieldElement {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Ordered witness values (also used for public inputs).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment(Vec<FieldElement>);

impl Assignment {
    pub fn new(values: Vec<FieldElement>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[FieldElement] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, value: impl Into<FieldElement>) {
        self.0.push(value.into());
    }

    /// Engine wire form: a big-endian `u32` count followed by each element.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.0.len() * FIELD_SIZE);
        out.extend_from_slice(&(self.0.len() as u32).to_be_bytes());
        for value in &self.0 {
            out.extend_from_slice(&value.0);
        }
        out
    }
}

impl FromIterator<FieldElement> for Assignment {
    fn from_iter<I: IntoIterator<Item = FieldElement>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Proof bytes produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof(Vec<u8>);

impl Proof {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Engine-side proving key.
#[derive(Debug, PartialEq, Eq)]
pub struct ProvingKey(pub(crate) KeyId);

impl ProvingKey {
    pub fn id(&self) -> KeyId {
        self.0
    }
}

/// Engine-side verification key.
#[derive(Debug, PartialEq, Eq)]
pub struct VerificationKey(pub(crate) KeyId);

impl VerificationKey {
    pub fn id(&self) -> KeyId {
        self.0
    }
}

/// Result of verifying a proof. A rejected proof is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Accepted,
    Rejected,
}

impl VerificationOutcome {
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

impl From<bool> for VerificationOutcome {
    fn from(accepted: bool) -> Self {
        if accepted {
            Self::Accepted
        } else {
            Self::Rejected
        }
    }
}
