use serde::{Deserialize, Serialize};

use rentledger_core::{DomainError, InstrumentId, Money};

/// Catalog entry: one instrument model that physical units are instances of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    id: InstrumentId,
    name: String,
    kind: String,
    brand: String,
    base_cost: Money,
}

/// Input for registering a catalog instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInstrument {
    pub id: InstrumentId,
    /// Display name used for filtering, e.g. `"guitar"`.
    pub name: String,
    /// Instrument family, e.g. `"string"`.
    pub kind: String,
    pub brand: String,
    pub base_cost: Money,
}

impl Instrument {
    pub fn new(input: NewInstrument) -> Result<Self, DomainError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("instrument name cannot be empty"));
        }
        let kind = input.kind.trim();
        if kind.is_empty() {
            return Err(DomainError::validation("instrument kind cannot be empty"));
        }

        Ok(Self {
            id: input.id,
            name: name.to_string(),
            kind: kind.to_string(),
            brand: input.brand.trim().to_string(),
            base_cost: input.base_cost,
        })
    }

    pub fn id_typed(&self) -> InstrumentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn brand(&self) -> &str {
        &self.brand
    }

    pub fn base_cost(&self) -> Money {
        self.base_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, kind: &str) -> NewInstrument {
        NewInstrument {
            id: InstrumentId::new(),
            name: name.to_string(),
            kind: kind.to_string(),
            brand: " Yamaha ".to_string(),
            base_cost: Money::from_minor(25_000).unwrap(),
        }
    }

    #[test]
    fn new_instrument_is_normalised() {
        let instrument = Instrument::new(input(" guitar ", "string")).unwrap();
        assert_eq!(instrument.name(), "guitar");
        assert_eq!(instrument.brand(), "Yamaha");
        assert_eq!(instrument.base_cost().minor(), 25_000);
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = Instrument::new(input("  ", "string")).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn blank_kind_is_rejected() {
        assert!(Instrument::new(input("cello", "")).is_err());
    }
}
